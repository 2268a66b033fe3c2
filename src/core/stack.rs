//! LIFO scope stack
//!
//! Holds the per-request values (contexts, registries) that are active on the
//! current unit of processing. A forward pushes a new value on top of the
//! outer one and pops it when the forwarded unit completes.

use std::rc::Rc;

/// Strict LIFO stack of request-scoped values, newest on top.
///
/// Pushing the value that is already on top is a no-op. Popping an empty
/// stack is a no-op as well.
pub struct ScopeStack<T> {
    frames: Vec<Rc<T>>,
}

impl<T> Default for ScopeStack<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> ScopeStack<T> {
    pub fn new() -> Self {
        Self { frames: Vec::new() }
    }

    /// Push `value` on top of the stack.
    ///
    /// Returns `false` when `value` already was the current value, in which
    /// case nothing changes.
    pub fn push(&mut self, value: Rc<T>) -> bool {
        if self.is_current(&value) {
            return false;
        }
        self.frames.push(value);
        true
    }

    /// Remove the current value, restoring the previous one.
    pub fn pop(&mut self) -> Option<Rc<T>> {
        self.frames.pop()
    }

    /// The current value, if any
    pub fn current(&self) -> Option<&Rc<T>> {
        self.frames.last()
    }

    /// The value that was current before the top one was pushed
    pub fn previous(&self) -> Option<&Rc<T>> {
        self.frames.len().checked_sub(2).and_then(|i| self.frames.get(i))
    }

    pub fn is_current(&self, value: &Rc<T>) -> bool {
        self.current().is_some_and(|top| Rc::ptr_eq(top, value))
    }

    /// Number of linked values
    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Drop every value at once
    pub fn clear(&mut self) {
        self.frames.clear();
    }
}
