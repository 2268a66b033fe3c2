//! Per-request component registry
//!
//! Tracks the components selected as Ajax targets and the interceptors
//! registered against source components, and invokes their lifecycle
//! callbacks at the three fixed dispatch phases.

use std::{
    cell::RefCell,
    fmt,
    hash::{Hash, Hasher},
    rc::Rc,
};

use indexmap::IndexSet;
use log::{debug, warn};

use super::error::{RuntimeError, RuntimeResult};
use super::traits::{Behavior, Component};

/// Fixed points in request processing at which callbacks run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecyclePhase {
    PreResponse,
    PreRenderHeadElements,
    PreDestroy,
}

impl LifecyclePhase {
    fn invoke(self, behavior: &dyn Behavior, source: &dyn Component) -> RuntimeResult<()> {
        match self {
            LifecyclePhase::PreResponse => behavior.pre_response(source),
            LifecyclePhase::PreRenderHeadElements => behavior.pre_render_head_elements(source),
            LifecyclePhase::PreDestroy => behavior.pre_destroy(source),
        }
    }
}

impl fmt::Display for LifecyclePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LifecyclePhase::PreResponse => "PRE_RESPONSE",
            LifecyclePhase::PreRenderHeadElements => "PRE_RENDER_HEAD",
            LifecyclePhase::PreDestroy => "PRE_DESTROY",
        };
        f.write_str(name)
    }
}

fn addr<T: ?Sized>(rc: &Rc<T>) -> *const () {
    Rc::as_ptr(rc) as *const ()
}

/// Component handle compared by identity
#[derive(Clone)]
pub struct ComponentRef(Rc<dyn Component>);

impl ComponentRef {
    pub fn new(component: Rc<dyn Component>) -> Self {
        Self(component)
    }

    pub fn component(&self) -> &Rc<dyn Component> {
        &self.0
    }
}

impl PartialEq for ComponentRef {
    fn eq(&self, other: &Self) -> bool {
        std::ptr::eq(addr(&self.0), addr(&other.0))
    }
}

impl Eq for ComponentRef {}

impl Hash for ComponentRef {
    fn hash<H: Hasher>(&self, state: &mut H) {
        addr(&self.0).hash(state);
    }
}

impl fmt::Debug for ComponentRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Component({})", self.0.name())
    }
}

/// Behavior handle compared by identity
#[derive(Clone)]
pub struct BehaviorRef(Rc<dyn Behavior>);

impl BehaviorRef {
    pub fn new(behavior: Rc<dyn Behavior>) -> Self {
        Self(behavior)
    }

    pub fn behavior(&self) -> &Rc<dyn Behavior> {
        &self.0
    }
}

impl PartialEq for BehaviorRef {
    fn eq(&self, other: &Self) -> bool {
        std::ptr::eq(addr(&self.0), addr(&other.0))
    }
}

impl Eq for BehaviorRef {}

impl Hash for BehaviorRef {
    fn hash<H: Hasher>(&self, state: &mut H) {
        addr(&self.0).hash(state);
    }
}

impl fmt::Debug for BehaviorRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Behavior({:p})", addr(&self.0))
    }
}

/// Immutable (source component, interceptor) registration
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct InterceptorPair {
    pub component: ComponentRef,
    pub interceptor: BehaviorRef,
}

/// Registry of the components that receive lifecycle callbacks for one
/// request unit
#[derive(Default)]
pub struct ComponentRegistry {
    ajax_targets: RefCell<IndexSet<ComponentRef>>,
    interceptors: RefCell<IndexSet<InterceptorPair>>,
}

impl ComponentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a component to the Ajax target set. Returns false when it was
    /// already registered.
    pub fn register_ajax_target(&self, component: Rc<dyn Component>) -> bool {
        let name = component.name().to_string();
        let added = self
            .ajax_targets
            .borrow_mut()
            .insert(ComponentRef::new(component));
        if added {
            debug!("Registered Ajax target '{name}'");
        }
        added
    }

    /// Add an interceptor for `component`. Returns false when the identical
    /// pair is already registered.
    pub fn register_interceptor(
        &self,
        component: Rc<dyn Component>,
        interceptor: Rc<dyn Behavior>,
    ) -> bool {
        let name = component.name().to_string();
        let added = self.interceptors.borrow_mut().insert(InterceptorPair {
            component: ComponentRef::new(component),
            interceptor: BehaviorRef::new(interceptor),
        });
        if added {
            debug!("Registered interceptor for '{name}'");
        }
        added
    }

    pub fn has_ajax_targets(&self) -> bool {
        !self.ajax_targets.borrow().is_empty()
    }

    pub fn has_interceptors(&self) -> bool {
        !self.interceptors.borrow().is_empty()
    }

    /// Ajax targets in registration order
    pub fn ajax_targets(&self) -> Vec<ComponentRef> {
        self.ajax_targets.borrow().iter().cloned().collect()
    }

    /// Interceptor pairs in registration order
    pub fn interceptors(&self) -> Vec<InterceptorPair> {
        self.interceptors.borrow().iter().cloned().collect()
    }

    /// Run the callbacks of `phase`: behaviors of every Ajax target first,
    /// then every interceptor. The first error stops the phase and is
    /// returned unchanged.
    pub fn dispatch(&self, phase: LifecyclePhase) -> RuntimeResult<()> {
        // snapshots, so callbacks may register further components
        let targets = self.ajax_targets();
        let interceptors = self.interceptors();
        debug!(
            "Dispatching {phase} to {} targets and {} interceptors",
            targets.len(),
            interceptors.len()
        );

        for target in &targets {
            let component = target.component();
            if !component.has_behaviors() {
                continue;
            }
            for behavior in component.behaviors() {
                phase.invoke(behavior.as_ref(), component.as_ref())?;
            }
        }

        for pair in &interceptors {
            phase.invoke(
                pair.interceptor.behavior().as_ref(),
                pair.component.component().as_ref(),
            )?;
        }
        Ok(())
    }

    pub fn clear(&self) {
        self.ajax_targets.borrow_mut().clear();
        self.interceptors.borrow_mut().clear();
    }

    /// Error handler for the request unit: drops all registrations
    pub fn error_occurred(&self, error: &RuntimeError) {
        warn!("Clearing component registry after error: {error}");
        self.clear();
    }
}

impl fmt::Debug for ComponentRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComponentRegistry")
            .field("ajax_targets", &self.ajax_targets.borrow().len())
            .field("interceptors", &self.interceptors.borrow().len())
            .finish()
    }
}
