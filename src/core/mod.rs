//! Core request runtime
//!
//! Contexts, component registries and the scope that stacks them while a
//! request (and any forward within it) is processed.

pub mod context;
pub mod error;
pub mod registry;
pub mod runtime;
pub mod stack;
pub mod traits;


// Re-export commonly used types
pub use context::{Context, IncomingRequest};
pub use error::{RuntimeError, RuntimeResult};
pub use registry::{ComponentRegistry, LifecyclePhase};
pub use runtime::{RequestHandler, RequestScope, Runtime, ScopeGuard};
pub use traits::*;
