//! Request-processing runtime for a component-based web framework.
//!
//! It defines the modules for request contexts and component registries,
//! property path resolution, request parameter shielding and configuration.

pub mod config;
pub mod core;
pub mod logging;
pub mod property;
pub mod request;
pub(crate) mod utils;
