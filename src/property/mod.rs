//! Property path reading and writing
//!
//! Values read from requests and bound objects are modelled as [`Value`].
//! Bound objects expose their members through [`BeanType`] accessor tables;
//! the [`PropertyResolver`] walks dotted paths over both.

pub mod assign;
pub mod bean;
pub mod cache;
pub mod resolver;
pub mod value;

pub use assign::{AssignmentEngine, PathAssignmentEngine};
pub use bean::{Bean, BeanRef, BeanType};
pub use cache::{CacheStats, TtlCache};
pub use resolver::{PropertyResolver, PropertyService};
pub use value::{Value, ValueMap};
