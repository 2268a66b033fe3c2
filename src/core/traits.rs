//! Collaborator interfaces
//!
//! Components and behaviors live in the (external) component tree; sessions
//! and multipart parsing are provided by the hosting layer.

use std::rc::Rc;

use super::error::RuntimeResult;
use crate::request::{session::SessionAttribute, FileItem, RawRequest};

/// A node of the component tree
pub trait Component {
    /// Request parameter name the component binds to
    fn name(&self) -> &str;

    /// Markup id, when it differs from the name
    fn id(&self) -> Option<&str> {
        None
    }

    /// Parent used for message and locale lookup chains
    fn parent(&self) -> Option<Rc<dyn Component>> {
        None
    }

    /// Behaviors registered directly on this component, in registration order
    fn behaviors(&self) -> Vec<Rc<dyn Behavior>> {
        Vec::new()
    }

    fn has_behaviors(&self) -> bool {
        !self.behaviors().is_empty()
    }
}

/// Callback bundle invoked at the fixed lifecycle phases.
///
/// Used both as a behavior attached to a component and as an interceptor
/// registered against a source component.
pub trait Behavior {
    fn pre_response(&self, _source: &dyn Component) -> RuntimeResult<()> {
        Ok(())
    }

    fn pre_render_head_elements(&self, _source: &dyn Component) -> RuntimeResult<()> {
        Ok(())
    }

    fn pre_destroy(&self, _source: &dyn Component) -> RuntimeResult<()> {
        Ok(())
    }
}

/// Session attribute store
pub trait HttpSession: Send + Sync {
    fn id(&self) -> &str;

    fn attribute(&self, name: &str) -> Option<SessionAttribute>;

    fn set_attribute(&self, name: &str, value: SessionAttribute);

    fn remove_attribute(&self, name: &str) -> Option<SessionAttribute>;

    fn attribute_names(&self) -> Vec<String>;
}

/// Splits a multipart body into ordered items
pub trait UploadParser: Send + Sync {
    fn parse_request(&self, request: &RawRequest) -> RuntimeResult<Vec<FileItem>>;
}
