use std::collections::HashMap;

use parking_lot::RwLock;
use uuid::Uuid;

use crate::core::traits::HttpSession;
use crate::property::Value;

/// Stored session value. Flash values are removed on first read.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionAttribute {
    Value(Value),
    Flash(Value),
}

impl SessionAttribute {
    pub fn value(&self) -> &Value {
        match self {
            SessionAttribute::Value(v) | SessionAttribute::Flash(v) => v,
        }
    }

    pub fn into_value(self) -> Value {
        match self {
            SessionAttribute::Value(v) | SessionAttribute::Flash(v) => v,
        }
    }

    pub fn is_flash(&self) -> bool {
        matches!(self, SessionAttribute::Flash(_))
    }
}

/// In-process session store
pub struct MemorySession {
    id: String,
    attributes: RwLock<HashMap<String, SessionAttribute>>,
}

impl Default for MemorySession {
    fn default() -> Self {
        Self::new()
    }
}

impl MemorySession {
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            attributes: RwLock::new(HashMap::new()),
        }
    }
}

impl HttpSession for MemorySession {
    fn id(&self) -> &str {
        &self.id
    }

    fn attribute(&self, name: &str) -> Option<SessionAttribute> {
        self.attributes.read().get(name).cloned()
    }

    fn set_attribute(&self, name: &str, value: SessionAttribute) {
        self.attributes.write().insert(name.to_string(), value);
    }

    fn remove_attribute(&self, name: &str) -> Option<SessionAttribute> {
        self.attributes.write().remove(name)
    }

    fn attribute_names(&self) -> Vec<String> {
        self.attributes.read().keys().cloned().collect()
    }
}
