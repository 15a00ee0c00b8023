use std::fmt;
use std::sync::Arc;

/// Raised when neither the requested method nor `method_missing` exists for a
/// receiver. Travels inside `anyhow::Error`; callers can `downcast_ref` it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NoMethodError {
    pub name: Arc<str>,
    pub class: Arc<str>,
}

impl fmt::Display for NoMethodError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "undefined method `{}' for {}", self.name, self.class)
    }
}

impl std::error::Error for NoMethodError {}
