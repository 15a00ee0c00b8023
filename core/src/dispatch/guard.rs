use std::sync::Arc;

use crate::val::{Shape, Value};

/// Applicability test for a cache node: cached method name plus a receiver
/// shape discriminant. Pure and allocation-free.
#[derive(Debug, Clone)]
pub(crate) struct Guard {
    name: Arc<str>,
    shape: ShapeGuard,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ShapeGuard {
    /// Receiver is exactly `true` or `false`.
    Boolean,
    Exact(Shape),
}

impl Guard {
    pub(crate) fn boolean(name: Arc<str>) -> Self {
        Self {
            name,
            shape: ShapeGuard::Boolean,
        }
    }

    pub(crate) fn exact(name: Arc<str>, shape: Shape) -> Self {
        debug_assert!(!shape.is_bool(), "booleans are cached by two-branch nodes");
        Self {
            name,
            shape: ShapeGuard::Exact(shape),
        }
    }

    #[inline]
    pub(crate) fn name(&self) -> &Arc<str> {
        &self.name
    }

    #[inline]
    pub(crate) fn shape(&self) -> ShapeGuard {
        self.shape
    }

    #[inline(always)]
    pub(crate) fn matches_name(&self, name: &str) -> bool {
        let cached: &str = &self.name;
        std::ptr::eq(cached, name) || cached == name
    }

    #[inline(always)]
    pub(crate) fn matches(&self, name: &str, receiver: &Value) -> bool {
        self.matches_name(name)
            && match self.shape {
                ShapeGuard::Boolean => matches!(receiver, Value::Bool(_)),
                ShapeGuard::Exact(shape) => receiver.shape() == shape,
            }
    }

    /// Whether this guard is the one responsible for (`name`, `shape`).
    pub(crate) fn covers(&self, name: &str, shape: Shape) -> bool {
        self.matches_name(name)
            && match self.shape {
                ShapeGuard::Boolean => shape.is_bool(),
                ShapeGuard::Exact(cached) => cached == shape,
            }
    }
}
