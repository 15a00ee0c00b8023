//! Method resolution collaborator.
//!
//! The dispatch chain never walks class ancestry itself; it asks a
//! [`MethodResolver`] and caches what comes back together with the
//! [`Assumption`] that guards it.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use anyhow::Result;
use once_cell::sync::Lazy;

use crate::assumption::Assumption;
use crate::val::{ClassId, Value};

mod registry;


pub use registry::{ClassRegistry, builtin};

/// Name looked up when a method is missing and the call site asks for `method_missing`.
pub static METHOD_MISSING: Lazy<Arc<str>> = Lazy::new(|| Arc::from("method_missing"));

pub type MethodBody = Arc<dyn Fn(&Value, &[Value], Option<&Value>) -> Result<Value> + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Visibility {
    Public,
    Private,
}

static NEXT_METHOD_ID: AtomicU64 = AtomicU64::new(1);

/// Definition handed to a resolver; becomes a [`Method`] once it has an owner.
pub struct MethodDef {
    pub(crate) name: Arc<str>,
    pub(crate) visibility: Visibility,
    pub(crate) always_clone: bool,
    pub(crate) body: MethodBody,
}

impl MethodDef {
    pub fn new<F>(name: impl AsRef<str>, body: F) -> Self
    where
        F: Fn(&Value, &[Value], Option<&Value>) -> Result<Value> + Send + Sync + 'static,
    {
        Self {
            name: Arc::from(name.as_ref()),
            visibility: Visibility::Public,
            always_clone: false,
            body: Arc::new(body),
        }
    }

    /// Method that ignores its inputs and returns `value`.
    pub fn constant(name: impl AsRef<str>, value: Value) -> Self {
        Self::new(name, move |_, _, _| Ok(value.clone()))
    }

    pub fn private(mut self) -> Self {
        self.visibility = Visibility::Private;
        self
    }

    /// Ask the invocation mechanism for a per-call-site copy of this method.
    pub fn always_clone(mut self) -> Self {
        self.always_clone = true;
        self
    }
}

/// A resolved method: the invokable unit behind a cache branch.
pub struct Method {
    id: u64,
    name: Arc<str>,
    owner: ClassId,
    visibility: Visibility,
    always_clone: bool,
    body: MethodBody,
}

impl Method {
    pub(crate) fn from_def(def: MethodDef, owner: ClassId) -> Self {
        Self {
            id: NEXT_METHOD_ID.fetch_add(1, Ordering::Relaxed),
            name: def.name,
            owner,
            visibility: def.visibility,
            always_clone: def.always_clone,
            body: def.body,
        }
    }

    #[inline]
    pub fn id(&self) -> u64 {
        self.id
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    pub fn owner(&self) -> ClassId {
        self.owner
    }

    #[inline]
    pub fn visibility(&self) -> Visibility {
        self.visibility
    }

    #[inline]
    pub fn should_always_clone(&self) -> bool {
        self.always_clone
    }

    /// Copy sharing the body but carrying a fresh identity.
    pub(crate) fn split(&self) -> Self {
        Self {
            id: NEXT_METHOD_ID.fetch_add(1, Ordering::Relaxed),
            name: Arc::clone(&self.name),
            owner: self.owner,
            visibility: self.visibility,
            always_clone: self.always_clone,
            body: Arc::clone(&self.body),
        }
    }

    #[inline]
    pub fn call(&self, receiver: &Value, args: &[Value], block: Option<&Value>) -> Result<Value> {
        (self.body)(receiver, args, block)
    }
}

impl fmt::Debug for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Method")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("owner", &self.owner)
            .field("visibility", &self.visibility)
            .finish()
    }
}

/// Result of a full (uncached) lookup.
#[derive(Debug, Clone)]
pub struct Lookup {
    pub class: ClassId,
    pub method: Option<Arc<Method>>,
    /// Valid for as long as `method` is the answer for (`class`, name).
    pub assumption: Arc<Assumption>,
    /// Whether the receiver's class is stable enough to specialize on.
    pub cacheable: bool,
}

pub trait MethodResolver: Send + Sync {
    fn class_of(&self, receiver: &Value) -> ClassId;

    /// Full lookup. Must be deterministic for a fixed method-table version.
    fn resolve(&self, class: ClassId, name: &str, ignore_visibility: bool) -> Lookup;

    fn class_name(&self, class: ClassId) -> Arc<str>;
}
