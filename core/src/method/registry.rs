use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use anyhow::{Result, anyhow, bail};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use rustc_hash::{FxHashMap, FxHashSet};
use tracing::trace;

use crate::assumption::{Assumption, CyclicAssumption};
use crate::val::{ClassId, Value};

use super::{Lookup, Method, MethodDef, MethodResolver, Visibility};

/// Class ids pre-registered by every [`ClassRegistry`].
pub mod builtin {
    use crate::val::ClassId;

    pub const OBJECT: ClassId = ClassId(0);
    pub const NIL_CLASS: ClassId = ClassId(1);
    pub const TRUE_CLASS: ClassId = ClassId(2);
    pub const FALSE_CLASS: ClassId = ClassId(3);
    pub const INTEGER: ClassId = ClassId(4);
    pub const FLOAT: ClassId = ClassId(5);
    pub const SYMBOL: ClassId = ClassId(6);
    pub const STRING: ClassId = ClassId(7);

    pub(super) const ALL: [(ClassId, &str); 8] = [
        (OBJECT, "Object"),
        (NIL_CLASS, "NilClass"),
        (TRUE_CLASS, "TrueClass"),
        (FALSE_CLASS, "FalseClass"),
        (INTEGER, "Integer"),
        (FLOAT, "Float"),
        (SYMBOL, "Symbol"),
        (STRING, "String"),
    ];
}

struct ClassEntry {
    name: Arc<str>,
    superclass: Option<ClassId>,
    methods: FxHashMap<Arc<str>, Arc<Method>>,
    unmodified: Arc<CyclicAssumption>,
    cacheable: bool,
}

impl ClassEntry {
    fn new(name: Arc<str>, superclass: Option<ClassId>) -> Self {
        let unmodified = Arc::new(CyclicAssumption::new(format!("{name} unmodified")));
        Self {
            name,
            superclass,
            methods: FxHashMap::default(),
            unmodified,
            cacheable: true,
        }
    }
}

/// Reference method resolver: single-inheritance classes with per-class
/// method tables and a cyclic "unmodified" assumption per class.
///
/// Entries live in a `DashMap`; no reference into the map is held across a
/// second map access, so lookups never wait on themselves.
pub struct ClassRegistry {
    classes: DashMap<ClassId, ClassEntry>,
    by_name: DashMap<Arc<str>, ClassId>,
    next_id: AtomicU32,
}

impl Default for ClassRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ClassRegistry {
    pub fn new() -> Self {
        let registry = Self {
            classes: DashMap::new(),
            by_name: DashMap::new(),
            next_id: AtomicU32::new(builtin::ALL.len() as u32),
        };
        for (id, name) in builtin::ALL {
            let superclass = (id != builtin::OBJECT).then_some(builtin::OBJECT);
            let name: Arc<str> = Arc::from(name);
            registry.by_name.insert(Arc::clone(&name), id);
            registry.classes.insert(id, ClassEntry::new(name, superclass));
        }
        registry
    }

    /// Define a new class. `superclass` defaults to `Object`.
    pub fn define_class(&self, name: &str, superclass: Option<ClassId>) -> Result<ClassId> {
        let superclass = superclass.unwrap_or(builtin::OBJECT);
        if !self.classes.contains_key(&superclass) {
            bail!("unknown superclass {superclass} for class {name}");
        }
        let name: Arc<str> = Arc::from(name);
        let id = match self.by_name.entry(Arc::clone(&name)) {
            Entry::Occupied(_) => bail!("class {name} is already defined"),
            Entry::Vacant(slot) => {
                let id = ClassId(self.next_id.fetch_add(1, Ordering::Relaxed));
                slot.insert(id);
                id
            }
        };
        self.classes.insert(id, ClassEntry::new(name, Some(superclass)));
        Ok(id)
    }

    pub fn class_id(&self, name: &str) -> Option<ClassId> {
        self.by_name.get(name).map(|id| *id)
    }

    pub fn superclass(&self, class: ClassId) -> Option<ClassId> {
        self.classes.get(&class).and_then(|entry| entry.superclass)
    }

    /// Current "unmodified" assumption for `class`.
    pub fn unmodified_assumption(&self, class: ClassId) -> Option<Arc<Assumption>> {
        self.classes.get(&class).map(|entry| entry.unmodified.current())
    }

    /// Mark a class as too volatile to specialize on. Invalidates caches built so far.
    pub fn set_cacheable(&self, class: ClassId, cacheable: bool) -> Result<()> {
        {
            let mut entry = self
                .classes
                .get_mut(&class)
                .ok_or_else(|| anyhow!("unknown class {class}"))?;
            entry.cacheable = cacheable;
        }
        self.invalidate_hierarchy(class, "cacheability changed");
        Ok(())
    }

    /// Define or redefine a method on `class`.
    pub fn define_method(&self, class: ClassId, def: MethodDef) -> Result<Arc<Method>> {
        let method = Arc::new(Method::from_def(def, class));
        {
            let mut entry = self
                .classes
                .get_mut(&class)
                .ok_or_else(|| anyhow!("unknown class {class}"))?;
            entry
                .methods
                .insert(Arc::from(method.name()), Arc::clone(&method));
        }
        self.invalidate_hierarchy(class, "method defined");
        Ok(method)
    }

    /// Remove a method from `class` itself (ancestors are untouched).
    pub fn remove_method(&self, class: ClassId, name: &str) -> Result<bool> {
        let removed = {
            let mut entry = self
                .classes
                .get_mut(&class)
                .ok_or_else(|| anyhow!("unknown class {class}"))?;
            entry.methods.remove(name).is_some()
        };
        if removed {
            self.invalidate_hierarchy(class, "method removed");
        }
        Ok(removed)
    }

    /// Roll over the assumption of `class` and of every class inheriting from it.
    fn invalidate_hierarchy(&self, class: ClassId, reason: &str) {
        let snapshot: Vec<(ClassId, Option<ClassId>, Arc<CyclicAssumption>)> = self
            .classes
            .iter()
            .map(|entry| (*entry.key(), entry.superclass, Arc::clone(&entry.unmodified)))
            .collect();
        let parents: FxHashMap<ClassId, Option<ClassId>> =
            snapshot.iter().map(|(id, superclass, _)| (*id, *superclass)).collect();

        let mut affected = FxHashSet::default();
        for (id, _, _) in &snapshot {
            let mut cursor = Some(*id);
            while let Some(current) = cursor {
                if current == class {
                    affected.insert(*id);
                    break;
                }
                cursor = parents.get(&current).copied().flatten();
            }
        }

        trace!(
            target: "sendcache::method",
            class = %class,
            reason,
            affected = affected.len(),
            "method table mutated"
        );
        for (id, _, unmodified) in snapshot {
            if affected.contains(&id) {
                unmodified.invalidate(reason);
            }
        }
    }
}

impl MethodResolver for ClassRegistry {
    fn class_of(&self, receiver: &Value) -> ClassId {
        match receiver {
            Value::Nil => builtin::NIL_CLASS,
            Value::Bool(true) => builtin::TRUE_CLASS,
            Value::Bool(false) => builtin::FALSE_CLASS,
            Value::Int(_) => builtin::INTEGER,
            Value::Float(_) => builtin::FLOAT,
            Value::Symbol(_) => builtin::SYMBOL,
            Value::Str(_) => builtin::STRING,
            Value::Object(obj) => obj.class,
        }
    }

    fn resolve(&self, class: ClassId, name: &str, ignore_visibility: bool) -> Lookup {
        // Capture the token before reading any table: a concurrent mutation can
        // only leave us holding an already-invalid token.
        let (assumption, cacheable) = match self.classes.get(&class) {
            Some(entry) => (entry.unmodified.current(), entry.cacheable),
            None => {
                return Lookup {
                    class,
                    method: None,
                    assumption: Assumption::new(format!("{class} unknown")),
                    cacheable: false,
                };
            }
        };

        let mut cursor = Some(class);
        let mut method = None;
        while let Some(current) = cursor {
            let (found, superclass) = match self.classes.get(&current) {
                Some(entry) => (entry.methods.get(name).cloned(), entry.superclass),
                None => break,
            };
            if let Some(found) = found {
                if ignore_visibility || found.visibility() == Visibility::Public {
                    method = Some(found);
                }
                break;
            }
            cursor = superclass;
        }

        Lookup {
            class,
            method,
            assumption,
            cacheable,
        }
    }

    fn class_name(&self, class: ClassId) -> Arc<str> {
        self.classes
            .get(&class)
            .map(|entry| Arc::clone(&entry.name))
            .unwrap_or_else(|| Arc::from(format!("<class {class}>")))
    }
}
