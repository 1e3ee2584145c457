//! Minimal hierarchical service resolution.
//!
//! Each situation gets a child [`ServiceScope`] for its load lifetime,
//! chained to its parent's scope or to the container's root scope.
//! Resolution walks toward the root until a matching type is found.

use std::any::{Any, TypeId};
use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

/// A type-keyed service registry chained to an optional parent.
pub struct ServiceScope {
    label: String,
    parent: Option<Rc<ServiceScope>>,
    services: RefCell<HashMap<TypeId, Rc<dyn Any>>>,
    disposed: Cell<bool>,
}

impl ServiceScope {
    /// A parentless scope, used as the container-wide root.
    pub fn root(label: impl Into<String>) -> Rc<Self> {
        Rc::new(Self {
            label: label.into(),
            parent: None,
            services: RefCell::new(HashMap::new()),
            disposed: Cell::new(false),
        })
    }

    /// A scope resolving through `parent` when a lookup misses locally.
    pub fn child(parent: &Rc<Self>, label: impl Into<String>) -> Rc<Self> {
        Rc::new(Self {
            label: label.into(),
            parent: Some(parent.clone()),
            services: RefCell::new(HashMap::new()),
            disposed: Cell::new(false),
        })
    }

    /// Register `value` as the service for its type, replacing any previous one.
    pub fn inject<T: 'static>(&self, value: T) {
        if self.disposed.get() {
            tracing::warn!(scope = %self.label, "inject into disposed service scope ignored");
            return;
        }
        self.services
            .borrow_mut()
            .insert(TypeId::of::<T>(), Rc::new(value));
    }

    /// Find the nearest service of type `T`, searching parents.
    pub fn resolve<T: 'static>(&self) -> Option<Rc<T>> {
        let local = self.services.borrow().get(&TypeId::of::<T>()).cloned();
        match local {
            Some(service) => service.downcast::<T>().ok(),
            None => self.parent.as_ref()?.resolve::<T>(),
        }
    }

    /// Whether `T` is registered in this scope itself (parents ignored).
    pub fn contains_local<T: 'static>(&self) -> bool {
        self.services.borrow().contains_key(&TypeId::of::<T>())
    }

    /// Drop every local service. Later injections are ignored.
    pub fn dispose(&self) {
        self.services.borrow_mut().clear();
        self.disposed.set(true);
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.get()
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// Number of ancestors above this scope.
    pub fn depth(&self) -> usize {
        let mut depth = 0;
        let mut cursor = self.parent.as_ref();
        while let Some(scope) = cursor {
            depth += 1;
            cursor = scope.parent.as_ref();
        }
        depth
    }
}

impl fmt::Debug for ServiceScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceScope")
            .field("label", &self.label)
            .field("services", &self.services.borrow().len())
            .field("depth", &self.depth())
            .field("disposed", &self.disposed.get())
            .finish()
    }
}
