//! Type-keyed service map used for dependency lookup.
//!
//! A [`Context`] is immutable: every insertion or merge returns a new
//! context and leaves the original untouched, so a parent context can be
//! reused by sibling subtrees after a child has extended it.

use std::any::{self, Any, TypeId};
use std::fmt;
use std::hash::{BuildHasherDefault, Hash, Hasher};
use std::marker::PhantomData;
use std::rc::Rc;

use indexmap::IndexMap;
use rustc_hash::FxHasher;
use thiserror::Error;

// ============================================================================
// Keys
// ============================================================================

/// Identity of a service slot: the service type plus an optional tag that
/// lets two services of the same type coexist.
#[derive(Clone, Copy)]
pub struct TypeKey {
    type_id: TypeId,
    type_name: &'static str,
    tag: Option<&'static str>,
}

impl TypeKey {
    /// The untagged key for `S`.
    pub fn of<S: 'static>() -> Self {
        Self {
            type_id: TypeId::of::<S>(),
            type_name: any::type_name::<S>(),
            tag: None,
        }
    }

    /// A key for `S` distinguished by `tag`.
    pub fn tagged<S: 'static>(tag: &'static str) -> Self {
        Self {
            tag: Some(tag),
            ..Self::of::<S>()
        }
    }

    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    pub fn tag(&self) -> Option<&'static str> {
        self.tag
    }
}

impl PartialEq for TypeKey {
    fn eq(&self, other: &Self) -> bool {
        self.type_id == other.type_id && self.tag == other.tag
    }
}

impl Eq for TypeKey {}

impl Hash for TypeKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.type_id.hash(state);
        self.tag.hash(state);
    }
}

impl fmt::Debug for TypeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TypeKey({})", self)
    }
}

impl fmt::Display for TypeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.tag {
            Some(tag) => write!(f, "{}#{}", self.type_name, tag),
            None => write!(f, "{}", self.type_name),
        }
    }
}

/// A typed handle on a [`TypeKey`], used to insert and look up services
/// without spelling out downcasts.
pub struct Tag<S> {
    key: TypeKey,
    _service: PhantomData<fn() -> S>,
}

impl<S: 'static> Tag<S> {
    pub fn new() -> Self {
        Self {
            key: TypeKey::of::<S>(),
            _service: PhantomData,
        }
    }

    pub fn named(tag: &'static str) -> Self {
        Self {
            key: TypeKey::tagged::<S>(tag),
            _service: PhantomData,
        }
    }
}

impl<S> Tag<S> {
    pub fn key(&self) -> TypeKey {
        self.key
    }
}

impl<S: 'static> Default for Tag<S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S> Clone for Tag<S> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<S> Copy for Tag<S> {}

impl<S> fmt::Debug for Tag<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Tag({})", self.key)
    }
}

// ============================================================================
// Errors
// ============================================================================

/// Errors raised while reading from or building a context.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ContextError {
    #[error("service not found: {0}")]
    ServiceNotFound(TypeKey),
}

// ============================================================================
// Context
// ============================================================================

type ServiceMap = IndexMap<TypeKey, Rc<dyn Any>, BuildHasherDefault<FxHasher>>;

/// Immutable map from [`TypeKey`] to service instance.
#[derive(Clone, Default)]
pub struct Context {
    services: Rc<ServiceMap>,
}

impl Context {
    pub fn empty() -> Self {
        Self::default()
    }

    /// A new context with `service` stored under `tag`, replacing any
    /// previous entry for the same key.
    pub fn with<S: 'static>(&self, tag: Tag<S>, service: S) -> Context {
        self.with_shared(tag, Rc::new(service))
    }

    /// Like [`Context::with`] but stores an already shared instance.
    pub fn with_shared<S: 'static>(&self, tag: Tag<S>, service: Rc<S>) -> Context {
        self.with_erased(tag.key(), service)
    }

    /// Insert a type-erased instance. The caller guarantees that the
    /// instance's concrete type matches `key`.
    pub fn with_erased(&self, key: TypeKey, service: Rc<dyn Any>) -> Context {
        let mut services = ServiceMap::clone(&self.services);
        services.insert(key, service);
        Context {
            services: Rc::new(services),
        }
    }

    pub fn get<S: 'static>(&self, tag: Tag<S>) -> Option<Rc<S>> {
        self.get_erased(&tag.key())
            .and_then(|service| service.downcast::<S>().ok())
    }

    /// Look up a service, reporting a typed error when it is missing.
    pub fn require<S: 'static>(&self, tag: Tag<S>) -> Result<Rc<S>, ContextError> {
        self.get(tag)
            .ok_or(ContextError::ServiceNotFound(tag.key()))
    }

    pub fn get_erased(&self, key: &TypeKey) -> Option<Rc<dyn Any>> {
        self.services.get(key).cloned()
    }

    pub fn contains(&self, key: &TypeKey) -> bool {
        self.services.contains_key(key)
    }

    /// Right-biased union: entries of `other` win on conflicting keys.
    pub fn merge(&self, other: &Context) -> Context {
        if other.is_empty() {
            return self.clone();
        }
        if self.is_empty() {
            return other.clone();
        }
        let mut services = ServiceMap::clone(&self.services);
        for (key, service) in other.services.iter() {
            services.insert(*key, Rc::clone(service));
        }
        Context {
            services: Rc::new(services),
        }
    }

    pub fn len(&self) -> usize {
        self.services.len()
    }

    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }

    /// Keys in insertion order.
    pub fn keys(&self) -> impl Iterator<Item = &TypeKey> {
        self.services.keys()
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.services.keys()).finish()
    }
}
