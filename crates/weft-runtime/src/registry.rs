//! Handler dispatch table.
//!
//! A [`HandlerRegistry`] maps every [`EffectTag`] to exactly one handler.
//! Dispatch is a single hash lookup. Uniqueness and completeness are
//! checked when the registry is built, so a registry that exists can
//! always dispatch.

use std::fmt;

use rustc_hash::FxHashMap;
use thiserror::Error;
use weft_effects::{Cause, Defect, EffectNode, EffectTag};

use crate::handlers;
use crate::runtime::Runtime;
use crate::state::RuntimeState;

/// Interprets one effect variant: takes the node and the state, returns
/// the next state.
pub type Handler<E> = fn(EffectNode<E>, RuntimeState<E>, &Runtime<E>) -> RuntimeState<E>;

/// Misconfiguration detected while building a registry.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("a handler for {0} is already registered")]
    Duplicate(EffectTag),

    #[error("no handler registered for {0}")]
    Missing(EffectTag),
}

/// Complete, immutable map from variant tag to handler.
pub struct HandlerRegistry<E> {
    handlers: FxHashMap<EffectTag, Handler<E>>,
}

impl<E: Clone + 'static> HandlerRegistry<E> {
    /// The reference handler set.
    pub fn standard() -> Self {
        Self {
            handlers: handlers::standard_handlers().into_iter().collect(),
        }
    }

    pub fn builder() -> HandlerRegistryBuilder<E> {
        HandlerRegistryBuilder::new()
    }
}

impl<E> HandlerRegistry<E> {
    pub fn get(&self, tag: EffectTag) -> Option<Handler<E>> {
        self.handlers.get(&tag).copied()
    }

    pub fn contains(&self, tag: EffectTag) -> bool {
        self.handlers.contains_key(&tag)
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Hand `node` to the handler registered for its tag.
    pub fn dispatch(
        &self,
        node: EffectNode<E>,
        state: RuntimeState<E>,
        runtime: &Runtime<E>,
    ) -> RuntimeState<E> {
        let tag = node.tag();
        match self.handlers.get(&tag) {
            Some(handler) => handler(node, state, runtime),
            None => state.fail(Cause::Defect(Defect::MissingHandler(tag.name()))),
        }
    }
}

impl<E: Clone + 'static> Default for HandlerRegistry<E> {
    fn default() -> Self {
        Self::standard()
    }
}

impl<E> fmt::Debug for HandlerRegistry<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut tags: Vec<_> = self.handlers.keys().copied().collect();
        tags.sort();
        f.debug_struct("HandlerRegistry")
            .field("handlers", &tags)
            .finish()
    }
}

/// Collects handlers and validates them into a [`HandlerRegistry`].
pub struct HandlerRegistryBuilder<E> {
    handlers: FxHashMap<EffectTag, Handler<E>>,
}

impl<E: Clone + 'static> HandlerRegistryBuilder<E> {
    pub fn new() -> Self {
        Self {
            handlers: FxHashMap::default(),
        }
    }

    /// Register the handler for `tag`. A second registration for the same
    /// tag is rejected.
    pub fn register(&mut self, tag: EffectTag, handler: Handler<E>) -> Result<&mut Self, RegistryError> {
        if self.handlers.contains_key(&tag) {
            return Err(RegistryError::Duplicate(tag));
        }
        self.handlers.insert(tag, handler);
        Ok(self)
    }

    /// Register the reference handler for every tag that has none yet.
    pub fn fill_standard(&mut self) -> &mut Self {
        for (tag, handler) in handlers::standard_handlers() {
            self.handlers.entry(tag).or_insert(handler);
        }
        self
    }

    /// Validate completeness and freeze the table.
    pub fn build(&mut self) -> Result<HandlerRegistry<E>, RegistryError> {
        if let Some(missing) = EffectTag::ALL
            .iter()
            .find(|tag| !self.handlers.contains_key(tag))
        {
            return Err(RegistryError::Missing(*missing));
        }
        Ok(HandlerRegistry {
            handlers: std::mem::take(&mut self.handlers),
        })
    }
}

impl<E: Clone + 'static> Default for HandlerRegistryBuilder<E> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn stub(_node: EffectNode<()>, state: RuntimeState<()>, _rt: &Runtime<()>) -> RuntimeState<()> {
        state.succeed_unit()
    }

    #[test]
    fn test_standard_registry_is_complete() {
        let registry: HandlerRegistry<()> = HandlerRegistry::standard();
        assert_eq!(registry.len(), EffectTag::ALL.len());
        for tag in EffectTag::ALL {
            assert!(registry.contains(tag), "missing {}", tag);
        }
    }

    #[test]
    fn test_standard_handler_list_has_no_duplicates() {
        let mut tags: Vec<_> = handlers::standard_handlers::<()>()
            .into_iter()
            .map(|(tag, _)| tag)
            .collect();
        let total = tags.len();
        tags.sort();
        tags.dedup();
        assert_eq!(tags.len(), total);
    }

    #[test]
    fn test_duplicate_registration_fails_fast() {
        let mut builder = HandlerRegistry::<()>::builder();
        builder.register(EffectTag::Sleep, stub).unwrap();
        let err = builder.register(EffectTag::Sleep, stub).err();
        assert_eq!(err, Some(RegistryError::Duplicate(EffectTag::Sleep)));
    }

    #[test]
    fn test_incomplete_registry_is_rejected() {
        let mut builder = HandlerRegistry::<()>::builder();
        builder.register(EffectTag::Pure, stub).unwrap();
        let err = builder.build().err();
        assert_eq!(err, Some(RegistryError::Missing(EffectTag::Fail)));
    }

    #[test]
    fn test_fill_standard_keeps_custom_handlers() {
        let mut builder = HandlerRegistry::<()>::builder();
        builder.register(EffectTag::Sleep, stub).unwrap();
        let registry = builder.fill_standard().build().unwrap();

        assert_eq!(registry.len(), EffectTag::ALL.len());
        let sleep = registry.get(EffectTag::Sleep).map(|h| h as usize);
        assert_eq!(sleep, Some(stub as Handler<()> as usize));
    }
}
