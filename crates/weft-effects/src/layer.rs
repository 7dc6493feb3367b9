//! Composable builders of dependency-injection context.
//!
//! A [`Layer`] is a build function `Context -> Context`. Layers compose
//! sequentially (`depends_on`, `used_by`): the second layer sees what the
//! first one built; and in parallel (`combine_with`): both layers see the
//! same input and their outputs are merged, right side winning.

use std::fmt;
use std::rc::Rc;

use crate::context::{Context, ContextError, Tag};

type BuildFn = dyn Fn(&Context) -> Result<Context, ContextError>;

/// A pure function value that extends (or narrows) a context.
#[derive(Clone)]
pub struct Layer {
    build: Rc<BuildFn>,
}

impl Layer {
    /// The identity layer.
    pub fn empty() -> Self {
        Self::from_fn(|ctx| Ok(ctx.clone()))
    }

    /// A layer from an arbitrary build function.
    pub fn from_fn(build: impl Fn(&Context) -> Result<Context, ContextError> + 'static) -> Self {
        Self {
            build: Rc::new(build),
        }
    }

    /// Provide an existing instance. Every application shares the same
    /// instance.
    pub fn from_value<S: 'static>(service: S, tag: Tag<S>) -> Self {
        let service = Rc::new(service);
        Self::from_fn(move |ctx| Ok(ctx.with_shared(tag, Rc::clone(&service))))
    }

    /// Build the service from what the incoming context already holds.
    pub fn from_factory<S: 'static>(
        tag: Tag<S>,
        factory: impl Fn(&Context) -> Result<S, ContextError> + 'static,
    ) -> Self {
        Self::from_fn(move |ctx| {
            let service = factory(ctx)?;
            Ok(ctx.with(tag, service))
        })
    }

    pub fn apply_to(&self, ctx: &Context) -> Result<Context, ContextError> {
        (self.build)(ctx)
    }

    /// Parallel composition: `a.combine_with(b)(ctx) = a(ctx).merge(b(ctx))`.
    pub fn combine_with(self, other: Layer) -> Layer {
        Self::from_fn(move |ctx| {
            let left = self.apply_to(ctx)?;
            let right = other.apply_to(ctx)?;
            Ok(left.merge(&right))
        })
    }

    /// Sequential composition where `other` is built first:
    /// `a.depends_on(b)(ctx) = a(b(ctx))`.
    pub fn depends_on(self, other: Layer) -> Layer {
        other.used_by(self)
    }

    /// Sequential composition where `self` is built first:
    /// `a.used_by(b)(ctx) = b(a(ctx))`.
    pub fn used_by(self, other: Layer) -> Layer {
        Self::from_fn(move |ctx| {
            let built = self.apply_to(ctx)?;
            other.apply_to(&built)
        })
    }
}

impl Default for Layer {
    fn default() -> Self {
        Self::empty()
    }
}

impl fmt::Debug for Layer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Layer(<build>)")
    }
}
