use std::marker::PhantomData;
use std::sync::Arc;

use crate::error::NoValuePresent;
use crate::property::{Property, PropertyRef};

/// A lazily-evaluated value expression (`spec.md §4.1`).
///
/// Every variant answers `or_none`/`get` by walking the expression tree at
/// evaluation time; nothing is cached here (a `Property` may cache via
/// `finalize`, but a bare `Provider` never does).
pub enum Provider<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// A plain, possibly-absent boxed value.
    Box(Option<T>),
    /// `map`/`flatmap`: a function applied lazily over an upstream provider.
    Combinator(Arc<dyn Combinator<T>>),
    /// `a.coalesce(b)`: yields `a` if present, else `b`.
    Coalescing(Box<Provider<T>>, Box<Provider<T>>),
    /// A reference to a named, owned `Property` — this is what lets
    /// `taskB.input = taskA.output` wire both value propagation and an
    /// automatic dependency edge.
    Prop(Arc<Property<T>>),
}

/// Type-erased combinator behind `Provider::Combinator`, so that `Mapped`
/// and `FlatMapped` can each hold an upstream provider of a different type
/// than their output without `Provider` itself needing a second type
/// parameter.
pub trait Combinator<T>: Send + Sync {
    fn get(&self) -> Option<T>;
    fn visit(&self, visitor: &mut dyn FnMut(Option<PropertyRef>) -> bool);
}

struct Mapped<U, T, F>
where
    U: Clone + Send + Sync + 'static,
    F: Fn(U) -> T + Send + Sync + 'static,
{
    upstream: Provider<U>,
    func: F,
    captured: Vec<PropertyRef>,
    _marker: PhantomData<fn() -> T>,
}

impl<U, T, F> Combinator<T> for Mapped<U, T, F>
where
    U: Clone + Send + Sync + 'static,
    T: Clone + Send + Sync + 'static,
    F: Fn(U) -> T + Send + Sync + 'static,
{
    fn get(&self) -> Option<T> {
        self.upstream.or_none().map(|v| (self.func)(v))
    }

    fn visit(&self, visitor: &mut dyn FnMut(Option<PropertyRef>) -> bool) {
        self.upstream.visit(visitor);
        for captured in &self.captured {
            visitor(Some(captured.clone()));
        }
    }
}

struct FlatMapped<U, T, F>
where
    U: Clone + Send + Sync + 'static,
    T: Clone + Send + Sync + 'static,
    F: Fn(U) -> Provider<T> + Send + Sync + 'static,
{
    upstream: Provider<U>,
    func: F,
    captured: Vec<PropertyRef>,
}

impl<U, T, F> Combinator<T> for FlatMapped<U, T, F>
where
    U: Clone + Send + Sync + 'static,
    T: Clone + Send + Sync + 'static,
    F: Fn(U) -> Provider<T> + Send + Sync + 'static,
{
    fn get(&self) -> Option<T> {
        self.upstream.or_none().and_then(|v| (self.func)(v).or_none())
    }

    fn visit(&self, visitor: &mut dyn FnMut(Option<PropertyRef>) -> bool) {
        self.upstream.visit(visitor);
        for captured in &self.captured {
            visitor(Some(captured.clone()));
        }
    }
}

impl<T> Provider<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn of(value: T) -> Self {
        Provider::Box(Some(value))
    }

    pub fn empty() -> Self {
        Provider::Box(None)
    }

    pub fn present(&self) -> bool {
        self.or_none().is_some()
    }

    pub fn get(&self) -> Result<T, NoValuePresent> {
        self.or_none().ok_or(NoValuePresent)
    }

    pub fn or_else(&self, value: T) -> T {
        self.or_none().unwrap_or(value)
    }

    pub fn or_none(&self) -> Option<T> {
        match self {
            Provider::Box(value) => value.clone(),
            Provider::Combinator(combinator) => combinator.get(),
            Provider::Coalescing(primary, fallback) => {
                primary.or_none().or_else(|| fallback.or_none())
            }
            Provider::Prop(property) => property.or_none(),
        }
    }

    /// `self.map(func)`: lazily transforms the upstream value. `func` may
    /// close over `Property` values from elsewhere in the graph; pass them
    /// via `map_capturing` so that `visit`/`collect_properties` can still
    /// find them (see `spec.md §4.1`, "Closure capture").
    pub fn map<R, F>(self, func: F) -> Provider<R>
    where
        R: Clone + Send + Sync + 'static,
        F: Fn(T) -> R + Send + Sync + 'static,
    {
        self.map_capturing(Vec::new(), func)
    }

    pub fn map_capturing<R, F>(self, captured: Vec<PropertyRef>, func: F) -> Provider<R>
    where
        R: Clone + Send + Sync + 'static,
        F: Fn(T) -> R + Send + Sync + 'static,
    {
        Provider::Combinator(Arc::new(Mapped {
            upstream: self,
            func,
            captured,
            _marker: PhantomData,
        }))
    }

    pub fn flatmap<R, F>(self, func: F) -> Provider<R>
    where
        R: Clone + Send + Sync + 'static,
        F: Fn(T) -> Provider<R> + Send + Sync + 'static,
    {
        self.flatmap_capturing(Vec::new(), func)
    }

    pub fn flatmap_capturing<R, F>(self, captured: Vec<PropertyRef>, func: F) -> Provider<R>
    where
        R: Clone + Send + Sync + 'static,
        F: Fn(T) -> Provider<R> + Send + Sync + 'static,
    {
        Provider::Combinator(Arc::new(FlatMapped {
            upstream: self,
            func,
            captured,
        }))
    }

    pub fn coalesce(self, fallback: Provider<T>) -> Provider<T> {
        Provider::Coalescing(Box::new(self), Box::new(fallback))
    }

    /// Depth-first traversal over every node reachable from this provider.
    /// `visitor` is invoked for every node with `Some(PropertyRef)` at
    /// `Property` nodes and `None` elsewhere; returning `false` prunes that
    /// subtree (`spec.md §4.1`, "visit").
    pub fn visit(&self, visitor: &mut dyn FnMut(Option<PropertyRef>) -> bool) {
        match self {
            Provider::Box(_) => {
                visitor(None);
            }
            Provider::Combinator(combinator) => {
                if visitor(None) {
                    combinator.visit(visitor);
                }
            }
            Provider::Coalescing(primary, fallback) => {
                if visitor(None) {
                    primary.visit(visitor);
                    fallback.visit(visitor);
                }
            }
            Provider::Prop(property) => {
                if visitor(Some(property.property_ref())) {
                    property.visit_inner(visitor);
                }
            }
        }
    }
}

impl<T> From<T> for Provider<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn from(value: T) -> Self {
        Provider::of(value)
    }
}

impl<T> From<Arc<Property<T>>> for Provider<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn from(property: Arc<Property<T>>) -> Self {
        Provider::Prop(property)
    }
}

/// Collects every `Property` reachable through `provider`'s expression tree,
/// including properties captured by the closures of `map`/`flatmap`
/// (`spec.md §8`, P5).
pub fn collect_properties<T>(provider: &Provider<T>) -> Vec<PropertyRef>
where
    T: Clone + Send + Sync + 'static,
{
    let mut result = Vec::new();
    provider.visit(&mut |node| {
        if let Some(property) = node {
            result.push(property);
        }
        true
    });
    result
}
