use std::sync::Arc;

use parking_lot::RwLock;
use serde::Serialize;

use crate::error::{FinalizedMutation, NoValuePresent};
use crate::marker::{Marker, OwnerId};
use crate::provider::Provider;

/// A cheap, owned snapshot of a `Property` identity, returned by `visit`/
/// `dependencies` instead of a borrowed reference so that traversal results
/// can outlive the lock guard they were collected under.
#[derive(Clone, Debug)]
pub struct PropertyRef {
    /// Pointer identity of the underlying `Property`, stable for the
    /// property's lifetime. Used to deduplicate visit results.
    pub id: usize,
    pub name: Option<String>,
    pub markers: Vec<Marker>,
    pub owner: Option<OwnerId>,
}

impl PropertyRef {
    pub fn has_marker(&self, marker: Marker) -> bool {
        self.markers.contains(&marker)
    }
}

impl PartialEq for PropertyRef {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}
impl Eq for PropertyRef {}

struct Inner<T>
where
    T: Clone + Send + Sync + 'static,
{
    value: Option<Provider<T>>,
    default: Option<Provider<T>>,
    default_fn: Option<Arc<dyn Fn(OwnerId) -> Option<T> + Send + Sync>>,
    finalized: bool,
    finalize_on_read: bool,
    final_value: Option<T>,
}

/// A named, owned, finalizable lazy value (`spec.md §3`, "Property").
pub struct Property<T>
where
    T: Clone + Send + Sync + Serialize + 'static,
{
    name: Option<String>,
    markers: Vec<Marker>,
    owner: Option<OwnerId>,
    inner: RwLock<Inner<T>>,
}

impl<T> Property<T>
where
    T: Clone + Send + Sync + Serialize + 'static,
{
    pub fn new(markers: Vec<Marker>) -> Arc<Self> {
        Self::with_name_and_owner(markers, None, None)
    }

    pub fn with_name_and_owner(
        markers: Vec<Marker>,
        name: Option<String>,
        owner: Option<OwnerId>,
    ) -> Arc<Self> {
        Arc::new(Property {
            name,
            markers,
            owner,
            inner: RwLock::new(Inner {
                value: None,
                default: None,
                default_fn: None,
                finalized: false,
                finalize_on_read: false,
                final_value: None,
            }),
        })
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn markers(&self) -> &[Marker] {
        &self.markers
    }

    pub fn owner(&self) -> Option<OwnerId> {
        self.owner
    }

    pub fn is_finalized(&self) -> bool {
        self.inner.read().finalized
    }

    /// Installs an explicit value, replacing any previously `set` provider.
    /// Fails once the property has been finalized.
    pub fn set(&self, value: impl Into<Provider<T>>) -> Result<(), FinalizedMutation> {
        let mut inner = self.inner.write();
        if inner.finalized {
            return Err(FinalizedMutation);
        }
        inner.value = Some(value.into());
        Ok(())
    }

    /// Convenience wiring for `consumer.prop = producer.prop`: installs
    /// `other` itself as the upstream provider, so `consumer`'s property
    /// shares identity with `producer`'s rather than merely copying its
    /// current value.
    pub fn bind(&self, other: &Arc<Property<T>>) -> Result<(), FinalizedMutation> {
        self.set(Provider::Prop(Arc::clone(other)))
    }

    pub fn default(&self, value: impl Into<Provider<T>>) {
        let mut inner = self.inner.write();
        inner.default = Some(value.into());
        inner.default_fn = None;
    }

    pub fn default_fn<F>(&self, f: F)
    where
        F: Fn(OwnerId) -> Option<T> + Send + Sync + 'static,
    {
        let mut inner = self.inner.write();
        inner.default_fn = Some(Arc::new(f));
        inner.default = None;
    }

    fn resolve_locked(inner: &Inner<T>, owner: Option<OwnerId>) -> Option<T> {
        if let Some(value) = inner.value.as_ref().and_then(Provider::or_none) {
            return Some(value);
        }
        if let Some(default_fn) = &inner.default_fn {
            if let Some(owner) = owner {
                if let Some(value) = default_fn(owner) {
                    return Some(value);
                }
            }
        }
        inner.default.as_ref().and_then(Provider::or_none)
    }

    pub fn get(&self) -> Result<T, NoValuePresent> {
        let mut inner = self.inner.write();
        if inner.finalized {
            if inner.finalize_on_read {
                let value = Self::resolve_locked(&inner, self.owner);
                inner.final_value = value;
                inner.finalize_on_read = false;
            }
            return inner.final_value.clone().ok_or(NoValuePresent);
        }
        Self::resolve_locked(&inner, self.owner).ok_or(NoValuePresent)
    }

    pub fn or_none(&self) -> Option<T> {
        self.get().ok()
    }

    pub fn or_else(&self, value: T) -> T {
        self.get().unwrap_or(value)
    }

    /// Evaluates now, caches the result, and marks the property finalized:
    /// further `set` calls fail, and `get` returns the cached value.
    pub fn finalize(&self) -> Result<T, NoValuePresent> {
        let mut inner = self.inner.write();
        if !inner.finalized || inner.finalize_on_read {
            let value = Self::resolve_locked(&inner, self.owner);
            inner.final_value = value;
            inner.finalize_on_read = false;
            inner.finalized = true;
        }
        inner.final_value.clone().ok_or(NoValuePresent)
    }

    /// Marks the property finalized but defers evaluation/caching to the
    /// next `get()` (`spec.md §8`, P4).
    pub fn finalize_on_read(&self) {
        let mut inner = self.inner.write();
        if !inner.finalized {
            inner.finalized = true;
            inner.finalize_on_read = true;
        }
    }

    /// All upstream `Property` nodes reachable through the installed
    /// `value` provider (not the default).
    pub fn dependencies(&self) -> Vec<PropertyRef> {
        let inner = self.inner.read();
        let mut result = Vec::new();
        if let Some(value) = &inner.value {
            value.visit(&mut |node| {
                if let Some(property_ref) = node {
                    result.push(property_ref);
                }
                true
            });
        }
        result
    }

    /// Clones this property as a template into a fresh instance bound to
    /// `owner`, carrying over the same markers and default (`spec.md §4.2`,
    /// "instantiate").
    pub fn instantiate(&self, owner: OwnerId, name: &str) -> Arc<Property<T>> {
        let inner = self.inner.read();
        let instance = Property::with_name_and_owner(
            self.markers.clone(),
            Some(name.to_string()),
            Some(owner),
        );
        {
            let mut instance_inner = instance.inner.write();
            // `Provider` expression trees aren't generally cloneable, so the
            // template's default is carried over as a snapshot of its
            // current value rather than the live expression.
            instance_inner.default = inner
                .default
                .as_ref()
                .map(|default| Provider::Box(default.or_none()));
            instance_inner.default_fn = inner.default_fn.clone();
        }
        instance
    }

    pub(crate) fn property_ref(&self) -> PropertyRef {
        PropertyRef {
            id: self as *const Self as usize,
            name: self.name.clone(),
            markers: self.markers.clone(),
            owner: self.owner,
        }
    }

    pub(crate) fn visit_inner(&self, visitor: &mut dyn FnMut(Option<PropertyRef>) -> bool) {
        let inner = self.inner.read();
        if let Some(value) = &inner.value {
            value.visit(visitor);
        } else if let Some(default) = &inner.default {
            default.visit(visitor);
        }
    }

    /// The property's value reinterpreted as JSON, for `Input`-marked
    /// properties contributing to a fingerprint (`spec.md §3`, "Input").
    pub fn read_json(&self) -> Option<serde_json::Value> {
        self.or_none()
            .and_then(|value| serde_json::to_value(value).ok())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::collect_properties;

    #[test]
    fn or_else_matches_presence(){
        let p: Arc<Property<i64>> = Property::new(vec![]);
        assert_eq!(p.or_else(5), 5);
        p.set(Provider::of(9)).unwrap();
        assert_eq!(p.or_else(5), 9);
    }

    #[test]
    fn finalize_freezes_the_value() {
        let p: Arc<Property<i64>> = Property::new(vec![]);
        p.set(Provider::of(1)).unwrap();
        assert_eq!(p.finalize().unwrap(), 1);
        assert!(p.set(Provider::of(2)).is_err());
        assert_eq!(p.get().unwrap(), 1);
    }

    #[test]
    fn finalize_on_read_snapshots_on_first_read_only() {
        let upstream: Arc<Property<i64>> = Property::new(vec![]);
        upstream.set(Provider::of(1)).unwrap();

        let downstream: Arc<Property<i64>> = Property::new(vec![]);
        downstream.bind(&upstream).unwrap();
        downstream.finalize_on_read();

        assert_eq!(downstream.get().unwrap(), 1);
        upstream.set(Provider::of(2)).unwrap();
        assert_eq!(downstream.get().unwrap(), 1);
    }

    #[test]
    fn dependencies_reach_through_map_closures() {
        let producer: Arc<Property<i64>> = Property::new(vec![Marker::Output]);
        producer.set(Provider::of(41)).unwrap();

        let consumer: Arc<Property<i64>> = Property::new(vec![]);
        let producer_ref = producer.property_ref();
        consumer
            .set(Provider::Prop(Arc::clone(&producer)).map_capturing(vec![producer_ref], |v| v + 1))
            .unwrap();

        let deps = consumer.dependencies();
        assert!(deps.iter().any(|d| d.has_marker(Marker::Output)));
    }

    #[test]
    fn collect_properties_finds_every_node() {
        let a: Arc<Property<i64>> = Property::new(vec![]);
        a.set(Provider::of(1)).unwrap();
        let b: Arc<Property<i64>> = Property::new(vec![]);
        b.set(Provider::of(2)).unwrap();

        let combined = Provider::Prop(Arc::clone(&a)).coalesce(Provider::Prop(Arc::clone(&b)));
        let found = collect_properties(&combined);
        assert_eq!(found.len(), 2);
    }
}
