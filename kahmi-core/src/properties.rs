use kahmi_provider::{ListProperty, Marker, Property, PropertyRef};
use serde::Serialize;
use serde_json::Value;

/// Type-erased view over a `Property<T>`, letting a `Task` hold
/// differently-typed declared properties in one `BTreeMap` (`spec.md §3`,
/// "Declared properties (by name)"). The blanket impl below is valid under
/// Rust's orphan rule because this trait, not `Property<T>` itself, is
/// local to the crate.
pub trait ErasedProperty: Send + Sync {
    fn markers(&self) -> &[Marker];
    fn read_json(&self) -> Option<Value>;
    fn dependencies(&self) -> Vec<PropertyRef>;
}

impl<T> ErasedProperty for Property<T>
where
    T: Clone + Send + Sync + Serialize + 'static,
{
    fn markers(&self) -> &[Marker] {
        Property::markers(self)
    }

    fn read_json(&self) -> Option<Value> {
        Property::read_json(self)
    }

    fn dependencies(&self) -> Vec<PropertyRef> {
        Property::dependencies(self)
    }
}

impl<T> ErasedProperty for ListProperty<T>
where
    T: Clone + Send + Sync + Serialize + 'static,
{
    fn markers(&self) -> &[Marker] {
        ListProperty::markers(self)
    }

    fn read_json(&self) -> Option<Value> {
        ListProperty::read_json(self)
    }

    fn dependencies(&self) -> Vec<PropertyRef> {
        ListProperty::dependencies(self)
    }
}
