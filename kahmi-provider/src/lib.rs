// Licensed under the Apache License, Version 2.0.
#![deny(warnings)]

//! The provider/property value graph (`spec.md §4.1`, `§4.2`): a lazily
//! evaluated, composable value model that lets task outputs be wired into
//! task inputs without the script author manually declaring dependencies.

mod error;
mod list_property;
mod marker;
mod property;
mod provider;

pub use error::{FinalizedMutation, NoValuePresent};
pub use list_property::ListProperty;
pub use marker::{Marker, OwnerId};
pub use property::{Property, PropertyRef};
pub use provider::{collect_properties, Combinator, Provider};
