//! Device model built from a probe document.
//!
//! The probe yields a tree of [`ComponentNode`](crate::document::ComponentNode)s.
//! [`DeviceModel`] flattens that tree into an arena: components and data items
//! live in vectors and refer to each other by index ([`ComponentId`],
//! [`DataItemHandle`]). Cross references by id (component relationships) are
//! resolved in a second pass once every id is known, so no reference cycles
//! are needed and every id lookup is a single hash probe.

mod model;

pub use model::{Component, ComponentId, DataItem, DataItemHandle, DeviceModel, Entity};
