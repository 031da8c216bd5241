//! Arena representation of devices, components and data items

use std::collections::HashMap;
use tracing::{debug, warn};

use crate::document::{ComponentNode, DataItemDef, Relationship};
use crate::{AgentError, Result};

/// Index of a component in a [`DeviceModel`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ComponentId(usize);

impl ComponentId {
    pub fn index(self) -> usize {
        self.0
    }
}

/// Index of a data item in a [`DeviceModel`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DataItemHandle(usize);

impl DataItemHandle {
    pub fn index(self) -> usize {
        self.0
    }
}

/// What an id refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Entity {
    Component(ComponentId),
    DataItem(DataItemHandle),
}

/// A device, agent or component.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Component {
    pub kind: String,
    pub id: String,
    pub name: Option<String>,
    pub uuid: Option<String>,
    pub parent: Option<ComponentId>,
    pub children: Vec<ComponentId>,
    pub data_items: Vec<DataItemHandle>,
    pub relationships: Vec<Relationship>,
    /// Target of a `PARENT` component relationship, once resolved
    pub attach_parent: Option<ComponentId>,
    /// Target of a `CHILD` component relationship, once resolved
    pub attach_child: Option<ComponentId>,
}

/// A data item and the component declaring it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataItem {
    pub def: DataItemDef,
    pub component: ComponentId,
}

impl DataItem {
    pub fn id(&self) -> &str {
        &self.def.id
    }
}

/// All devices of one probe, flattened into an arena.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceModel {
    components: Vec<Component>,
    data_items: Vec<DataItem>,
    devices: Vec<ComponentId>,
    index: HashMap<String, Entity>,
}

impl DeviceModel {
    /// Build the arena from canonical device trees.
    ///
    /// Fails on duplicate ids. Relationship targets that do not exist are
    /// logged and left unresolved.
    pub fn build(devices: &[ComponentNode]) -> Result<Self> {
        let mut model = DeviceModel::default();
        for device in devices {
            let id = model.insert(device, None)?;
            model.devices.push(id);
        }
        model.resolve_relationships();

        debug!(
            devices = model.devices.len(),
            components = model.components.len(),
            data_items = model.data_items.len(),
            "Device model built"
        );
        Ok(model)
    }

    fn insert(&mut self, node: &ComponentNode, parent: Option<ComponentId>) -> Result<ComponentId> {
        let id = ComponentId(self.components.len());
        self.register(&node.id, Entity::Component(id))?;
        self.components.push(Component {
            kind: node.kind.clone(),
            id: node.id.clone(),
            name: node.name.clone(),
            uuid: node.uuid.clone(),
            parent,
            children: Vec::new(),
            data_items: Vec::new(),
            relationships: node.relationships.clone(),
            attach_parent: None,
            attach_child: None,
        });

        for def in &node.data_items {
            let handle = DataItemHandle(self.data_items.len());
            self.register(&def.id, Entity::DataItem(handle))?;
            self.data_items.push(DataItem { def: def.clone(), component: id });
            self.components[id.0].data_items.push(handle);
        }

        for child in &node.children {
            let child_id = self.insert(child, Some(id))?;
            self.components[id.0].children.push(child_id);
        }
        Ok(id)
    }

    fn register(&mut self, id: &str, entity: Entity) -> Result<()> {
        if self.index.insert(id.to_string(), entity).is_some() {
            return Err(AgentError::schema_error(format!("duplicate id '{id}' in probe")));
        }
        Ok(())
    }

    fn resolve_relationships(&mut self) {
        for i in 0..self.components.len() {
            let mut attach_parent = None;
            let mut attach_child = None;

            for rel in &self.components[i].relationships {
                if rel.element != "ComponentRelationship" {
                    continue;
                }
                let target = match self.index.get(&rel.id_ref) {
                    Some(Entity::Component(target)) => *target,
                    _ => {
                        warn!(
                            component = %self.components[i].id,
                            id_ref = %rel.id_ref,
                            "Relationship target is not a known component"
                        );
                        continue;
                    }
                };
                match rel.kind.as_str() {
                    "PARENT" => attach_parent = Some(target),
                    "CHILD" => attach_child = Some(target),
                    _ => {}
                }
            }

            self.components[i].attach_parent = attach_parent;
            self.components[i].attach_child = attach_child;
        }
    }

    /// Top-level devices in probe order.
    pub fn devices(&self) -> &[ComponentId] {
        &self.devices
    }

    pub fn component(&self, id: ComponentId) -> Option<&Component> {
        self.components.get(id.0)
    }

    pub fn data_item(&self, handle: DataItemHandle) -> Option<&DataItem> {
        self.data_items.get(handle.0)
    }

    /// Resolve any id from the probe document.
    pub fn lookup(&self, id: &str) -> Option<Entity> {
        self.index.get(id).copied()
    }

    pub fn component_by_id(&self, id: &str) -> Option<ComponentId> {
        match self.lookup(id)? {
            Entity::Component(c) => Some(c),
            Entity::DataItem(_) => None,
        }
    }

    pub fn data_item_by_id(&self, id: &str) -> Option<DataItemHandle> {
        match self.lookup(id)? {
            Entity::DataItem(d) => Some(d),
            Entity::Component(_) => None,
        }
    }

    /// Every data item with its handle, in probe order.
    pub fn data_items(&self) -> impl Iterator<Item = (DataItemHandle, &DataItem)> {
        self.data_items.iter().enumerate().map(|(i, item)| (DataItemHandle(i), item))
    }

    pub fn component_count(&self) -> usize {
        self.components.len()
    }

    pub fn data_item_count(&self) -> usize {
        self.data_items.len()
    }

    /// The device a component belongs to.
    pub fn device_of(&self, mut id: ComponentId) -> ComponentId {
        while let Some(parent) = self.components.get(id.0).and_then(|c| c.parent) {
            id = parent;
        }
        id
    }

    /// Data items below `root` (inclusive) matching `pred`, depth first.
    pub fn find_data_items<F>(&self, root: ComponentId, pred: F) -> Vec<DataItemHandle>
    where
        F: Fn(&DataItem) -> bool,
    {
        let mut found = Vec::new();
        self.walk(root, &mut |_, component| {
            found.extend(
                component.data_items.iter().copied().filter(|h| pred(&self.data_items[h.0])),
            );
        });
        found
    }

    /// Components below `root` (inclusive) of the given kind, optionally with a given name.
    pub fn find_components(
        &self,
        root: ComponentId,
        kind: &str,
        name: Option<&str>,
    ) -> Vec<ComponentId> {
        let mut found = Vec::new();
        self.walk(root, &mut |id, component| {
            if Self::matches(component, kind, name) {
                found.push(id);
            }
        });
        found
    }

    /// First component below `root` (inclusive) of the given kind and name.
    pub fn find_component(
        &self,
        root: ComponentId,
        kind: &str,
        name: Option<&str>,
    ) -> Option<ComponentId> {
        self.find_components(root, kind, name).into_iter().next()
    }

    fn matches(component: &Component, kind: &str, name: Option<&str>) -> bool {
        component.kind == kind && name.is_none_or(|n| component.name.as_deref() == Some(n))
    }

    fn walk<'a>(&'a self, root: ComponentId, visit: &mut dyn FnMut(ComponentId, &'a Component)) {
        let mut stack = vec![root];
        while let Some(id) = stack.pop() {
            let Some(component) = self.components.get(id.0) else {
                continue;
            };
            visit(id, component);
            stack.extend(component.children.iter().rev().copied());
        }
    }
}
