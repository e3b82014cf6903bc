//! The entity-attribute store shared by all loaders and emitters.
//!
//! Every object parsed out of a vendor description — peripheral types,
//! registers, bitfields, enums, operating modes, device instances — is an
//! opaque [`EntityId`]. Membership in exactly one kind table determines what
//! an entity is; sparse attribute tables hold per-entity data discovered in
//! whatever order the source document provides it. All tables are
//! insertion-ordered, because generated output is diff-sensitive.

mod error;
#[cfg(test)]
mod tests;

pub use error::Error;

use indexmap::{IndexMap, IndexSet};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Result alias for database contract errors.
pub type Result<T> = std::result::Result<T, Error>;

/// Opaque handle of an entity inside one [`Database`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntityId(u32);

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "entity #{}", self.0)
    }
}

/// The kind tables an entity can belong to.
///
/// `Type*` kinds are reusable templates; `Instance*` kinds are concrete
/// placements. The only cross-reference from instances to types is the
/// peripheral-instance target.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EntityKind {
    /// A reusable peripheral template.
    TypePeripheral,
    /// A nested, reusable grouping of registers.
    TypeRegisterGroup,
    /// A memory-mapped register.
    TypeRegister,
    /// A bit range inside a register.
    TypeField,
    /// A named mapping of integer values to symbolic names.
    TypeEnum,
    /// One value of an enum; the numeric payload lives in the kind table.
    TypeEnumField,
    /// An operating configuration; its detection payload lives in the kind
    /// table.
    TypeMode,
    /// A concrete device.
    InstanceDevice,
    /// A placement of a peripheral or register-group type at a base
    /// address; the target type lives in the kind table.
    InstancePeripheral,
    /// An interrupt line of a device; the index lives in the kind table.
    InstanceInterrupt,
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EntityKind::TypePeripheral => "type.peripheral",
            EntityKind::TypeRegisterGroup => "type.register_group",
            EntityKind::TypeRegister => "type.register",
            EntityKind::TypeField => "type.field",
            EntityKind::TypeEnum => "type.enum",
            EntityKind::TypeEnumField => "type.enum_field",
            EntityKind::TypeMode => "type.mode",
            EntityKind::InstanceDevice => "instance.device",
            EntityKind::InstancePeripheral => "instance.peripheral",
            EntityKind::InstanceInterrupt => "instance.interrupt",
        };
        f.write_str(name)
    }
}

/// Register or field access rights.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Access {
    /// Reads return the hardware value; writes are ignored or forbidden.
    ReadOnly,
    /// Writes reach the hardware; reads are undefined.
    WriteOnly,
    /// Both directions are meaningful. This is the default and is omitted
    /// from the JSON projection.
    ReadWrite,
}

/// Payload of a `type.mode` entity.
///
/// `value` is a whitespace-separated list of integer literals the detection
/// field takes under this mode; `qualifier` is the dotted
/// `PERIPHERAL.MODE.REG.FIELD` path naming that field. Both are preserved
/// verbatim from the source document.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ModeDef {
    /// Whitespace-separated integer literals the detection field takes.
    pub value: String,
    /// Dotted path naming the detection field.
    pub qualifier: String,
}

/// The store itself. Create with [`Database::new`], fill through one loader,
/// then treat as read-only.
#[derive(Debug, Default)]
pub struct Database {
    next_id: u32,
    kinds: IndexMap<EntityId, EntityKind>,

    type_peripherals: IndexSet<EntityId>,
    type_register_groups: IndexSet<EntityId>,
    type_registers: IndexSet<EntityId>,
    type_fields: IndexSet<EntityId>,
    type_enums: IndexSet<EntityId>,
    type_enum_fields: IndexMap<EntityId, i64>,
    type_modes: IndexMap<EntityId, ModeDef>,
    instance_devices: IndexSet<EntityId>,
    instance_peripherals: IndexMap<EntityId, EntityId>,
    instance_interrupts: IndexMap<EntityId, i64>,

    names: IndexMap<EntityId, String>,
    descriptions: IndexMap<EntityId, String>,
    offsets: IndexMap<EntityId, u64>,
    sizes: IndexMap<EntityId, u32>,
    accesses: IndexMap<EntityId, Access>,
    reset_values: IndexMap<EntityId, u64>,
    reset_masks: IndexMap<EntityId, u64>,
    versions: IndexMap<EntityId, String>,
    archs: IndexMap<EntityId, String>,
    enum_refs: IndexMap<EntityId, EntityId>,
    modes: IndexMap<EntityId, IndexSet<EntityId>>,
    parents: IndexMap<EntityId, EntityId>,

    children: IndexMap<EntityKind, IndexMap<EntityId, IndexSet<EntityId>>>,
}

fn edge_allowed(parent: EntityKind, child: EntityKind) -> bool {
    use EntityKind::*;
    matches!(
        (parent, child),
        (InstanceDevice, InstancePeripheral | InstanceInterrupt)
            | (TypePeripheral, TypeRegister | TypeRegisterGroup | TypeMode | TypeEnum)
            | (TypeRegisterGroup, TypeRegister | TypeRegisterGroup | TypeMode)
            | (TypeRegister, TypeField | TypeMode)
            | (TypeEnum, TypeEnumField)
    )
}

fn put<V>(table: &mut IndexMap<EntityId, V>, attribute: &'static str, id: EntityId, value: V) {
    let prev = table.insert(id, value);
    assert!(prev.is_none(), "attribute `{attribute}` set twice on {id}");
}

impl Database {
    /// Creates an empty database.
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocates a fresh entity id. The entity is not live until it is
    /// registered in a kind table.
    pub fn create_entity(&mut self) -> EntityId {
        let id = EntityId(self.next_id);
        self.next_id += 1;
        id
    }

    fn claim(&mut self, id: EntityId, kind: EntityKind) {
        let prev = self.kinds.insert(id, kind);
        assert!(prev.is_none(), "{id} registered twice (as {} and {kind})", prev.unwrap());
    }

    /// Registers `id` in the kind table for `kind`.
    ///
    /// Kinds that carry a payload (`type.enum_field`, `type.mode`,
    /// `instance.peripheral`, `instance.interrupt`) have dedicated
    /// registration methods and are rejected here.
    pub fn register(&mut self, id: EntityId, kind: EntityKind) {
        use EntityKind::*;
        self.claim(id, kind);
        match kind {
            TypePeripheral => self.type_peripherals.insert(id),
            TypeRegisterGroup => self.type_register_groups.insert(id),
            TypeRegister => self.type_registers.insert(id),
            TypeField => self.type_fields.insert(id),
            TypeEnum => self.type_enums.insert(id),
            InstanceDevice => self.instance_devices.insert(id),
            TypeEnumField | TypeMode | InstancePeripheral | InstanceInterrupt => {
                panic!("{kind} carries a payload; use its dedicated registration method")
            }
        };
    }

    /// Registers `id` as a `type.enum_field` holding `value`.
    pub fn register_enum_field(&mut self, id: EntityId, value: i64) {
        self.claim(id, EntityKind::TypeEnumField);
        self.type_enum_fields.insert(id, value);
    }

    /// Registers `id` as a `type.mode` with its detection payload.
    pub fn register_mode(&mut self, id: EntityId, def: ModeDef) {
        self.claim(id, EntityKind::TypeMode);
        self.type_modes.insert(id, def);
    }

    /// Registers `id` as an `instance.peripheral` placing `target`.
    pub fn register_peripheral_instance(&mut self, id: EntityId, target: EntityId) {
        self.claim(id, EntityKind::InstancePeripheral);
        self.instance_peripherals.insert(id, target);
    }

    /// Registers `id` as an `instance.interrupt` with its index.
    pub fn register_interrupt(&mut self, id: EntityId, index: i64) {
        self.claim(id, EntityKind::InstanceInterrupt);
        self.instance_interrupts.insert(id, index);
    }

    // Attribute setters. Each attribute is write-once per entity; setting it
    // twice is a caller bug and panics.

    /// Sets the short identifier of `id`.
    pub fn set_name(&mut self, id: EntityId, name: impl Into<String>) {
        put(&mut self.names, "name", id, name.into());
    }

    /// Sets the free-text description of `id`.
    pub fn set_description(&mut self, id: EntityId, description: impl Into<String>) {
        put(&mut self.descriptions, "description", id, description.into());
    }

    /// Sets the offset of `id`, in the unit the source document uses
    /// (bytes for registers and instances, bits for fields).
    pub fn set_offset(&mut self, id: EntityId, offset: u64) {
        put(&mut self.offsets, "offset", id, offset);
    }

    /// Sets the size of `id` in bits.
    pub fn set_size(&mut self, id: EntityId, size: u32) {
        put(&mut self.sizes, "size", id, size);
    }

    /// Sets the access rights of `id`.
    pub fn set_access(&mut self, id: EntityId, access: Access) {
        put(&mut self.accesses, "access", id, access);
    }

    /// Sets the reset value of `id`.
    pub fn set_reset_value(&mut self, id: EntityId, value: u64) {
        put(&mut self.reset_values, "reset_value", id, value);
    }

    /// Sets the reset mask of `id`.
    pub fn set_reset_mask(&mut self, id: EntityId, mask: u64) {
        put(&mut self.reset_masks, "reset_mask", id, mask);
    }

    /// Sets the version string of `id`.
    pub fn set_version(&mut self, id: EntityId, version: impl Into<String>) {
        put(&mut self.versions, "version", id, version.into());
    }

    /// Sets the architecture string of a device.
    pub fn set_arch(&mut self, id: EntityId, arch: impl Into<String>) {
        put(&mut self.archs, "arch", id, arch.into());
    }

    /// Points a field at the `type.enum` describing its values.
    pub fn set_enum_ref(&mut self, id: EntityId, enum_id: EntityId) {
        put(&mut self.enum_refs, "enum_ref", id, enum_id);
    }

    /// Restricts `id` to the given set of `type.mode` entities.
    pub fn set_modes(&mut self, id: EntityId, modes: IndexSet<EntityId>) {
        put(&mut self.modes, "modes", id, modes);
    }

    /// Attaches `child` under `parent`, recording the edge in the matching
    /// `children.<kind>` table and setting the child's `parent` attribute.
    pub fn add_child(&mut self, parent: EntityId, child: EntityId) -> Result<()> {
        let parent_kind = self.kind_of(parent).ok_or(Error::UnknownEntity { id: parent })?;
        let child_kind = self.kind_of(child).ok_or(Error::UnknownEntity { id: child })?;
        if !edge_allowed(parent_kind, child_kind) {
            return Err(Error::KindMismatch { parent, parent_kind, id: child, kind: child_kind });
        }
        self.children.entry(child_kind).or_default().entry(parent).or_default().insert(child);
        put(&mut self.parents, "parent", child, parent);
        Ok(())
    }

    // Queries.

    /// Returns the kind of `id`, if it is live.
    pub fn kind_of(&self, id: EntityId) -> Option<EntityKind> {
        self.kinds.get(&id).copied()
    }

    /// Tests whether `id` is registered as `kind`.
    pub fn entity_is(&self, kind: EntityKind, id: EntityId) -> bool {
        self.kind_of(id) == Some(kind)
    }

    /// Iterates every entity of `kind` in insertion order.
    pub fn entities_of(&self, kind: EntityKind) -> Box<dyn Iterator<Item = EntityId> + '_> {
        use EntityKind::*;
        match kind {
            TypePeripheral => Box::new(self.type_peripherals.iter().copied()),
            TypeRegisterGroup => Box::new(self.type_register_groups.iter().copied()),
            TypeRegister => Box::new(self.type_registers.iter().copied()),
            TypeField => Box::new(self.type_fields.iter().copied()),
            TypeEnum => Box::new(self.type_enums.iter().copied()),
            TypeEnumField => Box::new(self.type_enum_fields.keys().copied()),
            TypeMode => Box::new(self.type_modes.keys().copied()),
            InstanceDevice => Box::new(self.instance_devices.iter().copied()),
            InstancePeripheral => Box::new(self.instance_peripherals.keys().copied()),
            InstanceInterrupt => Box::new(self.instance_interrupts.keys().copied()),
        }
    }

    /// Finds the entity of `kind` carrying `name`.
    pub fn find_by_name(&self, kind: EntityKind, name: &str) -> Result<EntityId> {
        self.entities_of(kind)
            .find(|&id| self.name(id) == Some(name))
            .ok_or_else(|| Error::NameNotFound { kind, name: name.to_owned() })
    }

    /// Iterates the children of `parent` of the given kind, in insertion
    /// order. Absent edges iterate as empty.
    pub fn children_of(
        &self,
        parent: EntityId,
        kind: EntityKind,
    ) -> impl Iterator<Item = EntityId> + '_ {
        self.children
            .get(&kind)
            .and_then(|edges| edges.get(&parent))
            .into_iter()
            .flatten()
            .copied()
    }

    /// Tests whether `parent` has any child of `kind`.
    pub fn has_children(&self, parent: EntityId, kind: EntityKind) -> bool {
        self.children_of(parent, kind).next().is_some()
    }

    /// Returns the parent of `id`, if attached.
    pub fn parent(&self, id: EntityId) -> Option<EntityId> {
        self.parents.get(&id).copied()
    }

    /// Walks the strict ancestor chain of `id`, nearest first. The walk is
    /// bounded by the entity count so a corrupted store cannot loop.
    pub fn ancestors(&self, id: EntityId) -> impl Iterator<Item = EntityId> + '_ {
        let mut current = self.parent(id);
        let mut remaining = self.kinds.len();
        std::iter::from_fn(move || {
            if remaining == 0 {
                return None;
            }
            remaining -= 1;
            let next = current?;
            current = self.parent(next);
            Some(next)
        })
    }

    /// Dotted name path of a type from its root ancestor down to itself,
    /// used for cross-references. `None` when any link in the chain is
    /// unnamed.
    pub fn type_path(&self, id: EntityId) -> Option<String> {
        let mut parts = vec![self.name(id)?.to_owned()];
        for ancestor in self.ancestors(id) {
            parts.push(self.name(ancestor)?.to_owned());
        }
        parts.reverse();
        Some(parts.join("."))
    }

    /// Returns the name of `id`, if set.
    pub fn name(&self, id: EntityId) -> Option<&str> {
        self.names.get(&id).map(String::as_str)
    }

    /// Returns the name of `id` or a `MissingAttribute` error.
    pub fn require_name(&self, id: EntityId) -> Result<&str> {
        self.name(id).ok_or(Error::MissingAttribute { id, attribute: "name" })
    }

    /// Returns the description of `id`, if set.
    pub fn description(&self, id: EntityId) -> Option<&str> {
        self.descriptions.get(&id).map(String::as_str)
    }

    /// Returns the offset of `id`, if set.
    pub fn offset(&self, id: EntityId) -> Option<u64> {
        self.offsets.get(&id).copied()
    }

    /// Returns the offset of `id` or a `MissingAttribute` error.
    pub fn require_offset(&self, id: EntityId) -> Result<u64> {
        self.offset(id).ok_or(Error::MissingAttribute { id, attribute: "offset" })
    }

    /// Returns the size of `id` in bits, if set.
    pub fn size(&self, id: EntityId) -> Option<u32> {
        self.sizes.get(&id).copied()
    }

    /// Returns the size of `id` or a `MissingAttribute` error.
    pub fn require_size(&self, id: EntityId) -> Result<u32> {
        self.size(id).ok_or(Error::MissingAttribute { id, attribute: "size" })
    }

    /// Returns the access rights of `id`, if set.
    pub fn access(&self, id: EntityId) -> Option<Access> {
        self.accesses.get(&id).copied()
    }

    /// Returns the reset value of `id`, if set.
    pub fn reset_value(&self, id: EntityId) -> Option<u64> {
        self.reset_values.get(&id).copied()
    }

    /// Returns the reset mask of `id`, if set.
    pub fn reset_mask(&self, id: EntityId) -> Option<u64> {
        self.reset_masks.get(&id).copied()
    }

    /// Returns the version string of `id`, if set.
    pub fn version(&self, id: EntityId) -> Option<&str> {
        self.versions.get(&id).map(String::as_str)
    }

    /// Returns the architecture string of a device, if set.
    pub fn arch(&self, id: EntityId) -> Option<&str> {
        self.archs.get(&id).map(String::as_str)
    }

    /// Returns the enum referenced by a field, if any.
    pub fn enum_ref(&self, id: EntityId) -> Option<EntityId> {
        self.enum_refs.get(&id).copied()
    }

    /// Returns the mode set restricting `id`, if any.
    pub fn mode_set(&self, id: EntityId) -> Option<&IndexSet<EntityId>> {
        self.modes.get(&id)
    }

    /// Returns the numeric payload of a `type.enum_field`.
    pub fn enum_field_value(&self, id: EntityId) -> Option<i64> {
        self.type_enum_fields.get(&id).copied()
    }

    /// Returns the payload of a `type.mode`.
    pub fn mode_def(&self, id: EntityId) -> Option<&ModeDef> {
        self.type_modes.get(&id)
    }

    /// Returns the target type of an `instance.peripheral`.
    pub fn instance_target(&self, id: EntityId) -> Option<EntityId> {
        self.instance_peripherals.get(&id).copied()
    }

    /// Returns the index payload of an `instance.interrupt`.
    pub fn interrupt_index(&self, id: EntityId) -> Option<i64> {
        self.instance_interrupts.get(&id).copied()
    }

    // Convenience builders: create + register + attach in one call.

    /// Creates a named `instance.device`.
    pub fn create_device(&mut self, name: impl Into<String>) -> EntityId {
        let id = self.create_entity();
        self.register(id, EntityKind::InstanceDevice);
        self.set_name(id, name);
        id
    }

    /// Creates a top-level `type.peripheral`, named or anonymous.
    pub fn create_peripheral(&mut self, name: Option<String>) -> EntityId {
        let id = self.create_entity();
        self.register(id, EntityKind::TypePeripheral);
        if let Some(name) = name {
            self.set_name(id, name);
        }
        id
    }

    /// Creates a named `type.register_group` under `parent`.
    pub fn create_register_group(
        &mut self,
        parent: EntityId,
        name: impl Into<String>,
    ) -> Result<EntityId> {
        let id = self.create_entity();
        self.register(id, EntityKind::TypeRegisterGroup);
        self.set_name(id, name);
        self.add_child(parent, id)?;
        Ok(id)
    }

    /// Creates a named `type.register` under `parent`.
    pub fn create_register(&mut self, parent: EntityId, name: impl Into<String>) -> Result<EntityId> {
        let id = self.create_entity();
        self.register(id, EntityKind::TypeRegister);
        self.set_name(id, name);
        self.add_child(parent, id)?;
        Ok(id)
    }

    /// Creates a named `type.field` under `parent`.
    pub fn create_field(&mut self, parent: EntityId, name: impl Into<String>) -> Result<EntityId> {
        let id = self.create_entity();
        self.register(id, EntityKind::TypeField);
        self.set_name(id, name);
        self.add_child(parent, id)?;
        Ok(id)
    }

    /// Creates a `type.enum` under `parent`, named or anonymous.
    pub fn create_enum(&mut self, parent: EntityId, name: Option<String>) -> Result<EntityId> {
        let id = self.create_entity();
        self.register(id, EntityKind::TypeEnum);
        if let Some(name) = name {
            self.set_name(id, name);
        }
        self.add_child(parent, id)?;
        Ok(id)
    }

    /// Creates a named `type.enum_field` under `parent` holding `value`.
    pub fn create_enum_field(
        &mut self,
        parent: EntityId,
        name: impl Into<String>,
        value: i64,
    ) -> Result<EntityId> {
        let id = self.create_entity();
        self.register_enum_field(id, value);
        self.set_name(id, name);
        self.add_child(parent, id)?;
        Ok(id)
    }

    /// Creates a named `type.mode` under `parent`.
    pub fn create_mode(
        &mut self,
        parent: EntityId,
        name: impl Into<String>,
        def: ModeDef,
    ) -> Result<EntityId> {
        let id = self.create_entity();
        self.register_mode(id, def);
        self.set_name(id, name);
        self.add_child(parent, id)?;
        Ok(id)
    }

    /// Creates a named `instance.peripheral` under `device`, placing
    /// `target` at byte offset `base`. The target must be a
    /// `type.peripheral` or `type.register_group`.
    pub fn create_peripheral_instance(
        &mut self,
        device: EntityId,
        name: impl Into<String>,
        target: EntityId,
        base: u64,
    ) -> Result<EntityId> {
        match self.kind_of(target) {
            Some(EntityKind::TypePeripheral | EntityKind::TypeRegisterGroup) => {}
            Some(kind) => {
                return Err(Error::KindMismatch {
                    parent: device,
                    parent_kind: EntityKind::InstanceDevice,
                    id: target,
                    kind,
                });
            }
            None => return Err(Error::UnknownEntity { id: target }),
        }
        let id = self.create_entity();
        self.register_peripheral_instance(id, target);
        self.set_name(id, name);
        self.set_offset(id, base);
        self.add_child(device, id)?;
        Ok(id)
    }

    /// Creates a named `instance.interrupt` under `device`.
    pub fn create_interrupt(
        &mut self,
        device: EntityId,
        name: impl Into<String>,
        index: i64,
    ) -> Result<EntityId> {
        let id = self.create_entity();
        self.register_interrupt(id, index);
        self.set_name(id, name);
        self.add_child(device, id)?;
        Ok(id)
    }

    /// Verifies the structural invariants of the store: kind tables
    /// partition the live entities, edges are well-typed and mirrored by
    /// `parent`, the parent relation is a forest, and mode/enum/instance
    /// references stay in scope. Loaders run this after populating the
    /// store; emitters run it before reading.
    pub fn assert_valid(&self) -> Result<()> {
        self.check_kind_tables()?;
        self.check_edges()?;
        self.check_forest()?;
        self.check_mode_scope()?;
        self.check_enum_scope()?;
        self.check_instance_targets()?;
        Ok(())
    }

    // The kind registry and the kind tables agree, and every id any table
    // references is live.
    fn check_kind_tables(&self) -> Result<()> {
        let mut seen = 0usize;
        for kind in [
            EntityKind::TypePeripheral,
            EntityKind::TypeRegisterGroup,
            EntityKind::TypeRegister,
            EntityKind::TypeField,
            EntityKind::TypeEnum,
            EntityKind::TypeEnumField,
            EntityKind::TypeMode,
            EntityKind::InstanceDevice,
            EntityKind::InstancePeripheral,
            EntityKind::InstanceInterrupt,
        ] {
            for id in self.entities_of(kind) {
                seen += 1;
                if self.kind_of(id) != Some(kind) {
                    return Err(Error::UnknownEntity { id });
                }
            }
        }
        if seen != self.kinds.len() {
            // Some registered id is missing from its kind table.
            for (&id, &kind) in &self.kinds {
                if !self.entities_of(kind).any(|other| other == id) {
                    return Err(Error::UnknownEntity { id });
                }
            }
        }
        for id in self
            .names
            .keys()
            .chain(self.descriptions.keys())
            .chain(self.offsets.keys())
            .chain(self.sizes.keys())
            .chain(self.accesses.keys())
            .chain(self.reset_values.keys())
            .chain(self.reset_masks.keys())
            .chain(self.versions.keys())
            .chain(self.archs.keys())
            .chain(self.enum_refs.keys())
            .chain(self.modes.keys())
            .chain(self.parents.keys())
        {
            if self.kind_of(*id).is_none() {
                return Err(Error::UnknownEntity { id: *id });
            }
        }
        Ok(())
    }

    // Every recorded edge points at a live child of the declared kind, and
    // the child's parent attribute points back.
    fn check_edges(&self) -> Result<()> {
        for (&child_kind, edges) in &self.children {
            for (&parent, kids) in edges {
                let parent_kind =
                    self.kind_of(parent).ok_or(Error::UnknownEntity { id: parent })?;
                for &child in kids {
                    let kind = self.kind_of(child).ok_or(Error::UnknownEntity { id: child })?;
                    if kind != child_kind || !edge_allowed(parent_kind, child_kind) {
                        return Err(Error::KindMismatch { parent, parent_kind, id: child, kind });
                    }
                    if self.parent(child) != Some(parent) {
                        return Err(Error::KindMismatch { parent, parent_kind, id: child, kind });
                    }
                }
            }
        }
        Ok(())
    }

    // The parent relation is a forest.
    fn check_forest(&self) -> Result<()> {
        for &id in self.parents.keys() {
            let mut slow = id;
            let mut steps = 0;
            let mut current = self.parent(id);
            while let Some(next) = current {
                if next == slow {
                    return Err(Error::CycleDetected { id });
                }
                steps += 1;
                if steps % 2 == 0 {
                    slow = self.parent(slow).expect("slow pointer trails inside the chain");
                }
                current = self.parent(next);
            }
        }
        Ok(())
    }

    // Every id in a `modes` attribute is a type.mode child of the carrying
    // entity or one of its ancestors.
    fn check_mode_scope(&self) -> Result<()> {
        for (&id, mode_ids) in &self.modes {
            for &mode in mode_ids {
                if !self.entity_is(EntityKind::TypeMode, mode) {
                    return Err(Error::ScopeViolation { id, referenced: mode, what: "mode" });
                }
                let owner = self.parent(mode);
                let visible = owner == Some(id)
                    || self.ancestors(id).any(|ancestor| Some(ancestor) == owner);
                if !visible {
                    return Err(Error::ScopeViolation { id, referenced: mode, what: "mode" });
                }
            }
        }
        Ok(())
    }

    // Every enum_ref resolves to a type.enum hanging off the field's
    // ancestry.
    fn check_enum_scope(&self) -> Result<()> {
        for (&field, &enum_id) in &self.enum_refs {
            if !self.entity_is(EntityKind::TypeEnum, enum_id) {
                return Err(Error::ScopeViolation { id: field, referenced: enum_id, what: "enum" });
            }
            let owner = self.parent(enum_id);
            let visible = self.ancestors(field).any(|ancestor| Some(ancestor) == owner);
            if !visible {
                return Err(Error::ScopeViolation { id: field, referenced: enum_id, what: "enum" });
            }
        }
        Ok(())
    }

    // Instance targets are peripheral or register-group types.
    fn check_instance_targets(&self) -> Result<()> {
        for (&instance, &target) in &self.instance_peripherals {
            match self.kind_of(target) {
                Some(EntityKind::TypePeripheral | EntityKind::TypeRegisterGroup) => {}
                Some(kind) => {
                    return Err(Error::KindMismatch {
                        parent: instance,
                        parent_kind: EntityKind::InstancePeripheral,
                        id: target,
                        kind,
                    });
                }
                None => return Err(Error::UnknownEntity { id: target }),
            }
        }
        Ok(())
    }
}
