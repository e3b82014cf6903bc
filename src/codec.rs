//! Canonical JSON projection of the database.
//!
//! The dump is round-trippable: loading a dump rebuilds the same attribute
//! and child content under fresh ids. Maps keep insertion order, only
//! present attributes are emitted, and `access` is omitted when it is the
//! `read-write` default. Anonymous enums are embedded inline under the
//! referencing field instead of being hoisted into a keyed map.

use crate::database::{Access, Database, EntityId, EntityKind, ModeDef};
use crate::loader::{describe, resolve_mode_name};
use anyhow::{anyhow, bail, Context, Result};
use indexmap::IndexSet;
use log::warn;
use serde_json::{Map, Value};

/// Version stamped into every dump.
pub const FORMAT_VERSION: &str = env!("CARGO_PKG_VERSION");

// Child-kind groups, in the order they appear inside a `children` map.
// Modes come first so that reloading resolves mode references naturally.
const CHILD_GROUPS: &[(EntityKind, &str)] = &[
    (EntityKind::TypeMode, "modes"),
    (EntityKind::TypeEnum, "enums"),
    (EntityKind::TypeRegisterGroup, "register_groups"),
    (EntityKind::TypeRegister, "registers"),
    (EntityKind::TypeField, "fields"),
    (EntityKind::TypeEnumField, "enum_fields"),
];

/// Projects `db` into its canonical JSON document.
pub fn to_json(db: &Database) -> Result<Value> {
    db.assert_valid()?;
    let mut root = Map::new();
    root.insert("version".to_owned(), Value::String(FORMAT_VERSION.to_owned()));
    let mut peripherals = Map::new();
    for id in db.entities_of(EntityKind::TypePeripheral) {
        match db.name(id) {
            Some(name) => {
                peripherals.insert(name.to_owned(), entity_object(db, id));
            }
            None if is_instance_target(db, id) => {} // embedded at the instance site
            None => warn!("unnamed top-level type {id} is not representable in JSON"),
        }
    }
    if !peripherals.is_empty() {
        let mut types = Map::new();
        types.insert("peripherals".to_owned(), Value::Object(peripherals));
        root.insert("types".to_owned(), Value::Object(types));
    }
    let mut devices = Map::new();
    for device in db.entities_of(EntityKind::InstanceDevice) {
        match db.name(device) {
            Some(name) => {
                devices.insert(name.to_owned(), device_object(db, device));
            }
            None => warn!("unnamed device {device} is not representable in JSON"),
        }
    }
    if !devices.is_empty() {
        root.insert("devices".to_owned(), Value::Object(devices));
    }
    Ok(Value::Object(root))
}

/// Projects `db` into pretty-printed canonical JSON.
pub fn to_json_string(db: &Database) -> Result<String> {
    Ok(serde_json::to_string_pretty(&to_json(db)?)?)
}

/// Rebuilds a database from a canonical JSON document.
pub fn from_json(value: &Value) -> Result<Database> {
    let root = value.as_object().ok_or_else(|| anyhow!("the top level must be an object"))?;
    match root.get("version").and_then(Value::as_str) {
        Some(version) => check_version(version),
        None => bail!("the dump is missing its version"),
    }
    let mut db = Database::new();
    if let Some(types) = root.get("types") {
        let types = types.as_object().ok_or_else(|| anyhow!("`types` must be an object"))?;
        if let Some(peripherals) = types.get("peripherals") {
            let peripherals = peripherals
                .as_object()
                .ok_or_else(|| anyhow!("`types.peripherals` must be an object"))?;
            for (name, object) in peripherals {
                let peripheral = db.create_peripheral(Some(name.clone()));
                load_type_body(&mut db, peripheral, object)
                    .with_context(|| format!("peripheral {name}"))?;
            }
        }
    }
    if let Some(devices) = root.get("devices") {
        let devices =
            devices.as_object().ok_or_else(|| anyhow!("`devices` must be an object"))?;
        for (name, object) in devices {
            load_device(&mut db, name, object).with_context(|| format!("device {name}"))?;
        }
    }
    db.assert_valid()?;
    Ok(db)
}

/// Rebuilds a database from canonical JSON text.
pub fn from_json_str(text: &str) -> Result<Database> {
    let value: Value = serde_json::from_str(text).context("malformed JSON document")?;
    from_json(&value)
}

fn check_version(version: &str) {
    fn major(v: &str) -> &str {
        v.split('.').next().unwrap_or("")
    }
    if major(version) != major(FORMAT_VERSION) {
        warn!("dump version {version} differs from the supported {FORMAT_VERSION}");
    }
}

fn is_instance_target(db: &Database, id: EntityId) -> bool {
    db.entities_of(EntityKind::InstancePeripheral)
        .any(|instance| db.instance_target(instance) == Some(id))
}

fn scalar_attributes(db: &Database, id: EntityId, object: &mut Map<String, Value>) {
    if let Some(description) = db.description(id) {
        object.insert("description".to_owned(), description.into());
    }
    if let Some(offset) = db.offset(id) {
        object.insert("offset".to_owned(), offset.into());
    }
    if let Some(size) = db.size(id) {
        object.insert("size".to_owned(), size.into());
    }
    match db.access(id) {
        None | Some(Access::ReadWrite) => {}
        Some(access) => {
            let value = serde_json::to_value(access).expect("access serializes");
            object.insert("access".to_owned(), value);
        }
    }
    if let Some(value) = db.reset_value(id) {
        object.insert("reset_value".to_owned(), value.into());
    }
    if let Some(mask) = db.reset_mask(id) {
        object.insert("reset_mask".to_owned(), mask.into());
    }
    if let Some(version) = db.version(id) {
        object.insert("version".to_owned(), version.into());
    }
}

fn mode_names(db: &Database, id: EntityId) -> Option<Value> {
    let set = db.mode_set(id)?;
    let names: Vec<Value> = set
        .iter()
        .filter_map(|&mode| db.name(mode).map(|name| Value::String(name.to_owned())))
        .collect();
    Some(Value::Array(names))
}

fn entity_object(db: &Database, id: EntityId) -> Value {
    let mut object = Map::new();
    scalar_attributes(db, id, &mut object);
    match db.kind_of(id) {
        Some(EntityKind::TypeMode) => {
            let def = db.mode_def(id).expect("mode carries its payload");
            object.insert("value".to_owned(), def.value.clone().into());
            object.insert("qualifier".to_owned(), def.qualifier.clone().into());
        }
        Some(EntityKind::TypeEnumField) => {
            let value = db.enum_field_value(id).expect("enum field carries its payload");
            object.insert("value".to_owned(), value.into());
        }
        Some(EntityKind::TypeField) => {
            if let Some(value) = mode_names(db, id) {
                object.insert("modes".to_owned(), value);
            }
            if let Some(enum_id) = db.enum_ref(id) {
                let value = match db.name(enum_id) {
                    Some(name) => Value::String(name.to_owned()),
                    None => entity_object(db, enum_id),
                };
                object.insert("enum".to_owned(), value);
            }
        }
        Some(EntityKind::TypeRegister) => {
            if let Some(value) = mode_names(db, id) {
                object.insert("modes".to_owned(), value);
            }
        }
        _ => {}
    }
    let mut children = Map::new();
    for &(kind, key) in CHILD_GROUPS {
        let mut group = Map::new();
        for child in db.children_of(id, kind) {
            match db.name(child) {
                Some(name) => {
                    group.insert(name.to_owned(), entity_object(db, child));
                }
                // Anonymous enums are embedded at their reference site.
                None if kind == EntityKind::TypeEnum => {}
                None => warn!("unnamed {kind} under {} is dropped", describe(db, id)),
            }
        }
        if !group.is_empty() {
            children.insert(key.to_owned(), Value::Object(group));
        }
    }
    if !children.is_empty() {
        object.insert("children".to_owned(), Value::Object(children));
    }
    Value::Object(object)
}

fn device_object(db: &Database, device: EntityId) -> Value {
    let mut object = Map::new();
    if let Some(arch) = db.arch(device) {
        object.insert("arch".to_owned(), arch.into());
    }
    if let Some(description) = db.description(device) {
        object.insert("description".to_owned(), description.into());
    }
    let mut instances = Map::new();
    for instance in db.children_of(device, EntityKind::InstancePeripheral) {
        let name = match db.name(instance) {
            Some(name) => name,
            None => {
                warn!("unnamed instance {instance} is dropped");
                continue;
            }
        };
        let mut entry = Map::new();
        if let Some(description) = db.description(instance) {
            entry.insert("description".to_owned(), description.into());
        }
        if let Some(offset) = db.offset(instance) {
            entry.insert("offset".to_owned(), offset.into());
        }
        if let Some(version) = db.version(instance) {
            entry.insert("version".to_owned(), version.into());
        }
        if let Some(target) = db.instance_target(instance) {
            let value = match db.type_path(target) {
                Some(path) => Value::String(path),
                None => entity_object(db, target),
            };
            entry.insert("type".to_owned(), value);
        }
        instances.insert(name.to_owned(), Value::Object(entry));
    }
    if !instances.is_empty() {
        object.insert("peripherals".to_owned(), Value::Object(instances));
    }
    let mut interrupts = Map::new();
    for interrupt in db.children_of(device, EntityKind::InstanceInterrupt) {
        let name = match db.name(interrupt) {
            Some(name) => name,
            None => {
                warn!("unnamed interrupt {interrupt} is dropped");
                continue;
            }
        };
        let mut entry = Map::new();
        if let Some(index) = db.interrupt_index(interrupt) {
            entry.insert("index".to_owned(), index.into());
        }
        if let Some(description) = db.description(interrupt) {
            entry.insert("description".to_owned(), description.into());
        }
        interrupts.insert(name.to_owned(), Value::Object(entry));
    }
    if !interrupts.is_empty() {
        object.insert("interrupts".to_owned(), Value::Object(interrupts));
    }
    Value::Object(object)
}

fn apply_scalars(db: &mut Database, id: EntityId, object: &Map<String, Value>) -> Result<()> {
    if let Some(value) = object.get("description") {
        let text = value.as_str().ok_or_else(|| anyhow!("`description` must be a string"))?;
        db.set_description(id, text);
    }
    if let Some(value) = object.get("offset") {
        let offset = value.as_u64().ok_or_else(|| anyhow!("`offset` must be an integer"))?;
        db.set_offset(id, offset);
    }
    if let Some(value) = object.get("size") {
        let size = value.as_u64().ok_or_else(|| anyhow!("`size` must be an integer"))?;
        db.set_size(id, size as u32);
    }
    if let Some(value) = object.get("access") {
        let access: Access = serde_json::from_value(value.clone())
            .with_context(|| format!("bad `access` on {}", describe(db, id)))?;
        db.set_access(id, access);
    }
    if let Some(value) = object.get("reset_value") {
        let reset = value.as_u64().ok_or_else(|| anyhow!("`reset_value` must be an integer"))?;
        db.set_reset_value(id, reset);
    }
    if let Some(value) = object.get("reset_mask") {
        let mask = value.as_u64().ok_or_else(|| anyhow!("`reset_mask` must be an integer"))?;
        db.set_reset_mask(id, mask);
    }
    if let Some(value) = object.get("version") {
        let text = value.as_str().ok_or_else(|| anyhow!("`version` must be a string"))?;
        db.set_version(id, text);
    }
    Ok(())
}

fn find_visible_enum(db: &Database, field: EntityId, name: &str) -> Option<EntityId> {
    db.ancestors(field)
        .flat_map(|ancestor| db.children_of(ancestor, EntityKind::TypeEnum))
        .find(|&enum_id| db.name(enum_id) == Some(name))
}

fn enclosing_peripheral(db: &Database, id: EntityId) -> Option<EntityId> {
    db.ancestors(id).find(|&ancestor| db.entity_is(EntityKind::TypePeripheral, ancestor))
}

// Rebuilds one type entity from its JSON object: scalars, then the mode
// and enum references, then children parent-before-child.
fn load_type_body(db: &mut Database, id: EntityId, value: &Value) -> Result<()> {
    let object = value
        .as_object()
        .ok_or_else(|| anyhow!("expected an object for {}", describe(db, id)))?;
    apply_scalars(db, id, object)?;
    if let Some(modes) = object.get("modes") {
        let modes = modes.as_array().ok_or_else(|| anyhow!("`modes` must be an array"))?;
        let mut set = IndexSet::new();
        for name in modes {
            let name = name.as_str().ok_or_else(|| anyhow!("mode names must be strings"))?;
            match resolve_mode_name(db, id, name) {
                Some(mode) => {
                    set.insert(mode);
                }
                None => warn!("unresolved mode name `{name}` on {}", describe(db, id)),
            }
        }
        if !set.is_empty() {
            db.set_modes(id, set);
        }
    }
    if let Some(enum_value) = object.get("enum") {
        match enum_value {
            Value::String(name) => match find_visible_enum(db, id, name) {
                Some(enum_id) => db.set_enum_ref(id, enum_id),
                None => warn!("{}: unknown enum `{name}`", describe(db, id)),
            },
            inline => {
                let peripheral = enclosing_peripheral(db, id)
                    .ok_or_else(|| anyhow!("no peripheral scope for an inline enum"))?;
                let enum_id = db.create_enum(peripheral, None)?;
                load_type_body(db, enum_id, inline)?;
                db.set_enum_ref(id, enum_id);
            }
        }
    }
    if let Some(children) = object.get("children") {
        let children =
            children.as_object().ok_or_else(|| anyhow!("`children` must be an object"))?;
        for (key, group) in children {
            let group = group
                .as_object()
                .ok_or_else(|| anyhow!("child group `{key}` must be an object"))?;
            match key.as_str() {
                "modes" => {
                    for (name, child) in group {
                        load_mode(db, id, name, child)?;
                    }
                }
                "enums" => {
                    for (name, child) in group {
                        let enum_id = db.create_enum(id, Some(name.clone()))?;
                        load_type_body(db, enum_id, child)?;
                    }
                }
                "enum_fields" => {
                    for (name, child) in group {
                        load_enum_field(db, id, name, child)?;
                    }
                }
                "register_groups" => {
                    for (name, child) in group {
                        let group_id = db.create_register_group(id, name.clone())?;
                        load_type_body(db, group_id, child)?;
                    }
                }
                "registers" => {
                    for (name, child) in group {
                        let register = db.create_register(id, name.clone())?;
                        load_type_body(db, register, child)?;
                    }
                }
                "fields" => {
                    for (name, child) in group {
                        let field = db.create_field(id, name.clone())?;
                        load_type_body(db, field, child)?;
                    }
                }
                _ => warn!("unknown child group `{key}` under {}", describe(db, id)),
            }
        }
    }
    Ok(())
}

fn load_mode(db: &mut Database, parent: EntityId, name: &str, value: &Value) -> Result<()> {
    let object =
        value.as_object().ok_or_else(|| anyhow!("mode {name} must be an object"))?;
    let detection = object
        .get("value")
        .and_then(Value::as_str)
        .ok_or_else(|| anyhow!("mode {name} is missing its `value`"))?
        .to_owned();
    let qualifier = object
        .get("qualifier")
        .and_then(Value::as_str)
        .ok_or_else(|| anyhow!("mode {name} is missing its `qualifier`"))?
        .to_owned();
    let mode = db.create_mode(parent, name, ModeDef { value: detection, qualifier })?;
    if let Some(description) = object.get("description").and_then(Value::as_str) {
        db.set_description(mode, description);
    }
    Ok(())
}

fn load_enum_field(db: &mut Database, parent: EntityId, name: &str, value: &Value) -> Result<()> {
    let object =
        value.as_object().ok_or_else(|| anyhow!("enum value {name} must be an object"))?;
    let payload = object
        .get("value")
        .and_then(Value::as_i64)
        .ok_or_else(|| anyhow!("enum value {name} is missing its `value`"))?;
    let enum_field = db.create_enum_field(parent, name, payload)?;
    if let Some(description) = object.get("description").and_then(Value::as_str) {
        db.set_description(enum_field, description);
    }
    Ok(())
}

fn resolve_type_path(db: &Database, path: &str) -> Result<EntityId> {
    let mut parts = path.split('.');
    let first = parts.next().ok_or_else(|| anyhow!("empty type path"))?;
    let mut current = db.find_by_name(EntityKind::TypePeripheral, first)?;
    for part in parts {
        current = db
            .children_of(current, EntityKind::TypeRegisterGroup)
            .find(|&group| db.name(group) == Some(part))
            .ok_or_else(|| anyhow!("unknown register group `{part}` in `{path}`"))?;
    }
    Ok(current)
}

fn load_device(db: &mut Database, name: &str, value: &Value) -> Result<()> {
    let object =
        value.as_object().ok_or_else(|| anyhow!("device {name} must be an object"))?;
    let device = db.create_device(name);
    if let Some(arch) = object.get("arch").and_then(Value::as_str) {
        db.set_arch(device, arch);
    }
    if let Some(description) = object.get("description").and_then(Value::as_str) {
        db.set_description(device, description);
    }
    if let Some(peripherals) = object.get("peripherals") {
        let peripherals = peripherals
            .as_object()
            .ok_or_else(|| anyhow!("`peripherals` must be an object"))?;
        for (instance_name, entry) in peripherals {
            let entry = entry
                .as_object()
                .ok_or_else(|| anyhow!("instance {instance_name} must be an object"))?;
            let offset = entry
                .get("offset")
                .and_then(Value::as_u64)
                .ok_or_else(|| anyhow!("instance {instance_name} is missing its `offset`"))?;
            let target = match entry.get("type") {
                Some(Value::String(path)) => resolve_type_path(db, path)?,
                Some(inline) => {
                    let peripheral = db.create_peripheral(None);
                    load_type_body(db, peripheral, inline)?;
                    peripheral
                }
                None => bail!("instance {instance_name} names no type"),
            };
            let instance =
                db.create_peripheral_instance(device, instance_name.clone(), target, offset)?;
            if let Some(description) = entry.get("description").and_then(Value::as_str) {
                db.set_description(instance, description);
            }
            if let Some(version) = entry.get("version").and_then(Value::as_str) {
                db.set_version(instance, version);
            }
        }
    }
    if let Some(interrupts) = object.get("interrupts") {
        let interrupts = interrupts
            .as_object()
            .ok_or_else(|| anyhow!("`interrupts` must be an object"))?;
        for (interrupt_name, entry) in interrupts {
            let entry = entry
                .as_object()
                .ok_or_else(|| anyhow!("interrupt {interrupt_name} must be an object"))?;
            let index = entry
                .get("index")
                .and_then(Value::as_i64)
                .ok_or_else(|| anyhow!("interrupt {interrupt_name} is missing its `index`"))?;
            let interrupt = db.create_interrupt(device, interrupt_name.clone(), index)?;
            if let Some(description) = entry.get("description").and_then(Value::as_str) {
                db.set_description(interrupt, description);
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rich_fixture() -> Database {
        let mut db = Database::new();
        let twi = db.create_peripheral(Some("TWI".to_owned()));
        db.set_description(twi, "Two Wire Interface");
        let host = db
            .create_mode(
                twi,
                "HOST",
                ModeDef { value: "1".to_owned(), qualifier: "TWI.HOST.CTRL.SEL".to_owned() },
            )
            .unwrap();
        db.create_mode(
            twi,
            "CLIENT",
            ModeDef { value: "0".to_owned(), qualifier: "TWI.CLIENT.CTRL.SEL".to_owned() },
        )
        .unwrap();
        let prescaler = db.create_enum(twi, Some("PRESCALER".to_owned())).unwrap();
        db.set_size(prescaler, 2);
        db.create_enum_field(prescaler, "DIV1", 0).unwrap();
        db.create_enum_field(prescaler, "DIV4", 1).unwrap();
        let ctrl = db.create_register(twi, "CTRL").unwrap();
        db.set_offset(ctrl, 0);
        db.set_size(ctrl, 8);
        db.set_access(ctrl, Access::ReadWrite);
        db.set_reset_value(ctrl, 0);
        let sel = db.create_field(ctrl, "SEL").unwrap();
        db.set_offset(sel, 0);
        db.set_size(sel, 1);
        let presc = db.create_field(ctrl, "PRESC").unwrap();
        db.set_offset(presc, 1);
        db.set_size(presc, 2);
        db.set_enum_ref(presc, prescaler);
        let hdata = db.create_register(twi, "HDATA").unwrap();
        db.set_offset(hdata, 1);
        db.set_size(hdata, 8);
        db.set_access(hdata, Access::ReadOnly);
        db.set_modes(hdata, std::iter::once(host).collect());
        // An anonymous enum referenced by a field, embedded inline on dump.
        let anonymous = db.create_enum(twi, None).unwrap();
        db.set_size(anonymous, 1);
        db.create_enum_field(anonymous, "OFF", 0).unwrap();
        db.create_enum_field(anonymous, "ON", 1).unwrap();
        let status = db.create_register(twi, "STATUS").unwrap();
        db.set_offset(status, 2);
        db.set_size(status, 8);
        let ready = db.create_field(status, "READY").unwrap();
        db.set_offset(ready, 0);
        db.set_size(ready, 1);
        db.set_enum_ref(ready, anonymous);
        let port = db.create_peripheral(Some("PORT".to_owned()));
        let portb = db.create_register_group(port, "PORTB").unwrap();
        let pinb = db.create_register(portb, "PINB").unwrap();
        db.set_offset(pinb, 0);
        db.set_size(pinb, 8);
        let device = db.create_device("ATtest42");
        db.set_arch(device, "AVR8");
        db.create_peripheral_instance(device, "TWI0", twi, 0xB8).unwrap();
        db.create_peripheral_instance(device, "PORTB", portb, 0x23).unwrap();
        db.create_interrupt(device, "INT0", 1).unwrap();
        db
    }

    #[test]
    fn round_trip_is_stable() {
        let db = rich_fixture();
        let first = to_json_string(&db).unwrap();
        let reloaded = from_json_str(&first).expect("dump reloads");
        let second = to_json_string(&reloaded).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn read_write_access_is_omitted() {
        let db = rich_fixture();
        let value = to_json(&db).unwrap();
        let ctrl = &value["types"]["peripherals"]["TWI"]["children"]["registers"]["CTRL"];
        assert!(ctrl.get("access").is_none(), "got: {ctrl}");
        let hdata = &value["types"]["peripherals"]["TWI"]["children"]["registers"]["HDATA"];
        assert_eq!(hdata["access"], Value::String("read-only".to_owned()));
    }

    #[test]
    fn modes_serialize_as_name_arrays() {
        let db = rich_fixture();
        let value = to_json(&db).unwrap();
        let hdata = &value["types"]["peripherals"]["TWI"]["children"]["registers"]["HDATA"];
        assert_eq!(hdata["modes"], serde_json::json!(["HOST"]));
        let modes = &value["types"]["peripherals"]["TWI"]["children"]["modes"];
        assert_eq!(modes["HOST"]["qualifier"], Value::String("TWI.HOST.CTRL.SEL".to_owned()));
        assert_eq!(modes["HOST"]["value"], Value::String("1".to_owned()));
    }

    #[test]
    fn anonymous_enums_embed_inline() {
        let db = rich_fixture();
        let value = to_json(&db).unwrap();
        let ready = &value["types"]["peripherals"]["TWI"]["children"]["registers"]["STATUS"]
            ["children"]["fields"]["READY"];
        let inline = &ready["enum"];
        assert!(inline.is_object(), "got: {ready}");
        assert_eq!(inline["children"]["enum_fields"]["ON"]["value"], serde_json::json!(1));
        // The named enum stays keyed under the peripheral's children.
        let enums = &value["types"]["peripherals"]["TWI"]["children"]["enums"];
        assert!(enums.get("PRESCALER").is_some());
        assert_eq!(enums.as_object().unwrap().len(), 1);
    }

    #[test]
    fn instances_reference_types_by_dotted_path() {
        let db = rich_fixture();
        let value = to_json(&db).unwrap();
        let device = &value["devices"]["ATtest42"];
        assert_eq!(device["arch"], Value::String("AVR8".to_owned()));
        assert_eq!(device["peripherals"]["TWI0"]["type"], Value::String("TWI".to_owned()));
        assert_eq!(
            device["peripherals"]["PORTB"]["type"],
            Value::String("PORT.PORTB".to_owned())
        );
        assert_eq!(device["interrupts"]["INT0"]["index"], serde_json::json!(1));
    }

    #[test]
    fn reload_restores_relations() {
        let db = rich_fixture();
        let dump = to_json_string(&db).unwrap();
        let reloaded = from_json_str(&dump).unwrap();
        reloaded.assert_valid().unwrap();
        let twi = reloaded.find_by_name(EntityKind::TypePeripheral, "TWI").unwrap();
        let host = reloaded.find_by_name(EntityKind::TypeMode, "HOST").unwrap();
        assert_eq!(reloaded.parent(host), Some(twi));
        let hdata = reloaded.find_by_name(EntityKind::TypeRegister, "HDATA").unwrap();
        assert!(reloaded.mode_set(hdata).unwrap().contains(&host));
        let presc = reloaded.find_by_name(EntityKind::TypeField, "PRESC").unwrap();
        let prescaler = reloaded.enum_ref(presc).unwrap();
        assert_eq!(reloaded.name(prescaler), Some("PRESCALER"));
        let portb_instance =
            reloaded.find_by_name(EntityKind::InstancePeripheral, "PORTB").unwrap();
        let portb_group =
            reloaded.find_by_name(EntityKind::TypeRegisterGroup, "PORTB").unwrap();
        assert_eq!(reloaded.instance_target(portb_instance), Some(portb_group));
    }

    #[test]
    fn missing_version_is_rejected() {
        assert!(from_json_str("{}").is_err());
        assert!(from_json_str(r#"{"version": "0.1.0"}"#).is_ok());
    }

    #[test]
    fn hand_written_documents_load() {
        let text = r#"
            {
                "version": "0.1.0",
                "types": {
                    "peripherals": {
                        "GPIO": {
                            "children": {
                                "registers": {
                                    "OUT": {
                                        "offset": 0,
                                        "size": 8,
                                        "access": "write-only",
                                        "children": {
                                            "fields": {
                                                "PIN0": { "offset": 0, "size": 1 }
                                            }
                                        }
                                    }
                                }
                            }
                        }
                    }
                },
                "devices": {
                    "CHIP": {
                        "peripherals": {
                            "GPIO0": { "offset": 1024, "type": "GPIO" }
                        }
                    }
                }
            }
        "#;
        let db = from_json_str(text).expect("document loads");
        let out = db.find_by_name(EntityKind::TypeRegister, "OUT").unwrap();
        assert_eq!(db.access(out), Some(Access::WriteOnly));
        let instance = db.find_by_name(EntityKind::InstancePeripheral, "GPIO0").unwrap();
        assert_eq!(db.offset(instance), Some(1024));
    }
}
