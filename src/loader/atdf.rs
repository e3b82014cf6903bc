//! Atmel/Microchip ATDF loader.
//!
//! `<module>` elements become peripheral types with register groups,
//! value-groups become enums, `<mode>` elements become mode entities with
//! their qualifier strings preserved verbatim. `<device>` elements become
//! device instances wired to the module register groups. A module whose
//! single register group shares its name is inlined: the group's members
//! attach directly to the peripheral and no intermediate group exists.

use super::{
    attr, describe, named_children, parse_access, parse_int, parse_int_i64, resolve_modes,
};
use crate::database::{Database, EntityId, ModeDef};
use anyhow::{anyhow, bail, Result};
use indexmap::IndexMap;
use log::{debug, warn};
use xmltree::Element;

// (module name, register-group name) -> target type for instance wiring.
// An inlined group maps to the peripheral type itself.
type GroupIndex = IndexMap<(String, String), EntityId>;

/// Loads an ATDF document rooted at `<avr-tools-device-file>` into a fresh
/// database.
pub fn load(root: &Element) -> Result<Database> {
    if root.name != "avr-tools-device-file" {
        bail!("ATDF input must be rooted at <avr-tools-device-file>, found <{}>", root.name);
    }
    let mut db = Database::new();
    let mut groups = GroupIndex::new();
    if let Some(modules) = root.get_child("modules") {
        for module in named_children(modules, "module") {
            if let Err(err) = load_module(&mut db, module, &mut groups) {
                warn!("skipping module: {err:#}");
            }
        }
    }
    if let Some(devices) = root.get_child("devices") {
        for device in named_children(devices, "device") {
            load_device(&mut db, device, &groups)?;
        }
    }
    db.assert_valid()?;
    Ok(db)
}

fn load_module(db: &mut Database, element: &Element, groups: &mut GroupIndex) -> Result<()> {
    let name = attr(element, "name")
        .ok_or_else(|| anyhow!("module is missing its name attribute"))?
        .to_owned();
    let peripheral = db.create_peripheral(Some(name.clone()));
    if let Some(caption) = attr(element, "caption") {
        db.set_description(peripheral, caption);
    }
    // Enums first so bitfields can resolve their value-group references.
    let mut enums = IndexMap::new();
    for value_group in named_children(element, "value-group") {
        if let Err(err) = load_value_group(db, peripheral, value_group, &mut enums) {
            warn!("module {name}: skipping value-group: {err:#}");
        }
    }
    let group_elements: Vec<&Element> = named_children(element, "register-group").collect();
    let inline = group_elements.len() == 1 && attr(group_elements[0], "name") == Some(name.as_str());
    if inline {
        load_group_members(db, peripheral, group_elements[0], &enums)?;
        groups.insert((name.clone(), name), peripheral);
    } else {
        for group_element in group_elements {
            if let Err(err) = load_group(db, peripheral, group_element, &enums, &name, groups) {
                warn!("module {name}: skipping register-group: {err:#}");
            }
        }
    }
    Ok(())
}

fn load_group(
    db: &mut Database,
    parent: EntityId,
    element: &Element,
    enums: &IndexMap<String, EntityId>,
    module_name: &str,
    groups: &mut GroupIndex,
) -> Result<()> {
    let group_name = attr(element, "name")
        .ok_or_else(|| anyhow!("register-group is missing its name attribute"))?
        .to_owned();
    let group = db.create_register_group(parent, group_name.clone())?;
    if let Some(caption) = attr(element, "caption") {
        db.set_description(group, caption);
    }
    if let Some(offset) = attr(element, "offset") {
        db.set_offset(group, parse_int(offset)?);
    }
    load_group_members(db, group, element, enums)?;
    groups.insert((module_name.to_owned(), group_name), group);
    Ok(())
}

// Modes first, then registers (which resolve mode names against their
// ancestry), then nested groups.
fn load_group_members(
    db: &mut Database,
    owner: EntityId,
    element: &Element,
    enums: &IndexMap<String, EntityId>,
) -> Result<()> {
    for mode in named_children(element, "mode") {
        if let Err(err) = load_mode(db, owner, mode) {
            warn!("{}: skipping mode: {err:#}", describe(db, owner));
        }
    }
    for register in named_children(element, "register") {
        if let Err(err) = load_register(db, owner, register, enums) {
            warn!("{}: skipping register: {err:#}", describe(db, owner));
        }
    }
    for nested in named_children(element, "register-group") {
        let result = (|| -> Result<()> {
            let nested_name = attr(nested, "name")
                .ok_or_else(|| anyhow!("register-group is missing its name attribute"))?
                .to_owned();
            let group = db.create_register_group(owner, nested_name)?;
            if let Some(offset) = attr(nested, "offset") {
                db.set_offset(group, parse_int(offset)?);
            }
            load_group_members(db, group, nested, enums)
        })();
        if let Err(err) = result {
            warn!("{}: skipping nested register-group: {err:#}", describe(db, owner));
        }
    }
    Ok(())
}

fn load_mode(db: &mut Database, owner: EntityId, element: &Element) -> Result<()> {
    let name = attr(element, "name")
        .ok_or_else(|| anyhow!("mode is missing its name attribute"))?
        .to_owned();
    let qualifier = attr(element, "qualifier")
        .ok_or_else(|| anyhow!("mode {name} is missing its qualifier attribute"))?
        .to_owned();
    let value = attr(element, "value")
        .ok_or_else(|| anyhow!("mode {name} is missing its value attribute"))?
        .to_owned();
    let mode = db.create_mode(owner, name, ModeDef { value, qualifier })?;
    if let Some(caption) = attr(element, "caption") {
        db.set_description(mode, caption);
    }
    Ok(())
}

fn load_register(
    db: &mut Database,
    owner: EntityId,
    element: &Element,
    enums: &IndexMap<String, EntityId>,
) -> Result<()> {
    let name = attr(element, "name")
        .ok_or_else(|| anyhow!("register is missing its name attribute"))?
        .to_owned();
    let offset_text = attr(element, "offset")
        .ok_or_else(|| anyhow!("register {name} is missing its offset attribute"))?;
    let offset = parse_int(offset_text)?;
    // ATDF sizes registers in bytes; the model stores bits.
    let size_text = attr(element, "size")
        .ok_or_else(|| anyhow!("register {name} is missing its size attribute"))?;
    let size = parse_int(size_text)? as u32 * 8;
    let register = db.create_register(owner, name.clone())?;
    db.set_offset(register, offset);
    db.set_size(register, size);
    if let Some(caption) = attr(element, "caption") {
        db.set_description(register, caption);
    }
    if let Some(rw) = attr(element, "rw") {
        match parse_access(rw) {
            Some(access) => db.set_access(register, access),
            None => warn!("register {name}: unknown rw value `{rw}`"),
        }
    }
    if let Some(initval) = attr(element, "initval") {
        match parse_int(initval) {
            Ok(value) => db.set_reset_value(register, value),
            Err(err) => warn!("register {name}: unparseable initval `{initval}`: {err}"),
        }
    }
    if let Some(mask) = attr(element, "mask") {
        debug!("register {name}: implemented-bits mask {mask} carries no layout information");
    }
    if let Some(mode_names) = attr(element, "modes") {
        let modes = resolve_modes(db, register, mode_names);
        if !modes.is_empty() {
            db.set_modes(register, modes);
        }
    }
    for bitfield in named_children(element, "bitfield") {
        if let Err(err) = load_bitfield(db, register, size, bitfield, enums) {
            warn!("register {name}: skipping bitfield: {err:#}");
        }
    }
    Ok(())
}

fn load_bitfield(
    db: &mut Database,
    register: EntityId,
    register_size: u32,
    element: &Element,
    enums: &IndexMap<String, EntityId>,
) -> Result<()> {
    let name = attr(element, "name")
        .ok_or_else(|| anyhow!("bitfield is missing its name attribute"))?
        .to_owned();
    let mask_text = attr(element, "mask")
        .ok_or_else(|| anyhow!("bitfield {name} is missing its mask attribute"))?;
    let mask = parse_int(mask_text)?;
    if mask == 0 {
        bail!("bitfield {name} has an empty mask");
    }
    let lsb = u64::from(mask.trailing_zeros());
    let span = 64 - mask.leading_zeros() - mask.trailing_zeros();
    let popcount = mask.count_ones();
    let access = attr(element, "rw").and_then(parse_access);
    let caption = attr(element, "caption").map(str::to_owned);
    let mode_names = attr(element, "modes").map(str::to_owned);
    if popcount == span {
        let field = db.create_field(register, name.clone())?;
        db.set_offset(field, lsb);
        db.set_size(field, popcount);
        if let Some(caption) = caption {
            db.set_description(field, caption);
        }
        if let Some(access) = access {
            db.set_access(field, access);
        }
        if let Some(mode_names) = &mode_names {
            let modes = resolve_modes(db, field, mode_names);
            if !modes.is_empty() {
                db.set_modes(field, modes);
            }
        }
        if let Some(group_name) = attr(element, "values") {
            match enums.get(group_name) {
                Some(&enum_id) => {
                    db.set_enum_ref(field, enum_id);
                    if db.size(enum_id).is_none() {
                        db.set_size(enum_id, popcount);
                    }
                }
                None => warn!("bitfield {name}: unknown value-group `{group_name}`"),
            }
        }
        return Ok(());
    }
    // Discontiguous mask: one single-bit field per set bit. Any enum
    // attachment no longer lines up with a contiguous value, so it is
    // dropped.
    warn!("bitfield {name}: discontiguous mask 0x{mask:x} split into {popcount} single bits");
    if attr(element, "values").is_some() {
        warn!("bitfield {name}: dropping value-group reference on the split field");
    }
    let mut ordinal = 0;
    for bit in 0..64 - mask.leading_zeros() as u64 {
        if mask & (1 << bit) == 0 {
            continue;
        }
        if bit >= u64::from(register_size) {
            warn!("bitfield {name}: mask bit {bit} is outside the register");
            break;
        }
        let field = db.create_field(register, format!("{name}_bit{ordinal}"))?;
        db.set_offset(field, bit);
        db.set_size(field, 1);
        if let Some(caption) = &caption {
            db.set_description(field, caption.clone());
        }
        if let Some(access) = access {
            db.set_access(field, access);
        }
        if let Some(mode_names) = &mode_names {
            let modes = resolve_modes(db, field, mode_names);
            if !modes.is_empty() {
                db.set_modes(field, modes);
            }
        }
        ordinal += 1;
    }
    Ok(())
}

fn load_value_group(
    db: &mut Database,
    peripheral: EntityId,
    element: &Element,
    enums: &mut IndexMap<String, EntityId>,
) -> Result<()> {
    let name = attr(element, "name")
        .ok_or_else(|| anyhow!("value-group is missing its name attribute"))?
        .to_owned();
    let enum_id = db.create_enum(peripheral, Some(name.clone()))?;
    if let Some(caption) = attr(element, "caption") {
        db.set_description(enum_id, caption);
    }
    for value in named_children(element, "value") {
        let result = (|| -> Result<()> {
            let value_name = attr(value, "name")
                .ok_or_else(|| anyhow!("value is missing its name attribute"))?
                .to_owned();
            let literal = attr(value, "value")
                .ok_or_else(|| anyhow!("value {value_name} is missing its value attribute"))?;
            let enum_field = db.create_enum_field(enum_id, value_name, parse_int_i64(literal)?)?;
            if let Some(caption) = attr(value, "caption") {
                db.set_description(enum_field, caption);
            }
            Ok(())
        })();
        if let Err(err) = result {
            warn!("value-group {name}: skipping value: {err:#}");
        }
    }
    enums.insert(name, enum_id);
    Ok(())
}

fn load_device(db: &mut Database, element: &Element, groups: &GroupIndex) -> Result<()> {
    // Device identity is the one thing a load cannot proceed without.
    let name = attr(element, "name")
        .ok_or_else(|| anyhow!("device is missing its name attribute"))?
        .to_owned();
    let arch = attr(element, "architecture")
        .ok_or_else(|| anyhow!("device {name} is missing its architecture attribute"))?
        .to_owned();
    let device = db.create_device(name.clone());
    db.set_arch(device, arch);
    if let Some(family) = attr(element, "family") {
        debug!("device {name}: family {family}");
    }
    if let Some(series) = attr(element, "series") {
        debug!("device {name}: series {series}");
    }
    if let Some(peripherals) = element.get_child("peripherals") {
        for module in named_children(peripherals, "module") {
            let module_name = match attr(module, "name") {
                Some(module_name) => module_name,
                None => {
                    warn!("device {name}: skipping module instance without a name");
                    continue;
                }
            };
            for instance in named_children(module, "instance") {
                if let Err(err) = load_instance(db, device, module_name, instance, groups) {
                    warn!("device {name}: skipping instance: {err:#}");
                }
            }
        }
    }
    if let Some(interrupts) = element.get_child("interrupts") {
        for interrupt in named_children(interrupts, "interrupt") {
            if let Err(err) = load_interrupt(db, device, interrupt) {
                warn!("device {name}: skipping interrupt: {err:#}");
            }
        }
    }
    Ok(())
}

fn load_instance(
    db: &mut Database,
    device: EntityId,
    module_name: &str,
    element: &Element,
    groups: &GroupIndex,
) -> Result<()> {
    let name = attr(element, "name")
        .ok_or_else(|| anyhow!("instance is missing its name attribute"))?
        .to_owned();
    let placement = element
        .get_child("register-group")
        .ok_or_else(|| anyhow!("instance {name} has no register-group placement"))?;
    let group_name = attr(placement, "name-in-module")
        .or_else(|| attr(placement, "name"))
        .ok_or_else(|| anyhow!("instance {name} names no register group"))?;
    let offset_text = attr(placement, "offset")
        .ok_or_else(|| anyhow!("instance {name} is missing its offset attribute"))?;
    let base = parse_int(offset_text)?;
    let target = *groups
        .get(&(module_name.to_owned(), group_name.to_owned()))
        .ok_or_else(|| anyhow!("instance {name} references unknown group {module_name}.{group_name}"))?;
    let instance = db.create_peripheral_instance(device, name, target, base)?;
    if let Some(caption) = attr(element, "caption") {
        db.set_description(instance, caption);
    }
    Ok(())
}

fn load_interrupt(db: &mut Database, device: EntityId, element: &Element) -> Result<()> {
    let name = attr(element, "name")
        .ok_or_else(|| anyhow!("interrupt is missing its name attribute"))?
        .to_owned();
    let index_text = attr(element, "index")
        .ok_or_else(|| anyhow!("interrupt {name} is missing its index attribute"))?;
    let index = parse_int_i64(index_text)?;
    let interrupt = db.create_interrupt(device, name, index)?;
    if let Some(caption) = attr(element, "caption") {
        db.set_description(interrupt, caption);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::EntityKind;

    const FIXTURE: &str = r#"
        <avr-tools-device-file>
            <modules>
                <module name="PORT" caption="I/O Port">
                    <register-group name="PORTB" caption="Port B">
                        <register name="PORTB" offset="0x25" size="1" rw="RW" caption="Data Register"/>
                        <register name="DDRB" offset="0x24" size="1" rw="RW"/>
                        <register name="PINB" offset="0x23" size="1" rw="R"/>
                    </register-group>
                    <register-group name="PORTC" caption="Port C">
                        <register name="PORTC" offset="0x28" size="1" rw="RW"/>
                    </register-group>
                </module>
                <module name="TWI" caption="Two Wire Interface">
                    <value-group name="PRESCALER">
                        <value name="DIV1" value="0x0"/>
                        <value name="DIV4" value="0x1"/>
                    </value-group>
                    <register-group name="TWI">
                        <mode name="HOST" qualifier="TWI.HOST.CTRL.ENABLE" value="1"/>
                        <mode name="CLIENT" qualifier="TWI.CLIENT.CTRL.ENABLE" value="0"/>
                        <register name="CTRL" offset="0x0" size="1" rw="RW">
                            <bitfield name="ENABLE" mask="0x01" rw="RW"/>
                            <bitfield name="PRESC" mask="0x06" values="PRESCALER"/>
                            <bitfield name="SPREAD" mask="0xA0"/>
                        </register>
                        <register name="HDATA" offset="0x1" size="1" modes="HOST"/>
                        <register name="CDATA" offset="0x1" size="1" modes="CLIENT BOGUS"/>
                    </register-group>
                </module>
            </modules>
            <devices>
                <device name="ATtest42" architecture="AVR8" family="megaAVR">
                    <peripherals>
                        <module name="PORT">
                            <instance name="PORTB" caption="Port B pins">
                                <register-group name="PORTB" name-in-module="PORTB" offset="0x23"/>
                            </instance>
                            <instance name="PORTC">
                                <register-group name="PORTC" name-in-module="PORTC" offset="0x26"/>
                            </instance>
                        </module>
                        <module name="TWI">
                            <instance name="TWI0">
                                <register-group name="TWI" name-in-module="TWI" offset="0xB8"/>
                            </instance>
                        </module>
                    </peripherals>
                    <interrupts>
                        <interrupt name="INT0" index="1" caption="External Interrupt 0"/>
                        <interrupt name="TWI" index="24"/>
                    </interrupts>
                </device>
            </devices>
        </avr-tools-device-file>
    "#;

    fn fixture() -> Database {
        let root = Element::parse(FIXTURE.as_bytes()).unwrap();
        load(&root).expect("fixture loads")
    }

    #[test]
    fn modules_with_several_groups_keep_them_nested() {
        let db = fixture();
        let port = db.find_by_name(EntityKind::TypePeripheral, "PORT").unwrap();
        let names: Vec<_> = db
            .children_of(port, EntityKind::TypeRegisterGroup)
            .map(|id| db.name(id).unwrap().to_owned())
            .collect();
        assert_eq!(names, vec!["PORTB", "PORTC"]);
        assert!(!db.has_children(port, EntityKind::TypeRegister));
    }

    #[test]
    fn single_same_named_group_is_inlined() {
        let db = fixture();
        let twi = db.find_by_name(EntityKind::TypePeripheral, "TWI").unwrap();
        assert!(!db.has_children(twi, EntityKind::TypeRegisterGroup));
        let registers: Vec<_> = db
            .children_of(twi, EntityKind::TypeRegister)
            .map(|id| db.name(id).unwrap().to_owned())
            .collect();
        assert_eq!(registers, vec!["CTRL", "HDATA", "CDATA"]);
    }

    #[test]
    fn register_sizes_convert_from_bytes_to_bits() {
        let db = fixture();
        let ctrl = db.find_by_name(EntityKind::TypeRegister, "CTRL").unwrap();
        assert_eq!(db.size(ctrl), Some(8));
        assert_eq!(db.offset(ctrl), Some(0));
    }

    #[test]
    fn contiguous_masks_become_single_fields() {
        let db = fixture();
        let presc = db.find_by_name(EntityKind::TypeField, "PRESC").unwrap();
        assert_eq!((db.offset(presc), db.size(presc)), (Some(1), Some(2)));
        let enum_id = db.enum_ref(presc).expect("value-group reference resolves");
        assert_eq!(db.name(enum_id), Some("PRESCALER"));
        assert_eq!(db.size(enum_id), Some(2));
    }

    #[test]
    fn discontiguous_masks_split_into_single_bits() {
        let db = fixture();
        // 0xA0 = bits 5 and 7.
        let bit0 = db.find_by_name(EntityKind::TypeField, "SPREAD_bit0").unwrap();
        let bit1 = db.find_by_name(EntityKind::TypeField, "SPREAD_bit1").unwrap();
        assert_eq!((db.offset(bit0), db.size(bit0)), (Some(5), Some(1)));
        assert_eq!((db.offset(bit1), db.size(bit1)), (Some(7), Some(1)));
        assert!(db.find_by_name(EntityKind::TypeField, "SPREAD").is_err());
    }

    #[test]
    fn mode_references_resolve_and_unknown_names_drop() {
        let db = fixture();
        let host = db.find_by_name(EntityKind::TypeMode, "HOST").unwrap();
        let client = db.find_by_name(EntityKind::TypeMode, "CLIENT").unwrap();
        assert_eq!(
            db.mode_def(host),
            Some(&ModeDef { value: "1".to_owned(), qualifier: "TWI.HOST.CTRL.ENABLE".to_owned() })
        );
        let hdata = db.find_by_name(EntityKind::TypeRegister, "HDATA").unwrap();
        let cdata = db.find_by_name(EntityKind::TypeRegister, "CDATA").unwrap();
        let hmodes: Vec<_> = db.mode_set(hdata).unwrap().iter().copied().collect();
        assert_eq!(hmodes, vec![host]);
        // BOGUS is warned about and dropped; CLIENT survives.
        let cmodes: Vec<_> = db.mode_set(cdata).unwrap().iter().copied().collect();
        assert_eq!(cmodes, vec![client]);
    }

    #[test]
    fn instances_target_module_groups() {
        let db = fixture();
        let device = db.find_by_name(EntityKind::InstanceDevice, "ATtest42").unwrap();
        assert_eq!(db.arch(device), Some("AVR8"));
        let portb = db.find_by_name(EntityKind::InstancePeripheral, "PORTB").unwrap();
        assert_eq!(db.offset(portb), Some(0x23));
        let portb_group = db.find_by_name(EntityKind::TypeRegisterGroup, "PORTB").unwrap();
        assert_eq!(db.instance_target(portb), Some(portb_group));
        // The inlined TWI group resolves to the peripheral type itself.
        let twi0 = db.find_by_name(EntityKind::InstancePeripheral, "TWI0").unwrap();
        let twi = db.find_by_name(EntityKind::TypePeripheral, "TWI").unwrap();
        assert_eq!(db.instance_target(twi0), Some(twi));
    }

    #[test]
    fn interrupts_attach_to_the_device() {
        let db = fixture();
        let int0 = db.find_by_name(EntityKind::InstanceInterrupt, "INT0").unwrap();
        assert_eq!(db.interrupt_index(int0), Some(1));
        assert_eq!(db.description(int0), Some("External Interrupt 0"));
    }

    #[test]
    fn missing_architecture_fails_the_load() {
        let xml = r#"
            <avr-tools-device-file>
                <devices>
                    <device name="NOARCH"/>
                </devices>
            </avr-tools-device-file>
        "#;
        let root = Element::parse(xml.as_bytes()).unwrap();
        assert!(load(&root).is_err());
    }
}
