//! Targeted tests for the entity store's builders, queries, and invariants.

use super::*;

fn sample() -> (Database, EntityId, EntityId, EntityId, EntityId) {
    let mut db = Database::new();
    let peripheral = db.create_peripheral(Some("UART".to_owned()));
    let register = db.create_register(peripheral, "CTRL").unwrap();
    db.set_offset(register, 0);
    db.set_size(register, 32);
    let field = db.create_field(register, "ENABLE").unwrap();
    db.set_offset(field, 0);
    db.set_size(field, 1);
    let device = db.create_device("TESTCHIP");
    db.create_peripheral_instance(device, "UART0", peripheral, 0x4000_0000).unwrap();
    (db, peripheral, register, field, device)
}

#[test]
fn builders_register_and_attach() {
    let (db, peripheral, register, field, device) = sample();
    assert!(db.entity_is(EntityKind::TypePeripheral, peripheral));
    assert!(db.entity_is(EntityKind::TypeRegister, register));
    assert!(db.entity_is(EntityKind::TypeField, field));
    assert!(db.entity_is(EntityKind::InstanceDevice, device));
    assert_eq!(db.parent(register), Some(peripheral));
    assert_eq!(db.parent(field), Some(register));
    assert_eq!(db.name(register), Some("CTRL"));
    db.assert_valid().expect("sample database is well-formed");
}

#[test]
fn children_iterate_in_insertion_order() {
    let mut db = Database::new();
    let peripheral = db.create_peripheral(Some("PORT".to_owned()));
    let r2 = db.create_register(peripheral, "DIR").unwrap();
    let r1 = db.create_register(peripheral, "OUT").unwrap();
    let r3 = db.create_register(peripheral, "IN").unwrap();
    let order: Vec<_> = db.children_of(peripheral, EntityKind::TypeRegister).collect();
    assert_eq!(order, vec![r2, r1, r3]);
}

#[test]
fn find_by_name_scans_one_kind_table() {
    let (db, peripheral, register, ..) = sample();
    assert_eq!(db.find_by_name(EntityKind::TypePeripheral, "UART"), Ok(peripheral));
    assert_eq!(db.find_by_name(EntityKind::TypeRegister, "CTRL"), Ok(register));
    assert_eq!(
        db.find_by_name(EntityKind::TypeRegister, "UART"),
        Err(Error::NameNotFound { kind: EntityKind::TypeRegister, name: "UART".to_owned() })
    );
}

#[test]
fn ancestors_walk_to_the_root() {
    let (db, peripheral, register, field, _) = sample();
    let chain: Vec<_> = db.ancestors(field).collect();
    assert_eq!(chain, vec![register, peripheral]);
}

#[test]
fn rejects_edges_outside_the_schema() {
    let mut db = Database::new();
    let peripheral = db.create_peripheral(Some("UART".to_owned()));
    let register = db.create_register(peripheral, "CTRL").unwrap();
    let orphan = db.create_entity();
    db.register(orphan, EntityKind::TypePeripheral);
    // A peripheral type cannot hang off a register.
    let err = db.add_child(register, orphan).unwrap_err();
    assert!(matches!(err, Error::KindMismatch { .. }), "got {err}");
}

#[test]
fn instance_target_must_be_a_type() {
    let (mut db, _, _, field, device) = sample();
    let err = db.create_peripheral_instance(device, "BOGUS", field, 0).unwrap_err();
    assert!(matches!(err, Error::KindMismatch { .. }), "got {err}");
}

#[test]
fn detects_parent_cycles() {
    let mut db = Database::new();
    let a = db.create_entity();
    db.register(a, EntityKind::TypeRegisterGroup);
    db.set_name(a, "A");
    let b = db.create_entity();
    db.register(b, EntityKind::TypeRegisterGroup);
    db.set_name(b, "B");
    db.add_child(a, b).unwrap();
    db.add_child(b, a).unwrap();
    let err = db.assert_valid().unwrap_err();
    assert!(matches!(err, Error::CycleDetected { .. }), "got {err}");
}

#[test]
fn mode_references_must_stay_in_scope() {
    let mut db = Database::new();
    let peripheral = db.create_peripheral(Some("TWI".to_owned()));
    let other = db.create_peripheral(Some("SPI".to_owned()));
    let mode = db
        .create_mode(
            other,
            "HOST",
            ModeDef { value: "0".to_owned(), qualifier: "SPI.HOST.CTRL.SEL".to_owned() },
        )
        .unwrap();
    let register = db.create_register(peripheral, "CTRL").unwrap();
    db.set_modes(register, std::iter::once(mode).collect());
    let err = db.assert_valid().unwrap_err();
    assert!(matches!(err, Error::ScopeViolation { what: "mode", .. }), "got {err}");
}

#[test]
fn mode_references_resolve_against_ancestry() {
    let mut db = Database::new();
    let peripheral = db.create_peripheral(Some("TWI".to_owned()));
    let mode = db
        .create_mode(
            peripheral,
            "HOST",
            ModeDef { value: "0".to_owned(), qualifier: "TWI.HOST.CTRL.SEL".to_owned() },
        )
        .unwrap();
    let register = db.create_register(peripheral, "CTRL").unwrap();
    db.set_offset(register, 0);
    db.set_size(register, 8);
    db.set_modes(register, std::iter::once(mode).collect());
    db.assert_valid().expect("mode owned by the register's parent is in scope");
}

#[test]
fn enum_references_must_stay_in_scope() {
    let mut db = Database::new();
    let peripheral = db.create_peripheral(Some("ADC".to_owned()));
    let other = db.create_peripheral(Some("DAC".to_owned()));
    let stray = db.create_enum(other, Some("REF".to_owned())).unwrap();
    let register = db.create_register(peripheral, "CTRL").unwrap();
    let field = db.create_field(register, "REFSEL").unwrap();
    db.set_enum_ref(field, stray);
    let err = db.assert_valid().unwrap_err();
    assert!(matches!(err, Error::ScopeViolation { what: "enum", .. }), "got {err}");
}

#[test]
fn enum_field_payload_lives_in_the_kind_table() {
    let mut db = Database::new();
    let peripheral = db.create_peripheral(Some("ADC".to_owned()));
    let variants = db.create_enum(peripheral, Some("PRESCALER".to_owned())).unwrap();
    let div2 = db.create_enum_field(variants, "DIV2", 0).unwrap();
    let div4 = db.create_enum_field(variants, "DIV4", 1).unwrap();
    assert_eq!(db.enum_field_value(div2), Some(0));
    assert_eq!(db.enum_field_value(div4), Some(1));
    let order: Vec<_> = db.children_of(variants, EntityKind::TypeEnumField).collect();
    assert_eq!(order, vec![div2, div4]);
}

#[test]
#[should_panic(expected = "set twice")]
fn double_setting_an_attribute_panics() {
    let mut db = Database::new();
    let peripheral = db.create_peripheral(Some("UART".to_owned()));
    db.set_description(peripheral, "first");
    db.set_description(peripheral, "second");
}

#[test]
#[should_panic(expected = "payload")]
fn payload_kinds_reject_plain_registration() {
    let mut db = Database::new();
    let id = db.create_entity();
    db.register(id, EntityKind::TypeMode);
}
