//! Typed peripheral layout generator.
//!
//! Walks a frozen database and emits one text artifact: a `devices`
//! namespace of typed base-address pointers and a `types` namespace of
//! packed peripheral records. Layout is driven by cursors — bytes between
//! registers, bits between fields — with reserved placeholders filling the
//! holes, so the emitted records are bit-exact images of the hardware. The
//! artifact ends in a NUL sentinel for the external formatter and is
//! byte-deterministic for a given database.

use crate::database::{Database, EntityId, EntityKind};
use crate::loader::{describe, parse_int};
use anyhow::{anyhow, bail, Result};
use log::warn;
use std::io::Write;

/// Generates the code artifact for `db` into `output`.
pub fn generate(db: &Database, output: &mut dyn Write) -> Result<()> {
    let text = render(db)?;
    output.write_all(text.as_bytes())?;
    Ok(())
}

/// Generates the code artifact for `db` as bytes.
pub fn generate_to_vec(db: &Database) -> Result<Vec<u8>> {
    Ok(render(db)?.into_bytes())
}

// Indentation-tracking text sink. Emission of a failing unit rolls back to
// the last checkpoint so partial lines never survive.
struct Out {
    text: String,
    indent: usize,
}

impl Out {
    fn new() -> Self {
        Self { text: String::new(), indent: 0 }
    }

    fn line(&mut self, line: impl AsRef<str>) {
        for _ in 0..self.indent {
            self.text.push_str("    ");
        }
        self.text.push_str(line.as_ref());
        self.text.push('\n');
    }

    fn open(&mut self, line: impl AsRef<str>) {
        self.line(line);
        self.indent += 1;
    }

    fn close(&mut self, line: impl AsRef<str>) {
        self.indent -= 1;
        self.line(line);
    }

    fn blank(&mut self) {
        self.text.push('\n');
    }

    fn checkpoint(&self) -> (usize, usize) {
        (self.text.len(), self.indent)
    }

    fn rollback(&mut self, checkpoint: (usize, usize)) {
        self.text.truncate(checkpoint.0);
        self.indent = checkpoint.1;
    }
}

fn render(db: &Database) -> Result<String> {
    db.assert_valid()?;
    let mut out = Out::new();
    out.line("const mmio = @import(\"mmio\");");
    let devices: Vec<EntityId> = db.entities_of(EntityKind::InstanceDevice).collect();
    if !devices.is_empty() {
        out.blank();
        out.open("pub const devices = struct {");
        for device in devices {
            let checkpoint = out.checkpoint();
            if let Err(err) = emit_device(&mut out, db, device) {
                out.rollback(checkpoint);
                warn!("skipping device {}: {err:#}", describe(db, device));
            }
        }
        out.close("};");
    }
    let named: Vec<EntityId> = db
        .entities_of(EntityKind::TypePeripheral)
        .filter(|&id| {
            let named = db.name(id).is_some();
            if !named {
                warn!("top-level type {id} has no name and is not emitted");
            }
            named
        })
        .collect();
    if !named.is_empty() {
        out.blank();
        out.open("pub const types = struct {");
        for peripheral in named {
            let checkpoint = out.checkpoint();
            if let Err(err) = emit_type_decl(&mut out, db, peripheral) {
                out.rollback(checkpoint);
                warn!("skipping peripheral {}: {err:#}", describe(db, peripheral));
            }
        }
        out.close("};");
    }
    // Parse sentinel for the external formatter, stripped before rendering.
    out.text.push('\0');
    Ok(out.text)
}

fn doc(out: &mut Out, db: &Database, id: EntityId) {
    if let Some(description) = db.description(id) {
        for line in description.lines() {
            out.line(format!("/// {}", line.trim()));
        }
    }
}

fn emit_device(out: &mut Out, db: &Database, device: EntityId) -> Result<()> {
    let name = db.require_name(device)?;
    doc(out, db, device);
    out.open(format!("pub const {name} = struct {{"));
    for instance in db.children_of(device, EntityKind::InstancePeripheral) {
        let checkpoint = out.checkpoint();
        if let Err(err) = emit_instance(out, db, instance) {
            out.rollback(checkpoint);
            warn!("skipping instance {}: {err:#}", describe(db, instance));
        }
    }
    out.close("};");
    Ok(())
}

fn emit_instance(out: &mut Out, db: &Database, instance: EntityId) -> Result<()> {
    let name = db.require_name(instance)?;
    let base = db.require_offset(instance)?;
    let target =
        db.instance_target(instance).ok_or_else(|| anyhow!("{instance} has no target type"))?;
    doc(out, db, instance);
    match db.type_path(target) {
        Some(path) => out.line(format!("pub const {name} = ptr(types.{path}, 0x{base:x});")),
        None => {
            // Unnamed target: the record is cast inline at the pointer site.
            let header = record_header(db, target);
            out.open(format!("pub const {name} = ptr({header} {{"));
            emit_record_body(out, db, target, None)?;
            out.close(format!("}}, 0x{base:x});"));
        }
    }
    Ok(())
}

fn record_header(db: &Database, id: EntityId) -> &'static str {
    if db.has_children(id, EntityKind::TypeMode) {
        "packed union"
    } else if is_zero_sized(db, id) {
        "struct"
    } else {
        "packed struct"
    }
}

fn is_zero_sized(db: &Database, id: EntityId) -> bool {
    if db.has_children(id, EntityKind::TypeRegister) {
        return false;
    }
    !db.children_of(id, EntityKind::TypeRegisterGroup).any(|group| db.offset(group).is_some())
}

fn emit_type_decl(out: &mut Out, db: &Database, id: EntityId) -> Result<()> {
    let name = db.require_name(id)?;
    doc(out, db, id);
    let header = record_header(db, id);
    out.open(format!("pub const {name} = {header} {{"));
    emit_record_body(out, db, id, None)?;
    out.close("};");
    Ok(())
}

fn emit_record_body(
    out: &mut Out,
    db: &Database,
    container: EntityId,
    active_mode: Option<EntityId>,
) -> Result<()> {
    if active_mode.is_none() && db.has_children(container, EntityKind::TypeMode) {
        return emit_union_body(out, db, container);
    }
    emit_struct_body(out, db, container, active_mode)
}

fn emit_struct_body(
    out: &mut Out,
    db: &Database,
    container: EntityId,
    active_mode: Option<EntityId>,
) -> Result<()> {
    emit_enum_decls(out, db, container);
    for group in db.children_of(container, EntityKind::TypeRegisterGroup) {
        if db.offset(group).is_some() {
            continue; // placed in the layout walk below
        }
        let checkpoint = out.checkpoint();
        if let Err(err) = emit_group_decl(out, db, group) {
            out.rollback(checkpoint);
            warn!("skipping register group {}: {err:#}", describe(db, group));
        }
    }
    emit_layout(out, db, container, active_mode)
}

fn emit_enum_decls(out: &mut Out, db: &Database, container: EntityId) {
    for enum_id in db.children_of(container, EntityKind::TypeEnum) {
        if db.name(enum_id).is_none() {
            continue; // anonymous enums are declared inline at the field
        }
        let checkpoint = out.checkpoint();
        if let Err(err) = emit_enum_decl(out, db, enum_id) {
            out.rollback(checkpoint);
            warn!("skipping enum {}: {err:#}", describe(db, enum_id));
        }
    }
}

fn emit_group_decl(out: &mut Out, db: &Database, group: EntityId) -> Result<()> {
    let name = db.require_name(group)?;
    doc(out, db, group);
    let header = record_header(db, group);
    out.open(format!("pub const {name} = {header} {{"));
    emit_record_body(out, db, group, None)?;
    out.close("};");
    Ok(())
}

struct Slot {
    id: EntityId,
    offset: u64,
    bits: u32,
    group: bool,
}

// Byte-cursor walk over the registers (and placed groups) of one container.
// Holes become reserved byte arrays; at equal offsets the smallest member
// wins and the rest are logged.
fn emit_layout(
    out: &mut Out,
    db: &Database,
    container: EntityId,
    active_mode: Option<EntityId>,
) -> Result<()> {
    let mut slots: Vec<Slot> = Vec::new();
    for register in db.children_of(container, EntityKind::TypeRegister) {
        if !applies(db, register, active_mode) {
            continue;
        }
        let offset = match db.offset(register) {
            Some(offset) => offset,
            None => {
                warn!("register {} has no offset and is skipped", describe(db, register));
                continue;
            }
        };
        let bits = match db.size(register) {
            Some(bits) => bits,
            None => {
                warn!("register {} has no size and is skipped", describe(db, register));
                continue;
            }
        };
        if bits % 8 != 0 {
            warn!("register {} is {bits} bits wide and is skipped", describe(db, register));
            continue;
        }
        slots.push(Slot { id: register, offset, bits, group: false });
    }
    for group in db.children_of(container, EntityKind::TypeRegisterGroup) {
        let offset = match db.offset(group) {
            Some(offset) => offset,
            None => continue, // declared as a nested type instead
        };
        let bytes = group_extent_bytes(db, group);
        if bytes == 0 {
            warn!("register group {} is empty and is skipped", describe(db, group));
            continue;
        }
        slots.push(Slot { id: group, offset, bits: (bytes * 8) as u32, group: true });
    }
    slots.sort_by_key(|slot| slot.offset);
    let mut cursor: u64 = 0;
    let mut index = 0;
    while index < slots.len() {
        let offset = slots[index].offset;
        let mut end = index;
        while end < slots.len() && slots[end].offset == offset {
            end += 1;
        }
        let run = &slots[index..end];
        let winner = run.iter().min_by_key(|slot| slot.bits).unwrap();
        for slot in run {
            if slot.id != winner.id {
                warn!(
                    "{} overlaps at offset {offset} and is skipped (smallest size wins)",
                    describe(db, slot.id)
                );
            }
        }
        let (id, bits, is_group) = (winner.id, winner.bits, winner.group);
        index = end;
        if offset < cursor {
            warn!(
                "{} at offset {offset} overlaps the previous member and is skipped",
                describe(db, id)
            );
            continue;
        }
        if offset > cursor {
            out.line(format!("reserved{offset}: [{}]u8,", offset - cursor));
            cursor = offset;
        }
        let checkpoint = out.checkpoint();
        let result = if is_group {
            emit_group_field(out, db, id)
        } else {
            emit_register_field(out, db, id, bits, active_mode)
        };
        match result {
            Ok(()) => cursor += u64::from(bits / 8),
            Err(err) => {
                out.rollback(checkpoint);
                warn!("skipping {}: {err:#}", describe(db, id));
            }
        }
    }
    Ok(())
}

fn applies(db: &Database, id: EntityId, active_mode: Option<EntityId>) -> bool {
    match active_mode {
        None => true,
        Some(mode) => db.mode_set(id).map_or(true, |set| set.contains(&mode)),
    }
}

// Recursive byte extent of a placed register group.
fn group_extent_bytes(db: &Database, group: EntityId) -> u64 {
    let mut extent = 0;
    for register in db.children_of(group, EntityKind::TypeRegister) {
        if let (Some(offset), Some(bits)) = (db.offset(register), db.size(register)) {
            extent = extent.max(offset + u64::from(bits / 8));
        }
    }
    for nested in db.children_of(group, EntityKind::TypeRegisterGroup) {
        if let Some(offset) = db.offset(nested) {
            extent = extent.max(offset + group_extent_bytes(db, nested));
        }
    }
    extent
}

fn emit_group_field(out: &mut Out, db: &Database, group: EntityId) -> Result<()> {
    let name = db.require_name(group)?;
    doc(out, db, group);
    let header = record_header(db, group);
    out.open(format!("{name}: {header} {{"));
    emit_record_body(out, db, group, None)?;
    out.close("},");
    Ok(())
}

fn emit_register_field(
    out: &mut Out,
    db: &Database,
    register: EntityId,
    bits: u32,
    active_mode: Option<EntityId>,
) -> Result<()> {
    let name = db.require_name(register)?;
    let mut fields: Vec<Slot> = Vec::new();
    for field in db.children_of(register, EntityKind::TypeField) {
        if !applies(db, field, active_mode) {
            continue;
        }
        let (offset, width) = match (db.offset(field), db.size(field)) {
            (Some(offset), Some(width)) => (offset, width),
            _ => {
                warn!("field {} has no bit range and is skipped", describe(db, field));
                continue;
            }
        };
        fields.push(Slot { id: field, offset, bits: width, group: false });
    }
    doc(out, db, register);
    if fields.is_empty() {
        out.line(format!("{name}: u{bits},"));
        return Ok(());
    }
    out.open(format!("{name}: Mmio({bits}, packed struct {{"));
    fields.sort_by_key(|slot| slot.offset);
    let size = u64::from(bits);
    let mut cursor: u64 = 0;
    let mut index = 0;
    while index < fields.len() {
        let offset = fields[index].offset;
        let mut end = index;
        while end < fields.len() && fields[end].offset == offset {
            end += 1;
        }
        let run = &fields[index..end];
        let winner = run.iter().min_by_key(|slot| slot.bits).unwrap();
        for slot in run {
            if slot.id != winner.id {
                warn!(
                    "{} overlaps at bit {offset} and is skipped (smallest size wins)",
                    describe(db, slot.id)
                );
            }
        }
        let (id, width) = (winner.id, winner.bits);
        index = end;
        if offset < cursor {
            warn!(
                "{} at bit {offset} overlaps the previous field and is skipped",
                describe(db, id)
            );
            continue;
        }
        if offset + u64::from(width) > size {
            warn!(
                "field {} extends past the {bits}-bit register; emission stops here",
                describe(db, id)
            );
            break;
        }
        if offset > cursor {
            out.line(format!("reserved{offset}: u{} = 0,", offset - cursor));
            cursor = offset;
        }
        let checkpoint = out.checkpoint();
        match emit_field(out, db, id, width) {
            Ok(()) => cursor = offset + u64::from(width),
            Err(err) => {
                out.rollback(checkpoint);
                warn!("skipping field {}: {err:#}", describe(db, id));
            }
        }
    }
    if cursor < size {
        out.line(format!("padding: u{} = 0,", size - cursor));
    }
    out.close("}),");
    Ok(())
}

fn emit_field(out: &mut Out, db: &Database, field: EntityId, width: u32) -> Result<()> {
    let name = db.require_name(field)?;
    doc(out, db, field);
    let enum_id = match db.enum_ref(field) {
        Some(enum_id) => enum_id,
        None => {
            out.line(format!("{name}: u{width},"));
            return Ok(());
        }
    };
    let size = enum_size(db, enum_id);
    if let Err(reason) = enum_usable(db, enum_id, size, width) {
        warn!("field {}: {reason}; emitted as a plain integer", describe(db, field));
        out.line(format!("{name}: u{width},"));
        return Ok(());
    }
    out.open(format!("{name}: packed union {{"));
    out.line(format!("raw: u{width},"));
    match db.name(enum_id) {
        Some(enum_name) => out.line(format!("value: {enum_name},")),
        None => {
            out.open(format!("value: enum(u{size}) {{"));
            emit_enum_values(out, db, enum_id, size)?;
            out.close("},");
        }
    }
    out.close("},");
    Ok(())
}

// Declared size, or the bit width of the largest value for enums that never
// learned one.
fn enum_size(db: &Database, enum_id: EntityId) -> u32 {
    db.size(enum_id).unwrap_or_else(|| {
        let max = db
            .children_of(enum_id, EntityKind::TypeEnumField)
            .filter_map(|field| db.enum_field_value(field))
            .max()
            .unwrap_or(0)
            .max(0) as u64;
        bits_required(max).max(1)
    })
}

fn bits_required(value: u64) -> u32 {
    64 - value.leading_zeros()
}

fn enum_soundness(db: &Database, enum_id: EntityId, size: u32) -> Result<(), String> {
    if size == 0 || size > 64 {
        return Err(format!("enum size {size} is outside u1..u64"));
    }
    for field in db.children_of(enum_id, EntityKind::TypeEnumField) {
        let value = match db.enum_field_value(field) {
            Some(value) => value,
            None => return Err("enum value without a payload".to_owned()),
        };
        if value < 0 || (size < 64 && (value as u128) >= (1u128 << size)) {
            return Err(format!("value 0x{value:x} does not fit in u{size}"));
        }
    }
    Ok(())
}

fn enum_usable(
    db: &Database,
    enum_id: EntityId,
    size: u32,
    field_width: u32,
) -> Result<(), String> {
    enum_soundness(db, enum_id, size)?;
    if size != field_width {
        return Err(format!("enum is u{size} but the field is u{field_width}"));
    }
    Ok(())
}

fn emit_enum_decl(out: &mut Out, db: &Database, enum_id: EntityId) -> Result<()> {
    let name = db.require_name(enum_id)?;
    let size = enum_size(db, enum_id);
    enum_soundness(db, enum_id, size).map_err(|reason| anyhow!("{reason}"))?;
    doc(out, db, enum_id);
    out.open(format!("pub const {name} = enum(u{size}) {{"));
    emit_enum_values(out, db, enum_id, size)?;
    out.close("};");
    Ok(())
}

fn emit_enum_values(out: &mut Out, db: &Database, enum_id: EntityId, size: u32) -> Result<()> {
    let mut count: u128 = 0;
    for field in db.children_of(enum_id, EntityKind::TypeEnumField) {
        let name = db.require_name(field)?;
        let value =
            db.enum_field_value(field).ok_or_else(|| anyhow!("{field} has no enum value"))?;
        doc(out, db, field);
        out.line(format!("{name} = 0x{value:x},"));
        count += 1;
    }
    // Hardware can hold values the description never lists; a non-exhaustive
    // sentinel keeps those representable.
    if size < 128 && count < (1u128 << size) {
        out.line("_,");
    }
    Ok(())
}

fn emit_union_body(out: &mut Out, db: &Database, container: EntityId) -> Result<()> {
    let modes: Vec<EntityId> = db.children_of(container, EntityKind::TypeMode).collect();
    out.open("pub const Mode = enum {");
    for &mode in &modes {
        out.line(format!("{},", db.require_name(mode)?));
    }
    out.close("};");
    out.open("pub fn get_mode(self: *volatile @This()) Mode {");
    for &mode in &modes {
        let checkpoint = out.checkpoint();
        if let Err(err) = emit_mode_arm(out, db, mode) {
            out.rollback(checkpoint);
            warn!("skipping mode detection for {}: {err:#}", describe(db, mode));
        }
    }
    out.line("unreachable;");
    out.close("}");
    emit_enum_decls(out, db, container);
    for group in db.children_of(container, EntityKind::TypeRegisterGroup) {
        if db.offset(group).is_some() {
            continue;
        }
        let checkpoint = out.checkpoint();
        if let Err(err) = emit_group_decl(out, db, group) {
            out.rollback(checkpoint);
            warn!("skipping register group {}: {err:#}", describe(db, group));
        }
    }
    for &mode in &modes {
        let name = db.require_name(mode)?;
        doc(out, db, mode);
        out.open(format!("{name}: packed struct {{"));
        emit_layout(out, db, container, Some(mode))?;
        out.close("},");
    }
    Ok(())
}

// One detection attempt: read the qualifier's field and switch on the
// mode's declared values.
fn emit_mode_arm(out: &mut Out, db: &Database, mode: EntityId) -> Result<()> {
    let name = db.require_name(mode)?;
    let def = db.mode_def(mode).ok_or_else(|| anyhow!("{mode} has no mode payload"))?;
    let components: Vec<&str> = def.qualifier.split('.').collect();
    if components.len() < 3 {
        bail!("qualifier `{}` is too short to name a register and field", def.qualifier);
    }
    // The leading component repeats the peripheral type name and is dropped.
    // The trailing component is the field; the middle is the register access
    // path.
    let field = components[components.len() - 1];
    let access_path = components[1..components.len() - 1].join(".");
    let literals: Vec<&str> = def.value.split_whitespace().collect();
    if literals.is_empty() {
        bail!("mode {name} declares no detection values");
    }
    for &literal in &literals {
        parse_int(literal).map_err(|err| anyhow!("bad mode value `{literal}`: {err}"))?;
    }
    out.open("{");
    out.line(format!("const value = self.{access_path}.read().{field};"));
    out.open("switch (value) {");
    out.line(format!("{} => return .{name},", literals.join(", ")));
    out.line("else => {},");
    out.close("}");
    out.close("}");
    Ok(())
}
