//! CMSIS-SVD loader.
//!
//! Walks a `<device>` DOM and populates the database: one `type.peripheral`
//! plus one `instance.peripheral` per `<peripheral>`, registers and fields
//! underneath, inline `<enumeratedValues>` hoisted to peripheral scope.
//! `derivedFrom` chains are logged and left unresolved.

use super::{
    attr, child_text, named_children, parse_access, parse_int, parse_int_i64, warn_unknown_attrs,
    warn_unknown_children,
};
use crate::database::{Database, EntityId};
use anyhow::{anyhow, bail, Result};
use log::{debug, warn};
use std::str::FromStr;
use thiserror::Error;
use xmltree::Element;

/// A parsed `r<release>p<part>` CPU revision literal.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Revision {
    /// The release number.
    pub release: u32,
    /// The part number.
    pub part: u32,
}

/// Failure modes of the revision literal parser.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RevisionError {
    /// The string does not have the `r…p…` shape at all.
    #[error("revision literal must look like `r1p2`")]
    Malformed,
    /// One of the two digit runs is empty or not a number.
    #[error("invalid revision number: {0}")]
    InvalidDigit(#[from] std::num::ParseIntError),
}

impl FromStr for Revision {
    type Err = RevisionError;

    fn from_str(text: &str) -> Result<Self, Self::Err> {
        let rest = text.strip_prefix('r').ok_or(RevisionError::Malformed)?;
        let (release, part) = rest.split_once('p').ok_or(RevisionError::Malformed)?;
        Ok(Revision { release: release.parse()?, part: part.parse()? })
    }
}

const DEVICE_CHILDREN: &[&str] = &[
    "name",
    "vendor",
    "vendorID",
    "series",
    "version",
    "description",
    "licenseText",
    "cpu",
    "headerSystemName",
    "addressUnitBits",
    "width",
    "size",
    "access",
    "resetValue",
    "resetMask",
    "peripherals",
];

const CPU_CHILDREN: &[&str] = &[
    "name",
    "revision",
    "nvicPrioBits",
    "vendorSystickConfig",
    "endian",
    "mpuPresent",
    "fpuPresent",
    "dspPresent",
    "icachePresent",
    "dcachePresent",
    "itcmPresent",
    "dtcmPresent",
    "vtorPresent",
    "deviceNumInterrupts",
];

/// Loads an SVD document rooted at `<device>` into a fresh database.
pub fn load(root: &Element) -> Result<Database> {
    if root.name != "device" {
        bail!("SVD input must be rooted at <device>, found <{}>", root.name);
    }
    let mut db = Database::new();
    let name =
        child_text(root, "name").ok_or_else(|| anyhow!("SVD device is missing its <name>"))?;
    let device = db.create_device(name);
    if let Some(description) = child_text(root, "description") {
        db.set_description(device, description);
    }
    warn_unknown_children(root, DEVICE_CHILDREN, "<device>");
    if let Some(cpu) = root.get_child("cpu") {
        check_cpu(cpu);
    }
    let default_size = match child_text(root, "size") {
        Some(text) => match parse_int(&text) {
            Ok(size) => Some(size as u32),
            Err(err) => {
                warn!("unparseable device-level <size> `{text}`: {err}");
                None
            }
        },
        None => None,
    };
    if let Some(peripherals) = root.get_child("peripherals") {
        for element in named_children(peripherals, "peripheral") {
            if let Err(err) = load_peripheral(&mut db, device, element, default_size) {
                warn!("skipping peripheral: {err:#}");
            }
        }
    }
    db.assert_valid()?;
    Ok(db)
}

// The model has no CPU kind, so the block is only validated: the revision
// literal must parse and the remaining keys must be known.
fn check_cpu(cpu: &Element) {
    warn_unknown_children(cpu, CPU_CHILDREN, "<cpu>");
    if let Some(revision) = child_text(cpu, "revision") {
        match revision.parse::<Revision>() {
            Ok(parsed) => debug!("cpu revision r{}p{}", parsed.release, parsed.part),
            Err(err) => warn!("unparseable cpu revision `{revision}`: {err}"),
        }
    }
}

fn load_peripheral(
    db: &mut Database,
    device: EntityId,
    element: &Element,
    default_size: Option<u32>,
) -> Result<()> {
    let name = child_text(element, "name")
        .ok_or_else(|| anyhow!("peripheral is missing its <name>"))?;
    if let Some(derived) = attr(element, "derivedFrom") {
        warn!("peripheral {name} derivedFrom=\"{derived}\" is not resolved");
    }
    let peripheral = db.create_peripheral(Some(name.clone()));
    if let Some(description) = child_text(element, "description") {
        db.set_description(peripheral, description);
    }
    if let Some(version) = child_text(element, "version") {
        db.set_version(peripheral, version);
    }
    if element.get_child("addressBlock").is_some() {
        debug!("peripheral {name}: <addressBlock> carries no layout information here");
    }
    for interrupt in named_children(element, "interrupt") {
        if let Err(err) = load_interrupt(db, device, interrupt) {
            warn!("peripheral {name}: skipping interrupt: {err:#}");
        }
    }
    if let Some(registers) = element.get_child("registers") {
        for register in named_children(registers, "register") {
            if let Err(err) = load_register(db, peripheral, register, default_size) {
                warn!("peripheral {name}: skipping register: {err:#}");
            }
        }
    }
    match child_text(element, "baseAddress") {
        Some(text) => {
            let base = parse_int(&text)?;
            db.create_peripheral_instance(device, name, peripheral, base)?;
        }
        None => warn!("peripheral {name} has no <baseAddress>; no instance is created"),
    }
    Ok(())
}

fn load_interrupt(db: &mut Database, device: EntityId, element: &Element) -> Result<()> {
    let name =
        child_text(element, "name").ok_or_else(|| anyhow!("interrupt is missing its <name>"))?;
    let value = child_text(element, "value")
        .ok_or_else(|| anyhow!("interrupt {name} is missing its <value>"))?;
    let index = parse_int_i64(&value)?;
    let interrupt = db.create_interrupt(device, name, index)?;
    if let Some(description) = child_text(element, "description") {
        db.set_description(interrupt, description);
    }
    Ok(())
}

fn load_register(
    db: &mut Database,
    peripheral: EntityId,
    element: &Element,
    default_size: Option<u32>,
) -> Result<()> {
    let name =
        child_text(element, "name").ok_or_else(|| anyhow!("register is missing its <name>"))?;
    let offset_text = child_text(element, "addressOffset")
        .ok_or_else(|| anyhow!("register {name} is missing its <addressOffset>"))?;
    let offset = parse_int(&offset_text)?;
    let size = match child_text(element, "size") {
        Some(text) => Some(parse_int(&text)? as u32),
        None => default_size,
    };
    if let Some(size) = size {
        if size % 8 != 0 {
            bail!("register {name} has a size of {size} bits, which is not a multiple of 8");
        }
    }
    let register = db.create_register(peripheral, name.clone())?;
    db.set_offset(register, offset);
    if let Some(size) = size {
        db.set_size(register, size);
    }
    if let Some(description) = child_text(element, "description") {
        db.set_description(register, description);
    }
    if let Some(text) = child_text(element, "access") {
        match parse_access(&text) {
            Some(access) => db.set_access(register, access),
            None => warn!("register {name}: unknown access `{text}`"),
        }
    }
    if let Some(text) = child_text(element, "resetValue") {
        match parse_int(&text) {
            Ok(value) => db.set_reset_value(register, value),
            Err(err) => warn!("register {name}: unparseable <resetValue> `{text}`: {err}"),
        }
    }
    if let Some(text) = child_text(element, "resetMask") {
        match parse_int(&text) {
            Ok(mask) => db.set_reset_mask(register, mask),
            Err(err) => warn!("register {name}: unparseable <resetMask> `{text}`: {err}"),
        }
    }
    if let Some(fields) = element.get_child("fields") {
        for field in named_children(fields, "field") {
            if let Err(err) = load_field(db, peripheral, register, field) {
                warn!("register {name}: skipping field: {err:#}");
            }
        }
    }
    Ok(())
}

// The three equivalent spellings of a field's bit range.
fn bit_range(element: &Element, name: &str) -> Result<(u64, u32)> {
    if let (Some(lsb), Some(msb)) = (child_text(element, "lsb"), child_text(element, "msb")) {
        let lsb = parse_int(&lsb)?;
        let msb = parse_int(&msb)?;
        if msb < lsb {
            bail!("field {name} has msb {msb} below lsb {lsb}");
        }
        return Ok((lsb, (msb - lsb + 1) as u32));
    }
    if let (Some(offset), Some(width)) =
        (child_text(element, "bitOffset"), child_text(element, "bitWidth"))
    {
        return Ok((parse_int(&offset)?, parse_int(&width)? as u32));
    }
    if let Some(range) = child_text(element, "bitRange") {
        let inner = range
            .strip_prefix('[')
            .and_then(|rest| rest.strip_suffix(']'))
            .ok_or_else(|| anyhow!("field {name} has malformed <bitRange> `{range}`"))?;
        let (msb, lsb) = inner
            .split_once(':')
            .ok_or_else(|| anyhow!("field {name} has malformed <bitRange> `{range}`"))?;
        let msb = parse_int(msb)?;
        let lsb = parse_int(lsb)?;
        if msb < lsb {
            bail!("field {name} has msb {msb} below lsb {lsb}");
        }
        return Ok((lsb, (msb - lsb + 1) as u32));
    }
    bail!("field {name} carries no bit range in any supported form")
}

fn load_field(
    db: &mut Database,
    peripheral: EntityId,
    register: EntityId,
    element: &Element,
) -> Result<()> {
    let name =
        child_text(element, "name").ok_or_else(|| anyhow!("field is missing its <name>"))?;
    let (offset, width) = bit_range(element, &name)?;
    let field = db.create_field(register, name.clone())?;
    db.set_offset(field, offset);
    db.set_size(field, width);
    if let Some(description) = child_text(element, "description") {
        db.set_description(field, description);
    }
    if let Some(text) = child_text(element, "access") {
        match parse_access(&text) {
            Some(access) => db.set_access(field, access),
            None => warn!("field {name}: unknown access `{text}`"),
        }
    }
    if let Some(values) = element.get_child("enumeratedValues") {
        if let Err(err) = load_enum(db, peripheral, field, width, values) {
            warn!("field {name}: skipping enumerated values: {err:#}");
        }
    }
    Ok(())
}

// SVD declares enumerated values inline in the field; the model hoists the
// enum to peripheral scope and points the field at it.
fn load_enum(
    db: &mut Database,
    peripheral: EntityId,
    field: EntityId,
    width: u32,
    element: &Element,
) -> Result<()> {
    let enum_id = db.create_enum(peripheral, child_text(element, "name"))?;
    db.set_size(enum_id, width);
    for value in named_children(element, "enumeratedValue") {
        if let Err(err) = load_enum_field(db, enum_id, value) {
            warn!("skipping enumerated value: {err:#}");
        }
    }
    db.set_enum_ref(field, enum_id);
    Ok(())
}

fn load_enum_field(db: &mut Database, enum_id: EntityId, element: &Element) -> Result<()> {
    warn_unknown_attrs(element, &[], "<enumeratedValue>");
    let name = child_text(element, "name")
        .ok_or_else(|| anyhow!("enumerated value is missing its <name>"))?;
    if child_text(element, "isDefault").is_some() {
        bail!("enumerated value {name} is an <isDefault> catch-all, which has no numeric value");
    }
    let value = child_text(element, "value")
        .ok_or_else(|| anyhow!("enumerated value {name} is missing its <value>"))?;
    let value = parse_int_i64(&value)?;
    let enum_field = db.create_enum_field(enum_id, name, value)?;
    if let Some(description) = child_text(element, "description") {
        db.set_description(enum_field, description);
    }
    Ok(())
}
