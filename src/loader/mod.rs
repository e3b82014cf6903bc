//! Dialect loaders.
//!
//! Each loader consumes a caller-materialized [`xmltree::Element`] DOM and
//! populates a fresh [`Database`]. The dialects differ in element names but
//! share the same target model and the same failure policy: per-item parse
//! failures are logged and skipped, only a missing root identity fails the
//! whole load.

pub mod atdf;
pub mod dslite;
pub mod svd;

use crate::database::{Access, Database, EntityId, EntityKind};
use indexmap::IndexSet;
use log::warn;
use std::num::ParseIntError;
use std::path::Path;
use std::str::FromStr;
use xmltree::{Element, XMLNode};

/// The input dialect selector.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Schema {
    /// CMSIS-SVD.
    Svd,
    /// Atmel/Microchip ATDF.
    Atdf,
    /// TI DSLite (reserved).
    Dslite,
    /// The canonical JSON projection.
    Json,
    /// XML with the dialect inferred from the root element.
    Xml,
}

impl FromStr for Schema {
    type Err = anyhow::Error;

    fn from_str(text: &str) -> Result<Self, Self::Err> {
        match text {
            "svd" => Ok(Schema::Svd),
            "atdf" => Ok(Schema::Atdf),
            "dslite" => Ok(Schema::Dslite),
            "json" => Ok(Schema::Json),
            "xml" => Ok(Schema::Xml),
            _ => Err(anyhow::anyhow!(
                "unknown schema `{text}` (expected svd, atdf, json, dslite, or xml)"
            )),
        }
    }
}

impl Schema {
    /// Infers the schema from a file extension.
    pub fn from_path(path: &Path) -> Option<Self> {
        let extension = path.extension()?.to_str()?;
        match extension.to_ascii_lowercase().as_str() {
            "svd" => Some(Schema::Svd),
            "atdf" => Some(Schema::Atdf),
            "dslite" => Some(Schema::Dslite),
            "json" => Some(Schema::Json),
            "xml" => Some(Schema::Xml),
            _ => None,
        }
    }
}

/// Parses an integer literal in any of the radix notations the vendor
/// documents use: `0x`/`0X` hexadecimal, `0b`/`0B` binary, leading-zero
/// octal, decimal otherwise.
pub(crate) fn parse_int(src: &str) -> Result<u64, ParseIntError> {
    let src = src.trim();
    if let Some(hex) = src.strip_prefix("0x").or_else(|| src.strip_prefix("0X")) {
        u64::from_str_radix(hex, 16)
    } else if let Some(bin) = src.strip_prefix("0b").or_else(|| src.strip_prefix("0B")) {
        u64::from_str_radix(bin, 2)
    } else if src.len() > 1 && src.starts_with('0') {
        u64::from_str_radix(&src[1..], 8)
    } else {
        src.parse()
    }
}

pub(crate) fn parse_int_i64(src: &str) -> Result<i64, ParseIntError> {
    parse_int(src).map(|value| value as i64)
}

/// Maps a vendor access string onto the model's three access rights.
/// Returns `None` for unrecognized strings; the caller warns.
pub(crate) fn parse_access(text: &str) -> Option<Access> {
    match text {
        "read-only" | "R" => Some(Access::ReadOnly),
        "write-only" | "writeOnce" | "W" => Some(Access::WriteOnly),
        "read-write" | "read-writeOnce" | "RW" => Some(Access::ReadWrite),
        _ => None,
    }
}

/// Iterates the element children of a DOM node, skipping text and comments.
pub(crate) fn child_elements(element: &Element) -> impl Iterator<Item = &Element> {
    element.children.iter().filter_map(XMLNode::as_element)
}

/// Iterates the element children named `name`.
pub(crate) fn named_children<'a>(
    element: &'a Element,
    name: &'a str,
) -> impl Iterator<Item = &'a Element> + 'a {
    child_elements(element).filter(move |child| child.name == name)
}

/// Returns the trimmed text of the child element `name`, treating an empty
/// or absent element as missing.
pub(crate) fn child_text(element: &Element, name: &str) -> Option<String> {
    let text = element.get_child(name)?.get_text()?.trim().to_owned();
    if text.is_empty() {
        None
    } else {
        Some(text)
    }
}

/// Returns the non-empty attribute `name`, if present.
pub(crate) fn attr<'a>(element: &'a Element, name: &str) -> Option<&'a str> {
    element.attributes.get(name).map(String::as_str).filter(|value| !value.is_empty())
}

/// Warns once per unrecognized child element.
pub(crate) fn warn_unknown_children(element: &Element, known: &[&str], context: &str) {
    for child in child_elements(element) {
        if !known.contains(&child.name.as_str()) {
            warn!("unknown element <{}> in {context}", child.name);
        }
    }
}

/// Warns once per unrecognized attribute.
pub(crate) fn warn_unknown_attrs(element: &Element, known: &[&str], context: &str) {
    for name in element.attributes.keys() {
        if !known.contains(&name.as_str()) {
            warn!("unknown attribute `{name}` in {context}");
        }
    }
}

/// Human-readable handle for log lines.
pub(crate) fn describe(db: &Database, id: EntityId) -> String {
    match db.name(id) {
        Some(name) => format!("{id} `{name}`"),
        None => id.to_string(),
    }
}

/// Resolves one mode name against the `type.mode` children of `owner` and
/// its ancestors.
pub(crate) fn resolve_mode_name(db: &Database, owner: EntityId, name: &str) -> Option<EntityId> {
    std::iter::once(owner)
        .chain(db.ancestors(owner))
        .flat_map(|scope| db.children_of(scope, EntityKind::TypeMode))
        .find(|&mode| db.name(mode) == Some(name))
}

/// Resolves a space-separated list of mode names. Unresolved names are
/// warned about and dropped.
pub(crate) fn resolve_modes(db: &Database, owner: EntityId, names: &str) -> IndexSet<EntityId> {
    let mut set = IndexSet::new();
    for name in names.split_whitespace() {
        match resolve_mode_name(db, owner, name) {
            Some(mode) => {
                set.insert(mode);
            }
            None => warn!("unresolved mode name `{name}` on {}", describe(db, owner)),
        }
    }
    set
}
