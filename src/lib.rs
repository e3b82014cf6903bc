//! Vendor register descriptions to typed peripheral layouts.
//!
//! regwire ingests hardware-description files in several vendor dialects
//! (CMSIS-SVD, Atmel/Microchip ATDF) and emits a typed, memory-safe
//! representation of the described devices: packed, bit-exact peripheral
//! records plus typed base-address pointers, or a canonical JSON dump.
//!
//! Between the readers and the writers sits a single entity-attribute
//! [`Database`]: loaders accumulate sparse attributes in whatever order the
//! source provides them, the generator and codec walk the frozen store in
//! insertion order so outputs stay byte-deterministic.
//!
//! # Usage
//!
//! ```toml
//! [dependencies]
//! regwire = { version = "0.1.0" }
//! ```
//!
//! ```no_run
//! # fn main() -> anyhow::Result<()> {
//! let text = std::fs::read_to_string("ATmega328P.atdf")?;
//! let db = regwire::load_str(regwire::Schema::Atdf, &text)?;
//! let code = regwire::generator::generate_to_vec(&db)?;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![allow(clippy::module_name_repetitions)]

pub mod codec;
pub mod database;
pub mod generator;
pub mod loader;

pub use database::{Access, Database, EntityId, EntityKind, ModeDef};
pub use loader::Schema;

use anyhow::{bail, Context, Result};
use xmltree::Element;

/// Loads `text` under the given schema into a fresh database.
pub fn load_str(schema: Schema, text: &str) -> Result<Database> {
    match schema {
        Schema::Json => codec::from_json_str(text),
        Schema::Svd | Schema::Atdf | Schema::Dslite | Schema::Xml => {
            let root = Element::parse(text.as_bytes()).context("malformed XML document")?;
            load_dom(schema, &root)
        }
    }
}

/// Loads a caller-parsed DOM into a fresh database. `Schema::Xml` infers
/// the dialect from the root element name.
pub fn load_dom(schema: Schema, root: &Element) -> Result<Database> {
    let schema = match schema {
        Schema::Xml => match root.name.as_str() {
            "device" => Schema::Svd,
            "avr-tools-device-file" => Schema::Atdf,
            other => bail!("cannot infer a dialect from root element <{other}>"),
        },
        other => other,
    };
    match schema {
        Schema::Svd => loader::svd::load(root),
        Schema::Atdf => loader::atdf::load(root),
        Schema::Dslite => loader::dslite::load(root),
        Schema::Json => bail!("JSON input is not a DOM; use `load_str`"),
        Schema::Xml => unreachable!("resolved above"),
    }
}
