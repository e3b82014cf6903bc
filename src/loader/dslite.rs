//! TI DSLite loader (reserved).

use crate::database::Database;
use anyhow::{bail, Result};
use xmltree::Element;

// TODO: map <device>/<peripheral>/<register> DSLite elements onto the model
// once fixtures exist; until then the dialect is selectable but inert.

/// Always fails: the DSLite dialect is reserved but not implemented.
pub fn load(root: &Element) -> Result<Database> {
    bail!("the DSLite dialect is not implemented yet (root element <{}>)", root.name)
}
