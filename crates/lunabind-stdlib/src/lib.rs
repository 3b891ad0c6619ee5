//! Lunabind standard library
//!
//! Script-visible libraries implemented natively on top of lunabind:
//! - `tablex`: table algorithms (deep copy, slice, erase, join, ...)
//! - `stringx`: string helpers (split, starts_with, title, ...)

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod string;
pub mod table;

pub use string::open_stringx;
pub use table::open_tablex;

use lunabind::{BridgeResult, State};

/// Publish every library as a global table
pub fn open_stdlib(state: &State) -> BridgeResult<()> {
    open_tablex(state)?;
    open_stringx(state)?;
    Ok(())
}
