//! CLI commands module.

mod classify;
mod inspect;
mod util;

pub use classify::ClassifyCommand;
pub use inspect::InspectCommand;

pub(crate) use util::*;
