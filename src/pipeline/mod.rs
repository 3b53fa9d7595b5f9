//! Pipeline module - the generation run and its event stream.

mod events;
mod generate;

pub use events::*;
pub use generate::*;
