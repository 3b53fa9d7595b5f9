//! Reply-to-example extraction chain.
//!
//! - `selector`: pick the usable text out of a reply
//! - `repair`: fix near-JSON so a strict parser accepts it
//! - `recovery`: fallback strategies for finding an object in free text
//! - `normalize`: schema check per generation mode

mod normalize;
mod recovery;
mod repair;
mod selector;

pub use normalize::*;
pub use recovery::*;
pub use repair::*;
pub use selector::*;
