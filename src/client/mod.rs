//! Model backend module.

mod backend;
mod llm_client;

pub use backend::*;
pub use llm_client::*;
