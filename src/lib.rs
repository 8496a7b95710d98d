pub mod chat;
pub mod config;
pub mod core;
pub mod orchestrator;
pub mod rewrite;
pub mod scheduler;
pub mod shell;
pub mod tunnel;
pub mod utils;

pub use crate::core::version;
