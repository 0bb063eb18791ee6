pub mod backend;
pub mod config;
pub mod context;
pub mod conversation;
pub mod decoder;
pub mod error;
pub mod registry;
pub mod runner;
pub mod session;
pub mod supervisor;

pub use error::{Result, RunError};
