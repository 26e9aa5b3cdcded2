pub mod account;
pub mod config;
pub mod control_plane;
pub mod credentials;
pub mod error;
pub mod operation;
pub mod orchestrator;
pub mod report;
pub mod retry;
pub mod summary;

pub use error::{ErrorKind, GuardrailError, Result};
