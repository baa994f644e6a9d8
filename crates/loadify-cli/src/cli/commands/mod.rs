//! CLI command handlers. Each command is in its own file.

mod checksum;
mod config;
mod control;
mod get;
mod status;

pub use checksum::run_checksum;
pub use config::run_config;
pub use control::run_control;
pub use get::{run_get, GetArgs};
pub use status::run_status;
