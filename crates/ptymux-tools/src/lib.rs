//! Built-in ptymux tools
//!
//! One handler per command, grouped by the channel they drive. Every
//! handler reaches sessions only through the `ToolContext`.

pub mod catalog;
mod helpers;
pub mod network_tools;
pub mod process_tools;
pub mod serial_tools;
pub mod system_tools;
pub mod terminal_tools;
pub mod tmux_tools;

pub use catalog::{builtin_registry, builtin_tools};
