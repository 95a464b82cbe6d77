//! Session management for ptymux
//!
//! `SessionManager` owns the singleton channels, the multiplexer manager,
//! the active project and the environment overlay handed to every spawn.

pub mod config;
pub mod environment;
pub mod manager;

pub use config::{
    default_base_dir, ConfigError, JsonProjectStore, MemoryProjectStore, ProjectConfig, ProjectStore,
};
pub use environment::{EnvLoadReport, ProjectEnvironments};
pub use manager::{ChannelStatus, CleanupFailure, CleanupReport, SessionManager, SessionStatus};
