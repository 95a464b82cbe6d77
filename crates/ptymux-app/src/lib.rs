//! ptymux application: CLI, settings and the stdio JSON-RPC server

pub mod app;
pub mod cli;
pub mod server;
pub mod settings;

pub use app::{build_session_manager, run};
pub use cli::{Cli, Commands, ProjectCommands};
pub use server::Server;
pub use settings::Settings;
