use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// CLI arguments for ptymux
#[derive(Parser, Debug)]
#[command(name = "ptymux")]
#[command(about = "Terminal, process, socket, serial and tmux sessions as tools over stdio")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Settings file (default: ptymux.toml in the base directory)
    #[arg(long, value_name = "PATH", env = "PTYMUX_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Keep the project registry in memory instead of on disk
    #[arg(long, global = true)]
    pub ephemeral: bool,

    /// Enable debug logging (overridden by RUST_LOG)
    #[arg(long, short = 'v', global = true)]
    pub verbose: bool,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Commands {
    /// Serve tools as JSON-RPC on stdin/stdout (default)
    Serve,
    /// List the available tools
    Tools {
        /// Only show one category (terminal, process, network, serial, tmux, system)
        #[arg(short = 'c', long)]
        category: Option<String>,
    },
    /// Run a single tool and print its output
    Call {
        /// Tool name, e.g. exec
        tool: String,
        /// Arguments as a JSON object
        #[arg(default_value = "{}")]
        arguments: String,
    },
    /// Manage registered projects
    Projects {
        #[command(subcommand)]
        command: ProjectCommands,
    },
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum ProjectCommands {
    /// Show registered projects
    List,
    /// Register a project directory
    Add {
        name: String,
        path: PathBuf,
    },
    /// Make a project the active one
    Activate {
        name: String,
    },
}
