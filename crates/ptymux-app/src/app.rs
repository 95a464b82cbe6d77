use anyhow::{bail, Context, Result};
use colored::Colorize;
use ptymux_logging::CallLogger;
use ptymux_session::{default_base_dir, JsonProjectStore, MemoryProjectStore, ProjectStore, SessionManager};
use ptymux_toolcore::{ToolCategory, ToolContext, ToolRegistry};
use ptymux_tools::builtin_registry;
use std::path::Path;
use tokio::io::BufReader;
use tracing::{info, warn};

use crate::cli::{Cli, Commands, ProjectCommands};
use crate::server::Server;
use crate::settings::Settings;

/// Session manager wired to the configured project store and multiplexer
pub fn build_session_manager(settings: &Settings, base_dir: &Path, ephemeral: bool) -> Result<SessionManager> {
    let store: Box<dyn ProjectStore> = if ephemeral {
        Box::new(MemoryProjectStore::default())
    } else {
        Box::new(JsonProjectStore::new(base_dir))
    };

    let manager = SessionManager::new(store)
        .context("Failed to load project configuration")?
        .with_multiplexer(settings.multiplexer_binary.clone(), settings.multiplexer_socket.clone())
        .with_timeouts(settings.timeouts);
    Ok(manager)
}

fn load_registry() -> ToolRegistry {
    let (registry, report) = builtin_registry();
    for (name, reason) in &report.failed {
        warn!(tool = %name, reason = %reason, "tool unavailable");
    }
    registry
}

pub async fn run(cli: Cli) -> Result<()> {
    let base_dir = default_base_dir();
    let settings = Settings::load(&base_dir, cli.config.as_deref())?;
    let manager = build_session_manager(&settings, &base_dir, cli.ephemeral)?;

    match cli.command.clone().unwrap_or(Commands::Serve) {
        Commands::Serve => serve(manager, &settings, &base_dir).await,
        Commands::Tools { category } => list_tools(category.as_deref()),
        Commands::Call { tool, arguments } => call_tool(manager, &tool, &arguments).await,
        Commands::Projects { command } => projects(manager, command),
    }
}

async fn serve(manager: SessionManager, settings: &Settings, base_dir: &Path) -> Result<()> {
    let registry = load_registry();
    info!(tools = registry.len(), "ptymux server starting");

    let mut server = Server::new(registry, ToolContext::from_manager(manager));
    if settings.call_log {
        let dir = settings.log_dir(base_dir)?;
        server = server.with_call_log(CallLogger::new(&dir)?);
    }

    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };
    let report = server
        .serve_until(BufReader::new(tokio::io::stdin()), tokio::io::stdout(), shutdown)
        .await?;

    for failure in &report.failures {
        warn!(channel = %failure.channel, error = %failure.error, "channel not closed cleanly");
    }
    info!(closed = report.closed.len(), "ptymux server stopped");
    Ok(())
}

fn list_tools(category: Option<&str>) -> Result<()> {
    let registry = load_registry();
    let categories = match category {
        Some(name) => vec![name.parse::<ToolCategory>().map_err(anyhow::Error::msg)?],
        None => registry.categories(),
    };

    for category in categories {
        println!("{}", category.as_str().to_uppercase().cyan().bold());
        for tool in registry.tools_by_category(category) {
            let mut params: Vec<(String, bool)> = tool
                .parameters()
                .into_iter()
                .map(|(name, def)| (name, def.required))
                .collect();
            params.sort();
            let params: Vec<String> = params
                .into_iter()
                .map(|(name, required)| if required { name } else { format!("[{}]", name) })
                .collect();

            println!("  {} {}", tool.name().green(), params.join(" ").dimmed());
            println!("      {}", tool.description());
        }
        println!();
    }
    Ok(())
}

async fn call_tool(manager: SessionManager, name: &str, arguments: &str) -> Result<()> {
    let arguments: serde_json::Value =
        serde_json::from_str(arguments).context("Tool arguments must be a JSON object")?;

    let registry = load_registry();
    let context = ToolContext::from_manager(manager);
    let result = registry.execute(name, arguments, &context).await;
    context.sessions.lock().await.cleanup_all().await;

    if !result.success {
        bail!("{}", result.text());
    }
    println!("{}", result.content);
    Ok(())
}

fn projects(mut manager: SessionManager, command: ProjectCommands) -> Result<()> {
    match command {
        ProjectCommands::List => {
            let active = manager.active_project().map(|p| p.name.clone());
            let config = manager.project_config();
            if config.projects.is_empty() {
                println!("No projects registered");
                return Ok(());
            }
            for (name, path) in &config.projects {
                let marker = if active.as_deref() == Some(name.as_str()) { "*" } else { " " };
                let default = if config.default.as_deref() == Some(name.as_str()) {
                    " (default)".dimmed().to_string()
                } else {
                    String::new()
                };
                println!("{} {} {}{}", marker.green(), name.bold(), path.display(), default);
            }
        }
        ProjectCommands::Add { name, path } => {
            let path = path
                .canonicalize()
                .with_context(|| format!("Project path does not exist: {}", path.display()))?;
            manager.register_project(&name, path.clone())?;
            println!("{} {} -> {}", "Registered".green(), name.bold(), path.display());
        }
        ProjectCommands::Activate { name } => {
            let report = manager.set_active_project(&name)?;
            println!(
                "{} {} ({} variables loaded)",
                "Activated".green(),
                name.bold(),
                report.env_count
            );
        }
    }
    Ok(())
}
