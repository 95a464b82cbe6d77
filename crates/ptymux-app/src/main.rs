use anyhow::Result;
use clap::Parser;
use ptymux::Cli;

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables from .env file if it exists
    dotenvy::dotenv().ok();

    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { ptymux_logging::DEFAULT_FILTER };
    ptymux_logging::init_tracing(filter)?;

    ptymux::run(cli).await
}
