use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use mailsync_core::SqliteMailStore;

mod cli;
mod cli_command_handlers;
mod cli_runtime_helpers;
mod config;

use cli::Cli;
use cli_command_handlers::run_cli;
use cli_runtime_helpers::output_error;
use config::load_app_config;

fn init_logging() {
    let filter = EnvFilter::try_from_env("MAILSYNC_LOG").unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging();

    let config = match load_app_config() {
        Ok(config) => config,
        Err(err) => return output_error(&err.to_string()),
    };
    let rt = tokio::runtime::Runtime::new()?;
    let store = match rt.block_on(async {
        let store = SqliteMailStore::connect(&config.db_path).await?;
        store.init().await?;
        Ok::<_, mailsync_core::MailSyncError>(store)
    }) {
        Ok(store) => store,
        Err(err) => return output_error(&format!("Store {}: {}", config.db_path, err)),
    };

    if let Err(err) = run_cli(&rt, cli.command, &config, store) {
        return output_error(&err.to_string());
    }
    Ok(())
}
