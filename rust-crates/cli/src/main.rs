use clap::Parser;
use color_eyre::eyre::{
    Result,
    WrapErr,
};
use commands::Command;
use config::{
    DEFAULT_CONFIG_PATH,
    Overrides,
};
use miniapp_ledger::RestUserStore;

mod commands;
mod config;
mod logging;

/// Drive the mini app ledger from a terminal: launch as a user, move
/// balances, inspect the leaderboard.
#[derive(Parser, Debug)]
#[command(name = "miniapp", version, about, long_about = None)]
struct Cli {
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_PATH)]
    config: String,

    #[arg(long, global = true, env = "MINIAPP_BACKEND_URL")]
    backend_url: Option<String>,

    #[arg(long, global = true, env = "MINIAPP_API_KEY", hide_env_values = true)]
    api_key: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    color_eyre::install()?;
    let cli = Cli::parse();
    let config_path = config::resolve_path(&cli.config);
    if let Some(dir) = config_path.parent() {
        logging::init_file_logging(&dir.join("logs"))?;
    }
    let overrides = Overrides {
        backend_url: cli.backend_url,
        api_key: cli.api_key,
    };
    let mut stdout = std::io::stdout().lock();

    let command = match cli.command {
        Command::InitConfig(args) => {
            commands::init_config(&config_path, args, &overrides, &mut stdout)?;
            return Ok(());
        }
        command => command,
    };

    let profile = config::load(&config_path)?
        .unwrap_or_default()
        .with_overrides(&overrides);
    tracing::info!(backend = %profile.backend.url, "running command");
    let store = RestUserStore::new(&profile.backend).wrap_err("Invalid backend configuration")?;
    commands::run(command, store, &profile, &mut stdout).await
}
