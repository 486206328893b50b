use anyhow::Context;
use clap::Parser;
use ledger_backend::{
    init_tracing,
    server::{
        BackendServer,
        ServerSettings,
    },
    sled_storage::SledUserStore,
};
use miniapp_ledger::InMemoryUserStore;
use std::{
    env::current_dir,
    fs,
    path::PathBuf,
};

/// Serve the users/referrals REST surface the mini app client expects.
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    #[arg(short, long, default_value_t = 54321)]
    port: u16,

    /// Directory for the sled database. Defaults to ./ledger_backend_data.
    #[arg(long, conflicts_with = "in_memory")]
    data_dir: Option<PathBuf>,

    /// Keep everything in memory; state is lost on exit.
    #[arg(long)]
    in_memory: bool,

    #[arg(short, long, default_value = "false")]
    tracing: bool,
}

async fn handle_interupt() {
    match tokio::signal::ctrl_c().await {
        Ok(_) => tracing::info!("Received interrupt, exiting"),
        Err(_) => tracing::warn!("Received interrupt error, exiting anyway"),
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    if args.tracing {
        init_tracing();
    }
    let settings = ServerSettings {
        host: args.host,
        port: args.port,
        ..ServerSettings::default()
    };

    let server = if args.in_memory {
        tracing::info!("Using in-memory storage");
        BackendServer::start_with(InMemoryUserStore::new(), settings)?
    } else {
        let data_dir = match args.data_dir {
            Some(path) => path,
            None => current_dir()
                .context("determine process working directory")?
                .join("ledger_backend_data"),
        };
        fs::create_dir_all(&data_dir)
            .with_context(|| format!("create data directory {}", data_dir.display()))?;
        tracing::info!("Using sled storage directory {}", data_dir.display());
        BackendServer::start_with(SledUserStore::open(&data_dir)?, settings)?
    };

    println!("ledger backend listening on {}", server.base_url());
    handle_interupt().await;
    server.stop().await;
    tracing::info!("Exiting ledger backend");
    Ok(())
}
