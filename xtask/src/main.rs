use anyhow::{
    Context,
    Result,
    ensure,
};
use clap::{
    Parser,
    Subcommand,
};
use std::{
    path::Path,
    process::Command,
};

#[derive(Parser)]
#[command(
    name = "xtask",
    about = "Mini app ledger helper tasks (clippy, tests, local backend)",
    arg_required_else_help = true
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run clippy for the entire workspace with warnings-as-errors
    Clippy,
    /// Run unit tests, the root harness and the HTTP integration tests
    Test {
        /// Skip the integration-tests package (no local servers)
        #[arg(long)]
        skip_integration: bool,
    },
    /// Run the local ledger backend
    Backend {
        #[arg(short, long, default_value_t = 54321)]
        port: u16,
        /// Keep state in memory instead of ./ledger_backend_data
        #[arg(long)]
        in_memory: bool,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let root = repo_root();

    match cli.command {
        Commands::Clippy => run_clippy(&root)?,
        Commands::Test { skip_integration } => {
            run_unit_tests(&root)?;
            if !skip_integration {
                run_integration_tests(&root)?;
            }
        }
        Commands::Backend { port, in_memory } => run_backend(&root, port, in_memory)?,
    }

    Ok(())
}

fn repo_root() -> std::path::PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .parent()
        .expect("xtask has no parent directory")
        .to_path_buf()
}

fn run_clippy(root: &Path) -> Result<()> {
    let mut cmd = Command::new("cargo");
    cmd.arg("clippy")
        .arg("--workspace")
        .arg("--all-targets")
        .arg("--all-features")
        .arg("--")
        .arg("-D")
        .arg("warnings")
        .current_dir(root);
    run_command(cmd, "cargo clippy")?;
    Ok(())
}

fn run_unit_tests(root: &Path) -> Result<()> {
    let mut cmd = Command::new("cargo");
    cmd.arg("test")
        .arg("--workspace")
        .arg("--exclude")
        .arg("integration-tests")
        .arg("--all-features")
        .current_dir(root);
    run_command(cmd, "cargo test --workspace")?;
    Ok(())
}

fn run_integration_tests(root: &Path) -> Result<()> {
    let mut cmd = Command::new("cargo");
    cmd.arg("test")
        .arg("-p")
        .arg("integration-tests")
        .current_dir(root);
    run_command(cmd, "cargo test -p integration-tests")?;
    Ok(())
}

fn run_backend(root: &Path, port: u16, in_memory: bool) -> Result<()> {
    let mut cmd = Command::new("cargo");
    cmd.arg("run")
        .arg("-p")
        .arg("ledger-backend")
        .arg("--")
        .arg("--port")
        .arg(port.to_string())
        .arg("--tracing")
        .current_dir(root);
    if in_memory {
        cmd.arg("--in-memory");
    }
    run_command(cmd, "ledger-backend")?;
    Ok(())
}

fn run_command(mut cmd: Command, label: &str) -> Result<()> {
    println!("Running: {}", label);
    let status = cmd
        .status()
        .with_context(|| format!("failed to run {label}"))?;
    ensure!(status.success(), "{label} failed with status {status}");
    Ok(())
}
