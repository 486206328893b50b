use crate::config::{
    self,
    CliConfig,
    Overrides,
};
use clap::{
    Args,
    Subcommand,
};
use color_eyre::eyre::{
    Result,
    WrapErr,
    eyre,
};
use miniapp_ledger::{
    ReferralStore,
    Session,
    SessionStatus,
    UserStore,
    VerifierConfig,
};
use std::{
    io::Write,
    path::Path,
};

#[derive(Args, Debug, Clone)]
pub struct LaunchArgs {
    /// Raw launch payload (query string or JSON) as handed to the Mini App.
    #[arg(long, env = "MINIAPP_INIT_DATA")]
    pub init_data: String,
}

#[derive(Args, Debug, Clone, Default)]
pub struct InitConfigArgs {
    /// Overwrite an existing profile.
    #[arg(long)]
    pub force: bool,

    #[arg(long)]
    pub bot_username: Option<String>,

    #[arg(long)]
    pub app_name: Option<String>,

    /// Enables signature checks on launch payloads.
    #[arg(long, env = "MINIAPP_BOT_TOKEN", hide_env_values = true)]
    pub bot_token: Option<String>,

    #[arg(long, requires = "bot_token")]
    pub max_age_secs: Option<u64>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Resolve the launch identity and show the session status.
    Launch(LaunchArgs),
    /// Print the stored balance of the launching user.
    Balance(LaunchArgs),
    /// Add (or with a negative amount, subtract) from the user's balance.
    Add {
        #[command(flatten)]
        launch: LaunchArgs,
        #[arg(allow_negative_numbers = true)]
        amount: i64,
    },
    /// Top users by balance.
    Leaderboard {
        #[arg(short, long, default_value_t = 10)]
        limit: usize,
    },
    /// Users who joined through the launching user's invite link.
    Referrals(LaunchArgs),
    /// Share link that credits the launching user as referrer.
    InviteLink(LaunchArgs),
    /// Write a profile to the config path.
    InitConfig(InitConfigArgs),
}

async fn start_session<S: UserStore + ReferralStore + Clone>(
    store: S,
    config: &CliConfig,
    launch: &LaunchArgs,
) -> Result<(Session<S>, SessionStatus)> {
    let mut session = Session::new(store);
    if let Some(verifier) = &config.verifier {
        session = session.with_verifier(verifier.verifier());
    }
    let status = session.start(&launch.init_data).await;
    if let SessionStatus::Degraded { reason, retryable } = &status {
        let hint = if *retryable { " (backend unreachable, try again)" } else { "" };
        return Err(eyre!("Launch failed: {reason}{hint}"));
    }
    Ok((session, status))
}

/// Run a command that talks to the backend. `InitConfig` is handled by
/// [`init_config`] since it needs no store.
pub async fn run<S: UserStore + ReferralStore + Clone>(
    command: Command,
    store: S,
    config: &CliConfig,
    out: &mut impl Write,
) -> Result<()> {
    match command {
        Command::Launch(launch) => {
            let (_, status) = start_session(store, config, &launch).await?;
            match status {
                SessionStatus::Ready { user, balance } => writeln!(
                    out,
                    "{} ({}) balance {balance}",
                    user.profile.display_name(),
                    user.telegram_id()
                )?,
                SessionStatus::BalancePending { user, reason } => writeln!(
                    out,
                    "{} ({}) balance unknown{}",
                    user.profile.display_name(),
                    user.telegram_id(),
                    reason.map(|r| format!(": {r}")).unwrap_or_default()
                )?,
                SessionStatus::Degraded { reason, .. } => return Err(eyre!(reason)),
            }
        }
        Command::Balance(launch) => {
            let (session, _) = start_session(store, config, &launch).await?;
            let balance = session
                .ledger()
                .balance()
                .ok_or_else(|| eyre!("Balance unknown for this user"))?;
            writeln!(out, "{balance}")?;
        }
        Command::Add { launch, amount } => {
            let (session, _) = start_session(store, config, &launch).await?;
            let balance = session
                .add_to_balance(amount)
                .await
                .wrap_err("Balance update was rejected")?;
            writeln!(out, "{balance}")?;
        }
        Command::Leaderboard { limit } => {
            let entries = Session::new(store).leaderboard(limit).await?;
            for (rank, entry) in entries.iter().enumerate() {
                let name = entry
                    .username
                    .as_ref()
                    .map(|username| format!("@{username}"))
                    .unwrap_or_else(|| entry.telegram_id.clone());
                writeln!(out, "{:>3}. {name:<24} {}", rank + 1, entry.balance)?;
            }
        }
        Command::Referrals(launch) => {
            let (session, _) = start_session(store, config, &launch).await?;
            let referrals = session.referrals().await?;
            if referrals.is_empty() {
                writeln!(out, "No referrals yet")?;
            }
            for referral in referrals {
                let name = match (&referral.first_name, &referral.username) {
                    (Some(first), _) => first.clone(),
                    (None, Some(username)) => format!("@{username}"),
                    (None, None) => referral.telegram_id.clone(),
                };
                writeln!(out, "{name} ({})", referral.telegram_id)?;
            }
        }
        Command::InviteLink(launch) => {
            let (session, _) = start_session(store, config, &launch).await?;
            let link = session.invite_link(&config.bot_username, &config.app_name)?;
            writeln!(out, "{link}")?;
        }
        Command::InitConfig(_) => {
            return Err(eyre!("init-config does not use the backend"));
        }
    }
    Ok(())
}

pub fn init_config(
    path: &Path,
    args: InitConfigArgs,
    overrides: &Overrides,
    out: &mut impl Write,
) -> Result<CliConfig> {
    if !args.force && config::load(path)?.is_some() {
        return Err(eyre!(
            "Config already exists at {}; pass --force to overwrite",
            path.display()
        ));
    }
    let mut profile = CliConfig::default().with_overrides(overrides);
    if let Some(bot_username) = args.bot_username {
        profile.bot_username = bot_username;
    }
    if let Some(app_name) = args.app_name {
        profile.app_name = app_name;
    }
    profile.verifier = args.bot_token.map(|bot_token| VerifierConfig {
        bot_token,
        max_age_secs: args.max_age_secs,
    });
    config::save(path, &profile)?;
    tracing::info!(path = %path.display(), "wrote config");
    writeln!(out, "Wrote {}", path.display())?;
    Ok(profile)
}
