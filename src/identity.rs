use crate::{
    error::{
        Error,
        Result,
    },
    launch::{
        InitDataVerifier,
        LaunchData,
    },
    store::UserStore,
    user::{
        UserProfile,
        UserRecord,
    },
};
use tokio::sync::OnceCell;

#[derive(Debug, Clone)]
struct Resolved {
    record: UserRecord,
    launch: LaunchData,
}

/// Turns the launch payload into a stored user record, once per session.
///
/// The first successful [`IdentityResolver::resolve`] issues exactly one
/// upsert; later calls, concurrent ones included, share its result. A failed
/// attempt leaves the resolver unresolved so the caller may try again.
pub struct IdentityResolver<S> {
    store: S,
    verifier: Option<InitDataVerifier>,
    resolved: OnceCell<Resolved>,
}

impl<S> IdentityResolver<S> {
    pub fn new(store: S) -> Self {
        Self {
            store,
            verifier: None,
            resolved: OnceCell::new(),
        }
    }

    /// Require launch payloads to carry a valid platform signature.
    pub fn with_verifier(mut self, verifier: InitDataVerifier) -> Self {
        self.verifier = Some(verifier);
        self
    }

    pub fn resolved(&self) -> Option<&UserRecord> {
        self.resolved.get().map(|resolved| &resolved.record)
    }

    pub fn launch_data(&self) -> Option<&LaunchData> {
        self.resolved.get().map(|resolved| &resolved.launch)
    }
}

impl<S: UserStore> IdentityResolver<S> {
    pub async fn resolve(&self, raw_launch_payload: &str) -> Result<UserRecord> {
        if let Some(resolved) = self.resolved.get() {
            tracing::debug!(
                telegram_id = resolved.record.telegram_id(),
                "identity already resolved for this session"
            );
            return Ok(resolved.record.clone());
        }
        let resolved = self
            .resolved
            .get_or_try_init(|| self.resolve_once(raw_launch_payload))
            .await?;
        Ok(resolved.record.clone())
    }

    async fn resolve_once(&self, raw: &str) -> Result<Resolved> {
        let launch = LaunchData::parse(raw).inspect_err(|err| {
            tracing::warn!(%err, "launch payload rejected");
        })?;
        if let Some(verifier) = &self.verifier {
            verifier.verify(&launch).inspect_err(|err| {
                tracing::warn!(%err, "launch payload failed verification");
            })?;
        }

        let profile = UserProfile::from(&launch.user);
        let record = self
            .store
            .upsert_user(&profile)
            .await
            .map_err(|err| {
                tracing::warn!(telegram_id = %profile.telegram_id, %err, "user upsert failed");
                Error::from(err)
            })?;
        tracing::info!(
            telegram_id = record.telegram_id(),
            username = record.profile.username.as_deref(),
            "launch identity resolved"
        );
        Ok(Resolved { record, launch })
    }
}
