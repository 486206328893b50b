//! One Mini App launch: identity first, then the balance ledger.

use crate::{
    balance::BalanceLedger,
    error::{
        Error,
        Result,
    },
    identity::IdentityResolver,
    invite::{
        InviteLink,
        parse_invite,
    },
    launch::InitDataVerifier,
    store::{
        ReferralStore,
        UserStore,
    },
    user::{
        LeaderboardEntry,
        Referral,
        UserRecord,
    },
};

/// Outcome of [`Session::start`]. Never an error: failures become a status
/// the UI can render without blocking.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionStatus {
    Ready { user: UserRecord, balance: i64 },
    /// Identity is known but the balance is not; this is "unknown", not zero.
    BalancePending {
        user: UserRecord,
        reason: Option<String>,
    },
    /// Identity could not be resolved. `retryable` is false for payload
    /// problems, which no retry can fix within this session.
    Degraded { reason: String, retryable: bool },
}

impl SessionStatus {
    pub fn user(&self) -> Option<&UserRecord> {
        match self {
            SessionStatus::Ready { user, .. } | SessionStatus::BalancePending { user, .. } => {
                Some(user)
            }
            SessionStatus::Degraded { .. } => None,
        }
    }
}

pub struct Session<S> {
    store: S,
    resolver: IdentityResolver<S>,
    ledger: BalanceLedger<S>,
}

impl<S: Clone> Session<S> {
    pub fn new(store: S) -> Self {
        Self {
            resolver: IdentityResolver::new(store.clone()),
            ledger: BalanceLedger::new(store.clone()),
            store,
        }
    }

    pub fn with_verifier(mut self, verifier: InitDataVerifier) -> Self {
        self.resolver = self.resolver.with_verifier(verifier);
        self
    }
}

impl<S> Session<S> {
    pub fn ledger(&self) -> &BalanceLedger<S> {
        &self.ledger
    }

    pub fn user(&self) -> Option<&UserRecord> {
        self.resolver.resolved()
    }

    fn telegram_id(&self) -> Result<&str> {
        self.user()
            .map(UserRecord::telegram_id)
            .ok_or(Error::Unresolved)
    }

    pub fn invite_link(&self, bot_username: &str, app_name: &str) -> Result<InviteLink> {
        Ok(InviteLink::new(bot_username, app_name, self.telegram_id()?))
    }
}

impl<S: UserStore + ReferralStore> Session<S> {
    pub async fn start(&self, raw_launch_payload: &str) -> SessionStatus {
        let user = match self.resolver.resolve(raw_launch_payload).await {
            Ok(user) => user,
            Err(err) => {
                tracing::warn!(%err, "session degraded: identity unresolved");
                return SessionStatus::Degraded {
                    reason: err.to_string(),
                    retryable: err.is_transient(),
                };
            }
        };

        let (_, balance) = futures::join!(
            self.link_referrer(&user),
            self.ledger.load(user.telegram_id())
        );
        match balance {
            Ok(balance) => SessionStatus::Ready { user, balance },
            Err(Error::UserNotFound(_)) => SessionStatus::BalancePending { user, reason: None },
            Err(err) => SessionStatus::BalancePending {
                user,
                reason: Some(err.to_string()),
            },
        }
    }

    pub async fn refresh_balance(&self) -> Result<i64> {
        self.ledger.load(self.telegram_id()?).await
    }

    pub async fn add_to_balance(&self, amount: i64) -> Result<i64> {
        self.ledger.increment(self.telegram_id()?, amount).await
    }

    pub async fn referrals(&self) -> Result<Vec<Referral>> {
        Ok(self.store.referrals_of(self.telegram_id()?).await?)
    }

    pub async fn leaderboard(&self, limit: usize) -> Result<Vec<LeaderboardEntry>> {
        Ok(self.store.top_by_balance(limit).await?)
    }

    /// Record the referrer named by an `invite_<id>` start parameter.
    /// Best effort: a failure is logged and does not affect the session.
    async fn link_referrer(&self, user: &UserRecord) {
        let Some(referrer_id) = self
            .resolver
            .launch_data()
            .and_then(|launch| launch.start_param.as_deref())
            .and_then(parse_invite)
        else {
            return;
        };
        if referrer_id == user.telegram_id() {
            tracing::debug!(referrer_id, "ignoring self-referral");
            return;
        }
        let referral = Referral::new(referrer_id, &user.profile);
        match self.store.record_referral(&referral).await {
            Ok(true) => tracing::info!(
                referrer_id,
                telegram_id = user.telegram_id(),
                "referral recorded"
            ),
            Ok(false) => tracing::debug!(
                telegram_id = user.telegram_id(),
                "user already referred"
            ),
            Err(err) => tracing::warn!(%err, referrer_id, "failed to record referral"),
        }
    }
}

#[allow(non_snake_case)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        in_memory_store::InMemoryUserStore,
        test_helpers::{
            InstrumentedStore,
            query_payload,
            record,
        },
    };
    use serde_json::json;

    #[tokio::test]
    async fn start__resolves_and_loads_balance() {
        // given
        let store = InMemoryUserStore::new_with_users([record("123", "old", 40)]);
        let session = Session::new(store);

        // when
        let status = session
            .start(&query_payload(&json!({"id": 123, "username": "a"}), &[]))
            .await;

        // then
        match status {
            SessionStatus::Ready { user, balance } => {
                assert_eq!(user.profile.username.as_deref(), Some("a"));
                assert_eq!(balance, 40);
            }
            other => panic!("expected ready session, got {other:?}"),
        }
        assert_eq!(session.ledger().balance(), Some(40));
    }

    #[tokio::test]
    async fn start__malformed_payload_degrades_without_retry() {
        // given
        let session = Session::new(InMemoryUserStore::new());

        // when
        let status = session.start("garbage").await;

        // then
        assert!(matches!(
            status,
            SessionStatus::Degraded {
                retryable: false,
                ..
            }
        ));
        assert!(matches!(
            session.add_to_balance(10).await,
            Err(Error::Unresolved)
        ));
    }

    #[tokio::test]
    async fn start__backend_down_degrades_as_retryable() {
        // given
        let store = InstrumentedStore::new(InMemoryUserStore::new());
        store.fail_upserts(true);
        let session = Session::new(store);

        // when
        let status = session.start(&query_payload(&json!({"id": 1}), &[])).await;

        // then
        assert!(matches!(
            status,
            SessionStatus::Degraded {
                retryable: true,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn start__balance_failure_leaves_balance_pending() {
        // given
        let store = InstrumentedStore::new(InMemoryUserStore::new());
        store.fail_lookups(true);
        let session = Session::new(store);

        // when
        let status = session.start(&query_payload(&json!({"id": 1}), &[])).await;

        // then
        assert!(matches!(
            status,
            SessionStatus::BalancePending {
                reason: Some(_),
                ..
            }
        ));
        assert_eq!(session.ledger().balance(), None);
    }

    #[tokio::test]
    async fn start__invite_start_param_records_referral_once() {
        // given
        let store = InMemoryUserStore::new_with_users([record("1", "referrer", 0)]);
        let payload = query_payload(
            &json!({"id": 2, "username": "friend"}),
            &[("start_param", "invite_1")],
        );

        // when
        Session::new(store.clone()).start(&payload).await;
        Session::new(store.clone()).start(&payload).await;

        // then
        let referrals = store.referrals_of("1").await.unwrap();
        assert_eq!(referrals.len(), 1);
        assert_eq!(referrals[0].telegram_id, "2");
        assert_eq!(referrals[0].username.as_deref(), Some("friend"));
    }

    #[tokio::test]
    async fn start__self_referral_is_ignored() {
        // given
        let store = InMemoryUserStore::new();
        let payload = query_payload(&json!({"id": 5}), &[("start_param", "invite_5")]);

        // when
        Session::new(store.clone()).start(&payload).await;

        // then
        assert!(store.referrals_of("5").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn add_to_balance__uses_resolved_identity() {
        // given
        let store = InMemoryUserStore::new();
        let session = Session::new(store.clone());
        session.start(&query_payload(&json!({"id": 9}), &[])).await;

        // when
        let balance = session.add_to_balance(25).await.unwrap();

        // then
        assert_eq!(balance, 25);
        assert_eq!(store.find_user("9").await.unwrap().unwrap().balance, 25);
        let link = session.invite_link("bot", "app").unwrap();
        assert_eq!(link.referrer_id(), "9");
    }
}
