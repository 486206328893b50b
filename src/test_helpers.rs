//! Fakes and payload builders shared by unit and integration tests.

use crate::{
    error::BackendError,
    launch::InitDataVerifier,
    store::{
        ReferralStore,
        StoreResult,
        UserStore,
    },
    user::{
        LeaderboardEntry,
        Referral,
        UserProfile,
        UserRecord,
    },
};
use serde_json::{
    Value,
    json,
};
use std::sync::{
    Arc,
    atomic::{
        AtomicBool,
        AtomicUsize,
        Ordering,
    },
};
use tokio::sync::Semaphore;

/// Query-string launch payload without a signature.
pub fn query_payload(user: &Value, extra: &[(&str, &str)]) -> String {
    let user = user.to_string();
    url::form_urlencoded::Serializer::new(String::new())
        .append_pair("user", &user)
        .extend_pairs(extra.iter().copied())
        .finish()
}

/// Query-string launch payload signed the way Telegram signs it for
/// `bot_token`.
pub fn signed_query_payload(
    bot_token: &str,
    user: &Value,
    auth_date: i64,
    extra: &[(&str, &str)],
) -> String {
    let user = user.to_string();
    let auth_date = auth_date.to_string();
    let mut fields = vec![("user", user.as_str()), ("auth_date", auth_date.as_str())];
    fields.extend(extra.iter().copied());
    let hash = InitDataVerifier::new(bot_token).signature(fields.iter().copied());
    url::form_urlencoded::Serializer::new(String::new())
        .extend_pairs(fields)
        .append_pair("hash", &hash)
        .finish()
}

/// Direct JSON launch payload.
pub fn json_payload(user: &Value) -> String {
    json!({ "user": user }).to_string()
}

pub fn record(telegram_id: &str, username: &str, balance: i64) -> UserRecord {
    UserRecord::new(UserProfile::new(telegram_id).with_username(username))
        .with_balance(balance)
}

/// Wraps a store to count calls, inject failures and hold increments or
/// lookups until released.
#[derive(Clone)]
pub struct InstrumentedStore<S> {
    inner: S,
    upserts: Arc<AtomicUsize>,
    increments: Arc<AtomicUsize>,
    fail_upserts: Arc<AtomicBool>,
    fail_lookups: Arc<AtomicBool>,
    fail_increments: Arc<AtomicBool>,
    gate: Option<Arc<Semaphore>>,
    lookup_gate: Option<Arc<Semaphore>>,
}

impl<S> InstrumentedStore<S> {
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            upserts: Arc::default(),
            increments: Arc::default(),
            fail_upserts: Arc::default(),
            fail_lookups: Arc::default(),
            fail_increments: Arc::default(),
            gate: None,
            lookup_gate: None,
        }
    }

    /// Increments wait for [`Self::release`] before reaching the inner store.
    pub fn gated(mut self) -> Self {
        self.gate = Some(Arc::new(Semaphore::new(0)));
        self
    }

    pub fn release(&self) {
        if let Some(gate) = &self.gate {
            gate.add_permits(1);
        }
    }

    /// `find_user` waits for [`Self::release_lookup`] before reaching the
    /// inner store.
    pub fn gated_lookups(mut self) -> Self {
        self.lookup_gate = Some(Arc::new(Semaphore::new(0)));
        self
    }

    pub fn release_lookup(&self) {
        if let Some(gate) = &self.lookup_gate {
            gate.add_permits(1);
        }
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }

    pub fn upsert_calls(&self) -> usize {
        self.upserts.load(Ordering::SeqCst)
    }

    pub fn increment_calls(&self) -> usize {
        self.increments.load(Ordering::SeqCst)
    }

    pub fn fail_upserts(&self, fail: bool) {
        self.fail_upserts.store(fail, Ordering::SeqCst);
    }

    pub fn fail_lookups(&self, fail: bool) {
        self.fail_lookups.store(fail, Ordering::SeqCst);
    }

    pub fn fail_increments(&self, fail: bool) {
        self.fail_increments.store(fail, Ordering::SeqCst);
    }

    async fn pass(gate: Option<&Semaphore>) -> StoreResult<()> {
        if let Some(gate) = gate {
            gate.acquire()
                .await
                .map_err(|_| BackendError::Transport("gate closed".to_string()))?
                .forget();
        }
        Ok(())
    }

    fn injected(flag: &AtomicBool) -> StoreResult<()> {
        if flag.load(Ordering::SeqCst) {
            Err(BackendError::Transport("injected failure".to_string()))
        } else {
            Ok(())
        }
    }
}

impl<S: UserStore> UserStore for InstrumentedStore<S> {
    async fn upsert_user(&self, profile: &UserProfile) -> StoreResult<UserRecord> {
        self.upserts.fetch_add(1, Ordering::SeqCst);
        Self::injected(&self.fail_upserts)?;
        self.inner.upsert_user(profile).await
    }

    async fn find_user(&self, telegram_id: &str) -> StoreResult<Option<UserRecord>> {
        Self::pass(self.lookup_gate.as_deref()).await?;
        Self::injected(&self.fail_lookups)?;
        self.inner.find_user(telegram_id).await
    }

    async fn add_to_balance(
        &self,
        telegram_id: &str,
        amount: i64,
    ) -> StoreResult<Option<i64>> {
        self.increments.fetch_add(1, Ordering::SeqCst);
        Self::pass(self.gate.as_deref()).await?;
        Self::injected(&self.fail_increments)?;
        self.inner.add_to_balance(telegram_id, amount).await
    }

    async fn top_by_balance(&self, limit: usize) -> StoreResult<Vec<LeaderboardEntry>> {
        Self::injected(&self.fail_lookups)?;
        self.inner.top_by_balance(limit).await
    }
}

impl<S: ReferralStore> ReferralStore for InstrumentedStore<S> {
    async fn referrals_of(&self, referrer_id: &str) -> StoreResult<Vec<Referral>> {
        Self::injected(&self.fail_lookups)?;
        self.inner.referrals_of(referrer_id).await
    }

    async fn record_referral(&self, referral: &Referral) -> StoreResult<bool> {
        self.inner.record_referral(referral).await
    }
}
