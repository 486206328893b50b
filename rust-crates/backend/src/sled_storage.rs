// Sled-backed user and referral tables for the emulated backend.
use anyhow::Context;
use miniapp_ledger::{
    BackendError,
    LeaderboardEntry,
    Referral,
    ReferralStore,
    StoreResult,
    UserProfile,
    UserRecord,
    UserStore,
    in_memory_store::{
        apply_delta,
        rank,
    },
};
use serde::{
    Serialize,
    de::DeserializeOwned,
};
use sled::{
    Config,
    Db,
    IVec,
    Tree,
};
use std::path::Path;

#[derive(Clone)]
pub struct SledUserStore {
    users: Tree,
    referrals: Tree,
}

impl SledUserStore {
    pub fn new(db: &Db) -> crate::Result<Self> {
        let users = db.open_tree("users").context("open users tree")?;
        let referrals = db.open_tree("referrals").context("open referrals tree")?;
        Ok(Self { users, referrals })
    }

    pub fn open<P: AsRef<Path>>(path: P) -> crate::Result<Self> {
        let db = Config::default()
            .path(path)
            .open()
            .context("open sled database")?;
        Self::new(&db)
    }

    async fn flush(&self, tree: &Tree, label: &str) -> StoreResult<()> {
        tree.flush_async()
            .await
            .map_err(|e| storage_error(&format!("flush {label}"), e))?;
        Ok(())
    }
}

fn storage_error(action: &str, err: sled::Error) -> BackendError {
    BackendError::Storage(format!("{action}: {err}"))
}

fn encode<T: Serialize>(value: &T, label: &str) -> StoreResult<Vec<u8>> {
    serde_json::to_vec(value)
        .map_err(|e| BackendError::Storage(format!("serialize {label}: {e}")))
}

fn decode<T: DeserializeOwned>(bytes: &[u8], label: &str) -> StoreResult<T> {
    serde_json::from_slice(bytes)
        .map_err(|e| BackendError::Storage(format!("deserialize {label}: {e}")))
}

fn decode_record(bytes: Option<IVec>) -> StoreResult<Option<UserRecord>> {
    bytes
        .map(|bytes| decode::<UserRecord>(&bytes, "user record"))
        .transpose()
}

impl UserStore for SledUserStore {
    async fn upsert_user(&self, profile: &UserProfile) -> StoreResult<UserRecord> {
        // The update closure may run several times under contention; only the
        // outcome of the final run is kept.
        let mut failure = None;
        let stored = self
            .users
            .update_and_fetch(profile.telegram_id.as_bytes(), |old| {
                failure = None;
                let balance = match old.map(|bytes| decode::<UserRecord>(bytes, "user record")) {
                    Some(Ok(existing)) => existing.balance,
                    Some(Err(err)) => {
                        failure = Some(err);
                        return old.map(<[u8]>::to_vec);
                    }
                    None => 0,
                };
                let record = UserRecord::new(profile.clone()).with_balance(balance);
                match encode(&record, "user record") {
                    Ok(bytes) => Some(bytes),
                    Err(err) => {
                        failure = Some(err);
                        old.map(<[u8]>::to_vec)
                    }
                }
            })
            .map_err(|e| storage_error("upsert user", e))?;
        if let Some(err) = failure {
            return Err(err);
        }
        self.flush(&self.users, "users").await?;
        decode_record(stored)?.ok_or_else(|| {
            BackendError::Storage("upserted user vanished".to_string())
        })
    }

    async fn find_user(&self, telegram_id: &str) -> StoreResult<Option<UserRecord>> {
        let bytes = self
            .users
            .get(telegram_id.as_bytes())
            .map_err(|e| storage_error("read user", e))?;
        decode_record(bytes)
    }

    async fn add_to_balance(
        &self,
        telegram_id: &str,
        amount: i64,
    ) -> StoreResult<Option<i64>> {
        let mut failure = None;
        let stored = self
            .users
            .update_and_fetch(telegram_id.as_bytes(), |old| {
                failure = None;
                let bytes = old?;
                let updated = decode::<UserRecord>(bytes, "user record").and_then(|record| {
                    let balance = apply_delta(telegram_id, record.balance, amount)?;
                    encode(&record.with_balance(balance), "user record")
                });
                match updated {
                    Ok(bytes) => Some(bytes),
                    Err(err) => {
                        failure = Some(err);
                        Some(bytes.to_vec())
                    }
                }
            })
            .map_err(|e| storage_error("increment balance", e))?;
        if let Some(err) = failure {
            return Err(err);
        }
        let Some(record) = decode_record(stored)? else {
            return Ok(None);
        };
        self.flush(&self.users, "users").await?;
        Ok(Some(record.balance))
    }

    async fn top_by_balance(&self, limit: usize) -> StoreResult<Vec<LeaderboardEntry>> {
        let mut records = Vec::new();
        for entry in self.users.iter() {
            let (_, value) = entry.map_err(|e| storage_error("iterate users", e))?;
            records.push(decode::<UserRecord>(&value, "user record")?);
        }
        Ok(rank(&records, limit))
    }
}

impl ReferralStore for SledUserStore {
    async fn referrals_of(&self, referrer_id: &str) -> StoreResult<Vec<Referral>> {
        let mut referrals = Vec::new();
        for entry in self.referrals.iter() {
            let (_, value) = entry.map_err(|e| storage_error("iterate referrals", e))?;
            let referral: Referral = decode(&value, "referral")?;
            if referral.referrer_id == referrer_id {
                referrals.push(referral);
            }
        }
        Ok(referrals)
    }

    async fn record_referral(&self, referral: &Referral) -> StoreResult<bool> {
        let bytes = encode(referral, "referral")?;
        let swapped = self
            .referrals
            .compare_and_swap(
                referral.telegram_id.as_bytes(),
                None as Option<&[u8]>,
                Some(bytes),
            )
            .map_err(|e| storage_error("insert referral", e))?;
        if swapped.is_err() {
            return Ok(false);
        }
        self.flush(&self.referrals, "referrals").await?;
        Ok(true)
    }
}
