use crate::{
    error::BackendError,
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
use std::{
    collections::BTreeMap,
    sync::{
        Arc,
        Mutex,
        MutexGuard,
    },
};

/// Process-local store. Each call holds the lock for its whole read-modify-write
/// so it gives the same atomicity the hosted backend does.
#[derive(Clone, Default, Debug)]
pub struct InMemoryUserStore {
    users: Arc<Mutex<BTreeMap<String, UserRecord>>>,
    referrals: Arc<Mutex<Vec<Referral>>>,
}

impl InMemoryUserStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn new_with_users(records: impl IntoIterator<Item = UserRecord>) -> Self {
        let users = records
            .into_iter()
            .map(|record| (record.profile.telegram_id.clone(), record))
            .collect();
        Self {
            users: Arc::new(Mutex::new(users)),
            referrals: Arc::default(),
        }
    }

    pub fn user_count(&self) -> StoreResult<usize> {
        Ok(self.users()?.len())
    }

    fn users(&self) -> StoreResult<MutexGuard<'_, BTreeMap<String, UserRecord>>> {
        self.users
            .lock()
            .map_err(|_| BackendError::Storage("user table lock poisoned".to_string()))
    }

    fn referrals(&self) -> StoreResult<MutexGuard<'_, Vec<Referral>>> {
        self.referrals
            .lock()
            .map_err(|_| BackendError::Storage("referral table lock poisoned".to_string()))
    }
}

impl UserStore for InMemoryUserStore {
    async fn upsert_user(&self, profile: &UserProfile) -> StoreResult<UserRecord> {
        let mut users = self.users()?;
        let record = users
            .entry(profile.telegram_id.clone())
            .and_modify(|existing| existing.profile = profile.clone())
            .or_insert_with(|| UserRecord::new(profile.clone()));
        Ok(record.clone())
    }

    async fn find_user(&self, telegram_id: &str) -> StoreResult<Option<UserRecord>> {
        Ok(self.users()?.get(telegram_id).cloned())
    }

    async fn add_to_balance(
        &self,
        telegram_id: &str,
        amount: i64,
    ) -> StoreResult<Option<i64>> {
        let mut users = self.users()?;
        let Some(record) = users.get_mut(telegram_id) else {
            return Ok(None);
        };
        let updated = apply_delta(telegram_id, record.balance, amount)?;
        record.balance = updated;
        Ok(Some(updated))
    }

    async fn top_by_balance(&self, limit: usize) -> StoreResult<Vec<LeaderboardEntry>> {
        let users = self.users()?;
        Ok(rank(users.values(), limit))
    }
}

impl ReferralStore for InMemoryUserStore {
    async fn referrals_of(&self, referrer_id: &str) -> StoreResult<Vec<Referral>> {
        Ok(self
            .referrals()?
            .iter()
            .filter(|referral| referral.referrer_id == referrer_id)
            .cloned()
            .collect())
    }

    async fn record_referral(&self, referral: &Referral) -> StoreResult<bool> {
        let mut referrals = self.referrals()?;
        if referrals
            .iter()
            .any(|existing| existing.telegram_id == referral.telegram_id)
        {
            return Ok(false);
        }
        referrals.push(referral.clone());
        Ok(true)
    }
}

/// New balance after adding `amount`, refusing results below zero.
pub fn apply_delta(telegram_id: &str, balance: i64, amount: i64) -> StoreResult<i64> {
    match balance.checked_add(amount) {
        Some(updated) if updated >= 0 => Ok(updated),
        Some(_) => Err(BackendError::BalanceUnderflow {
            telegram_id: telegram_id.to_string(),
        }),
        None => Err(BackendError::Storage(format!(
            "balance of {telegram_id} overflowed"
        ))),
    }
}

/// Leaderboard order: balance descending, ties broken by id.
pub fn rank<'a>(
    records: impl IntoIterator<Item = &'a UserRecord>,
    limit: usize,
) -> Vec<LeaderboardEntry> {
    let mut entries: Vec<LeaderboardEntry> =
        records.into_iter().map(LeaderboardEntry::from).collect();
    entries.sort_by(|a, b| {
        b.balance
            .cmp(&a.balance)
            .then_with(|| a.telegram_id.cmp(&b.telegram_id))
    });
    entries.truncate(limit);
    entries
}

#[allow(non_snake_case)]
#[cfg(test)]
mod tests {
    use super::*;

    fn profile(id: &str, username: &str) -> UserProfile {
        UserProfile::new(id).with_username(username)
    }

    #[tokio::test]
    async fn upsert__when_absent_then_inserts_with_zero_balance() {
        // given
        let store = InMemoryUserStore::new();

        // when
        let record = store.upsert_user(&profile("1", "a")).await.unwrap();

        // then
        assert_eq!(record.balance, 0);
        assert_eq!(store.user_count().unwrap(), 1);
    }

    #[tokio::test]
    async fn upsert__when_present_then_overwrites_profile_and_keeps_balance() {
        // given
        let store = InMemoryUserStore::new_with_users([
            UserRecord::new(profile("1", "a")).with_balance(40)
        ]);

        // when
        let record = store.upsert_user(&UserProfile::new("1")).await.unwrap();

        // then
        assert_eq!(record.balance, 40);
        assert_eq!(record.profile.username, None);
        assert_eq!(store.user_count().unwrap(), 1);
    }

    #[tokio::test]
    async fn add_to_balance__when_user_missing_then_none() {
        let store = InMemoryUserStore::new();
        assert_eq!(store.add_to_balance("404", 5).await.unwrap(), None);
    }

    #[tokio::test]
    async fn add_to_balance__refuses_to_go_negative() {
        // given
        let store = InMemoryUserStore::new_with_users([
            UserRecord::new(profile("1", "a")).with_balance(10)
        ]);

        // when
        let result = store.add_to_balance("1", -11).await;

        // then
        assert!(matches!(result, Err(BackendError::BalanceUnderflow { .. })));
        assert_eq!(store.find_user("1").await.unwrap().unwrap().balance, 10);
    }

    #[tokio::test]
    async fn top_by_balance__orders_descending_and_limits() {
        // given
        let store = InMemoryUserStore::new_with_users([
            UserRecord::new(profile("1", "a")).with_balance(5),
            UserRecord::new(profile("2", "b")).with_balance(50),
            UserRecord::new(profile("3", "c")).with_balance(20),
            UserRecord::new(profile("4", "d")).with_balance(20),
        ]);

        // when
        let top = store.top_by_balance(3).await.unwrap();

        // then
        let ids: Vec<_> = top.iter().map(|e| e.telegram_id.as_str()).collect();
        assert_eq!(ids, vec!["2", "3", "4"]);
    }

    #[tokio::test]
    async fn record_referral__only_once_per_referred_user() {
        // given
        let store = InMemoryUserStore::new();
        let referred = profile("2", "b");

        // when
        let first = store.record_referral(&Referral::new("1", &referred)).await.unwrap();
        let second = store.record_referral(&Referral::new("3", &referred)).await.unwrap();

        // then
        assert!(first);
        assert!(!second);
        assert_eq!(store.referrals_of("1").await.unwrap().len(), 1);
        assert!(store.referrals_of("3").await.unwrap().is_empty());
    }
}
