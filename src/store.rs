use crate::{
    error::BackendError,
    user::{
        LeaderboardEntry,
        Referral,
        UserProfile,
        UserRecord,
    },
};

pub type StoreResult<T> = std::result::Result<T, BackendError>;

/// Remote user table. Every operation is a single server-side call so
/// concurrent sessions never interleave a read and a write.
pub trait UserStore {
    /// Insert the profile, or overwrite the identity fields of the row with the
    /// same `telegram_id`. The balance of an existing row is left untouched and
    /// a new row starts at zero.
    fn upsert_user(
        &self,
        profile: &UserProfile,
    ) -> impl Future<Output = StoreResult<UserRecord>>;

    fn find_user(
        &self,
        telegram_id: &str,
    ) -> impl Future<Output = StoreResult<Option<UserRecord>>>;

    /// Atomically add `amount` to the stored balance and return the new value,
    /// or `None` when no such user exists.
    fn add_to_balance(
        &self,
        telegram_id: &str,
        amount: i64,
    ) -> impl Future<Output = StoreResult<Option<i64>>>;

    /// Users ordered by balance descending, at most `limit` of them.
    fn top_by_balance(
        &self,
        limit: usize,
    ) -> impl Future<Output = StoreResult<Vec<LeaderboardEntry>>>;
}

pub trait ReferralStore {
    fn referrals_of(
        &self,
        referrer_id: &str,
    ) -> impl Future<Output = StoreResult<Vec<Referral>>>;

    /// Record that `referral.telegram_id` joined through `referral.referrer_id`.
    /// A user is referred at most once; returns false if already recorded.
    fn record_referral(
        &self,
        referral: &Referral,
    ) -> impl Future<Output = StoreResult<bool>>;
}
