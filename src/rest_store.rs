use crate::{
    config::BackendConfig,
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
use reqwest::{
    Method,
    RequestBuilder,
    StatusCode,
};
use serde::{
    Serialize,
    de::DeserializeOwned,
};

const REST_PREFIX: &str = "rest/v1";
const UPSERT_PREFERENCE: &str = "resolution=merge-duplicates,return=representation";
const INSERT_IF_ABSENT_PREFERENCE: &str = "resolution=ignore-duplicates,return=representation";
const LEADERBOARD_COLUMNS: &str = "telegramId,username,balance";
const REFERRAL_COLUMNS: &str = "referrerId,telegramId,username,firstName,lastName";

/// [`UserStore`] over a hosted PostgREST-style backend.
#[derive(Clone)]
pub struct RestUserStore {
    base_url: String,
    api_key: Option<String>,
    users_table: String,
    referrals_table: String,
    increment_function: String,
    http: reqwest::Client,
}

impl std::fmt::Debug for RestUserStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RestUserStore")
            .field("base_url", &self.base_url)
            .field("users_table", &self.users_table)
            .finish_non_exhaustive()
    }
}

#[derive(Serialize)]
struct IncrementArgs<'a> {
    user_id: &'a str,
    amount: i64,
}

impl RestUserStore {
    pub fn new(config: &BackendConfig) -> StoreResult<Self> {
        let base_url = url::Url::parse(&config.url)
            .map_err(|e| {
                BackendError::Transport(format!("invalid backend url `{}`: {e}", config.url))
            })?
            .as_str()
            .trim_end_matches('/')
            .to_string();
        let mut builder = reqwest::Client::builder();
        if let Some(timeout) = config.request_timeout() {
            builder = builder.timeout(timeout);
        }
        let http = builder
            .build()
            .map_err(|e| BackendError::Transport(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            base_url,
            api_key: config.api_key.clone(),
            users_table: config.users_table.clone(),
            referrals_table: config.referrals_table.clone(),
            increment_function: config.increment_function.clone(),
            http,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn table_url(&self, table: &str) -> String {
        format!("{}/{REST_PREFIX}/{table}", self.base_url)
    }

    fn rpc_url(&self, function: &str) -> String {
        format!("{}/{REST_PREFIX}/rpc/{function}", self.base_url)
    }

    fn request(&self, method: Method, url: String) -> RequestBuilder {
        let builder = self.http.request(method, url);
        match &self.api_key {
            Some(key) => builder.header("apikey", key).bearer_auth(key),
            None => builder,
        }
    }

    async fn send<T: DeserializeOwned>(
        &self,
        builder: RequestBuilder,
        what: &str,
    ) -> StoreResult<T> {
        let res = builder.send().await?;
        let status = res.status();
        let bytes = res.bytes().await?;
        if !status.is_success() {
            let body = String::from_utf8_lossy(&bytes).into_owned();
            tracing::debug!(%status, %body, "backend rejected {what}");
            return Err(BackendError::Status {
                status: status.as_u16(),
                body,
            });
        }
        Ok(serde_json::from_slice(&bytes)?)
    }
}

fn eq_filter(value: &str) -> String {
    format!("eq.{value}")
}

impl UserStore for RestUserStore {
    async fn upsert_user(&self, profile: &UserProfile) -> StoreResult<UserRecord> {
        let builder = self
            .request(Method::POST, self.table_url(&self.users_table))
            .query(&[("on_conflict", "telegramId")])
            .header("Prefer", UPSERT_PREFERENCE)
            .json(&[profile]);
        let mut rows: Vec<UserRecord> = self.send(builder, "user upsert").await?;
        rows.pop().ok_or_else(|| {
            BackendError::Decode("upsert returned no representation".to_string())
        })
    }

    async fn find_user(&self, telegram_id: &str) -> StoreResult<Option<UserRecord>> {
        let filter = eq_filter(telegram_id);
        let builder = self
            .request(Method::GET, self.table_url(&self.users_table))
            .query(&[("select", "*"), ("telegramId", filter.as_str())]);
        let mut rows: Vec<UserRecord> = self.send(builder, "user lookup").await?;
        Ok(rows.pop())
    }

    async fn add_to_balance(
        &self,
        telegram_id: &str,
        amount: i64,
    ) -> StoreResult<Option<i64>> {
        let builder = self
            .request(Method::POST, self.rpc_url(&self.increment_function))
            .json(&IncrementArgs {
                user_id: telegram_id,
                amount,
            });
        match self.send(builder, "balance increment").await {
            Err(BackendError::Status { status, .. })
                if status == StatusCode::CONFLICT.as_u16() =>
            {
                Err(BackendError::BalanceUnderflow {
                    telegram_id: telegram_id.to_string(),
                })
            }
            other => other,
        }
    }

    async fn top_by_balance(&self, limit: usize) -> StoreResult<Vec<LeaderboardEntry>> {
        let limit = limit.to_string();
        let builder = self
            .request(Method::GET, self.table_url(&self.users_table))
            .query(&[
                ("select", LEADERBOARD_COLUMNS),
                ("order", "balance.desc"),
                ("limit", limit.as_str()),
            ]);
        self.send(builder, "leaderboard query").await
    }
}

impl ReferralStore for RestUserStore {
    async fn referrals_of(&self, referrer_id: &str) -> StoreResult<Vec<Referral>> {
        let filter = eq_filter(referrer_id);
        let builder = self
            .request(Method::GET, self.table_url(&self.referrals_table))
            .query(&[
                ("select", REFERRAL_COLUMNS),
                ("referrerId", filter.as_str()),
            ]);
        self.send(builder, "referral listing").await
    }

    async fn record_referral(&self, referral: &Referral) -> StoreResult<bool> {
        let builder = self
            .request(Method::POST, self.table_url(&self.referrals_table))
            .query(&[("on_conflict", "telegramId")])
            .header("Prefer", INSERT_IF_ABSENT_PREFERENCE)
            .json(&[referral]);
        let rows: Vec<Referral> = self.send(builder, "referral insert").await?;
        Ok(!rows.is_empty())
    }
}
