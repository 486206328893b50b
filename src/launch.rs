//! Decoding and verification of the launch payload the Telegram client hands
//! to a Mini App (`initData`).

use crate::error::{
    Error,
    Result,
};
use chrono::{
    DateTime,
    Utc,
};
use hmac::{
    Hmac,
    Mac,
};
use percent_encoding::percent_decode_str;
use serde::{
    Deserialize,
    Serialize,
};
use serde_json::{
    Map,
    Value,
};
use sha2::Sha256;
use std::time::Duration;

type HmacSha256 = Hmac<Sha256>;

const WEB_APP_DATA_KEY: &[u8] = b"WebAppData";
const HASH_FIELD: &str = "hash";

/// The platform user embedded in a launch payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LaunchUser {
    pub id: i64,
    #[serde(default, alias = "firstName")]
    pub first_name: Option<String>,
    #[serde(default, alias = "lastName")]
    pub last_name: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default, alias = "languageCode")]
    pub language_code: Option<String>,
    #[serde(default, alias = "isPremium")]
    pub is_premium: Option<bool>,
    #[serde(default, alias = "allowsWriteToPm")]
    pub allows_write_to_pm: Option<bool>,
    #[serde(default, alias = "photoUrl")]
    pub photo_url: Option<String>,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum PayloadEncoding {
    /// `{"user": {...}, ...}`, possibly percent-encoded as a whole.
    Json,
    /// `user=%7B...%7D&auth_date=...&hash=...`, the form Telegram signs.
    QueryString,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchData {
    pub user: LaunchUser,
    pub auth_date: Option<DateTime<Utc>>,
    pub hash: Option<String>,
    pub start_param: Option<String>,
    pub query_id: Option<String>,
    pub chat_type: Option<String>,
    pub chat_instance: Option<String>,
    pub encoding: PayloadEncoding,
    /// Decoded key/value pairs in payload order. Only populated for the
    /// query-string encoding, which is the only one carrying a signature.
    fields: Vec<(String, String)>,
}

impl LaunchData {
    pub fn parse(raw: &str) -> Result<Self> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(Error::malformed("payload is empty"));
        }
        if trimmed.starts_with('{') {
            return Self::parse_json(trimmed);
        }
        if trimmed.contains('=') {
            return Self::parse_query(trimmed);
        }
        let decoded = percent_decode_str(trimmed)
            .decode_utf8()
            .map_err(|e| Error::malformed(format!("payload is not valid UTF-8: {e}")))?;
        if decoded.starts_with('{') {
            return Self::parse_json(&decoded);
        }
        // A query string encoded twice still needs its outer layer removed.
        if decoded.contains('=') {
            return Self::parse_query(&decoded);
        }
        Self::parse_query(trimmed)
    }

    pub fn telegram_id(&self) -> String {
        self.user.id.to_string()
    }

    /// Pairs covered by the signature, i.e. every field except `hash`.
    pub fn signed_fields(&self) -> impl Iterator<Item = (&str, &str)> {
        self.fields
            .iter()
            .filter(|(key, _)| key != HASH_FIELD)
            .map(|(key, value)| (key.as_str(), value.as_str()))
    }

    fn parse_json(raw: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(raw)
            .map_err(|e| Error::malformed(format!("invalid JSON payload: {e}")))?;
        let Value::Object(object) = value else {
            return Err(Error::malformed("JSON payload is not an object"));
        };
        let user = match object.get("user") {
            Some(Value::String(nested)) => decode_user(nested)?,
            Some(user @ Value::Object(_)) => user_from_value(user.clone())?,
            Some(_) => return Err(Error::malformed("`user` is neither object nor string")),
            None => return Err(Error::malformed("payload has no `user`")),
        };
        let auth_date = match json_field(&object, &["auth_date", "authDate"]) {
            Some(Value::Number(n)) => {
                let secs = n
                    .as_i64()
                    .ok_or_else(|| Error::malformed("auth_date is not an integer"))?;
                Some(timestamp(secs)?)
            }
            Some(Value::String(s)) => Some(parse_auth_date(s)?),
            Some(Value::Null) | None => None,
            Some(_) => return Err(Error::malformed("auth_date has unexpected type")),
        };

        Ok(Self {
            user,
            auth_date,
            hash: json_string(&object, &["hash"]),
            start_param: json_string(&object, &["start_param", "startParam"]),
            query_id: json_string(&object, &["query_id", "queryId"]),
            chat_type: json_string(&object, &["chat_type", "chatType"]),
            chat_instance: json_string(&object, &["chat_instance", "chatInstance"]),
            encoding: PayloadEncoding::Json,
            fields: Vec::new(),
        })
    }

    fn parse_query(raw: &str) -> Result<Self> {
        let fields: Vec<(String, String)> = url::form_urlencoded::parse(raw.as_bytes())
            .map(|(key, value)| (key.into_owned(), value.into_owned()))
            .collect();
        let lookup = |name: &str| {
            fields
                .iter()
                .find(|(key, _)| key == name)
                .map(|(_, value)| value.clone())
        };
        let user = match lookup("user") {
            Some(nested) => decode_user(&nested)?,
            None => return Err(Error::malformed("payload has no `user` field")),
        };
        let auth_date = lookup("auth_date").map(|s| parse_auth_date(&s)).transpose()?;

        Ok(Self {
            user,
            auth_date,
            hash: lookup(HASH_FIELD),
            start_param: lookup("start_param"),
            query_id: lookup("query_id"),
            chat_type: lookup("chat_type"),
            chat_instance: lookup("chat_instance"),
            encoding: PayloadEncoding::QueryString,
            fields,
        })
    }
}

fn decode_user(nested: &str) -> Result<LaunchUser> {
    let value: Value = serde_json::from_str(nested)
        .map_err(|e| Error::malformed(format!("`user` is not valid JSON: {e}")))?;
    user_from_value(value)
}

fn user_from_value(value: Value) -> Result<LaunchUser> {
    if !value.is_object() {
        return Err(Error::malformed("`user` is not an object"));
    }
    match value.get("id") {
        Some(Value::Number(n)) if n.is_i64() || n.is_u64() => {}
        Some(_) => return Err(Error::malformed("user id is not an integer")),
        None => return Err(Error::malformed("user has no id")),
    }
    serde_json::from_value(value)
        .map_err(|e| Error::malformed(format!("invalid user object: {e}")))
}

fn json_field<'a>(object: &'a Map<String, Value>, names: &[&str]) -> Option<&'a Value> {
    names.iter().find_map(|name| object.get(*name))
}

fn json_string(object: &Map<String, Value>, names: &[&str]) -> Option<String> {
    match json_field(object, names) {
        Some(Value::String(s)) => Some(s.clone()),
        _ => None,
    }
}

fn parse_auth_date(raw: &str) -> Result<DateTime<Utc>> {
    let secs: i64 = raw
        .parse()
        .map_err(|_| Error::malformed(format!("auth_date `{raw}` is not a unix timestamp")))?;
    timestamp(secs)
}

fn timestamp(secs: i64) -> Result<DateTime<Utc>> {
    DateTime::from_timestamp(secs, 0)
        .ok_or_else(|| Error::malformed(format!("auth_date {secs} is out of range")))
}

/// Checks the `hash` Telegram attaches to query-string launch payloads.
///
/// The secret key is `HMAC-SHA256("WebAppData", bot_token)`; the expected
/// hash is the hex HMAC of the data-check-string (all fields but `hash`,
/// sorted by key, `key=value` joined with `\n`).
#[derive(Clone)]
pub struct InitDataVerifier {
    secret: Vec<u8>,
    max_age: Option<Duration>,
}

impl std::fmt::Debug for InitDataVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InitDataVerifier")
            .field("max_age", &self.max_age)
            .finish_non_exhaustive()
    }
}

impl InitDataVerifier {
    pub fn new(bot_token: &str) -> Self {
        let secret = hmac(WEB_APP_DATA_KEY)
            .chain_update(bot_token.as_bytes())
            .finalize()
            .into_bytes()
            .to_vec();
        Self {
            secret,
            max_age: None,
        }
    }

    pub fn with_max_age(mut self, max_age: Duration) -> Self {
        self.max_age = Some(max_age);
        self
    }

    pub fn verify(&self, launch: &LaunchData) -> Result<()> {
        self.verify_at(launch, Utc::now())
    }

    pub fn verify_at(&self, launch: &LaunchData, now: DateTime<Utc>) -> Result<()> {
        if launch.encoding != PayloadEncoding::QueryString {
            tracing::warn!("refusing unsigned JSON launch payload");
            return Err(Error::InvalidSignature);
        }
        let provided = launch
            .hash
            .as_deref()
            .and_then(|h| hex::decode(h).ok())
            .ok_or(Error::InvalidSignature)?;
        self.mac_for(launch.signed_fields())
            .verify_slice(&provided)
            .map_err(|_| Error::InvalidSignature)?;

        if let Some(max_age) = self.max_age {
            let signed_at = launch
                .auth_date
                .ok_or_else(|| Error::malformed("signed payload has no auth_date"))?;
            let age_secs = (now - signed_at).num_seconds();
            let max_age_secs = i64::try_from(max_age.as_secs()).unwrap_or(i64::MAX);
            if age_secs > max_age_secs {
                return Err(Error::ExpiredPayload {
                    age_secs,
                    max_age_secs: max_age.as_secs(),
                });
            }
        }
        Ok(())
    }

    /// Hex signature over the given fields, excluding any `hash` entry.
    pub fn signature<'a>(
        &self,
        fields: impl IntoIterator<Item = (&'a str, &'a str)>,
    ) -> String {
        let filtered = fields.into_iter().filter(|(key, _)| *key != HASH_FIELD);
        hex::encode(self.mac_for(filtered).finalize().into_bytes())
    }

    fn mac_for<'a>(&self, fields: impl Iterator<Item = (&'a str, &'a str)>) -> HmacSha256 {
        let mut pairs: Vec<_> = fields.collect();
        pairs.sort_by(|a, b| a.0.cmp(b.0));
        let check_string = pairs
            .iter()
            .map(|(key, value)| format!("{key}={value}"))
            .collect::<Vec<_>>()
            .join("\n");
        hmac(&self.secret).chain_update(check_string.as_bytes())
    }
}

fn hmac(key: &[u8]) -> HmacSha256 {
    HmacSha256::new_from_slice(key).expect("HMAC can take key of any size")
}
