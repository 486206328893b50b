use crate::launch::LaunchUser;
use serde::{
    Deserialize,
    Serialize,
};

/// Identity fields of a user row. Everything a launch may overwrite.
///
/// `None` fields serialize as `null` so a refresh clears values the platform
/// no longer reports.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    pub telegram_id: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub first_name: Option<String>,
    #[serde(default)]
    pub last_name: Option<String>,
    #[serde(default)]
    pub language_code: Option<String>,
    #[serde(default)]
    pub allows_write_to_pm: Option<bool>,
    #[serde(default)]
    pub is_premium: Option<bool>,
}

impl UserProfile {
    pub fn new(telegram_id: impl Into<String>) -> Self {
        Self {
            telegram_id: telegram_id.into(),
            username: None,
            first_name: None,
            last_name: None,
            language_code: None,
            allows_write_to_pm: None,
            is_premium: None,
        }
    }

    pub fn with_username(mut self, username: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self
    }

    /// Name to show for this user, falling back through first name and
    /// username to the raw id.
    pub fn display_name(&self) -> String {
        match (&self.first_name, &self.last_name, &self.username) {
            (Some(first), Some(last), _) => format!("{first} {last}"),
            (Some(first), None, _) => first.clone(),
            (None, _, Some(username)) => format!("@{username}"),
            (None, _, None) => self.telegram_id.clone(),
        }
    }
}

impl From<&LaunchUser> for UserProfile {
    fn from(user: &LaunchUser) -> Self {
        Self {
            telegram_id: user.id.to_string(),
            username: user.username.clone(),
            first_name: user.first_name.clone(),
            last_name: user.last_name.clone(),
            language_code: user.language_code.clone(),
            allows_write_to_pm: user.allows_write_to_pm,
            is_premium: user.is_premium,
        }
    }
}

/// A stored user row: identity fields plus the balance the ledger owns.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserRecord {
    #[serde(flatten)]
    pub profile: UserProfile,
    #[serde(default)]
    pub balance: i64,
}

impl UserRecord {
    pub fn new(profile: UserProfile) -> Self {
        Self {
            profile,
            balance: 0,
        }
    }

    pub fn with_balance(mut self, balance: i64) -> Self {
        self.balance = balance;
        self
    }

    pub fn telegram_id(&self) -> &str {
        &self.profile.telegram_id
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeaderboardEntry {
    pub telegram_id: String,
    #[serde(default)]
    pub username: Option<String>,
    pub balance: i64,
}

impl From<&UserRecord> for LeaderboardEntry {
    fn from(record: &UserRecord) -> Self {
        Self {
            telegram_id: record.profile.telegram_id.clone(),
            username: record.profile.username.clone(),
            balance: record.balance,
        }
    }
}

/// A referred user as listed to the referrer. Profile fields are copied at
/// the time the referral is recorded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Referral {
    pub referrer_id: String,
    pub telegram_id: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub first_name: Option<String>,
    #[serde(default)]
    pub last_name: Option<String>,
}

impl Referral {
    pub fn new(referrer_id: impl Into<String>, referred: &UserProfile) -> Self {
        Self {
            referrer_id: referrer_id.into(),
            telegram_id: referred.telegram_id.clone(),
            username: referred.username.clone(),
            first_name: referred.first_name.clone(),
            last_name: referred.last_name.clone(),
        }
    }
}

#[allow(non_snake_case)]
#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn user_record__serializes_flat_camel_case_with_explicit_nulls() {
        // given
        let record = UserRecord::new(UserProfile::new("123").with_username("a"))
            .with_balance(7);

        // when
        let value = serde_json::to_value(&record).unwrap();

        // then
        assert_eq!(
            value,
            json!({
                "telegramId": "123",
                "username": "a",
                "firstName": null,
                "lastName": null,
                "languageCode": null,
                "allowsWriteToPm": null,
                "isPremium": null,
                "balance": 7,
            })
        );
    }

    #[test]
    fn user_record__missing_balance_defaults_to_zero() {
        // given
        let row = json!({ "telegramId": "9", "username": null });

        // when
        let record: UserRecord = serde_json::from_value(row).unwrap();

        // then
        assert_eq!(record.balance, 0);
        assert_eq!(record.telegram_id(), "9");
    }

    #[test]
    fn display_name__falls_back_to_username_then_id() {
        let mut profile = UserProfile::new("42");
        assert_eq!(profile.display_name(), "42");

        profile.username = Some("neo".to_string());
        assert_eq!(profile.display_name(), "@neo");

        profile.first_name = Some("Thomas".to_string());
        assert_eq!(profile.display_name(), "Thomas");

        profile.last_name = Some("Anderson".to_string());
        assert_eq!(profile.display_name(), "Thomas Anderson");
    }
}
