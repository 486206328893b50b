use std::fmt;

pub const INVITE_PREFIX: &str = "invite_";

/// Share link that opens the Mini App with `startapp=invite_<referrer>`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InviteLink {
    bot_username: String,
    app_name: String,
    referrer_id: String,
}

impl InviteLink {
    pub fn new(
        bot_username: impl Into<String>,
        app_name: impl Into<String>,
        referrer_id: impl Into<String>,
    ) -> Self {
        Self {
            bot_username: bot_username.into(),
            app_name: app_name.into(),
            referrer_id: referrer_id.into(),
        }
    }

    pub fn start_param(&self) -> String {
        format!("{INVITE_PREFIX}{}", self.referrer_id)
    }

    pub fn referrer_id(&self) -> &str {
        &self.referrer_id
    }
}

impl fmt::Display for InviteLink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "https://t.me/{}/{}?startapp={}",
            self.bot_username.trim_start_matches('@'),
            self.app_name,
            self.start_param()
        )
    }
}

/// Referrer id carried by an `invite_<digits>` start parameter.
pub fn parse_invite(start_param: &str) -> Option<&str> {
    let id = start_param.strip_prefix(INVITE_PREFIX)?;
    if !id.is_empty() && id.bytes().all(|b| b.is_ascii_digit()) {
        Some(id)
    } else {
        None
    }
}
