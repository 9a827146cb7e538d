use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use reqwest::StatusCode;
use serde::{Deserialize, Deserializer};
use tracing::{debug, info};

use crate::api::Api;
use crate::client::{json, ExpectStatus, Fields};
use crate::error::{BotError, Result};
use crate::types::StatusResponse;

/// Who gets to see a toot.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Visibility {
    /// Anything that is not one of the four values below. Never submitted.
    #[default]
    Invalid,
    /// Followers and mentioned users only, not on public timelines.
    Private,
    /// Everyone, but not on public timelines.
    Unlisted,
    /// Everyone, on public timelines.
    Public,
    /// Mentioned users only.
    Direct,
}

impl Visibility {
    /// Case-insensitive; unknown strings become `Invalid`.
    pub fn parse(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "private" => Visibility::Private,
            "unlisted" => Visibility::Unlisted,
            "public" => Visibility::Public,
            "direct" => Visibility::Direct,
            _ => Visibility::Invalid,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Visibility::Invalid => "",
            Visibility::Private => "private",
            Visibility::Unlisted => "unlisted",
            Visibility::Public => "public",
            Visibility::Direct => "direct",
        }
    }
}

impl fmt::Display for Visibility {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Visibility {
    type Err = BotError;

    fn from_str(s: &str) -> Result<Self> {
        match Visibility::parse(s) {
            Visibility::Invalid => Err(BotError::InvalidVisibility(s.to_string())),
            v => Ok(v),
        }
    }
}

impl<'de> Deserialize<'de> for Visibility {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Ok(Visibility::parse(&s))
    }
}

/// A toot. `id` and `created_at` are only known once the server has it.
#[derive(Debug, Default, Clone, Deserialize)]
pub(crate) struct Status {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(skip_deserializing)]
    pub text: String,
    #[serde(default)]
    pub media_ids: Vec<String>,
    #[serde(default, rename = "in_reply_to_id")]
    pub reply_to_id: Option<String>,
    #[serde(default)]
    pub sensitive: bool,
    #[serde(default, rename = "spoiler_text")]
    pub spoiler: String,
    #[serde(default)]
    pub visibility: Visibility,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

impl Status {
    /// Form body for `POST /api/v1/statuses`. Empty values are left out so
    /// that they do not override the server's defaults.
    pub fn form_data(&self) -> Fields {
        let mut f = Fields::new();
        f.set("status", self.text.as_str())
            .set("visibility", self.visibility.as_str())
            .add_all("media_ids[]", &self.media_ids)
            .set_opt("in_reply_to_id", self.reply_to_id.as_deref())
            .set_flag("sensitive", self.sensitive)
            .set_str("spoiler_text", &self.spoiler);
        f
    }

    /// Posts the toot and returns its id. Not idempotent: never retry.
    pub fn submit(&self, api: &Api) -> Result<String> {
        if self.visibility == Visibility::Invalid {
            return Err(BotError::InvalidVisibility(String::new()));
        }
        let response = api.send(
            api.http()
                .client()
                .post(api.url("/api/v1/statuses")?)
                .form(self.form_data().pairs()),
        )?;
        let status = response.status();
        let body = response.text()?;
        let parsed: StatusResponse = serde_json::from_str(&body).map_err(|_| {
            BotError::SubmissionFailed {
                status,
                message: body.clone(),
            }
        })?;
        if let Some(message) = parsed.error {
            return Err(BotError::SubmissionFailed { status, message });
        }
        if !status.is_success() || parsed.id.is_empty() {
            return Err(BotError::SubmissionFailed {
                status,
                message: body,
            });
        }
        info!(app = api.app_name(), id = %parsed.id, "tooted");
        Ok(parsed.id)
    }
}

/// Filter for an account's statuses. Zero values are not sent.
#[derive(Debug, Default, Clone)]
pub(crate) struct ListStatuses {
    /// Results older than this id.
    pub max_id: String,
    /// Results newer than this id.
    pub since_id: String,
    /// Results immediately newer than this id.
    pub min_id: String,
    /// Server default is 20, maximum 40.
    pub limit: u32,
    pub only_media: bool,
    pub exclude_replies: bool,
    pub exclude_reblogs: bool,
    pub only_pinned: bool,
    /// Only statuses using this hashtag.
    pub tagged: String,
}

impl ListStatuses {
    pub fn query_params(&self) -> Fields {
        let mut q = Fields::new();
        q.set_str("max_id", &self.max_id)
            .set_str("since_id", &self.since_id)
            .set_str("min_id", &self.min_id)
            .set_count("limit", self.limit)
            .set_flag("only_media", self.only_media)
            .set_flag("exclude_replies", self.exclude_replies)
            .set_flag("exclude_reblogs", self.exclude_reblogs)
            .set_flag("pinned", self.only_pinned)
            .set_str("tagged", &self.tagged);
        q
    }

    /// Matching statuses of `account_id`, newest first.
    pub fn for_account(&self, api: &Api, account_id: &str) -> Result<Vec<Status>> {
        let response = api
            .send(
                api.http()
                    .client()
                    .get(api.url(&format!("/api/v1/accounts/{account_id}/statuses"))?)
                    .query(self.query_params().pairs()),
            )?
            .expect_success(|status, body| BotError::ListingFailed { status, body })?;
        let statuses: Vec<Status> = json(response, "account statuses")?;
        debug!(count = statuses.len(), max_id = %self.max_id, "listed statuses");
        Ok(statuses)
    }
}

pub(crate) fn delete(api: &Api, status_id: &str) -> Result<()> {
    api.send(
        api.http()
            .client()
            .delete(api.url(&format!("/api/v1/statuses/{status_id}"))?),
    )?
    .expect_status(StatusCode::OK, |status, body| BotError::DeletionFailed {
        id: status_id.to_string(),
        status,
        body,
    })?;
    info!(id = status_id, "deleted status");
    Ok(())
}
