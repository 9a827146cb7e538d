use std::sync::Arc;
use std::time::{Duration, Instant};

use reqwest::blocking::{Client, ClientBuilder, RequestBuilder, Response};
use reqwest::{StatusCode, Url};
use tracing::debug;

use crate::error::{BotError, Result};

const USER_AGENT: &str = concat!("mastobot v", env!("CARGO_PKG_VERSION"));

/// A Mastodon (or compatible) instance. `name` is the key used in the
/// credential store, `base` is where requests go.
#[derive(Debug, Clone)]
pub(crate) struct Instance {
    name: String,
    base: Url,
}

impl Instance {
    /// Bare host names are reached over https; a full `scheme://host[:port]`
    /// is used as given.
    pub fn new(name: &str) -> Result<Self> {
        let name = name.trim().trim_end_matches('/');
        let base = if name.contains("://") {
            Url::parse(&format!("{name}/"))?
        } else {
            Url::parse(&format!("https://{name}/"))?
        };
        Ok(Self {
            name: name.to_string(),
            base,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Resolves an absolute path or a full url against the instance.
    pub fn url(&self, path: &str) -> Result<Url> {
        Ok(self.base.join(path)?)
    }
}

/// Wall clock budget shared by every request of one invocation.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Deadline {
    at: Instant,
}

impl Deadline {
    pub fn after(timeout: Duration) -> Self {
        Self {
            at: Instant::now() + timeout,
        }
    }

    pub fn remaining(&self) -> Result<Duration> {
        match self.at.checked_duration_since(Instant::now()) {
            Some(left) if !left.is_zero() => Ok(left),
            _ => Err(BotError::Timeout),
        }
    }
}

fn builder(deadline: Deadline) -> Result<ClientBuilder> {
    Ok(Client::builder()
        .timeout(deadline.remaining()?)
        .user_agent(USER_AGENT))
}

/// Blocking client whose requests are all bounded by one deadline.
pub(crate) struct Http {
    client: Client,
    deadline: Deadline,
}

impl Http {
    pub fn new(deadline: Deadline) -> Result<Self> {
        Ok(Self {
            client: builder(deadline)?.build()?,
            deadline,
        })
    }

    /// A client that never follows redirects, storing cookies in `jar`.
    pub fn pinned(deadline: Deadline, jar: Arc<reqwest::cookie::Jar>) -> Result<Self> {
        Ok(Self {
            client: builder(deadline)?
                .redirect(reqwest::redirect::Policy::none())
                .cookie_provider(jar)
                .build()?,
            deadline,
        })
    }

    /// A client that follows redirects, storing cookies in `jar`.
    pub fn following(deadline: Deadline, jar: Arc<reqwest::cookie::Jar>) -> Result<Self> {
        Ok(Self {
            client: builder(deadline)?.cookie_provider(jar).build()?,
            deadline,
        })
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    /// Sends with whatever time is left before the deadline.
    pub fn send(&self, request: RequestBuilder) -> Result<Response> {
        let response = request.timeout(self.deadline.remaining()?).send()?;
        debug!(url = %response.url(), status = %response.status(), "response");
        Ok(response)
    }
}

/// Reads the body for diagnostics; an unreadable body is reported inline.
pub(crate) fn body_text(response: Response) -> String {
    response
        .text()
        .unwrap_or_else(|e| format!("<cannot read body: {e}>"))
}

/// Status code checkpoints. On mismatch, `fail` gets the status and body.
pub(crate) trait ExpectStatus: Sized {
    fn expect_status<F>(self, expected: StatusCode, fail: F) -> Result<Self>
    where
        F: FnOnce(StatusCode, String) -> BotError;

    fn expect_success<F>(self, fail: F) -> Result<Self>
    where
        F: FnOnce(StatusCode, String) -> BotError;
}

impl ExpectStatus for Response {
    fn expect_status<F>(self, expected: StatusCode, fail: F) -> Result<Self>
    where
        F: FnOnce(StatusCode, String) -> BotError,
    {
        let status = self.status();
        if status != expected {
            return Err(fail(status, body_text(self)));
        }
        Ok(self)
    }

    fn expect_success<F>(self, fail: F) -> Result<Self>
    where
        F: FnOnce(StatusCode, String) -> BotError,
    {
        let status = self.status();
        if !status.is_success() {
            return Err(fail(status, body_text(self)));
        }
        Ok(self)
    }
}

/// Parses a JSON body, keeping the raw text around when it does not match.
pub(crate) fn json<T: serde::de::DeserializeOwned>(
    response: Response,
    what: &'static str,
) -> Result<T> {
    let status = response.status();
    let body = response.text()?;
    serde_json::from_str(&body).map_err(|_| BotError::InvalidResponse { what, status, body })
}

/// Form or query fields where zero values are left out entirely, so that the
/// server applies its own defaults.
#[derive(Debug, Default, Clone, PartialEq)]
pub(crate) struct Fields(Vec<(&'static str, String)>);

impl Fields {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, key: &'static str, value: impl Into<String>) -> &mut Self {
        self.0.push((key, value.into()));
        self
    }

    pub fn set_str(&mut self, key: &'static str, value: &str) -> &mut Self {
        if !value.is_empty() {
            self.set(key, value);
        }
        self
    }

    pub fn set_opt(&mut self, key: &'static str, value: Option<&str>) -> &mut Self {
        self.set_str(key, value.unwrap_or_default())
    }

    pub fn set_flag(&mut self, key: &'static str, value: bool) -> &mut Self {
        if value {
            self.set(key, "true");
        }
        self
    }

    pub fn set_count(&mut self, key: &'static str, value: u32) -> &mut Self {
        if value != 0 {
            self.set(key, value.to_string());
        }
        self
    }

    /// Repeats `key` once per value.
    pub fn add_all<'a, I>(&mut self, key: &'static str, values: I) -> &mut Self
    where
        I: IntoIterator<Item = &'a String>,
    {
        for value in values {
            self.set(key, value.as_str());
        }
        self
    }

    #[cfg(test)]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(k, _)| *k == key)
            .map(|(_, v)| v.as_str())
    }

    #[cfg(test)]
    pub fn get_all(&self, key: &str) -> Vec<&str> {
        self.0
            .iter()
            .filter(|(k, _)| *k == key)
            .map(|(_, v)| v.as_str())
            .collect()
    }

    #[cfg(test)]
    pub fn contains(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    pub fn pairs(&self) -> &[(&'static str, String)] {
        &self.0
    }
}

pub(crate) fn bearer(token: &str) -> String {
    format!("Bearer {token}")
}
