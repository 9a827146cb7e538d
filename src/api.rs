use reqwest::blocking::{RequestBuilder, Response};
use reqwest::header::{ACCEPT, AUTHORIZATION};
use reqwest::{StatusCode, Url};

use crate::client::{bearer, body_text, json, ExpectStatus, Http, Instance};
use crate::error::{BotError, Result};
use crate::store::Store;
use crate::types::Account;

/// Authenticated access to one instance as one registered app.
pub(crate) struct Api<'a> {
    store: &'a Store,
    http: &'a Http,
    instance: &'a Instance,
    app_name: &'a str,
}

impl<'a> Api<'a> {
    pub fn new(store: &'a Store, http: &'a Http, instance: &'a Instance, app_name: &'a str) -> Self {
        Self {
            store,
            http,
            instance,
            app_name,
        }
    }

    pub fn app_name(&self) -> &str {
        self.app_name
    }

    pub fn url(&self, path: &str) -> Result<Url> {
        self.instance.url(path)
    }

    pub fn http(&self) -> &Http {
        self.http
    }

    fn access_token(&self) -> Result<String> {
        self.store
            .access_token(self.instance.name(), self.app_name)?
            .filter(|token| !token.is_empty())
            .ok_or_else(|| {
                BotError::Unauthenticated(format!(
                    "no access token for {} on {}, run `app token renew` first",
                    self.app_name,
                    self.instance.name()
                ))
            })
    }

    /// Sends `request` with the app's bearer token. The token is looked up
    /// before anything goes on the wire.
    pub fn send(&self, request: RequestBuilder) -> Result<Response> {
        let token = self.access_token()?;
        let response = self.http.send(
            request
                .header(AUTHORIZATION, bearer(&token))
                .header(ACCEPT, "application/json"),
        )?;
        if response.status() == StatusCode::UNAUTHORIZED {
            return Err(BotError::Unauthenticated(format!(
                "{} rejected the token: {}",
                self.instance.name(),
                body_text(response)
            )));
        }
        Ok(response)
    }

    /// Id of the account the token belongs to.
    pub fn verify_credentials(&self) -> Result<String> {
        let response = self
            .send(
                self.http
                    .client()
                    .get(self.url("/api/v1/accounts/verify_credentials")?),
            )?
            .expect_success(|status, body| BotError::InvalidResponse {
                what: "verify credentials",
                status,
                body,
            })?;
        let account: Account = json(response, "verify credentials")?;
        Ok(account.id)
    }
}
