//! App registration and the browser-less authorization code grant.
//!
//! Mastodon only hands out user tokens through its web sign in, so the grant
//! is obtained by replaying what a browser does. The redirect status codes
//! (303, 302, 302, then 200) are the protocol: each one is checked on its own
//! and a mismatch fails with the error naming that leg.

use std::sync::Arc;

use reqwest::header::LOCATION;
use reqwest::blocking::Response;
use reqwest::StatusCode;
use tracing::{debug, info};

use crate::client::{json, Deadline, ExpectStatus, Http, Instance};
use crate::error::{BotError, Result};
use crate::store::{Registration, Store};
use crate::types::*;

const CLIENT_WEBSITE: &str = "https://github.com/quells/mastobot";

pub(crate) struct OAuth<'a> {
    store: &'a Store,
    instance: &'a Instance,
    deadline: Deadline,
}

/// Legs of the grant, in the order they must happen.
enum Step {
    Authorize,
    SignIn,
    Grant { location: String },
    Exchange { code: String },
    Persist { token: String },
    Done,
}

impl<'a> OAuth<'a> {
    pub fn new(store: &'a Store, instance: &'a Instance, deadline: Deadline) -> Self {
        Self {
            store,
            instance,
            deadline,
        }
    }

    pub fn register_app(&self, app_name: &str) -> Result<Registration> {
        let instance = self.instance.name();
        if self.store.exists(instance, app_name)? {
            return Err(BotError::AlreadyRegistered {
                instance: instance.to_string(),
                app: app_name.to_string(),
            });
        }

        let http = Http::new(self.deadline)?;
        let response = http
            .send(
                http.client()
                    .post(self.instance.url("/api/v1/apps")?)
                    .form(&ApplicationRegistration {
                        client_name: app_name,
                        redirect_uris: OOB_URI,
                        scopes: READ_WRITE,
                        website: CLIENT_WEBSITE,
                    }),
            )?
            .expect_success(|status, body| BotError::RegistrationFailed { status, body })?;
        let app: ApplicationResponse = json(response, "app registration")?;

        let registration = Registration {
            instance: instance.to_string(),
            app_name: app_name.to_string(),
            app_id: app.id,
            client_id: app.client_id,
            client_secret: app.client_secret,
        };
        self.store.register(&registration)?;
        info!(app = app_name, app_id = %registration.app_id, "registered app");
        Ok(registration)
    }

    /// Signs in as the user and stores a fresh access token for the app.
    pub fn get_access_token(&self, app_name: &str, email: &str, password: &str) -> Result<()> {
        let instance = self.instance.name();
        let (client_id, client_secret) = self
            .store
            .client_secrets(instance, app_name)?
            .ok_or_else(|| BotError::NotRegistered {
                instance: instance.to_string(),
                app: app_name.to_string(),
            })?;

        // All legs share the session cookies set by the authorize page.
        let jar = Arc::new(reqwest::cookie::Jar::default());
        let pinned = Http::pinned(self.deadline, Arc::clone(&jar))?;
        let following = Http::following(self.deadline, jar)?;

        let mut step = Step::Authorize;
        loop {
            step = match step {
                Step::Authorize => {
                    debug!("requesting authorization page");
                    pinned
                        .send(pinned.client().get(self.instance.url("/oauth/authorize")?).query(
                            &AuthorizeQuery {
                                response_type: "code",
                                client_id: &client_id,
                                redirect_uri: OOB_URI,
                                scope: READ_WRITE,
                            },
                        ))?
                        .expect_status(StatusCode::SEE_OTHER, |status, body| {
                            BotError::AuthorizationFailed { status, body }
                        })?;
                    Step::SignIn
                }
                Step::SignIn => {
                    debug!("signing in");
                    let response = pinned
                        .send(
                            pinned
                                .client()
                                .post(self.instance.url("/auth/sign_in")?)
                                .form(&SignIn {
                                    username: email,
                                    password,
                                }),
                        )?
                        .expect_status(StatusCode::FOUND, |status, body| {
                            BotError::SignInFailed { status, body }
                        })?;
                    match location(&response) {
                        Some(location) => Step::Grant { location },
                        None => {
                            return Err(BotError::SignInFailed {
                                status: response.status(),
                                body: "redirect without a Location header".to_string(),
                            })
                        }
                    }
                }
                Step::Grant { location } => {
                    debug!(%location, "granting authorization");
                    let response = pinned
                        .send(
                            pinned
                                .client()
                                .post(self.instance.url(&location)?)
                                .header(
                                    reqwest::header::CONTENT_TYPE,
                                    "application/x-www-form-urlencoded",
                                ),
                        )?
                        .expect_status(StatusCode::FOUND, |status, body| {
                            BotError::CodeExtractionFailed(format!("got {status}: {body}"))
                        })?;
                    Step::Exchange {
                        code: self.extract_code(&response)?,
                    }
                }
                Step::Exchange { code } => {
                    debug!("exchanging code for token");
                    let response = following
                        .send(
                            following
                                .client()
                                .post(self.instance.url("/oauth/token")?)
                                .form(&TokenQuery {
                                    grant_type: GrantType::AuthorizationCode,
                                    redirect_uri: OOB_URI,
                                    scope: READ_WRITE,
                                    client_id: &client_id,
                                    client_secret: &client_secret,
                                    code: &code,
                                }),
                        )?
                        .expect_status(StatusCode::OK, |status, body| {
                            BotError::TokenExchangeFailed { status, body }
                        })?;
                    let token: Token = json(response, "token exchange")?;
                    debug!(token_type = token.token_type.as_deref().unwrap_or("unknown"), "got token");
                    Step::Persist {
                        token: token.access_token,
                    }
                }
                Step::Persist { token } => {
                    self.store.update_access_token(instance, app_name, &token)?;
                    Step::Done
                }
                Step::Done => break,
            };
        }
        info!(app = app_name, "stored new access token");
        Ok(())
    }

    fn extract_code(&self, response: &Response) -> Result<String> {
        let location = location(response)
            .ok_or_else(|| BotError::CodeExtractionFailed("no Location header".to_string()))?;
        let url = self
            .instance
            .url(&location)
            .map_err(|_| BotError::CodeExtractionFailed(format!("malformed Location {location}")))?;
        url.query_pairs()
            .find(|(k, _)| k == "code")
            .map(|(_, v)| v.into_owned())
            .filter(|code| !code.is_empty())
            .ok_or_else(|| BotError::CodeExtractionFailed(format!("no code in {location}")))
    }
}

fn location(response: &Response) -> Option<String> {
    response
        .headers()
        .get(LOCATION)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use serde_json::json;

    use super::*;
    use crate::test_server::{MockServer, Reply};

    fn deadline() -> Deadline {
        Deadline::after(Duration::from_secs(10))
    }

    fn registered(server: &MockServer) -> (Store, Instance) {
        let store = Store::open_in_memory().unwrap();
        let instance = Instance::new(server.instance()).unwrap();
        store
            .register(&Registration {
                instance: instance.name().to_string(),
                app_name: "bot".into(),
                app_id: "1".into(),
                client_id: "cid".into(),
                client_secret: "csecret".into(),
            })
            .unwrap();
        (store, instance)
    }

    fn happy_flow(server: &MockServer) {
        server
            .route(
                "GET",
                "/oauth/authorize",
                vec![Reply::status(303)
                    .header("Location", "/auth/sign_in")
                    .header("Set-Cookie", "_mastodon_session=abc; path=/; HttpOnly")],
            )
            .route(
                "POST",
                "/auth/sign_in",
                vec![Reply::status(302).header("Location", "/oauth/authorize?client_id=cid")],
            )
            .route(
                "POST",
                "/oauth/authorize",
                vec![Reply::status(302).header("Location", "/oauth/authorize/native?code=CODE123")],
            )
            .route(
                "POST",
                "/oauth/token",
                vec![Reply::json(
                    200,
                    &json!({"access_token": "tok", "token_type": "Bearer", "scope": "read write"}),
                )],
            );
    }

    #[test]
    fn register_app_stores_credentials() {
        let server = MockServer::start();
        server.route(
            "POST",
            "/api/v1/apps",
            vec![Reply::json(
                200,
                &json!({"id": "12", "client_id": "cid", "client_secret": "csecret", "name": "bot"}),
            )],
        );
        let store = Store::open_in_memory().unwrap();
        let instance = Instance::new(server.instance()).unwrap();
        let registration = OAuth::new(&store, &instance, deadline())
            .register_app("bot")
            .unwrap();
        assert_eq!(registration.app_id, "12");
        assert_eq!(
            store.client_secrets(instance.name(), "bot").unwrap(),
            Some(("cid".to_string(), "csecret".to_string()))
        );

        let requests = server.requests_to("POST", "/api/v1/apps");
        assert_eq!(requests.len(), 1);
        let form = requests[0].form();
        assert!(form.contains(&("client_name".into(), "bot".into())));
        assert!(form.contains(&("redirect_uris".into(), OOB_URI.into())));
        assert!(form.contains(&("scopes".into(), "read write".into())));
        assert!(form.contains(&("website".into(), CLIENT_WEBSITE.into())));
    }

    #[test]
    fn register_twice_fails_without_network() {
        let server = MockServer::start();
        server.route(
            "POST",
            "/api/v1/apps",
            vec![Reply::json(
                200,
                &json!({"id": "12", "client_id": "cid", "client_secret": "csecret"}),
            )],
        );
        let store = Store::open_in_memory().unwrap();
        let instance = Instance::new(server.instance()).unwrap();
        let oauth = OAuth::new(&store, &instance, deadline());
        oauth.register_app("bot").unwrap();
        let err = oauth.register_app("bot").unwrap_err();
        assert!(matches!(err, BotError::AlreadyRegistered { .. }));
        assert_eq!(server.requests().len(), 1);
    }

    #[test]
    fn register_failure_surfaces_body() {
        let server = MockServer::start();
        server.route(
            "POST",
            "/api/v1/apps",
            vec![Reply::json(422, &json!({"error": "Validation failed"}))],
        );
        let store = Store::open_in_memory().unwrap();
        let instance = Instance::new(server.instance()).unwrap();
        let err = OAuth::new(&store, &instance, deadline())
            .register_app("bot")
            .unwrap_err();
        match err {
            BotError::RegistrationFailed { status, body } => {
                assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
                assert!(body.contains("Validation failed"));
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(!store.exists(instance.name(), "bot").unwrap());
    }

    #[test]
    fn access_token_flow() {
        let server = MockServer::start();
        happy_flow(&server);
        let (store, instance) = registered(&server);
        OAuth::new(&store, &instance, deadline())
            .get_access_token("bot", "me@example.com", "hunter2")
            .unwrap();
        assert_eq!(
            store.access_token(instance.name(), "bot").unwrap().as_deref(),
            Some("tok")
        );

        let requests = server.requests();
        let legs: Vec<_> = requests
            .iter()
            .map(|r| (r.method.as_str(), r.path()))
            .collect();
        assert_eq!(
            legs,
            vec![
                ("GET", "/oauth/authorize"),
                ("POST", "/auth/sign_in"),
                ("POST", "/oauth/authorize"),
                ("POST", "/oauth/token"),
            ]
        );

        let query = requests[0].query();
        assert!(query.contains(&("response_type".into(), "code".into())));
        assert!(query.contains(&("client_id".into(), "cid".into())));
        assert!(query.contains(&("redirect_uri".into(), OOB_URI.into())));
        assert!(query.contains(&("scope".into(), "read write".into())));

        let sign_in = &requests[1];
        assert!(sign_in
            .header("cookie")
            .is_some_and(|c| c.contains("_mastodon_session=abc")));
        let form = sign_in.form();
        assert!(form.contains(&("username".into(), "me@example.com".into())));
        assert!(form.contains(&("password".into(), "hunter2".into())));

        assert_eq!(requests[2].target, "/oauth/authorize?client_id=cid");
        assert!(requests[2].body.is_empty());
        assert!(requests[2]
            .header("cookie")
            .is_some_and(|c| c.contains("_mastodon_session=abc")));

        let form = requests[3].form();
        assert!(form.contains(&("grant_type".into(), "authorization_code".into())));
        assert!(form.contains(&("code".into(), "CODE123".into())));
        assert!(form.contains(&("client_id".into(), "cid".into())));
        assert!(form.contains(&("client_secret".into(), "csecret".into())));
        assert!(form.contains(&("redirect_uri".into(), OOB_URI.into())));
        assert!(form.contains(&("scope".into(), "read write".into())));
    }

    #[test]
    fn rerunning_the_flow_overwrites_the_token() {
        let server = MockServer::start();
        happy_flow(&server);
        let (store, instance) = registered(&server);
        store.update_access_token(instance.name(), "bot", "stale").unwrap();
        OAuth::new(&store, &instance, deadline())
            .get_access_token("bot", "me@example.com", "hunter2")
            .unwrap();
        assert_eq!(
            store.access_token(instance.name(), "bot").unwrap().as_deref(),
            Some("tok")
        );
    }

    #[test]
    fn unregistered_app_needs_registration() {
        let server = MockServer::start();
        let store = Store::open_in_memory().unwrap();
        let instance = Instance::new(server.instance()).unwrap();
        let err = OAuth::new(&store, &instance, deadline())
            .get_access_token("bot", "me@example.com", "hunter2")
            .unwrap_err();
        assert!(matches!(err, BotError::NotRegistered { .. }));
        assert!(server.requests().is_empty());
    }

    #[test]
    fn authorize_without_redirect_stops_before_sign_in() {
        let server = MockServer::start();
        server.route(
            "GET",
            "/oauth/authorize",
            vec![Reply::status(200).body("<html>login</html>")],
        );
        let (store, instance) = registered(&server);
        let err = OAuth::new(&store, &instance, deadline())
            .get_access_token("bot", "me@example.com", "hunter2")
            .unwrap_err();
        match err {
            BotError::AuthorizationFailed { status, body } => {
                assert_eq!(status, StatusCode::OK);
                assert!(body.contains("login"));
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(server.requests().len(), 1);
        assert!(server.requests_to("POST", "/auth/sign_in").is_empty());
    }

    #[test]
    fn wrong_password_fails_sign_in() {
        let server = MockServer::start();
        server
            .route("GET", "/oauth/authorize", vec![Reply::status(303)])
            .route(
                "POST",
                "/auth/sign_in",
                vec![Reply::status(200).body("Invalid Email or password.")],
            );
        let (store, instance) = registered(&server);
        let err = OAuth::new(&store, &instance, deadline())
            .get_access_token("bot", "me@example.com", "wrong")
            .unwrap_err();
        assert!(matches!(err, BotError::SignInFailed { status, .. } if status == StatusCode::OK));
        assert_eq!(store.access_token(instance.name(), "bot").unwrap(), None);
    }

    #[test]
    fn missing_code_fails_extraction() {
        let server = MockServer::start();
        server
            .route("GET", "/oauth/authorize", vec![Reply::status(303)])
            .route(
                "POST",
                "/auth/sign_in",
                vec![Reply::status(302).header("Location", "/oauth/authorize")],
            )
            .route(
                "POST",
                "/oauth/authorize",
                vec![Reply::status(302).header("Location", "/oauth/authorize/native?error=denied")],
            );
        let (store, instance) = registered(&server);
        let err = OAuth::new(&store, &instance, deadline())
            .get_access_token("bot", "me@example.com", "hunter2")
            .unwrap_err();
        assert!(matches!(err, BotError::CodeExtractionFailed(_)));
        assert!(server.requests_to("POST", "/oauth/token").is_empty());
    }

    #[test]
    fn rejected_code_fails_exchange() {
        let server = MockServer::start();
        server
            .route("GET", "/oauth/authorize", vec![Reply::status(303)])
            .route(
                "POST",
                "/auth/sign_in",
                vec![Reply::status(302).header("Location", "/oauth/authorize")],
            )
            .route(
                "POST",
                "/oauth/authorize",
                vec![Reply::status(302).header("Location", "/oauth/authorize/native?code=C")],
            )
            .route(
                "POST",
                "/oauth/token",
                vec![Reply::json(400, &json!({"error": "invalid_grant"}))],
            );
        let (store, instance) = registered(&server);
        let err = OAuth::new(&store, &instance, deadline())
            .get_access_token("bot", "me@example.com", "hunter2")
            .unwrap_err();
        match err {
            BotError::TokenExchangeFailed { status, body } => {
                assert_eq!(status, StatusCode::BAD_REQUEST);
                assert!(body.contains("invalid_grant"));
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(store.access_token(instance.name(), "bot").unwrap(), None);
    }
}
