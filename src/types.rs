use serde::{Deserialize, Serialize, Serializer};

pub const OOB_URI: &str = "urn:ietf:wg:oauth:2.0:oob";

#[derive(Serialize)]
pub struct ApplicationRegistration<'a> {
    pub client_name: &'a str,
    pub redirect_uris: &'a str,
    pub scopes: Scopes,
    pub website: &'a str,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    Read,
    Write,
}

impl Scope {
    fn as_str(self) -> &'static str {
        match self {
            Scope::Read => "read",
            Scope::Write => "write",
        }
    }
}

/// Space separated scope list, as OAuth wants it.
#[derive(Debug, Clone, Copy)]
pub struct Scopes(pub &'static [Scope]);

pub const READ_WRITE: Scopes = Scopes(&[Scope::Read, Scope::Write]);

impl std::fmt::Display for Scopes {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for (i, scope) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(" ")?;
            }
            f.write_str(scope.as_str())?;
        }
        Ok(())
    }
}

impl Serialize for Scopes {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

#[derive(Debug, Deserialize)]
pub struct ApplicationResponse {
    pub id: String,
    pub client_id: String,
    pub client_secret: String,
}

#[derive(Serialize)]
pub struct AuthorizeQuery<'a> {
    pub response_type: &'a str,
    pub client_id: &'a str,
    pub redirect_uri: &'a str,
    pub scope: Scopes,
}

#[derive(Serialize)]
pub struct SignIn<'a> {
    pub username: &'a str,
    pub password: &'a str,
}

#[derive(Serialize)]
pub struct TokenQuery<'a> {
    pub grant_type: GrantType,
    pub redirect_uri: &'a str,
    pub scope: Scopes,
    pub client_id: &'a str,
    pub client_secret: &'a str,
    pub code: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GrantType {
    AuthorizationCode,
}

#[derive(Deserialize)]
pub struct Token {
    pub access_token: String,
    pub token_type: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct Account {
    pub id: String,
}

#[derive(Debug, Deserialize)]
pub struct StatusResponse {
    #[serde(default)]
    pub id: String,
    pub error: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct MediaResponse {
    pub id: String,
}
