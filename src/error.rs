use reqwest::StatusCode;
use thiserror::Error;

pub(crate) type Result<T, E = BotError> = std::result::Result<T, E>;

/// Failures of the core flows. None of them are retried: each one ends the
/// current command.
#[derive(Error, Debug)]
pub(crate) enum BotError {
    #[error("app {app} is already registered on {instance}")]
    AlreadyRegistered { instance: String, app: String },

    #[error("app {app} is not registered on {instance}, run `app register` first")]
    NotRegistered { instance: String, app: String },

    #[error("app registration failed with {status}: {body}")]
    RegistrationFailed { status: StatusCode, body: String },

    #[error("authorize endpoint answered {status} instead of 303: {body}")]
    AuthorizationFailed { status: StatusCode, body: String },

    #[error("sign in answered {status} instead of a 302 redirect: {body}")]
    SignInFailed { status: StatusCode, body: String },

    #[error("no authorization code in grant redirect: {0}")]
    CodeExtractionFailed(String),

    #[error("token exchange failed with {status}: {body}")]
    TokenExchangeFailed { status: StatusCode, body: String },

    #[error("not authenticated: {0}")]
    Unauthenticated(String),

    #[error("toot rejected with {status}: {message}")]
    SubmissionFailed { status: StatusCode, message: String },

    #[error("media upload failed with {status}: {body}")]
    UploadFailed { status: StatusCode, body: String },

    #[error("listing statuses failed with {status}: {body}")]
    ListingFailed { status: StatusCode, body: String },

    #[error("deleting status {id} failed with {status}: {body}")]
    DeletionFailed {
        id: String,
        status: StatusCode,
        body: String,
    },

    #[error("invalid visibility {0:?}, expected one of private, unlisted, public, direct")]
    InvalidVisibility(String),

    #[error("{what}: got {status} with unexpected body {body:?}")]
    InvalidResponse {
        what: &'static str,
        status: StatusCode,
        body: String,
    },

    #[error("deadline exceeded")]
    Timeout,

    #[error(transparent)]
    Http(reqwest::Error),

    #[error("invalid url: {0}")]
    Url(#[from] url::ParseError),

    #[error("credential store: {0}")]
    Store(#[from] rusqlite::Error),
}

impl From<reqwest::Error> for BotError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            BotError::Timeout
        } else {
            BotError::Http(e)
        }
    }
}
