use chrono::{DateTime, Utc};
use http_types::Url;
use thiserror::Error;

use crate::problem::AcmeProblem;
use crate::status::Status;

pub type AcmeResult<T> = Result<T, AcmeError>;

#[derive(Error, Debug)]
pub enum AcmeError {
    /// The server answered with a problem document that is not handled
    /// specially elsewhere.
    #[error("{0}")]
    Server(AcmeProblem),

    /// The server reported `rateLimited`. `retry_after` is taken from the
    /// response header, `documents` from `Link rel="help"`.
    #[error("rate limited: {problem}")]
    RateLimited {
        problem: AcmeProblem,
        retry_after: Option<DateTime<Utc>>,
        documents: Vec<Url>,
    },

    /// The server reported `userActionRequired`. `terms_of_service` is taken
    /// from `Link rel="terms-of-service"`.
    #[error("user action required: {problem}")]
    UserActionRequired {
        problem: AcmeProblem,
        terms_of_service: Option<Url>,
        instance: Option<Url>,
    },

    /// Malformed server response: unexpected content type, bad JSON, or a
    /// field that is missing or of the wrong shape.
    #[error("protocol: {0}")]
    Protocol(String),

    /// Transport failure while talking to the server.
    #[error("network: {0}")]
    Network(http_client::Error),

    /// Non-2xx response that did not carry a problem document.
    #[error("http: [{}] {0}", .0.status())]
    Http(http_client::Error),

    /// The directory has no entry for the requested resource, or a required
    /// challenge type is unknown.
    #[error("{0}: not supported by the CA")]
    NotSupported(String),

    /// A getter triggered the initial fetch of a resource and that fetch
    /// failed.
    #[error("could not load {resource} lazily")]
    LazyLoading {
        resource: &'static str,
        #[source]
        source: Box<AcmeError>,
    },

    /// A polling deadline expired while the server still signals a
    /// non-terminal status.
    #[error("gave up polling, current status is {status}")]
    RetryAfter {
        status: Status,
        retry_after: Option<DateTime<Utc>>,
    },

    /// The caller cancelled a poll while it was sleeping.
    #[error("polling cancelled")]
    Cancelled,

    #[error(transparent)]
    Crypto(anyhow::Error),

    #[error("json: {0}")]
    Json(#[from] serde_json::Error),

    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    #[error("missing expected field {0}")]
    MissingExpectedField(&'static str),

    #[error("missing expected header {0}")]
    MissingExpectedHeader(&'static str),

    #[error("{0}")]
    InvalidState(String),
}

impl AcmeError {
    /// The problem document attached to this error, if the server sent one.
    pub fn problem(&self) -> Option<&AcmeProblem> {
        match self {
            AcmeError::Server(problem)
            | AcmeError::RateLimited { problem, .. }
            | AcmeError::UserActionRequired { problem, .. } => Some(problem),
            _ => None,
        }
    }
}
