//! ACME (RFC 8555) client protocol engine.
//!
//! The crate runs the ACME over HTTPS conversation — JOSE-signed requests,
//! nonce handling, resource state machines, challenge dispatch — on top of
//! an HTTPS transport the caller injects as an [`http_client::HttpClient`].
//! Keys, certificates and polling timers stay under the caller's control.

pub mod connection;
pub mod crypto;
pub mod error;
pub mod identifier;
pub mod json;
pub mod login;
pub mod poll;
pub mod problem;
pub mod resources;
pub mod session;
pub mod status;

#[cfg(feature = "x509")]
pub mod x509;

pub(crate) mod base64url;
pub(crate) mod resource;

#[cfg(test)]
pub(crate) mod testing;

use std::sync::Arc;

pub use connection::Connection;
pub use error::{AcmeError, AcmeResult};
pub use identifier::Identifier;
pub use json::{Json, JsonBuilder};
pub use login::Login;
pub use poll::PollTimer;
pub use problem::{AcmeProblem, AcmeProblemType};
pub use resources::account::{Account, AccountBuilder, Contact};
pub use resources::authorization::Authorization;
pub use resources::certificate::Certificate;
pub use resources::challenge::{
    Challenge, ChallengeVariant, Dns01Challenge, DnsAccount01Challenge, DnsPersist01Challenge,
    EmailReply00Challenge, Http01Challenge, PersistRecord, TlsAlpn01Challenge, TypedChallenge,
};
pub use resources::order::{Order, OrderBuilder};
pub use session::{Directory, DirectoryMeta, NetworkSettings, Session};
pub use status::{RevocationReason, Status};

pub static LETS_ENCRYPT_DIRECTORY_URL: &str = "https://acme-v02.api.letsencrypt.org/directory";
pub fn lets_encrypt_session(http: impl Into<Arc<dyn http_client::HttpClient>>) -> Session {
    Session::new(
        http,
        http_types::Url::parse(LETS_ENCRYPT_DIRECTORY_URL).expect("static url"),
    )
}

pub static LETS_ENCRYPT_STAGING_DIRECTORY_URL: &str =
    "https://acme-staging-v02.api.letsencrypt.org/directory";
pub fn lets_encrypt_staging_session(
    http: impl Into<Arc<dyn http_client::HttpClient>>,
) -> Session {
    Session::new(
        http,
        http_types::Url::parse(LETS_ENCRYPT_STAGING_DIRECTORY_URL).expect("static url"),
    )
}
