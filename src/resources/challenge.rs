use std::fmt;
use std::ops::Deref;
use std::time::Duration;

use chrono::{DateTime, Utc};
use http_types::Url;

use crate::connection::Connection;
use crate::crypto::digests;
use crate::error::{AcmeError, AcmeResult};
use crate::identifier::to_ace;
use crate::json::{Json, JsonBuilder};
use crate::login::Login;
use crate::poll::{wait_for_status, PollTimer};
use crate::problem::AcmeProblem;
use crate::resource::ResourceState;
use crate::status::Status;

pub static HTTP_01: &str = "http-01";
pub static DNS_01: &str = "dns-01";
pub static DNS_ACCOUNT_01: &str = "dns-account-01";
pub static DNS_PERSIST_01: &str = "dns-persist-01";
pub static TLS_ALPN_01: &str = "tls-alpn-01";
pub static EMAIL_REPLY_00: &str = "email-reply-00";

/// A challenge of any type. Typed accessors live on the concrete variants;
/// this handle carries what all types share.
#[derive(Debug)]
pub struct Challenge {
    state: ResourceState,
}

impl Challenge {
    /// Builds a challenge from its JSON as embedded in an authorization.
    /// The challenge's own URL is taken from the `url` field.
    pub fn of(login: Login, json: Json) -> AcmeResult<Challenge> {
        let location = json.get("url").as_url()?;
        Ok(Challenge {
            state: ResourceState::of(login, location, "challenge", json),
        })
    }

    pub fn login(&self) -> &Login {
        self.state.login()
    }

    pub fn url(&self) -> &Url {
        self.state.location()
    }

    pub async fn challenge_type(&self) -> AcmeResult<String> {
        self.state.ensure_loaded().await?.get("type").as_string()
    }

    pub async fn status(&self) -> AcmeResult<Status> {
        self.state.status().await
    }

    /// The challenge token. Standard types all carry one.
    pub async fn token(&self) -> AcmeResult<String> {
        self.state.ensure_loaded().await?.get("token").as_string()
    }

    pub async fn validated(&self) -> AcmeResult<Option<DateTime<Utc>>> {
        self.state
            .ensure_loaded()
            .await?
            .get("validated")
            .optional()
            .map(|v| v.as_instant())
            .transpose()
    }

    pub async fn error(&self) -> AcmeResult<Option<AcmeProblem>> {
        self.state
            .ensure_loaded()
            .await?
            .get("error")
            .optional()
            .map(|v| v.as_problem(self.url()))
            .transpose()
    }

    pub async fn json(&self) -> AcmeResult<Json> {
        self.state.ensure_loaded().await
    }

    /// Tells the server the challenge is ready for validation. Most types
    /// respond with an empty object.
    pub async fn trigger(&self) -> AcmeResult<()> {
        self.trigger_with(JsonBuilder::new().build()).await
    }

    pub(crate) async fn trigger_with(&self, payload: Json) -> AcmeResult<()> {
        let mut conn = Connection::new(self.login().session());
        conn.signed_request(self.state.location(), Some(&payload), self.login())
            .await?;
        let json = conn.read_json().await?;
        let retry_after = conn.retry_after();
        self.state.set_json(json);
        self.state.store_retry_after(retry_after);
        Ok(())
    }

    pub async fn fetch(&self) -> AcmeResult<Option<DateTime<Utc>>> {
        self.state.fetch().await
    }

    pub fn invalidate(&self) {
        self.state.invalidate()
    }

    pub async fn wait_for_completion(
        &self,
        timeout: Duration,
        timer: &dyn PollTimer,
    ) -> AcmeResult<Status> {
        wait_for_status(
            &self.state,
            &[Status::Valid, Status::Invalid],
            timeout,
            timer,
        )
        .await
    }
}

impl PartialEq for Challenge {
    fn eq(&self, other: &Self) -> bool {
        self.state == other.state
    }
}

impl Eq for Challenge {}

/// Constructor registered for a challenge type string.
pub type ChallengeFactory = fn(Challenge) -> ChallengeVariant;

/// A challenge dispatched to its concrete type. Types without a registered
/// constructor come back as [`ChallengeVariant::Other`].
#[derive(Debug)]
pub enum ChallengeVariant {
    Http01(Http01Challenge),
    Dns01(Dns01Challenge),
    DnsAccount01(DnsAccount01Challenge),
    DnsPersist01(DnsPersist01Challenge),
    TlsAlpn01(TlsAlpn01Challenge),
    EmailReply00(EmailReply00Challenge),
    Other(Challenge),
}

impl ChallengeVariant {
    pub fn challenge(&self) -> &Challenge {
        match self {
            ChallengeVariant::Http01(c) => &c.challenge,
            ChallengeVariant::Dns01(c) => &c.challenge,
            ChallengeVariant::DnsAccount01(c) => &c.challenge,
            ChallengeVariant::DnsPersist01(c) => &c.challenge,
            ChallengeVariant::TlsAlpn01(c) => &c.challenge,
            ChallengeVariant::EmailReply00(c) => &c.challenge,
            ChallengeVariant::Other(c) => c,
        }
    }

    /// Triggers the challenge with its type-specific response payload.
    pub async fn trigger(&self) -> AcmeResult<()> {
        match self {
            ChallengeVariant::EmailReply00(c) => c.trigger().await,
            other => other.challenge().trigger().await,
        }
    }
}

/// Implemented by the concrete challenge types so authorizations can look
/// them up by type.
pub trait TypedChallenge: Sized {
    const TYPE_NAME: &'static str;

    fn assemble(challenge: Challenge) -> Self;
}

pub(crate) fn standard_challenges() -> Vec<(&'static str, ChallengeFactory)> {
    fn http01(c: Challenge) -> ChallengeVariant {
        ChallengeVariant::Http01(Http01Challenge::assemble(c))
    }
    fn dns01(c: Challenge) -> ChallengeVariant {
        ChallengeVariant::Dns01(Dns01Challenge::assemble(c))
    }
    fn dns_account01(c: Challenge) -> ChallengeVariant {
        ChallengeVariant::DnsAccount01(DnsAccount01Challenge::assemble(c))
    }
    fn dns_persist01(c: Challenge) -> ChallengeVariant {
        ChallengeVariant::DnsPersist01(DnsPersist01Challenge::assemble(c))
    }
    fn tls_alpn01(c: Challenge) -> ChallengeVariant {
        ChallengeVariant::TlsAlpn01(TlsAlpn01Challenge::assemble(c))
    }
    fn email_reply00(c: Challenge) -> ChallengeVariant {
        ChallengeVariant::EmailReply00(EmailReply00Challenge::assemble(c))
    }
    vec![
        (HTTP_01, http01 as ChallengeFactory),
        (DNS_01, dns01),
        (DNS_ACCOUNT_01, dns_account01),
        (DNS_PERSIST_01, dns_persist01),
        (TLS_ALPN_01, tls_alpn01),
        (EMAIL_REPLY_00, email_reply00),
    ]
}

/// http-01: serve the key authorization under
/// `http://<domain>/.well-known/acme-challenge/<token>` as `text/plain`.
#[derive(Debug)]
pub struct Http01Challenge {
    challenge: Challenge,
}

impl TypedChallenge for Http01Challenge {
    const TYPE_NAME: &'static str = "http-01";

    fn assemble(challenge: Challenge) -> Self {
        Http01Challenge { challenge }
    }
}

impl Deref for Http01Challenge {
    type Target = Challenge;

    fn deref(&self) -> &Challenge {
        &self.challenge
    }
}

impl Http01Challenge {
    pub async fn key_authorization(&self) -> AcmeResult<String> {
        digests::key_authorization(&self.token().await?, self.login().key())
    }

    /// Request path the key authorization must be served under.
    pub async fn well_known_path(&self) -> AcmeResult<String> {
        Ok(format!("/.well-known/acme-challenge/{}", self.token().await?))
    }
}

/// dns-01: publish the digest as TXT record `_acme-challenge.<domain>.`.
#[derive(Debug)]
pub struct Dns01Challenge {
    challenge: Challenge,
}

impl TypedChallenge for Dns01Challenge {
    const TYPE_NAME: &'static str = "dns-01";

    fn assemble(challenge: Challenge) -> Self {
        Dns01Challenge { challenge }
    }
}

impl Deref for Dns01Challenge {
    type Target = Challenge;

    fn deref(&self) -> &Challenge {
        &self.challenge
    }
}

impl Dns01Challenge {
    pub fn rr_name(domain: &str) -> AcmeResult<String> {
        Ok(format!("_acme-challenge.{}.", to_ace(domain)?))
    }

    /// TXT record value: `base64url(SHA-256(key-authorization))`.
    pub async fn digest(&self) -> AcmeResult<String> {
        let ka = digests::key_authorization(&self.token().await?, self.login().key())?;
        Ok(digests::dns_txt_digest(&ka))
    }
}

/// dns-account-01: like dns-01, but the record name carries a label derived
/// from the account URL so multiple accounts can hold records concurrently.
#[derive(Debug)]
pub struct DnsAccount01Challenge {
    challenge: Challenge,
}

impl TypedChallenge for DnsAccount01Challenge {
    const TYPE_NAME: &'static str = "dns-account-01";

    fn assemble(challenge: Challenge) -> Self {
        DnsAccount01Challenge { challenge }
    }
}

impl Deref for DnsAccount01Challenge {
    type Target = Challenge;

    fn deref(&self) -> &Challenge {
        &self.challenge
    }
}

impl DnsAccount01Challenge {
    pub fn rr_name(&self, domain: &str) -> AcmeResult<String> {
        let label = digests::account_label(self.login().location().as_str());
        Ok(format!("_{}._acme-challenge.{}.", label, to_ace(domain)?))
    }

    pub async fn digest(&self) -> AcmeResult<String> {
        let ka = digests::key_authorization(&self.token().await?, self.login().key())?;
        Ok(digests::dns_txt_digest(&ka))
    }
}

const MAX_ISSUER_DOMAIN_NAMES: usize = 10;
const MAX_ISSUER_DOMAIN_NAME_LEN: usize = 253;

/// dns-persist-01: publish a long-lived authorization record
/// `_validation-persist.<domain>.` naming the issuer and the account.
#[derive(Debug)]
pub struct DnsPersist01Challenge {
    challenge: Challenge,
}

impl TypedChallenge for DnsPersist01Challenge {
    const TYPE_NAME: &'static str = "dns-persist-01";

    fn assemble(challenge: Challenge) -> Self {
        DnsPersist01Challenge { challenge }
    }
}

impl Deref for DnsPersist01Challenge {
    type Target = Challenge;

    fn deref(&self) -> &Challenge {
        &self.challenge
    }
}

impl DnsPersist01Challenge {
    pub fn rr_name(domain: &str) -> AcmeResult<String> {
        Ok(format!("_validation-persist.{}.", to_ace(domain)?))
    }

    /// The issuer domain names offered by the server, validated against the
    /// draft's constraints.
    pub async fn issuer_domain_names(&self) -> AcmeResult<Vec<String>> {
        let json = self.state.ensure_loaded().await?;
        let names = json
            .get("issuer-domain-names")
            .as_array()?
            .iter()
            .map(|item| item.as_string())
            .collect::<AcmeResult<Vec<_>>>()?;
        if names.is_empty() || names.len() > MAX_ISSUER_DOMAIN_NAMES {
            return Err(AcmeError::Protocol(format!(
                "issuer-domain-names: expected 1 to {} entries, found {}",
                MAX_ISSUER_DOMAIN_NAMES,
                names.len()
            )));
        }
        if let Some(name) = names.iter().find(|n| n.len() > MAX_ISSUER_DOMAIN_NAME_LEN) {
            return Err(AcmeError::Protocol(format!(
                "issuer-domain-names: {name} exceeds {MAX_ISSUER_DOMAIN_NAME_LEN} characters"
            )));
        }
        Ok(names)
    }

    /// Starts a record builder. The first offered issuer domain name is
    /// preselected and output is quoted unless [`PersistRecord::no_quotes`]
    /// is called.
    pub async fn record(&self) -> AcmeResult<PersistRecord> {
        let issuers = self.issuer_domain_names().await?;
        Ok(PersistRecord {
            issuer: issuers[0].clone(),
            issuers,
            account: self.login().location().as_str().to_string(),
            wildcard: false,
            persist_until: None,
            quoted: true,
        })
    }
}

/// RDATA builder for the dns-persist-01 TXT record.
#[derive(Debug, Clone)]
pub struct PersistRecord {
    issuers: Vec<String>,
    issuer: String,
    account: String,
    wildcard: bool,
    persist_until: Option<i64>,
    quoted: bool,
}

impl PersistRecord {
    /// Extends the persisted authorization to wildcard issuance.
    pub fn wildcard(mut self) -> Self {
        self.wildcard = true;
        self
    }

    /// Selects the issuer domain name; it must be one the server offered.
    pub fn issuer_domain_name(mut self, name: impl Into<String>) -> AcmeResult<Self> {
        let name = name.into();
        if !self.issuers.contains(&name) {
            return Err(AcmeError::InvalidState(format!(
                "{name} is not an offered issuer domain name"
            )));
        }
        self.issuer = name;
        Ok(self)
    }

    /// Limits the persisted authorization, in whole seconds since the epoch.
    pub fn persist_until(mut self, until: DateTime<Utc>) -> Self {
        self.persist_until = Some(until.timestamp());
        self
    }

    /// Emits the record as one unquoted string instead of quoted chunks.
    pub fn no_quotes(mut self) -> Self {
        self.quoted = false;
        self
    }

    pub fn rdata(&self) -> String {
        let mut parts = vec![
            self.issuer.clone(),
            format!("accounturi={}", self.account),
        ];
        if self.wildcard {
            parts.push("policy=wildcard".to_string());
        }
        if let Some(ts) = self.persist_until {
            parts.push(format!("persistUntil={ts}"));
        }
        if self.quoted {
            format!("\"{}\"", parts.join(";\" \" "))
        } else {
            parts.join("; ")
        }
    }
}

impl fmt::Display for PersistRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.rdata())
    }
}

/// tls-alpn-01: serve a self-signed certificate carrying the
/// `acmeValidation` extension, negotiated under the `acme-tls/1` ALPN
/// protocol.
#[derive(Debug)]
pub struct TlsAlpn01Challenge {
    challenge: Challenge,
}

impl TypedChallenge for TlsAlpn01Challenge {
    const TYPE_NAME: &'static str = "tls-alpn-01";

    fn assemble(challenge: Challenge) -> Self {
        TlsAlpn01Challenge { challenge }
    }
}

impl Deref for TlsAlpn01Challenge {
    type Target = Challenge;

    fn deref(&self) -> &Challenge {
        &self.challenge
    }
}

impl TlsAlpn01Challenge {
    pub async fn key_authorization(&self) -> AcmeResult<String> {
        digests::key_authorization(&self.token().await?, self.login().key())
    }

    /// DER value of the `acmeValidation` extension for the validation
    /// certificate. The extension must be critical, under
    /// [`crate::crypto::digests::ACME_VALIDATION_OID`].
    pub async fn acme_validation(&self) -> AcmeResult<Vec<u8>> {
        Ok(digests::tls_alpn_validation(&self.key_authorization().await?))
    }
}

/// email-reply-00: respond to the CA's challenge mail with the key
/// authorization over S/MIME. Building the mail is outside this crate; the
/// trigger payload carries the key authorization.
#[derive(Debug)]
pub struct EmailReply00Challenge {
    challenge: Challenge,
}

impl TypedChallenge for EmailReply00Challenge {
    const TYPE_NAME: &'static str = "email-reply-00";

    fn assemble(challenge: Challenge) -> Self {
        EmailReply00Challenge { challenge }
    }
}

impl Deref for EmailReply00Challenge {
    type Target = Challenge;

    fn deref(&self) -> &Challenge {
        &self.challenge
    }
}

impl EmailReply00Challenge {
    pub async fn key_authorization(&self) -> AcmeResult<String> {
        digests::key_authorization(&self.challenge.token().await?, self.login().key())
    }

    pub async fn trigger(&self) -> AcmeResult<()> {
        let payload = JsonBuilder::new()
            .put("keyAuthorization", self.key_authorization().await?)
            .build();
        self.challenge.trigger_with(payload).await
    }
}
