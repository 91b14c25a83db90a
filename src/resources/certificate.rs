use std::fmt;
use std::io::Write;
use std::sync::Mutex;

use http_types::Url;

use crate::connection::Connection;
use crate::crypto::account_key::AccountKey;
use crate::error::{AcmeError, AcmeResult};
use crate::json::JsonBuilder;
use crate::login::Login;
use crate::session::{self, Session};
use crate::status::RevocationReason;

static BEGIN_CERTIFICATE: &str = "-----BEGIN CERTIFICATE-----";
static END_CERTIFICATE: &str = "-----END CERTIFICATE-----";

/// The issued certificate of a valid order: the leaf-first PEM chain plus
/// any alternate chains the CA links to.
pub struct Certificate {
    login: Login,
    location: Url,
    chain: Mutex<Option<Vec<String>>>,
    alternates: Mutex<Option<Vec<Url>>>,
}

impl Certificate {
    pub fn bind(login: Login, location: Url) -> Certificate {
        Certificate {
            login,
            location,
            chain: Mutex::new(None),
            alternates: Mutex::new(None),
        }
    }

    pub fn login(&self) -> &Login {
        &self.login
    }

    pub fn location(&self) -> &Url {
        &self.location
    }

    /// Downloads the PEM chain, replacing any cached copy.
    pub async fn download(&self) -> AcmeResult<()> {
        let mut conn = Connection::new(self.login.session());
        conn.post_as_get(&self.location, &self.login).await?;
        let chain = conn.read_certificates().await?;
        let alternates = conn.links("alternate");
        *self.chain.lock().unwrap() = Some(chain);
        *self.alternates.lock().unwrap() = Some(alternates);
        Ok(())
    }

    async fn ensure_downloaded(&self) -> AcmeResult<()> {
        if self.chain.lock().unwrap().is_some() {
            return Ok(());
        }
        self.download().await.map_err(|err| AcmeError::LazyLoading {
            resource: "certificate",
            source: Box::new(err),
        })
    }

    /// The full chain, leaf first, one PEM block per certificate.
    pub async fn certificate_chain(&self) -> AcmeResult<Vec<String>> {
        self.ensure_downloaded().await?;
        Ok(self.chain.lock().unwrap().clone().unwrap_or_default())
    }

    /// The end-entity certificate.
    pub async fn certificate(&self) -> AcmeResult<String> {
        let chain = self.certificate_chain().await?;
        chain
            .into_iter()
            .next()
            .ok_or_else(|| AcmeError::Protocol("empty certificate chain".to_string()))
    }

    /// Writes the chain as sent by the CA.
    pub async fn write_certificate(&self, out: &mut dyn Write) -> AcmeResult<()> {
        for block in self.certificate_chain().await? {
            out.write_all(block.as_bytes())?;
        }
        Ok(())
    }

    /// URLs of alternate chains from `Link rel="alternate"`.
    pub async fn alternates(&self) -> AcmeResult<Vec<Url>> {
        self.ensure_downloaded().await?;
        Ok(self.alternates.lock().unwrap().clone().unwrap_or_default())
    }

    /// Handle on one of the [`Certificate::alternates`].
    pub fn alternate_certificate(&self, location: Url) -> Certificate {
        Certificate::bind(self.login.clone(), location)
    }

    /// Revokes this certificate under the account that ordered it.
    pub async fn revoke(&self, reason: Option<RevocationReason>) -> AcmeResult<()> {
        let leaf = self.certificate().await?;
        let session = self.login.session().clone();
        let url = session.resource_url(session::REVOKE_CERT).await?;
        let payload = revocation_payload(&leaf, reason)?;
        let mut conn = Connection::new(&session);
        conn.signed_request(&url, Some(&payload), &self.login).await
    }

    /// Revokes a certificate by proving possession of its key pair instead
    /// of an account key (RFC 8555 section 7.6).
    pub async fn revoke_with_key(
        session: &Session,
        key: &dyn AccountKey,
        cert_pem: &str,
        reason: Option<RevocationReason>,
    ) -> AcmeResult<()> {
        let url = session.resource_url(session::REVOKE_CERT).await?;
        let payload = revocation_payload(cert_pem, reason)?;
        let mut conn = Connection::new(session);
        conn.signed_key_request(&url, Some(&payload), key).await
    }

    pub fn invalidate(&self) {
        *self.chain.lock().unwrap() = None;
        *self.alternates.lock().unwrap() = None;
    }
}

fn revocation_payload(
    cert_pem: &str,
    reason: Option<RevocationReason>,
) -> AcmeResult<crate::json::Json> {
    Ok(JsonBuilder::new()
        .put_base64("certificate", pem_to_der(cert_pem)?)
        .put_opt("reason", reason.map(|r| r.code()))
        .build())
}

impl PartialEq for Certificate {
    fn eq(&self, other: &Self) -> bool {
        self.location == other.location
    }
}

impl Eq for Certificate {}

impl fmt::Debug for Certificate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Certificate")
            .field("location", &self.location)
            .finish()
    }
}

/// Splits a PEM stream into one normalized block per certificate,
/// preserving order. Each block's base64 payload must decode; whitespace
/// between blocks is tolerated.
pub(crate) fn split_pem_chain(body: &str) -> AcmeResult<Vec<String>> {
    let mut blocks = Vec::new();
    let mut rest = body;
    while let Some(start) = rest.find(BEGIN_CERTIFICATE) {
        let after = &rest[start + BEGIN_CERTIFICATE.len()..];
        let end = after.find(END_CERTIFICATE).ok_or_else(|| {
            AcmeError::Protocol("unterminated certificate PEM block".to_string())
        })?;
        let inner = &after[..end];
        decode_pem_body(inner)?;
        blocks.push(format!(
            "{}\n{}\n{}\n",
            BEGIN_CERTIFICATE,
            inner.trim(),
            END_CERTIFICATE
        ));
        rest = &after[end + END_CERTIFICATE.len()..];
    }
    if blocks.is_empty() {
        return Err(AcmeError::Protocol(
            "no certificates in response".to_string(),
        ));
    }
    Ok(blocks)
}

/// DER bytes of the first certificate in a PEM stream.
pub(crate) fn pem_to_der(pem: &str) -> AcmeResult<Vec<u8>> {
    let start = pem.find(BEGIN_CERTIFICATE).ok_or_else(|| {
        AcmeError::Protocol("input contains no certificate PEM block".to_string())
    })?;
    let after = &pem[start + BEGIN_CERTIFICATE.len()..];
    let end = after
        .find(END_CERTIFICATE)
        .ok_or_else(|| AcmeError::Protocol("unterminated certificate PEM block".to_string()))?;
    decode_pem_body(&after[..end])
}

fn decode_pem_body(inner: &str) -> AcmeResult<Vec<u8>> {
    let stripped: String = inner.split_whitespace().collect();
    base64::decode(&stripped)
        .map_err(|err| AcmeError::Protocol(format!("invalid certificate PEM: {err}")))
}
