use hmac::{Hmac, Mac};
use http_types::Url;
use sha2::Sha256;

use crate::base64url;
use crate::error::{AcmeError, AcmeResult};

use super::jws::{jws_flattened, Jws, JwsHeader, JwsSigner};

struct HmacSigner(Hmac<Sha256>);

impl JwsSigner for HmacSigner {
    fn jws_alg(&self) -> &str {
        "HS256"
    }

    fn jws_sign(&self, input: &[u8]) -> anyhow::Result<Vec<u8>> {
        let mut mac = self.0.clone();
        mac.update(input);
        Ok(mac.finalize().into_bytes().to_vec())
    }
}

/// Builds the externalAccountBinding JWS for a newAccount request
/// (RFC 8555 section 7.3.4).
///
/// `kid` and `mac_key` are issued by the CA out of band; `mac_key` is the
/// base64url encoded MAC key. The payload is the account's public JWK.
pub fn external_account_binding(
    kid: &str,
    mac_key: &str,
    new_account_url: &Url,
    public_jwk: &str,
) -> AcmeResult<Jws> {
    let key = base64url::decode(mac_key)
        .map_err(|err| AcmeError::Crypto(anyhow::anyhow!("invalid MAC key: {err}")))?;
    let mac = Hmac::<Sha256>::new_from_slice(&key)
        .map_err(|err| AcmeError::Crypto(anyhow::anyhow!("invalid MAC key: {err}")))?;
    let header = JwsHeader {
        alg: "HS256",
        nonce: None,
        url: new_account_url.as_str(),
        jwk: None::<&str>,
        kid: Some(kid),
    };
    jws_flattened(&HmacSigner(mac), &header, public_jwk.as_bytes()).map_err(AcmeError::Crypto)
}
