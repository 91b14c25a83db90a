use sha2::{Digest, Sha256};

use crate::base64url;
use crate::error::{AcmeError, AcmeResult};

use super::account_key::AccountKey;

/// OID of the `acmeValidation` certificate extension (RFC 8737).
pub static ACME_VALIDATION_OID: &str = "1.3.6.1.5.5.7.1.31";

/// ALPN protocol name negotiated for tls-alpn-01 validation.
pub static ACME_TLS_ALPN_PROTOCOL: &str = "acme-tls/1";

pub fn sha256(data: impl AsRef<[u8]>) -> [u8; 32] {
    Sha256::digest(data.as_ref()).into()
}

/// `token "." base64url(thumbprint)`, the response to most challenge types.
pub fn key_authorization(token: &str, key: &dyn AccountKey) -> AcmeResult<String> {
    let thumbprint = key.thumbprint().map_err(AcmeError::Crypto)?;
    Ok(join(token, &base64url::encode(thumbprint)))
}

fn join(token: &str, thumbprint: &str) -> String {
    format!("{token}.{thumbprint}")
}

/// TXT record value for dns-01 and its account-scoped variants.
pub fn dns_txt_digest(key_authorization: &str) -> String {
    base64url::encode(sha256(key_authorization))
}

/// DER value of the `acmeValidation` extension: the SHA-256 of the key
/// authorization wrapped in an OCTET STRING. The extension must be marked
/// critical and carried under [`ACME_VALIDATION_OID`].
pub fn tls_alpn_validation(key_authorization: &str) -> Vec<u8> {
    let digest = sha256(key_authorization);
    let mut der = Vec::with_capacity(2 + digest.len());
    der.push(0x04);
    der.push(digest.len() as u8);
    der.extend_from_slice(&digest);
    der
}

/// Account-scoped DNS label for dns-account-01: the first ten base32
/// characters of the SHA-256 of the account URL, lowercased.
pub fn account_label(account_url: &str) -> String {
    let encoded = base32::encode(
        base32::Alphabet::RFC4648 { padding: false },
        &sha256(account_url),
    );
    encoded[..10].to_ascii_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::ed25519;

    // https://datatracker.ietf.org/doc/html/rfc8555#section-8.1
    #[test]
    fn key_authorization_format() {
        assert_eq!(
            join(
                "evaGxfADs6pSRb2LAv9IZf17Dt3juxGJyPCt92wr-oA",
                "nP1qzpXGymHBrUEepNY9HCsQk7K8KhOypzEt62jcerQ"
            ),
            "evaGxfADs6pSRb2LAv9IZf17Dt3juxGJyPCt92wr-oA.nP1qzpXGymHBrUEepNY9HCsQk7K8KhOypzEt62jcerQ"
        );
    }

    #[test]
    fn key_authorization_uses_the_key_thumbprint() {
        let key = ed25519::from_jwk(ed25519::tests::JWK).unwrap();
        assert_eq!(
            key_authorization("DGyRejmCefe7v4NfDGDKfA", &key).unwrap(),
            "DGyRejmCefe7v4NfDGDKfA.kPrK_qmxVWaYVA9wwBF6Iuo3vVzz7TxHCTwXBygrS4k"
        );
    }

    #[test]
    fn dns_digest_shape() {
        let digest = dns_txt_digest("token.thumbprint");
        // unpadded base64url of 32 bytes
        assert_eq!(digest.len(), 43);
        assert!(!digest.contains('='));
        assert_eq!(digest, dns_txt_digest("token.thumbprint"));
        assert_ne!(digest, dns_txt_digest("token.other"));
    }

    #[test]
    fn tls_alpn_validation_is_a_der_octet_string() {
        let der = tls_alpn_validation("token.thumbprint");
        assert_eq!(der.len(), 34);
        assert_eq!(der[0], 0x04);
        assert_eq!(der[1], 32);
        assert_eq!(&der[2..], &sha256("token.thumbprint"));
    }

    #[test]
    fn account_label_shape() {
        let label = account_label("https://example.com/acme/acct/1");
        assert_eq!(label.len(), 10);
        assert!(label
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit()));
        assert_eq!(label, account_label("https://example.com/acme/acct/1"));
        assert_ne!(label, account_label("https://example.com/acme/acct/2"));
    }
}
