use rand::{CryptoRng, RngCore};
use rsa::hash::Hash;
use rsa::{BigUint, PaddingScheme, PublicKeyParts, RsaPrivateKey};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use zeroize::Zeroizing;

use crate::base64url;

use super::{
    account_key::{AccountKey, GenerateAccountKey},
    jws::JwsSigner,
};

const KEY_BITS: usize = 2048;

pub struct Rs256AccountKey(RsaPrivateKey);

impl std::fmt::Debug for Rs256AccountKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Rs256AccountKey")
    }
}

/// RSA JWK with the private members this crate exports. CRT parameters are
/// recomputed on import.
#[derive(Serialize, Deserialize)]
struct RsaJwk {
    kty: String,
    n: String,
    e: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    d: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    p: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    q: Option<String>,
}

// RFC 7638 canonical form: required members only, in lexicographic order.
#[derive(Serialize)]
struct CanonicalRsaJwk<'a> {
    e: &'a str,
    kty: &'a str,
    n: &'a str,
}

pub fn from_jwk(jwk: impl AsRef<str>) -> anyhow::Result<Rs256AccountKey> {
    let jwk: RsaJwk = serde_json::from_str(jwk.as_ref())?;
    if jwk.kty != "RSA" {
        anyhow::bail!("invalid JWK for RSA private key");
    }
    let d = jwk.d.ok_or_else(|| anyhow::anyhow!("JWK has no private exponent"))?;
    let p = jwk.p.ok_or_else(|| anyhow::anyhow!("JWK has no prime p"))?;
    let q = jwk.q.ok_or_else(|| anyhow::anyhow!("JWK has no prime q"))?;
    let key = RsaPrivateKey::from_components(
        uint(&jwk.n)?,
        uint(&jwk.e)?,
        uint(&d)?,
        vec![uint(&p)?, uint(&q)?],
    );
    key.validate()?;
    Ok(Rs256AccountKey(key))
}

fn uint(b64: &str) -> anyhow::Result<BigUint> {
    Ok(BigUint::from_bytes_be(&base64url::decode(b64)?))
}

pub(crate) fn canonical_public_jwk(n: &str, e: &str) -> String {
    serde_json::to_string(&CanonicalRsaJwk { e, kty: "RSA", n }).expect("string members")
}

impl GenerateAccountKey for Rs256AccountKey {
    fn generate_rng(mut rng: impl CryptoRng + RngCore) -> Self {
        Rs256AccountKey(
            RsaPrivateKey::new(&mut rng, KEY_BITS).expect("RSA key generation failed"),
        )
    }
}

impl JwsSigner for Rs256AccountKey {
    fn jws_alg(&self) -> &str {
        "RS256"
    }

    fn jws_sign(&self, input: &[u8]) -> anyhow::Result<Vec<u8>> {
        let digest = Sha256::digest(input);
        let padding = PaddingScheme::new_pkcs1v15_sign(Some(Hash::SHA2_256));
        Ok(self.0.sign(padding, &digest)?)
    }
}

impl AccountKey for Rs256AccountKey {
    fn private_jwk(&self) -> anyhow::Result<Zeroizing<String>> {
        let primes = self.0.primes();
        if primes.len() != 2 {
            anyhow::bail!("multi-prime RSA keys cannot be exported");
        }
        let jwk = RsaJwk {
            kty: "RSA".to_string(),
            n: base64url::encode(self.0.n().to_bytes_be()),
            e: base64url::encode(self.0.e().to_bytes_be()),
            d: Some(base64url::encode(self.0.d().to_bytes_be())),
            p: Some(base64url::encode(primes[0].to_bytes_be())),
            q: Some(base64url::encode(primes[1].to_bytes_be())),
        };
        Ok(Zeroizing::new(serde_json::to_string(&jwk)?))
    }

    fn public_jwk(&self) -> anyhow::Result<String> {
        Ok(canonical_public_jwk(
            &base64url::encode(self.0.n().to_bytes_be()),
            &base64url::encode(self.0.e().to_bytes_be()),
        ))
    }
}

impl From<RsaPrivateKey> for Rs256AccountKey {
    fn from(key: RsaPrivateKey) -> Self {
        Self(key)
    }
}

#[cfg(test)]
pub mod tests {
    use super::*;

    // https://datatracker.ietf.org/doc/html/rfc7638#section-3.1
    #[test]
    fn rfc7638_thumbprint() {
        let jwk = canonical_public_jwk(
            "0vx7agoebGcQSuuPiLJXZptN9nndrQmbXEps2aiAFbWhM78LhWx4cbbfAAtVT86zwu1RK7aPFFxuhDR1L6tSoc_BJECPebWKRXjBZCiFV4n3oknjhMstn64tZ_2W-5JsGY4Hc5n9yBXArwl93lqt7_RN5w6Cf0h4QyQ5v-65YGjQR0_FDW2QvzqY368QQMicAtaSqzs8KJZgnYb9c7d0zgdAZHzu6qMQvRL5hajrn1n91CbOpbISD08qNLyrdkt-bFTWhAI4vMQFh6WeZu0fM4lFd2NcRwr3XPksINHaQ-G_xBniIqbw0Ls1jF44-csFCur-kEgU8awapJzKnqDKgw",
            "AQAB",
        );
        let thumbprint = base64url::encode(Sha256::digest(jwk.as_bytes()));
        assert_eq!(thumbprint, "NzbLsXh8uDCcd-6MNwXF4W_7noWXFZAfHkxZsRGC9Xs");
    }

    #[test]
    fn private_jwk_round_trip() {
        let key = Rs256AccountKey::generate();
        let jwk = key.private_jwk().unwrap();
        let restored = from_jwk(&*jwk).unwrap();
        assert_eq!(restored.public_jwk().unwrap(), key.public_jwk().unwrap());
    }

    #[test]
    fn sign_smoke_test() {
        let key = Rs256AccountKey::generate();
        let signature = key.jws_sign(b"test").unwrap();
        assert_eq!(signature.len(), KEY_BITS / 8);
    }
}
