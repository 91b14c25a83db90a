use ed25519_dalek::{Keypair, PublicKey, SecretKey, Signer, SECRET_KEY_LENGTH};
use serde::Serialize;
use zeroize::Zeroizing;

use crate::{base64url, crypto::jws::JwsSigner};

use super::account_key::{AccountKey, GenerateAccountKey};

/// Octet key pair JWK, borrowed from its serialized form.
#[derive(Serialize, serde::Deserialize)]
struct Jwk<'a> {
    kty: &'a str,
    crv: &'a str,
    x: &'a str,

    #[serde(skip_serializing_if = "Option::is_none")]
    y: Option<&'a str>,

    #[serde(skip_serializing_if = "Option::is_none")]
    d: Option<&'a str>,
}

#[derive(Debug)]
pub struct Ed25519AccountKey(Keypair);

pub fn from_jwk(jwk: impl AsRef<str>) -> anyhow::Result<Ed25519AccountKey> {
    if let Jwk {
        kty: "OKP",
        crv: "Ed25519",
        x,
        d: Some(d),
        ..
    } = serde_json::from_str(jwk.as_ref())?
    {
        let secret = SecretKey::from_bytes(&base64url::decode(d)?)?;
        let public = PublicKey::from_bytes(&base64url::decode(x)?)?;
        Ok(Keypair { secret, public }.into())
    } else {
        anyhow::bail!("invalid JWK for Ed25519 private key")
    }
}

// RFC 7638 canonical form: required members only, in lexicographic order.
#[derive(Serialize)]
struct CanonicalOkpJwk<'a> {
    crv: &'a str,
    kty: &'a str,
    x: &'a str,
}

impl JwsSigner for Ed25519AccountKey {
    fn jws_alg(&self) -> &str {
        "EdDSA"
    }

    fn jws_sign(&self, input: &[u8]) -> anyhow::Result<Vec<u8>> {
        Ok(self.0.sign(input).as_ref().to_vec())
    }
}

impl AccountKey for Ed25519AccountKey {
    fn public_jwk(&self) -> anyhow::Result<String> {
        Ok(serde_json::to_string(&CanonicalOkpJwk {
            crv: "Ed25519",
            kty: "OKP",
            x: &base64url::encode(self.0.public.as_bytes()),
        })?)
    }

    fn private_jwk(&self) -> anyhow::Result<Zeroizing<String>> {
        let x = base64url::encode(self.0.public.as_bytes());
        let d = base64url::encode(self.0.secret.as_bytes());
        let jwk = Jwk {
            kty: "OKP",
            crv: "Ed25519",
            x: x.as_ref(),
            y: None,
            d: Some(d.as_ref()),
        };
        Ok(Zeroizing::new(serde_json::to_string(&jwk)?))
    }
}

impl GenerateAccountKey for Ed25519AccountKey {
    fn generate_rng(mut rng: impl rand::CryptoRng + rand::RngCore) -> Self {
        // Adapted from Keypair::random to avoid rand crate version problem
        let mut bytes = [0u8; SECRET_KEY_LENGTH];
        rng.fill_bytes(&mut bytes[..]);
        let secret = SecretKey::from_bytes(&bytes).expect("SecretKey::from_bytes failed");
        let public: PublicKey = (&secret).into();
        Keypair { secret, public }.into()
    }
}

impl From<Keypair> for Ed25519AccountKey {
    fn from(pair: Keypair) -> Self {
        Self(pair)
    }
}

impl From<Ed25519AccountKey> for Keypair {
    fn from(key: Ed25519AccountKey) -> Self {
        key.0
    }
}
