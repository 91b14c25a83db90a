use p256::elliptic_curve::sec1::ToEncodedPoint;
use p256::{ecdsa::SigningKey, SecretKey};
use rand::{CryptoRng, RngCore};
use serde::Serialize;
use signature::Signer;
use zeroize::Zeroizing;

use crate::base64url;

use super::{
    account_key::{AccountKey, GenerateAccountKey},
    jws::JwsSigner,
};

#[derive(Debug)]
pub struct Es256AccountKey(SecretKey);

pub fn from_jwk(jwk: impl AsRef<str>) -> anyhow::Result<Es256AccountKey> {
    Ok(SecretKey::from_jwk_str(jwk.as_ref())?.into())
}

// RFC 7638 canonical form: required members only, in lexicographic order.
#[derive(Serialize)]
struct CanonicalEcJwk<'a> {
    crv: &'a str,
    kty: &'a str,
    x: &'a str,
    y: &'a str,
}

impl GenerateAccountKey for Es256AccountKey {
    fn generate_rng(rng: impl CryptoRng + RngCore) -> Self {
        SecretKey::random(rng).into()
    }
}

impl JwsSigner for Es256AccountKey {
    fn jws_alg(&self) -> &str {
        "ES256"
    }

    fn jws_sign(&self, input: &[u8]) -> anyhow::Result<Vec<u8>> {
        let signature = SigningKey::from(&self.0)
            .try_sign(input)
            .map_err(anyhow::Error::from)?;
        Ok(signature.as_ref().to_vec())
    }
}

impl AccountKey for Es256AccountKey {
    fn private_jwk(&self) -> anyhow::Result<Zeroizing<String>> {
        Ok(self.0.to_jwk_string())
    }

    fn public_jwk(&self) -> anyhow::Result<String> {
        let point = self.0.public_key().to_encoded_point(false);
        let x = point
            .x()
            .ok_or_else(|| anyhow::anyhow!("public key has no x coordinate"))?;
        let y = point
            .y()
            .ok_or_else(|| anyhow::anyhow!("public key has no y coordinate"))?;
        Ok(serde_json::to_string(&CanonicalEcJwk {
            crv: "P-256",
            kty: "EC",
            x: &base64url::encode(x),
            y: &base64url::encode(y),
        })?)
    }
}

impl From<SecretKey> for Es256AccountKey {
    fn from(secret: SecretKey) -> Self {
        Self(secret)
    }
}

impl From<Es256AccountKey> for SecretKey {
    fn from(key: Es256AccountKey) -> Self {
        key.0
    }
}
