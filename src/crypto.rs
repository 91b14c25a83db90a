pub mod account_key;
pub mod digests;
pub mod eab;
pub mod ed25519;
pub mod es256;
pub mod jws;
pub mod rs256;

use account_key::{AccountKey, GenerateAccountKey};
use es256::Es256AccountKey;

use crate::{AcmeError, AcmeResult};

pub fn generate_account_key() -> impl AccountKey {
    Es256AccountKey::generate()
}

pub fn account_key_from_jwk(jwk: impl AsRef<str>) -> AcmeResult<Box<dyn AccountKey>> {
    let jwk = jwk.as_ref();
    if let Ok(key) = es256::from_jwk(jwk) {
        Ok(Box::new(key))
    } else if let Ok(key) = ed25519::from_jwk(jwk) {
        Ok(Box::new(key))
    } else if let Ok(key) = rs256::from_jwk(jwk) {
        Ok(Box::new(key))
    } else {
        Err(AcmeError::Crypto(anyhow::anyhow!(
            "couldn't decode account key from JWK"
        )))
    }
}
