use rand::{CryptoRng, RngCore};
use sha2::{Digest, Sha256};
use signature::rand_core::OsRng;
use zeroize::Zeroizing;

use super::jws::JwsSigner;

/// A key pair an ACME account is bound to.
///
/// `public_jwk` must return the canonical form of RFC 7638: only the
/// required members of the key type, in lexicographic order, with no
/// whitespace. The thumbprint is the SHA-256 of exactly that string.
pub trait AccountKey: JwsSigner + Send + Sync + std::fmt::Debug {
    fn private_jwk(&self) -> anyhow::Result<Zeroizing<String>>;
    fn public_jwk(&self) -> anyhow::Result<String>;

    fn thumbprint(&self) -> anyhow::Result<Vec<u8>> {
        Ok(Sha256::digest(self.public_jwk()?.as_bytes()).to_vec())
    }
}

pub trait GenerateAccountKey: AccountKey + Sized {
    fn generate_rng(rng: impl CryptoRng + RngCore) -> Self;

    fn generate() -> Self {
        Self::generate_rng(OsRng)
    }
}

impl JwsSigner for Box<dyn AccountKey> {
    fn jws_alg(&self) -> &str {
        self.as_ref().jws_alg()
    }

    fn jws_sign(&self, input: &[u8]) -> anyhow::Result<Vec<u8>> {
        self.as_ref().jws_sign(input)
    }
}

impl AccountKey for Box<dyn AccountKey> {
    fn private_jwk(&self) -> anyhow::Result<Zeroizing<String>> {
        self.as_ref().private_jwk()
    }

    fn public_jwk(&self) -> anyhow::Result<String> {
        self.as_ref().public_jwk()
    }

    fn thumbprint(&self) -> anyhow::Result<Vec<u8>> {
        self.as_ref().thumbprint()
    }
}
