use serde::{Deserialize, Serialize};

use crate::error::{AcmeError, AcmeResult};

pub static IDENTIFIER_TYPE_DNS: &str = "dns";
pub static IDENTIFIER_TYPE_IP: &str = "ip";

/// An identifier a certificate can be requested for.
///
/// DNS values are normalized to their ASCII-compatible encoding before they
/// cross the wire, so unicode domain names can be passed in directly.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Identifier {
    /// The type of identifier.
    #[serde(rename = "type")]
    pub type_: String,

    /// The identifier itself.
    pub value: String,
}

impl Identifier {
    pub fn new(type_: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            type_: type_.into(),
            value: value.into(),
        }
    }

    pub fn dns(name: impl AsRef<str>) -> AcmeResult<Self> {
        Ok(Self::new(IDENTIFIER_TYPE_DNS, to_ace(name.as_ref())?))
    }

    pub fn ip(addr: impl Into<String>) -> Self {
        Self::new(IDENTIFIER_TYPE_IP, addr)
    }

    pub fn is_dns(&self) -> bool {
        self.type_ == IDENTIFIER_TYPE_DNS
    }

    pub fn dns_name(&self) -> Option<&str> {
        if self.is_dns() {
            Some(&self.value)
        } else {
            None
        }
    }
}

/// Converts a domain name to its ASCII-compatible encoding. Wildcard prefixes
/// are preserved.
pub fn to_ace(domain: &str) -> AcmeResult<String> {
    let (prefix, name) = match domain.strip_prefix("*.") {
        Some(rest) => ("*.", rest),
        None => ("", domain),
    };
    let ace = idna::domain_to_ascii(name)
        .map_err(|err| AcmeError::InvalidState(format!("invalid domain name {domain}: {err:?}")))?;
    Ok(format!("{prefix}{ace}"))
}
