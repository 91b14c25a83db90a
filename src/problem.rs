use std::fmt;

use http_types::Url;

use crate::error::AcmeResult;
use crate::identifier::Identifier;
use crate::json::Json;

static ERROR_PREFIX: &str = "urn:ietf:params:acme:error:";

/// An RFC 7807 problem document, as attached to error responses and to
/// failed orders and challenges.
#[derive(Clone, Debug)]
pub struct AcmeProblem {
    type_: Url,
    title: Option<String>,
    detail: Option<String>,
    status: Option<i64>,
    instance: Option<Url>,
    identifier: Option<Identifier>,
    subproblems: Vec<AcmeProblem>,
}

impl AcmeProblem {
    pub const CONTENT_TYPE: &'static str = "application/problem+json";

    /// Reads a problem document. `base` is the URL the document was received
    /// from; relative `type` and `instance` references are resolved against
    /// it.
    pub fn from_json(json: &Json, base: &Url) -> AcmeResult<AcmeProblem> {
        let type_ = match json.get("type").optional() {
            Some(value) => {
                let raw = value.as_string()?;
                base.join(&raw).unwrap_or_else(|_| {
                    Url::parse("about:blank").expect("about:blank parses")
                })
            }
            None => Url::parse("about:blank").expect("about:blank parses"),
        };
        let instance = json
            .get("instance")
            .optional()
            .map(|v| v.as_string())
            .transpose()?
            .and_then(|raw| base.join(&raw).ok());
        let identifier = json
            .get("identifier")
            .optional()
            .map(|v| v.as_identifier())
            .transpose()?;
        let subproblems = match json.get("subproblems").optional() {
            Some(value) => value
                .as_array()?
                .iter()
                .map(|item| AcmeProblem::from_json(&item.as_json()?, base))
                .collect::<AcmeResult<Vec<_>>>()?,
            None => Vec::new(),
        };
        Ok(AcmeProblem {
            type_,
            title: json.get("title").optional().map(|v| v.as_string()).transpose()?,
            detail: json.get("detail").optional().map(|v| v.as_string()).transpose()?,
            status: json.get("status").optional().map(|v| v.as_int()).transpose()?,
            instance,
            identifier,
            subproblems,
        })
    }

    pub fn problem_type(&self) -> &Url {
        &self.type_
    }

    pub fn title(&self) -> Option<&str> {
        self.title.as_deref()
    }

    pub fn detail(&self) -> Option<&str> {
        self.detail.as_deref()
    }

    pub fn status(&self) -> Option<i64> {
        self.status
    }

    pub fn instance(&self) -> Option<&Url> {
        self.instance.as_ref()
    }

    pub fn identifier(&self) -> Option<&Identifier> {
        self.identifier.as_ref()
    }

    pub fn subproblems(&self) -> &[AcmeProblem] {
        &self.subproblems
    }

    /// The well-known ACME error this problem represents, if its type is in
    /// the `urn:ietf:params:acme:error:` namespace.
    pub fn acme_error(&self) -> Option<AcmeProblemType> {
        self.type_
            .as_str()
            .strip_prefix(ERROR_PREFIX)
            .and_then(AcmeProblemType::from_suffix)
    }

    pub fn has_type(&self, type_: AcmeProblemType) -> bool {
        self.acme_error() == Some(type_)
    }
}

impl fmt::Display for AcmeProblem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(detail) = &self.detail {
            write!(f, "{detail}")
        } else if let Some(title) = &self.title {
            write!(f, "{title}")
        } else {
            write!(f, "{}", self.type_)
        }
    }
}

/// ACME error types from the RFC 8555 registry.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AcmeProblemType {
    AccountDoesNotExist,
    AlreadyRevoked,
    BadCsr,
    BadNonce,
    BadPublicKey,
    BadRevocationReason,
    BadSignatureAlgorithm,
    Caa,
    Compound,
    Connection,
    Dns,
    ExternalAccountRequired,
    IncorrectResponse,
    InvalidContact,
    Malformed,
    OrderNotReady,
    RateLimited,
    RejectedIdentifier,
    ServerInternal,
    Tls,
    Unauthorized,
    UnsupportedContact,
    UnsupportedIdentifier,
    UserActionRequired,
}

impl AcmeProblemType {
    pub fn urn_suffix(&self) -> &'static str {
        use AcmeProblemType::*;
        match self {
            AccountDoesNotExist => "accountDoesNotExist",
            AlreadyRevoked => "alreadyRevoked",
            BadCsr => "badCSR",
            BadNonce => "badNonce",
            BadPublicKey => "badPublicKey",
            BadRevocationReason => "badRevocationReason",
            BadSignatureAlgorithm => "badSignatureAlgorithm",
            Caa => "caa",
            Compound => "compound",
            Connection => "connection",
            Dns => "dns",
            ExternalAccountRequired => "externalAccountRequired",
            IncorrectResponse => "incorrectResponse",
            InvalidContact => "invalidContact",
            Malformed => "malformed",
            OrderNotReady => "orderNotReady",
            RateLimited => "rateLimited",
            RejectedIdentifier => "rejectedIdentifier",
            ServerInternal => "serverInternal",
            Tls => "tls",
            Unauthorized => "unauthorized",
            UnsupportedContact => "unsupportedContact",
            UnsupportedIdentifier => "unsupportedIdentifier",
            UserActionRequired => "userActionRequired",
        }
    }

    fn from_suffix(suffix: &str) -> Option<AcmeProblemType> {
        use AcmeProblemType::*;
        match suffix {
            "accountDoesNotExist" => Some(AccountDoesNotExist),
            "alreadyRevoked" => Some(AlreadyRevoked),
            "badCSR" => Some(BadCsr),
            "badNonce" => Some(BadNonce),
            "badPublicKey" => Some(BadPublicKey),
            "badRevocationReason" => Some(BadRevocationReason),
            "badSignatureAlgorithm" => Some(BadSignatureAlgorithm),
            "caa" => Some(Caa),
            "compound" => Some(Compound),
            "connection" => Some(Connection),
            "dns" => Some(Dns),
            "externalAccountRequired" => Some(ExternalAccountRequired),
            "incorrectResponse" => Some(IncorrectResponse),
            "invalidContact" => Some(InvalidContact),
            "malformed" => Some(Malformed),
            "orderNotReady" => Some(OrderNotReady),
            "rateLimited" => Some(RateLimited),
            "rejectedIdentifier" => Some(RejectedIdentifier),
            "serverInternal" => Some(ServerInternal),
            "tls" => Some(Tls),
            "unauthorized" => Some(Unauthorized),
            "unsupportedContact" => Some(UnsupportedContact),
            "unsupportedIdentifier" => Some(UnsupportedIdentifier),
            "userActionRequired" => Some(UserActionRequired),
            _ => None,
        }
    }
}
