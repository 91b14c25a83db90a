use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use http_client::HttpClient;
use http_types::Url;
use log::debug;

use crate::connection::Connection;
use crate::error::{AcmeError, AcmeResult};
use crate::json::Json;
use crate::login::Login;
use crate::resources::challenge::{standard_challenges, Challenge, ChallengeFactory, ChallengeVariant};

pub static NEW_NONCE: &str = "newNonce";
pub static NEW_ACCOUNT: &str = "newAccount";
pub static NEW_ORDER: &str = "newOrder";
pub static NEW_AUTHZ: &str = "newAuthz";
pub static REVOKE_CERT: &str = "revokeCert";
pub static KEY_CHANGE: &str = "keyChange";

/// Per-session network behavior.
#[derive(Clone, Debug)]
pub struct NetworkSettings {
    /// Sent as `User-Agent` on every request.
    pub user_agent: String,

    /// Sent as `Accept-Language` when set, so problem documents come back
    /// localized.
    pub accept_language: Option<String>,

    /// Minimum delay between polls when the server sends no `Retry-After`.
    pub poll_backoff: Duration,
}

impl Default for NetworkSettings {
    fn default() -> Self {
        Self {
            user_agent: concat!("acmekit/", env!("CARGO_PKG_VERSION")).to_string(),
            accept_language: None,
            poll_backoff: Duration::from_secs(3),
        }
    }
}

/// A connection to one CA, identified by its directory URL.
///
/// The session caches the directory after the first fetch and keeps the
/// replay nonce pool. Cloning is cheap; clones share both.
#[derive(Clone)]
pub struct Session {
    inner: Arc<SessionInner>,
}

struct SessionInner {
    http: Arc<dyn HttpClient>,
    directory_url: Url,
    settings: NetworkSettings,
    directory: Mutex<Option<Directory>>,
    nonce: Mutex<Option<String>>,
    challenges: Mutex<HashMap<String, ChallengeFactory>>,
}

impl Session {
    pub fn new(http: impl Into<Arc<dyn HttpClient>>, directory_url: Url) -> Session {
        Self::with_settings(http, directory_url, NetworkSettings::default())
    }

    pub fn with_settings(
        http: impl Into<Arc<dyn HttpClient>>,
        directory_url: Url,
        settings: NetworkSettings,
    ) -> Session {
        let challenges = standard_challenges()
            .into_iter()
            .map(|(type_, factory)| (type_.to_string(), factory))
            .collect();
        Session {
            inner: Arc::new(SessionInner {
                http: http.into(),
                directory_url,
                settings,
                directory: Mutex::new(None),
                nonce: Mutex::new(None),
                challenges: Mutex::new(challenges),
            }),
        }
    }

    pub(crate) fn http(&self) -> &Arc<dyn HttpClient> {
        &self.inner.http
    }

    /// Opens a connection for a single request/response round trip.
    pub fn connect(&self) -> Connection {
        Connection::new(self)
    }

    pub fn settings(&self) -> &NetworkSettings {
        &self.inner.settings
    }

    pub fn directory_url(&self) -> &Url {
        &self.inner.directory_url
    }

    /// The CA's directory, fetched on first use and cached for the lifetime
    /// of the session.
    pub async fn directory(&self) -> AcmeResult<Directory> {
        if let Some(directory) = self.inner.directory.lock().unwrap().clone() {
            return Ok(directory);
        }
        let mut conn = Connection::new(self);
        conn.get(&self.inner.directory_url).await?;
        let json = conn.read_json().await?;
        let directory = Directory::from_json(&json)?;
        debug!("fetched directory of {}", self.inner.directory_url);
        let mut slot = self.inner.directory.lock().unwrap();
        Ok(slot.get_or_insert(directory).clone())
    }

    /// Drops the cached directory so the next access refetches it.
    pub fn reset_directory(&self) {
        *self.inner.directory.lock().unwrap() = None;
    }

    pub async fn resource_url(&self, name: &str) -> AcmeResult<Url> {
        Ok(self.directory().await?.url(name)?.clone())
    }

    pub async fn meta(&self) -> AcmeResult<DirectoryMeta> {
        Ok(self.directory().await?.meta().clone())
    }

    pub(crate) fn take_nonce(&self) -> Option<String> {
        self.inner.nonce.lock().unwrap().take()
    }

    pub(crate) fn offer_nonce(&self, nonce: String) {
        *self.inner.nonce.lock().unwrap() = Some(nonce);
    }

    /// A nonce for the next signed request: the pooled one if present,
    /// otherwise freshly fetched via `HEAD newNonce`.
    pub async fn new_nonce(&self) -> AcmeResult<String> {
        if let Some(nonce) = self.take_nonce() {
            return Ok(nonce);
        }
        let url = self.resource_url(NEW_NONCE).await?;
        let mut conn = Connection::new(self);
        conn.head(&url).await?;
        self.take_nonce()
            .ok_or(AcmeError::MissingExpectedHeader("Replay-Nonce"))
    }

    /// Registers a challenge constructor for a type string, replacing any
    /// previous registration.
    pub fn register_challenge(&self, type_: impl Into<String>, factory: ChallengeFactory) {
        self.inner
            .challenges
            .lock()
            .unwrap()
            .insert(type_.into(), factory);
    }

    /// Builds the challenge matching the `type` of the given JSON. Unknown
    /// types come back as [`ChallengeVariant::Other`].
    pub fn create_challenge(&self, login: &Login, json: Json) -> AcmeResult<ChallengeVariant> {
        let type_ = json.get("type").as_string()?;
        let factory = self.inner.challenges.lock().unwrap().get(&type_).copied();
        let challenge = Challenge::of(login.clone(), json)?;
        match factory {
            Some(factory) => Ok(factory(challenge)),
            None => Ok(ChallengeVariant::Other(challenge)),
        }
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("directory_url", &self.inner.directory_url)
            .finish()
    }
}

/// The CA's resource directory (RFC 8555 section 7.1.1).
#[derive(Clone, Debug)]
pub struct Directory {
    endpoints: HashMap<String, Url>,
    meta: DirectoryMeta,
}

impl Directory {
    pub(crate) fn from_json(json: &Json) -> AcmeResult<Directory> {
        let mut endpoints = HashMap::new();
        for key in json.keys() {
            if key == "meta" {
                continue;
            }
            // non-URL extras some CAs add to the directory are skipped
            if let Ok(url) = json.get(key).as_url() {
                endpoints.insert(key.to_string(), url);
            }
        }
        let meta = match json.get("meta").optional() {
            Some(value) => DirectoryMeta {
                json: value.as_json()?,
            },
            None => DirectoryMeta { json: Json::empty() },
        };
        Ok(Directory { endpoints, meta })
    }

    pub fn url(&self, name: &str) -> AcmeResult<&Url> {
        self.endpoints
            .get(name)
            .ok_or_else(|| AcmeError::NotSupported(name.to_string()))
    }

    pub fn has(&self, name: &str) -> bool {
        self.endpoints.contains_key(name)
    }

    pub fn meta(&self) -> &DirectoryMeta {
        &self.meta
    }
}

/// Optional `meta` object of the directory.
#[derive(Clone, Debug)]
pub struct DirectoryMeta {
    json: Json,
}

impl DirectoryMeta {
    pub fn terms_of_service(&self) -> AcmeResult<Option<Url>> {
        self.json
            .get("termsOfService")
            .optional()
            .map(|v| v.as_url())
            .transpose()
    }

    pub fn website(&self) -> AcmeResult<Option<Url>> {
        self.json
            .get("website")
            .optional()
            .map(|v| v.as_url())
            .transpose()
    }

    pub fn caa_identities(&self) -> AcmeResult<Vec<String>> {
        match self.json.get("caaIdentities").optional() {
            Some(value) => value
                .as_array()?
                .iter()
                .map(|item| item.as_string())
                .collect(),
            None => Ok(Vec::new()),
        }
    }

    pub fn external_account_required(&self) -> AcmeResult<bool> {
        self.json
            .get("externalAccountRequired")
            .optional()
            .map(|v| v.as_bool())
            .transpose()
            .map(|v| v.unwrap_or(false))
    }

    /// Names of the certificate profiles the CA offers, if it advertises
    /// any.
    pub fn profiles(&self) -> AcmeResult<Vec<String>> {
        match self.json.get("profiles").optional() {
            Some(value) => {
                let profiles = value.as_json()?;
                Ok(profiles.keys().into_iter().map(str::to_string).collect())
            }
            None => Ok(Vec::new()),
        }
    }

    pub fn json(&self) -> &Json {
        &self.json
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resources::challenge::ChallengeVariant;
    use crate::testing::{
        block_on, directory_body, test_login, test_session, url, CannedResponse, FakeHttp,
    };

    #[test]
    fn directory_is_fetched_once() {
        let http = FakeHttp::new();
        http.push(CannedResponse::json(directory_body()));
        let session = test_session(&http);
        block_on(async {
            let first = session.directory().await.unwrap();
            assert_eq!(
                first.url("newOrder").unwrap().as_str(),
                "https://ca.example/new-order"
            );
            session.directory().await.unwrap();
            session.resource_url(NEW_ACCOUNT).await.unwrap();
        });
        assert_eq!(http.requests().len(), 1);
    }

    #[test]
    fn reset_forces_a_refetch() {
        let http = FakeHttp::new();
        http.push(CannedResponse::json(directory_body()));
        http.push(CannedResponse::json(directory_body()));
        let session = test_session(&http);
        block_on(async {
            session.directory().await.unwrap();
            session.reset_directory();
            session.directory().await.unwrap();
        });
        assert_eq!(http.requests().len(), 2);
    }

    #[test]
    fn unknown_resources_are_not_supported() {
        let http = FakeHttp::new();
        http.push(CannedResponse::json(directory_body()));
        let session = test_session(&http);
        let err = block_on(async { session.resource_url("renewalInfo").await.unwrap_err() });
        assert!(matches!(err, AcmeError::NotSupported(name) if name == "renewalInfo"));
    }

    #[test]
    fn meta_accessors() {
        let http = FakeHttp::new();
        http.push(CannedResponse::json(directory_body()));
        let session = test_session(&http);
        block_on(async {
            let meta = session.meta().await.unwrap();
            assert_eq!(
                meta.terms_of_service().unwrap().unwrap(),
                url("https://ca.example/terms")
            );
            assert_eq!(meta.website().unwrap().unwrap(), url("https://ca.example/"));
            assert_eq!(meta.caa_identities().unwrap(), vec!["ca.example"]);
            assert!(!meta.external_account_required().unwrap());
            let mut profiles = meta.profiles().unwrap();
            profiles.sort();
            assert_eq!(profiles, vec!["classic", "shortlived"]);
        });
    }

    #[test]
    fn missing_meta_is_empty() {
        let json = Json::parse(r#"{"newNonce":"https://ca.example/new-nonce"}"#).unwrap();
        let directory = Directory::from_json(&json).unwrap();
        assert!(directory.meta().terms_of_service().unwrap().is_none());
        assert!(directory.meta().caa_identities().unwrap().is_empty());
        assert!(!directory.meta().external_account_required().unwrap());
    }

    #[test]
    fn new_nonce_prefers_the_pool() {
        let http = FakeHttp::new();
        let session = test_session(&http);
        session.offer_nonce("pooled".to_string());
        let nonce = block_on(async { session.new_nonce().await.unwrap() });
        assert_eq!(nonce, "pooled");
        assert!(http.requests().is_empty());
    }

    #[test]
    fn new_nonce_heads_the_endpoint_when_empty() {
        let http = FakeHttp::new();
        http.push(CannedResponse::json(directory_body()));
        http.push(CannedResponse::empty(200).nonce("fresh"));
        let session = test_session(&http);
        let nonce = block_on(async { session.new_nonce().await.unwrap() });
        assert_eq!(nonce, "fresh");
        let requests = http.requests();
        assert_eq!(requests[1].method, "HEAD");
        assert_eq!(requests[1].url, "https://ca.example/new-nonce");
    }

    #[test]
    fn new_nonce_requires_the_header() {
        let http = FakeHttp::new();
        http.push(CannedResponse::json(directory_body()));
        http.push(CannedResponse::empty(200));
        let session = test_session(&http);
        let err = block_on(async { session.new_nonce().await.unwrap_err() });
        assert!(matches!(err, AcmeError::MissingExpectedHeader("Replay-Nonce")));
    }

    #[test]
    fn the_pool_holds_one_nonce() {
        let http = FakeHttp::new();
        let session = test_session(&http);
        session.offer_nonce("first".to_string());
        session.offer_nonce("second".to_string());
        assert_eq!(session.take_nonce(), Some("second".to_string()));
        assert_eq!(session.take_nonce(), None);
    }

    #[test]
    fn challenges_dispatch_through_the_registry() {
        let http = FakeHttp::new();
        let session = test_session(&http);
        let login = test_login(&session);
        let known = Json::parse(
            r#"{"type":"http-01","url":"https://ca.example/chall/1","status":"pending","token":"t"}"#,
        )
        .unwrap();
        let variant = session.create_challenge(&login, known).unwrap();
        assert!(matches!(variant, ChallengeVariant::Http01(_)));

        let unknown = Json::parse(
            r#"{"type":"carrier-pigeon-01","url":"https://ca.example/chall/2","status":"pending"}"#,
        )
        .unwrap();
        let variant = session.create_challenge(&login, unknown).unwrap();
        assert!(matches!(variant, ChallengeVariant::Other(_)));
    }

    #[test]
    fn registered_factories_override_dispatch() {
        fn as_other(challenge: crate::resources::challenge::Challenge) -> ChallengeVariant {
            ChallengeVariant::Other(challenge)
        }
        let http = FakeHttp::new();
        let session = test_session(&http);
        let login = test_login(&session);
        session.register_challenge("http-01", as_other);
        let json = Json::parse(
            r#"{"type":"http-01","url":"https://ca.example/chall/1","status":"pending","token":"t"}"#,
        )
        .unwrap();
        let variant = session.create_challenge(&login, json).unwrap();
        assert!(matches!(variant, ChallengeVariant::Other(_)));
    }
}
