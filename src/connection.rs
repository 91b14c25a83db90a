use chrono::{DateTime, Duration as ChronoDuration, Utc};
use http_client::{Body, HttpClient, Request, Response};
use http_types::Url;
use log::{debug, warn};
use serde_json::value::RawValue;

use crate::crypto::account_key::AccountKey;
use crate::crypto::jws::{self, jws_flattened, Jws, JwsHeader};
use crate::error::{AcmeError, AcmeResult};
use crate::json::Json;
use crate::login::Login;
use crate::problem::{AcmeProblem, AcmeProblemType};
use crate::session::Session;

pub static MIME_JSON: &str = "application/json";
pub static MIME_PEM_CHAIN: &str = "application/pem-certificate-chain";

/// Upper bound on signed request attempts when the server keeps answering
/// `badNonce`.
const MAX_NONCE_ATTEMPTS: usize = 10;

/// A single request/response round trip against the CA.
///
/// A connection is created by a [`Session`], performs one request, and is
/// then read out and dropped. Every response's `Replay-Nonce` is handed back
/// to the session pool; a `badNonce` answer to a signed request is retried
/// with a fresh nonce.
pub struct Connection {
    session: Session,
    url: Option<Url>,
    response: Option<Response>,
}

impl Connection {
    pub(crate) fn new(session: &Session) -> Connection {
        Connection {
            session: session.clone(),
            url: None,
            response: None,
        }
    }

    /// Unsigned GET. Only the directory and similar public documents are
    /// fetched this way.
    pub async fn get(&mut self, url: &Url) -> AcmeResult<()> {
        let mut req = Request::get(url.as_str());
        self.decorate(&mut req);
        debug!("GET {url}");
        self.send(url, req).await
    }

    pub(crate) async fn head(&mut self, url: &Url) -> AcmeResult<()> {
        let mut req = Request::head(url.as_str());
        self.decorate(&mut req);
        debug!("HEAD {url}");
        self.send(url, req).await
    }

    /// POST-as-GET: an authenticated read with an empty payload.
    pub async fn post_as_get(&mut self, url: &Url, login: &Login) -> AcmeResult<()> {
        self.signed_request(url, None, login).await
    }

    /// Signed POST authenticated by account URL (`kid`).
    pub async fn signed_request(
        &mut self,
        url: &Url,
        payload: Option<&Json>,
        login: &Login,
    ) -> AcmeResult<()> {
        self.send_signed(url, payload, login.key(), Some(login.location().clone()))
            .await
    }

    /// Signed POST authenticated by embedded public key (`jwk`). Used where
    /// no account URL exists yet or the certificate key signs for itself.
    pub async fn signed_key_request(
        &mut self,
        url: &Url,
        payload: Option<&Json>,
        key: &dyn AccountKey,
    ) -> AcmeResult<()> {
        self.send_signed(url, payload, key, None).await
    }

    async fn send_signed(
        &mut self,
        url: &Url,
        payload: Option<&Json>,
        key: &dyn AccountKey,
        kid: Option<Url>,
    ) -> AcmeResult<()> {
        let payload_bytes = match payload {
            Some(json) => json.to_string().into_bytes(),
            None => Vec::new(),
        };
        let mut last_err = None;
        for attempt in 1..=MAX_NONCE_ATTEMPTS {
            let nonce = self.session.new_nonce().await?;
            let jwk = match kid {
                Some(_) => None,
                None => {
                    let public_jwk = key.public_jwk().map_err(AcmeError::Crypto)?;
                    Some(RawValue::from_string(public_jwk)?)
                }
            };
            let header = JwsHeader {
                alg: key.jws_alg(),
                nonce: Some(&nonce),
                url: url.as_str(),
                jwk,
                kid: kid.as_ref().map(Url::as_str),
            };
            let jws = jws_flattened(key, &header, &payload_bytes).map_err(AcmeError::Crypto)?;

            let mut req = Request::post(url.as_str());
            self.decorate(&mut req);
            req.set_body(&jws);
            debug!("POST {url}");
            let resp = self
                .session
                .http()
                .send(req)
                .await
                .map_err(AcmeError::Network)?;
            match self.accept(url, resp).await {
                Ok(()) => return Ok(()),
                Err(err) => {
                    let bad_nonce = err
                        .problem()
                        .map(|p| p.has_type(AcmeProblemType::BadNonce))
                        .unwrap_or(false);
                    if bad_nonce && attempt < MAX_NONCE_ATTEMPTS {
                        warn!("server rejected the nonce, retrying with a fresh one");
                        last_err = Some(err);
                        continue;
                    }
                    return Err(err);
                }
            }
        }
        Err(last_err
            .unwrap_or_else(|| AcmeError::Protocol("bad nonce retries exhausted".to_string())))
    }

    fn decorate(&self, req: &mut Request) {
        let settings = self.session.settings();
        req.insert_header("User-Agent", settings.user_agent.as_str());
        if let Some(lang) = &settings.accept_language {
            req.insert_header("Accept-Language", lang.as_str());
        }
    }

    async fn send(&mut self, url: &Url, req: Request) -> AcmeResult<()> {
        let resp = self
            .session
            .http()
            .send(req)
            .await
            .map_err(AcmeError::Network)?;
        self.accept(url, resp).await
    }

    async fn accept(&mut self, url: &Url, resp: Response) -> AcmeResult<()> {
        if let Some(values) = resp.header("Replay-Nonce") {
            self.session.offer_nonce(values.last().as_str().to_owned());
        }
        self.url = Some(url.clone());
        let status = resp.status();
        if status.is_success() || status.is_informational() {
            self.response = Some(resp);
            return Ok(());
        }
        Err(self.failure(url, resp).await)
    }

    async fn failure(&self, url: &Url, mut resp: Response) -> AcmeError {
        let status = resp.status();
        let is_problem = resp
            .content_type()
            .map(|ct| ct.essence() == AcmeProblem::CONTENT_TYPE)
            .unwrap_or(false);
        if !is_problem {
            return AcmeError::Http(http_client::Error::from_str(status, ""));
        }
        let body = match resp.body_string().await {
            Ok(body) => body,
            Err(err) => return AcmeError::Network(err),
        };
        let problem = match Json::parse(&body).and_then(|json| AcmeProblem::from_json(&json, url)) {
            Ok(problem) => problem,
            Err(err) => return err,
        };
        debug!("server reported problem: {problem}");
        match problem.acme_error() {
            Some(AcmeProblemType::RateLimited) => AcmeError::RateLimited {
                retry_after: read_retry_after(&resp),
                documents: read_links(&resp, url, "help"),
                problem,
            },
            Some(AcmeProblemType::UserActionRequired) => AcmeError::UserActionRequired {
                terms_of_service: read_links(&resp, url, "terms-of-service").into_iter().next(),
                instance: problem.instance().cloned(),
                problem,
            },
            _ => AcmeError::Server(problem),
        }
    }

    /// Reads the response body as JSON. The content type must be
    /// `application/json` (or a problem document).
    pub async fn read_json(&mut self) -> AcmeResult<Json> {
        let resp = self
            .response
            .as_mut()
            .ok_or_else(|| AcmeError::Protocol("no response received".to_string()))?;
        let essence = resp.content_type().map(|ct| ct.essence().to_string());
        match essence.as_deref() {
            Some(ct) if ct == MIME_JSON || ct == AcmeProblem::CONTENT_TYPE => {}
            other => {
                return Err(AcmeError::Protocol(format!(
                    "unexpected content type {}",
                    other.unwrap_or("(none)")
                )))
            }
        }
        let body = resp.body_string().await.map_err(AcmeError::Network)?;
        Json::parse(&body)
    }

    /// Reads the response body as a PEM certificate chain, leaf first.
    pub async fn read_certificates(&mut self) -> AcmeResult<Vec<String>> {
        let resp = self
            .response
            .as_mut()
            .ok_or_else(|| AcmeError::Protocol("no response received".to_string()))?;
        let essence = resp.content_type().map(|ct| ct.essence().to_string());
        if essence.as_deref() != Some(MIME_PEM_CHAIN) {
            return Err(AcmeError::Protocol(format!(
                "unexpected content type {}",
                essence.as_deref().unwrap_or("(none)")
            )));
        }
        let body = resp.body_string().await.map_err(AcmeError::Network)?;
        crate::resources::certificate::split_pem_chain(&body)
    }

    /// The `Location` header, resolved against the request URL.
    pub fn location(&self) -> Option<Url> {
        let resp = self.response.as_ref()?;
        let value = resp.header("Location")?.last().as_str().to_owned();
        self.url.as_ref()?.join(&value).ok()
    }

    pub(crate) fn require_location(&self) -> AcmeResult<Url> {
        self.location()
            .ok_or(AcmeError::MissingExpectedHeader("Location"))
    }

    /// The instant encoded in the `Retry-After` header, if any. Both
    /// delta-seconds and HTTP-date forms are understood.
    pub fn retry_after(&self) -> Option<DateTime<Utc>> {
        self.response.as_ref().and_then(read_retry_after)
    }

    /// All `Link` headers with the given relation, resolved against the
    /// request URL.
    pub fn links(&self, rel: &str) -> Vec<Url> {
        match (self.response.as_ref(), self.url.as_ref()) {
            (Some(resp), Some(url)) => read_links(resp, url, rel),
            _ => Vec::new(),
        }
    }

    /// The `Replay-Nonce` of the response. It is also in the session pool.
    pub fn nonce(&self) -> Option<String> {
        let resp = self.response.as_ref()?;
        Some(resp.header("Replay-Nonce")?.last().as_str().to_owned())
    }
}

fn read_retry_after(resp: &Response) -> Option<DateTime<Utc>> {
    let value = resp.header("Retry-After")?.last().as_str().trim().to_owned();
    if let Ok(secs) = value.parse::<i64>() {
        return Some(Utc::now() + ChronoDuration::seconds(secs));
    }
    DateTime::parse_from_rfc2822(&value)
        .ok()
        .map(|t| t.with_timezone(&Utc))
}

fn read_links(resp: &Response, base: &Url, rel: &str) -> Vec<Url> {
    let mut found = Vec::new();
    let values = match resp.header("Link") {
        Some(values) => values,
        None => return found,
    };
    for value in values.iter() {
        for entry in value.as_str().split(',') {
            let entry = entry.trim();
            let href = match entry.find('>') {
                Some(end) if entry.starts_with('<') => &entry[1..end],
                _ => continue,
            };
            let is_match = entry.split(';').skip(1).any(|param| {
                match param.trim().strip_prefix("rel=") {
                    Some(value) => value.trim_matches('"') == rel,
                    None => false,
                }
            });
            if is_match {
                if let Ok(url) = base.join(href) {
                    found.push(url);
                }
            }
        }
    }
    found
}

impl From<&Jws> for Body {
    fn from(jws: &Jws) -> Self {
        let mut body = Body::from_json(jws).unwrap();
        body.set_mime(jws::CONTENT_TYPE);
        body
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::base64url;
    use crate::testing::{
        block_on, directory_body, test_login, test_session, url, CannedResponse, FakeHttp,
    };

    fn protected_header(request_body: &str) -> serde_json::Value {
        let jws: serde_json::Value = serde_json::from_str(request_body).unwrap();
        let protected = jws["protected"].as_str().unwrap();
        serde_json::from_slice(&base64url::decode(protected).unwrap()).unwrap()
    }

    #[test]
    fn get_enforces_json_content_type() {
        let http = FakeHttp::new();
        http.push(CannedResponse {
            status: 200,
            content_type: Some("text/plain"),
            headers: Vec::new(),
            body: "hello".to_string(),
        });
        let session = test_session(&http);
        block_on(async {
            let mut conn = Connection::new(&session);
            conn.get(&url("https://ca.example/directory")).await.unwrap();
            let err = conn.read_json().await.unwrap_err();
            assert!(err.to_string().contains("unexpected content type"));
        });
    }

    #[test]
    fn signed_request_uses_kid_and_pooled_nonce() {
        let http = FakeHttp::new();
        http.push(CannedResponse::json(directory_body()));
        http.push(CannedResponse::empty(200).nonce("nonce-1"));
        http.push(CannedResponse::json("{}").nonce("nonce-2"));
        let session = test_session(&http);
        let login = test_login(&session);
        block_on(async {
            let mut conn = Connection::new(&session);
            conn.post_as_get(&url("https://ca.example/order/1"), &login)
                .await
                .unwrap();
            conn.read_json().await.unwrap();
        });

        let requests = http.requests();
        assert_eq!(requests.len(), 3);
        assert_eq!(requests[1].method, "HEAD");
        assert_eq!(requests[2].method, "POST");
        let header = protected_header(&requests[2].body);
        assert_eq!(header["alg"], "ES256");
        assert_eq!(header["nonce"], "nonce-1");
        assert_eq!(header["url"], "https://ca.example/order/1");
        assert_eq!(header["kid"], crate::testing::ACCOUNT_URL);
        assert!(header.get("jwk").is_none());
        // POST-as-GET has an empty payload
        let jws: serde_json::Value = serde_json::from_str(&requests[2].body).unwrap();
        assert_eq!(jws["payload"], "");
        // the response nonce went back into the pool
        assert_eq!(session.take_nonce().unwrap(), "nonce-2");
    }

    #[test]
    fn bad_nonce_is_retried_once_with_a_fresh_nonce() {
        let http = FakeHttp::new();
        http.push(CannedResponse::json(directory_body()));
        http.push(CannedResponse::empty(200).nonce("nonce-1"));
        http.push(
            CannedResponse::problem(
                400,
                r#"{"type":"urn:ietf:params:acme:error:badNonce","detail":"nonce replayed"}"#,
            )
            .nonce("nonce-2"),
        );
        http.push(CannedResponse::json(r#"{"status":"valid"}"#).nonce("nonce-3"));
        let session = test_session(&http);
        let login = test_login(&session);
        block_on(async {
            let mut conn = Connection::new(&session);
            conn.post_as_get(&url("https://ca.example/acct/1"), &login)
                .await
                .unwrap();
        });

        let requests = http.requests();
        let posts: Vec<_> = requests.iter().filter(|r| r.method == "POST").collect();
        assert_eq!(posts.len(), 2);
        let first = protected_header(&posts[0].body);
        let second = protected_header(&posts[1].body);
        assert_eq!(first["nonce"], "nonce-1");
        assert_eq!(second["nonce"], "nonce-2");
        assert_ne!(first["nonce"], second["nonce"]);
    }

    #[test]
    fn other_problems_are_not_retried() {
        let http = FakeHttp::new();
        http.push(CannedResponse::json(directory_body()));
        http.push(CannedResponse::empty(200).nonce("nonce-1"));
        http.push(CannedResponse::problem(
            403,
            r#"{"type":"urn:ietf:params:acme:error:unauthorized","detail":"no"}"#,
        ));
        let session = test_session(&http);
        let login = test_login(&session);
        let err = block_on(async {
            let mut conn = Connection::new(&session);
            conn.post_as_get(&url("https://ca.example/order/1"), &login)
                .await
                .unwrap_err()
        });
        match err {
            AcmeError::Server(problem) => {
                assert!(problem.has_type(AcmeProblemType::Unauthorized))
            }
            other => panic!("unexpected error {other:?}"),
        }
        assert_eq!(
            http.requests()
                .iter()
                .filter(|r| r.method == "POST")
                .count(),
            1
        );
    }

    #[test]
    fn rate_limit_problems_carry_retry_after_and_documents() {
        let http = FakeHttp::new();
        http.push(
            CannedResponse::problem(
                429,
                r#"{"type":"urn:ietf:params:acme:error:rateLimited","detail":"slow down"}"#,
            )
            .header("Retry-After", "120")
            .header("Link", "<https://ca.example/docs/rate-limits>;rel=\"help\""),
        );
        let session = test_session(&http);
        let err = block_on(async {
            let mut conn = Connection::new(&session);
            conn.get(&url("https://ca.example/directory")).await.unwrap_err()
        });
        match err {
            AcmeError::RateLimited {
                retry_after,
                documents,
                ..
            } => {
                let delta = retry_after.unwrap() - Utc::now();
                assert!(delta > ChronoDuration::seconds(100));
                assert!(delta <= ChronoDuration::seconds(120));
                assert_eq!(
                    documents,
                    vec![url("https://ca.example/docs/rate-limits")]
                );
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn user_action_required_carries_the_terms_link() {
        let http = FakeHttp::new();
        http.push(
            CannedResponse::problem(
                403,
                r#"{"type":"urn:ietf:params:acme:error:userActionRequired","detail":"agree to the new terms","instance":"https://ca.example/tos-agree"}"#,
            )
            .header("Link", "<https://ca.example/terms/v2>;rel=\"terms-of-service\""),
        );
        let session = test_session(&http);
        let err = block_on(async {
            let mut conn = Connection::new(&session);
            conn.get(&url("https://ca.example/directory")).await.unwrap_err()
        });
        match err {
            AcmeError::UserActionRequired {
                terms_of_service,
                instance,
                ..
            } => {
                assert_eq!(terms_of_service, Some(url("https://ca.example/terms/v2")));
                assert_eq!(instance, Some(url("https://ca.example/tos-agree")));
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn retry_after_understands_http_dates() {
        let http = FakeHttp::new();
        http.push(
            CannedResponse::json("{}").header("Retry-After", "Sun, 06 Nov 1994 08:49:37 GMT"),
        );
        let session = test_session(&http);
        let retry_after = block_on(async {
            let mut conn = Connection::new(&session);
            conn.get(&url("https://ca.example/directory")).await.unwrap();
            conn.retry_after().unwrap()
        });
        assert_eq!(
            retry_after,
            DateTime::parse_from_rfc3339("1994-11-06T08:49:37Z").unwrap()
        );
    }

    #[test]
    fn links_are_parsed_and_resolved() {
        let http = FakeHttp::new();
        http.push(
            CannedResponse::json("{}")
                .header(
                    "Link",
                    "<https://ca.example/acme/cert/1/alt-1>;rel=\"alternate\", </acme/cert/1/alt-2>;rel=\"alternate\"",
                )
                .header("Link", "<https://ca.example/directory>;rel=\"index\""),
        );
        let session = test_session(&http);
        block_on(async {
            let mut conn = Connection::new(&session);
            conn.get(&url("https://ca.example/acme/cert/1")).await.unwrap();
            assert_eq!(
                conn.links("alternate"),
                vec![
                    url("https://ca.example/acme/cert/1/alt-1"),
                    url("https://ca.example/acme/cert/1/alt-2"),
                ]
            );
            assert_eq!(conn.links("index"), vec![url("https://ca.example/directory")]);
            assert!(conn.links("up").is_empty());
        });
    }

    #[test]
    fn location_resolves_relative_references() {
        let http = FakeHttp::new();
        http.push(CannedResponse::json("{}").header("Location", "/acme/order/17"));
        let session = test_session(&http);
        block_on(async {
            let mut conn = Connection::new(&session);
            conn.get(&url("https://ca.example/acme/new-order")).await.unwrap();
            assert_eq!(
                conn.location(),
                Some(url("https://ca.example/acme/order/17"))
            );
        });
    }
}
