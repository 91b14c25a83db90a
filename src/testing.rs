//! Shared fixtures for the test modules: a scripted HTTP client and a
//! virtual poll timer.

use std::collections::VecDeque;
use std::future::Future;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use http_client::{HttpClient, Request, Response};
use http_types::{Body, StatusCode, Url};

use crate::crypto::es256;
use crate::error::{AcmeError, AcmeResult};
use crate::login::Login;
use crate::poll::PollTimer;
use crate::session::Session;

pub fn block_on<F: Future>(future: F) -> F::Output {
    futures::executor::block_on(future)
}

pub fn url(s: &str) -> Url {
    Url::parse(s).unwrap()
}

#[derive(Debug, Clone)]
pub struct CannedResponse {
    pub status: u16,
    pub content_type: Option<&'static str>,
    pub headers: Vec<(&'static str, String)>,
    pub body: String,
}

impl CannedResponse {
    pub fn empty(status: u16) -> Self {
        CannedResponse {
            status,
            content_type: None,
            headers: Vec::new(),
            body: String::new(),
        }
    }

    pub fn json(body: impl Into<String>) -> Self {
        CannedResponse {
            status: 200,
            content_type: Some("application/json"),
            headers: Vec::new(),
            body: body.into(),
        }
    }

    pub fn problem(status: u16, body: impl Into<String>) -> Self {
        CannedResponse {
            status,
            content_type: Some("application/problem+json"),
            headers: Vec::new(),
            body: body.into(),
        }
    }

    pub fn pem(body: impl Into<String>) -> Self {
        CannedResponse {
            status: 200,
            content_type: Some("application/pem-certificate-chain"),
            headers: Vec::new(),
            body: body.into(),
        }
    }

    pub fn header(mut self, name: &'static str, value: impl Into<String>) -> Self {
        self.headers.push((name, value.into()));
        self
    }

    pub fn nonce(self, value: impl Into<String>) -> Self {
        self.header("Replay-Nonce", value)
    }
}

#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub method: String,
    pub url: String,
    pub body: String,
}

/// Plays back a script of canned responses and records every request.
#[derive(Debug, Default)]
pub struct FakeHttp {
    responses: Mutex<VecDeque<CannedResponse>>,
    requests: Mutex<Vec<RecordedRequest>>,
}

impl FakeHttp {
    pub fn new() -> Arc<FakeHttp> {
        Arc::new(FakeHttp::default())
    }

    pub fn push(&self, response: CannedResponse) {
        self.responses.lock().unwrap().push_back(response);
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl HttpClient for FakeHttp {
    async fn send(&self, mut req: Request) -> Result<Response, http_client::Error> {
        let body = req.body_string().await?;
        self.requests.lock().unwrap().push(RecordedRequest {
            method: req.method().to_string(),
            url: req.url().to_string(),
            body,
        });
        let canned = self.responses.lock().unwrap().pop_front().ok_or_else(|| {
            http_client::Error::from_str(StatusCode::InternalServerError, "script exhausted")
        })?;
        let status = StatusCode::try_from(canned.status)
            .map_err(|_| http_client::Error::from_str(StatusCode::InternalServerError, "bad status"))?;
        let mut resp = Response::new(status);
        for (name, value) in &canned.headers {
            resp.append_header(*name, value.as_str());
        }
        if let Some(ct) = canned.content_type {
            let mut body = Body::from_string(canned.body.clone());
            body.set_mime(ct);
            resp.set_body(body);
            resp.insert_header("Content-Type", ct);
        } else if !canned.body.is_empty() {
            resp.set_body(canned.body.clone());
        }
        Ok(resp)
    }
}

pub static DIRECTORY_URL: &str = "https://ca.example/directory";
pub static ACCOUNT_URL: &str = "https://ca.example/acct/1";

pub fn directory_body() -> String {
    r#"{
        "newNonce": "https://ca.example/new-nonce",
        "newAccount": "https://ca.example/new-account",
        "newOrder": "https://ca.example/new-order",
        "newAuthz": "https://ca.example/new-authz",
        "revokeCert": "https://ca.example/revoke-cert",
        "keyChange": "https://ca.example/key-change",
        "meta": {
            "termsOfService": "https://ca.example/terms",
            "website": "https://ca.example/",
            "caaIdentities": ["ca.example"],
            "profiles": {"classic": "the classic profile", "shortlived": "6 days"}
        }
    }"#
    .to_string()
}

pub fn test_session(http: &Arc<FakeHttp>) -> Session {
    let http: Arc<dyn HttpClient> = http.clone();
    Session::new(http, url(DIRECTORY_URL))
}

pub fn test_login(session: &Session) -> Login {
    let key = es256::from_jwk(es256::tests::JWK).unwrap();
    Login::new(session, url(ACCOUNT_URL), key)
}

/// A poll timer running on virtual time. Sleeping advances the clock
/// instantly and records the requested duration.
#[derive(Debug)]
pub struct VirtualTimer {
    now: Mutex<DateTime<Utc>>,
    sleeps: Mutex<Vec<ChronoDuration>>,
    cancel_after: Option<usize>,
}

impl VirtualTimer {
    pub fn new() -> VirtualTimer {
        VirtualTimer {
            now: Mutex::new(Utc::now()),
            sleeps: Mutex::new(Vec::new()),
            cancel_after: None,
        }
    }

    pub fn cancelling_after(sleeps: usize) -> VirtualTimer {
        VirtualTimer {
            cancel_after: Some(sleeps),
            ..VirtualTimer::new()
        }
    }

    pub fn sleeps(&self) -> Vec<ChronoDuration> {
        self.sleeps.lock().unwrap().clone()
    }
}

#[async_trait]
impl PollTimer for VirtualTimer {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap()
    }

    async fn sleep_until(&self, instant: DateTime<Utc>) -> AcmeResult<()> {
        let mut sleeps = self.sleeps.lock().unwrap();
        if self.cancel_after == Some(sleeps.len()) {
            return Err(AcmeError::Cancelled);
        }
        let mut now = self.now.lock().unwrap();
        sleeps.push(instant - *now);
        if instant > *now {
            *now = instant;
        }
        Ok(())
    }
}
