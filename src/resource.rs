use std::fmt;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use http_types::Url;
use log::debug;

use crate::connection::Connection;
use crate::error::{AcmeError, AcmeResult};
use crate::json::Json;
use crate::login::Login;
use crate::status::Status;

/// Shared state of every server-side resource handle: the location URL, the
/// login it is accessed with, and the lazily fetched JSON snapshot.
///
/// A handle is either bound to a bare URL (`bind`) and hydrated on first
/// access, or constructed from a response that already carried the JSON
/// (`of`). Two handles are equal when their locations are.
pub(crate) struct ResourceState {
    login: Login,
    location: Url,
    kind: &'static str,
    data: Mutex<Option<Json>>,
    retry_after: Mutex<Option<DateTime<Utc>>>,
}

impl ResourceState {
    pub fn bind(login: Login, location: Url, kind: &'static str) -> Self {
        ResourceState {
            login,
            location,
            kind,
            data: Mutex::new(None),
            retry_after: Mutex::new(None),
        }
    }

    pub fn of(login: Login, location: Url, kind: &'static str, json: Json) -> Self {
        let state = Self::bind(login, location, kind);
        state.set_json(json);
        state
    }

    pub fn login(&self) -> &Login {
        &self.login
    }

    pub fn location(&self) -> &Url {
        &self.location
    }

    pub fn kind(&self) -> &'static str {
        self.kind
    }

    pub fn json_if_cached(&self) -> Option<Json> {
        self.data.lock().unwrap().clone()
    }

    pub fn retry_after(&self) -> Option<DateTime<Utc>> {
        *self.retry_after.lock().unwrap()
    }

    pub fn set_json(&self, json: Json) {
        self.invalidate();
        *self.data.lock().unwrap() = Some(json);
    }

    pub fn invalidate(&self) {
        *self.data.lock().unwrap() = None;
        *self.retry_after.lock().unwrap() = None;
    }

    pub(crate) fn store_retry_after(&self, instant: Option<DateTime<Utc>>) {
        *self.retry_after.lock().unwrap() = instant;
    }

    /// POST-as-GET against the location; replaces the cached JSON and
    /// remembers the response's Retry-After.
    pub async fn fetch(&self) -> AcmeResult<Option<DateTime<Utc>>> {
        let mut conn = Connection::new(self.login.session());
        conn.post_as_get(&self.location, &self.login).await?;
        let json = conn.read_json().await?;
        let retry_after = conn.retry_after();
        self.set_json(json);
        self.store_retry_after(retry_after);
        debug!("fetched {} from {}", self.kind, self.location);
        Ok(retry_after)
    }

    /// The cached JSON, fetching it first if the handle was bound lazily.
    pub async fn ensure_loaded(&self) -> AcmeResult<Json> {
        if let Some(json) = self.json_if_cached() {
            return Ok(json);
        }
        self.fetch().await.map_err(|err| AcmeError::LazyLoading {
            resource: self.kind,
            source: Box::new(err),
        })?;
        self.json_if_cached()
            .ok_or_else(|| AcmeError::Protocol("fetch stored no data".to_string()))
    }

    pub async fn status(&self) -> AcmeResult<Status> {
        self.ensure_loaded().await?.get("status").as_status()
    }
}

impl PartialEq for ResourceState {
    fn eq(&self, other: &Self) -> bool {
        self.location == other.location
    }
}

impl Eq for ResourceState {}

impl fmt::Debug for ResourceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourceState")
            .field("kind", &self.kind)
            .field("location", &self.location)
            .finish()
    }
}
