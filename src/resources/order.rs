use std::time::Duration;

use chrono::{DateTime, Utc};
use http_types::Url;

use crate::connection::Connection;
use crate::error::{AcmeError, AcmeResult};
use crate::identifier::Identifier;
use crate::json::{Json, JsonBuilder};
use crate::login::Login;
use crate::poll::{wait_for_status, PollTimer};
use crate::problem::AcmeProblem;
use crate::resource::ResourceState;
use crate::session;
use crate::status::Status;

use super::authorization::Authorization;
use super::certificate::Certificate;

/// A certificate order (RFC 8555 section 7.1.3).
#[derive(Debug)]
pub struct Order {
    state: ResourceState,
}

impl Order {
    /// Binds the order at the given URL; the JSON is fetched on first
    /// access.
    pub fn bind(login: Login, location: Url) -> Order {
        Order {
            state: ResourceState::bind(login, location, "order"),
        }
    }

    pub(crate) fn of(login: Login, location: Url, json: Json) -> Order {
        Order {
            state: ResourceState::of(login, location, "order", json),
        }
    }

    pub fn login(&self) -> &Login {
        self.state.login()
    }

    pub fn location(&self) -> &Url {
        self.state.location()
    }

    pub async fn status(&self) -> AcmeResult<Status> {
        self.state.status().await
    }

    pub async fn expires(&self) -> AcmeResult<Option<DateTime<Utc>>> {
        self.optional_instant("expires").await
    }

    pub async fn not_before(&self) -> AcmeResult<Option<DateTime<Utc>>> {
        self.optional_instant("notBefore").await
    }

    pub async fn not_after(&self) -> AcmeResult<Option<DateTime<Utc>>> {
        self.optional_instant("notAfter").await
    }

    async fn optional_instant(&self, key: &str) -> AcmeResult<Option<DateTime<Utc>>> {
        self.state
            .ensure_loaded()
            .await?
            .get(key)
            .optional()
            .map(|v| v.as_instant())
            .transpose()
    }

    pub async fn identifiers(&self) -> AcmeResult<Vec<Identifier>> {
        self.state
            .ensure_loaded()
            .await?
            .get("identifiers")
            .as_array()?
            .iter()
            .map(|item| item.as_identifier())
            .collect()
    }

    /// The certificate profile the order was placed under, if the CA
    /// advertises profiles.
    pub async fn profile(&self) -> AcmeResult<Option<String>> {
        self.state
            .ensure_loaded()
            .await?
            .get("profile")
            .optional()
            .map(|v| v.as_string())
            .transpose()
    }

    /// The problem that moved the order to `invalid`, if any.
    pub async fn error(&self) -> AcmeResult<Option<AcmeProblem>> {
        self.state
            .ensure_loaded()
            .await?
            .get("error")
            .optional()
            .map(|v| v.as_problem(self.location()))
            .transpose()
    }

    pub async fn authorization_urls(&self) -> AcmeResult<Vec<Url>> {
        self.state
            .ensure_loaded()
            .await?
            .get("authorizations")
            .as_array()?
            .iter()
            .map(|item| item.as_url())
            .collect()
    }

    pub async fn authorizations(&self) -> AcmeResult<Vec<Authorization>> {
        Ok(self
            .authorization_urls()
            .await?
            .into_iter()
            .map(|url| Authorization::bind(self.login().clone(), url))
            .collect())
    }

    /// Finalizes the order with a DER-encoded PKCS#10 CSR. The order moves
    /// to `processing`; follow up with [`Order::wait_for_completion`].
    pub async fn execute(&self, csr_der: &[u8]) -> AcmeResult<()> {
        let json = self.state.ensure_loaded().await?;
        let finalize = json.get("finalize").as_url()?;
        let payload = JsonBuilder::new().put_base64("csr", csr_der).build();
        let mut conn = Connection::new(self.login().session());
        conn.signed_request(&finalize, Some(&payload), self.login())
            .await?;
        let json = conn.read_json().await?;
        let retry_after = conn.retry_after();
        self.state.set_json(json);
        self.state.store_retry_after(retry_after);
        Ok(())
    }

    /// Polls until all authorizations are satisfied and the order can be
    /// finalized.
    pub async fn wait_until_ready(
        &self,
        timeout: Duration,
        timer: &dyn PollTimer,
    ) -> AcmeResult<Status> {
        wait_for_status(
            &self.state,
            &[Status::Ready, Status::Invalid],
            timeout,
            timer,
        )
        .await
    }

    /// Polls until the CA finished processing the finalized order.
    pub async fn wait_for_completion(
        &self,
        timeout: Duration,
        timer: &dyn PollTimer,
    ) -> AcmeResult<Status> {
        wait_for_status(
            &self.state,
            &[Status::Valid, Status::Invalid],
            timeout,
            timer,
        )
        .await
    }

    /// Handle on the issued certificate. Only present once the order is
    /// `valid`.
    pub async fn certificate(&self) -> AcmeResult<Certificate> {
        let json = self.state.ensure_loaded().await?;
        let url = match json.get("certificate").optional() {
            Some(value) => value.as_url()?,
            None => return Err(AcmeError::MissingExpectedField("certificate")),
        };
        Ok(Certificate::bind(self.login().clone(), url))
    }

    pub async fn fetch(&self) -> AcmeResult<Option<DateTime<Utc>>> {
        self.state.fetch().await
    }

    pub fn invalidate(&self) {
        self.state.invalidate()
    }
}

impl PartialEq for Order {
    fn eq(&self, other: &Self) -> bool {
        self.state == other.state
    }
}

impl Eq for Order {}

/// Fluent construction of a newOrder request.
#[derive(Debug)]
pub struct OrderBuilder {
    login: Login,
    identifiers: Vec<Identifier>,
    not_before: Option<DateTime<Utc>>,
    not_after: Option<DateTime<Utc>>,
    profile: Option<String>,
}

impl OrderBuilder {
    pub(crate) fn new(login: Login) -> OrderBuilder {
        OrderBuilder {
            login,
            identifiers: Vec::new(),
            not_before: None,
            not_after: None,
            profile: None,
        }
    }

    pub fn identifier(mut self, identifier: Identifier) -> Self {
        self.identifiers.push(identifier);
        self
    }

    pub fn identifiers(mut self, identifiers: impl IntoIterator<Item = Identifier>) -> Self {
        self.identifiers.extend(identifiers);
        self
    }

    pub fn domain(self, name: impl AsRef<str>) -> AcmeResult<Self> {
        Ok(self.identifier(Identifier::dns(name)?))
    }

    pub fn domains(
        mut self,
        names: impl IntoIterator<Item = impl AsRef<str>>,
    ) -> AcmeResult<Self> {
        for name in names {
            self = self.domain(name)?;
        }
        Ok(self)
    }

    pub fn not_before(mut self, instant: DateTime<Utc>) -> Self {
        self.not_before = Some(instant);
        self
    }

    pub fn not_after(mut self, instant: DateTime<Utc>) -> Self {
        self.not_after = Some(instant);
        self
    }

    /// Requests a certificate profile offered in the directory metadata.
    pub fn profile(mut self, name: impl Into<String>) -> Self {
        self.profile = Some(name.into());
        self
    }

    pub async fn create(self) -> AcmeResult<Order> {
        if self.identifiers.is_empty() {
            return Err(AcmeError::InvalidState(
                "order needs at least one identifier".to_string(),
            ));
        }
        let session = self.login.session().clone();
        let url = session.resource_url(session::NEW_ORDER).await?;
        let identifiers = self
            .identifiers
            .iter()
            .map(serde_json::to_value)
            .collect::<Result<Vec<_>, _>>()?;
        let mut payload = JsonBuilder::new().array("identifiers", identifiers);
        if let Some(t) = self.not_before {
            payload = payload.put_instant("notBefore", t);
        }
        if let Some(t) = self.not_after {
            payload = payload.put_instant("notAfter", t);
        }
        payload = payload.put_opt("profile", self.profile);
        let mut conn = Connection::new(&session);
        conn.signed_request(&url, Some(&payload.build()), &self.login)
            .await?;
        let location = conn.require_location()?;
        let json = conn.read_json().await?;
        Ok(Order::of(self.login, location, json))
    }
}
