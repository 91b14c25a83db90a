use chrono::{DateTime, Utc};
use http_types::Url;
use log::warn;
use serde_json::value::RawValue;

use crate::connection::Connection;
use crate::crypto::account_key::AccountKey;
use crate::crypto::eab;
use crate::crypto::jws::{jws_flattened, JwsHeader};
use crate::error::{AcmeError, AcmeResult};
use crate::identifier::Identifier;
use crate::json::{Json, JsonBuilder};
use crate::login::Login;
use crate::resource::ResourceState;
use crate::session::{self, Session};
use crate::status::{RevocationReason, Status};

use super::authorization::Authorization;
use super::certificate;
use super::order::OrderBuilder;

const MAX_ORDER_PAGES: usize = 32;

/// The account resource (RFC 8555 section 7.1.2), located at the login's
/// account URL.
#[derive(Debug)]
pub struct Account {
    state: ResourceState,
}

impl Account {
    pub fn bind(login: Login) -> Account {
        let location = login.location().clone();
        Account {
            state: ResourceState::bind(login, location, "account"),
        }
    }

    pub(crate) fn of(login: Login, location: Url, json: Json) -> Account {
        Account {
            state: ResourceState::of(login, location, "account", json),
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

    pub async fn contacts(&self) -> AcmeResult<Vec<Url>> {
        match self.state.ensure_loaded().await?.get("contact").optional() {
            Some(value) => value.as_array()?.iter().map(|item| item.as_uri()).collect(),
            None => Ok(Vec::new()),
        }
    }

    pub async fn terms_of_service_agreed(&self) -> AcmeResult<Option<bool>> {
        self.state
            .ensure_loaded()
            .await?
            .get("termsOfServiceAgreed")
            .optional()
            .map(|v| v.as_bool())
            .transpose()
    }

    /// URL of the account's orders list. Required by RFC 8555, but some
    /// widely deployed CAs omit it.
    pub async fn orders_url(&self) -> AcmeResult<Option<Url>> {
        self.state
            .ensure_loaded()
            .await?
            .get("orders")
            .optional()
            .map(|v| v.as_url())
            .transpose()
    }

    pub async fn external_account_binding(&self) -> AcmeResult<Option<Json>> {
        self.state
            .ensure_loaded()
            .await?
            .get("externalAccountBinding")
            .optional()
            .map(|v| v.as_json())
            .transpose()
    }

    /// Refetches the account from the server.
    pub async fn update(&self) -> AcmeResult<Option<DateTime<Utc>>> {
        self.state.fetch().await
    }

    /// Starts an account modification; finish with
    /// [`AccountEditor::commit`].
    pub fn modify(&self) -> AccountEditor<'_> {
        AccountEditor {
            account: self,
            contacts: Vec::new(),
            terms_of_service_agreed: None,
        }
    }

    pub fn new_order(&self) -> OrderBuilder {
        OrderBuilder::new(self.login().clone())
    }

    /// Requests an authorization ahead of any order (RFC 8555 section
    /// 7.4.1). Raises [`AcmeError::NotSupported`] when the CA offers no
    /// `newAuthz` endpoint.
    pub async fn pre_authorize(&self, identifier: Identifier) -> AcmeResult<Authorization> {
        let session = self.login().session().clone();
        let url = session.resource_url(session::NEW_AUTHZ).await?;
        let payload = JsonBuilder::new()
            .put("identifier", serde_json::to_value(&identifier)?)
            .build();
        let mut conn = Connection::new(&session);
        conn.signed_request(&url, Some(&payload), self.login()).await?;
        let location = conn.require_location()?;
        let json = conn.read_json().await?;
        Ok(Authorization::of(self.login().clone(), location, json))
    }

    pub async fn pre_authorize_domain(&self, name: impl AsRef<str>) -> AcmeResult<Authorization> {
        self.pre_authorize(Identifier::dns(name)?).await
    }

    /// Rolls the account over to a new key pair (RFC 8555 section 7.3.5)
    /// and returns the login bound to it. The old login no longer signs
    /// valid requests afterwards.
    pub async fn key_change(&self, new_key: impl AccountKey + 'static) -> AcmeResult<Login> {
        let session = self.login().session().clone();
        let url = session.resource_url(session::KEY_CHANGE).await?;

        let old_jwk: serde_json::Value =
            serde_json::from_str(&self.login().key().public_jwk().map_err(AcmeError::Crypto)?)?;
        let inner_payload = JsonBuilder::new()
            .put("account", self.login().location().as_str())
            .put("oldKey", old_jwk)
            .build();
        let new_jwk =
            RawValue::from_string(new_key.public_jwk().map_err(AcmeError::Crypto)?)?;
        let inner_header = JwsHeader {
            alg: new_key.jws_alg(),
            nonce: None,
            url: url.as_str(),
            jwk: Some(new_jwk),
            kid: None,
        };
        let inner = jws_flattened(&new_key, &inner_header, inner_payload.to_string().as_bytes())
            .map_err(AcmeError::Crypto)?;

        let payload = Json::from_value(serde_json::to_value(&inner)?)?;
        let mut conn = Connection::new(&session);
        conn.signed_request(&url, Some(&payload), self.login()).await?;
        self.state.invalidate();
        Ok(Login::new(&session, self.login().location().clone(), new_key))
    }

    /// Deactivates the account. Irreversible; the server refuses all
    /// further requests under this login.
    pub async fn deactivate(&self) -> AcmeResult<()> {
        let payload = JsonBuilder::new().put("status", "deactivated").build();
        let mut conn = Connection::new(self.login().session());
        conn.signed_request(self.state.location(), Some(&payload), self.login())
            .await?;
        self.state.set_json(conn.read_json().await?);
        Ok(())
    }

    /// Revokes a certificate issued to this account (RFC 8555 section 7.6).
    pub async fn revoke_certificate(
        &self,
        cert_pem: &str,
        reason: Option<RevocationReason>,
    ) -> AcmeResult<()> {
        let session = self.login().session().clone();
        let url = session.resource_url(session::REVOKE_CERT).await?;
        let der = certificate::pem_to_der(cert_pem)?;
        let payload = JsonBuilder::new()
            .put_base64("certificate", der)
            .put_opt("reason", reason.map(|r| r.code()))
            .build();
        let mut conn = Connection::new(&session);
        conn.signed_request(&url, Some(&payload), self.login()).await
    }

    /// URLs of the account's orders, walking `Link rel="next"` pagination.
    pub async fn orders(&self) -> AcmeResult<Vec<Url>> {
        let mut next = match self.orders_url().await? {
            Some(url) => Some(url),
            None => return Ok(Vec::new()),
        };
        let mut orders = Vec::new();
        let mut pages = 0;
        while let Some(url) = next {
            pages += 1;
            if pages > MAX_ORDER_PAGES {
                return Err(AcmeError::Protocol(
                    "orders list pagination does not terminate".to_string(),
                ));
            }
            let mut conn = Connection::new(self.login().session());
            conn.post_as_get(&url, self.login()).await?;
            let page = conn.read_json().await?;
            for item in page.get("orders").as_array()? {
                orders.push(item.as_url()?);
            }
            next = conn.links("next").into_iter().next();
        }
        Ok(orders)
    }

    pub fn invalidate(&self) {
        self.state.invalidate()
    }
}

impl PartialEq for Account {
    fn eq(&self, other: &Self) -> bool {
        self.state == other.state
    }
}

impl Eq for Account {}

/// A contact address for the account.
pub enum Contact {
    Email(String),
    Uri(String),
}

impl Contact {
    pub(crate) fn uri(self) -> String {
        match self {
            Self::Email(email) if !email.starts_with("mailto:") => format!("mailto:{}", email),
            Self::Email(email) => email,
            Self::Uri(uri) => uri,
        }
    }
}

/// Collects changes to an account and commits them in one signed POST.
pub struct AccountEditor<'a> {
    account: &'a Account,
    contacts: Vec<String>,
    terms_of_service_agreed: Option<bool>,
}

impl AccountEditor<'_> {
    /// Adds a contact; committing replaces the server-side contact list
    /// with everything added here.
    pub fn add_contact(mut self, contact: Contact) -> Self {
        self.contacts.push(contact.uri());
        self
    }

    pub fn add_email(self, email: impl Into<String>) -> Self {
        self.add_contact(Contact::Email(email.into()))
    }

    /// States agreement with the CA's current terms of service, as a
    /// `userActionRequired` problem may demand.
    pub fn agree_to_terms_of_service(mut self) -> Self {
        self.terms_of_service_agreed = Some(true);
        self
    }

    pub async fn commit(self) -> AcmeResult<()> {
        let mut payload = JsonBuilder::new();
        if !self.contacts.is_empty() {
            payload = payload.array("contact", self.contacts);
        }
        payload = payload.put_opt("termsOfServiceAgreed", self.terms_of_service_agreed);
        let payload = payload.build();
        let mut conn = Connection::new(self.account.login().session());
        conn.signed_request(
            self.account.state.location(),
            Some(&payload),
            self.account.login(),
        )
        .await?;
        self.account.state.set_json(conn.read_json().await?);
        Ok(())
    }
}

/// Fluent construction of a newAccount request.
pub struct AccountBuilder {
    contacts: Vec<String>,
    terms_of_service_agreed: bool,
    only_existing: bool,
    key: Option<Box<dyn AccountKey>>,
    key_identifier: Option<(String, String)>,
}

impl AccountBuilder {
    pub fn new() -> AccountBuilder {
        AccountBuilder {
            contacts: Vec::new(),
            terms_of_service_agreed: false,
            only_existing: false,
            key: None,
            key_identifier: None,
        }
    }

    pub fn contact(mut self, contact: Contact) -> Self {
        self.contacts.push(contact.uri());
        self
    }

    pub fn email(self, email: impl Into<String>) -> Self {
        self.contact(Contact::Email(email.into()))
    }

    /// States agreement with the CA's terms of service; most CAs refuse
    /// registration without it.
    pub fn agree_to_terms_of_service(mut self) -> Self {
        self.terms_of_service_agreed = true;
        self
    }

    /// Only look up the account for the key, never create one.
    pub fn only_existing(mut self) -> Self {
        self.only_existing = true;
        self
    }

    /// Uses this key pair instead of generating a fresh one.
    pub fn use_key(mut self, key: impl AccountKey + 'static) -> Self {
        self.key = Some(Box::new(key));
        self
    }

    /// Binds the registration to an external account (RFC 8555 section
    /// 7.3.4). `mac_key` is the base64url encoded MAC key issued by the CA.
    pub fn with_key_identifier(
        mut self,
        kid: impl Into<String>,
        mac_key: impl Into<String>,
    ) -> Self {
        self.key_identifier = Some((kid.into(), mac_key.into()));
        self
    }

    /// Registers (or, with `only_existing`, locates) the account. The
    /// request is signed with the embedded public key; the account URL
    /// comes back in the Location header.
    pub async fn create(self, session: &Session) -> AcmeResult<Account> {
        let key: Box<dyn AccountKey> = self
            .key
            .unwrap_or_else(|| Box::new(crate::crypto::generate_account_key()));
        let url = session.resource_url(session::NEW_ACCOUNT).await?;

        if session.meta().await?.external_account_required()? && self.key_identifier.is_none() {
            warn!("the CA requires an external account binding");
        }

        let mut payload = JsonBuilder::new();
        if !self.contacts.is_empty() {
            payload = payload.array("contact", self.contacts);
        }
        if self.terms_of_service_agreed {
            payload = payload.put("termsOfServiceAgreed", true);
        }
        if self.only_existing {
            payload = payload.put("onlyReturnExisting", true);
        }
        if let Some((kid, mac_key)) = &self.key_identifier {
            let public_jwk = key.public_jwk().map_err(AcmeError::Crypto)?;
            let binding = eab::external_account_binding(kid, mac_key, &url, &public_jwk)?;
            payload = payload.put("externalAccountBinding", serde_json::to_value(&binding)?);
        }

        let mut conn = Connection::new(session);
        conn.signed_key_request(&url, Some(&payload.build()), &*key)
            .await?;
        let location = conn.require_location()?;
        let json = conn.read_json().await?;
        let login = Login::new(session, location.clone(), key);
        Ok(Account::of(login, location, json))
    }
}

impl Default for AccountBuilder {
    fn default() -> Self {
        Self::new()
    }
}
