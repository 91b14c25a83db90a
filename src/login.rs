use std::fmt;
use std::sync::Arc;

use http_types::Url;

use crate::crypto::account_key::AccountKey;
use crate::resources::account::Account;
use crate::session::Session;

/// The binding of an account URL to its key pair.
///
/// A login is immutable and cheap to clone; every authenticated resource
/// handle carries one. Resuming a persisted account needs only the session,
/// the account URL and the restored key.
#[derive(Clone)]
pub struct Login {
    inner: Arc<LoginInner>,
}

struct LoginInner {
    session: Session,
    location: Url,
    key: Box<dyn AccountKey>,
}

impl Login {
    pub fn new(session: &Session, location: Url, key: impl AccountKey + 'static) -> Login {
        Login {
            inner: Arc::new(LoginInner {
                session: session.clone(),
                location,
                key: Box::new(key),
            }),
        }
    }

    pub fn session(&self) -> &Session {
        &self.inner.session
    }

    /// The account URL, as assigned by the CA.
    pub fn location(&self) -> &Url {
        &self.inner.location
    }

    pub fn key(&self) -> &dyn AccountKey {
        self.inner.key.as_ref()
    }

    pub fn account(&self) -> Account {
        Account::bind(self.clone())
    }
}

impl fmt::Debug for Login {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Login")
            .field("location", &self.inner.location)
            .field("alg", &self.inner.key.jws_alg())
            .finish()
    }
}
