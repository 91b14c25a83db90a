use chrono::{DateTime, Utc};
use http_types::Url;

use crate::connection::Connection;
use crate::error::{AcmeError, AcmeResult};
use crate::identifier::Identifier;
use crate::json::{Json, JsonBuilder};
use crate::login::Login;
use crate::resource::ResourceState;
use crate::status::Status;

use super::challenge::{Challenge, ChallengeVariant, TypedChallenge};

/// An authorization for a single identifier (RFC 8555 section 7.1.4).
#[derive(Debug)]
pub struct Authorization {
    state: ResourceState,
}

impl Authorization {
    /// Binds the authorization at the given URL; the JSON is fetched on
    /// first access.
    pub fn bind(login: Login, location: Url) -> Authorization {
        Authorization {
            state: ResourceState::bind(login, location, "authorization"),
        }
    }

    pub(crate) fn of(login: Login, location: Url, json: Json) -> Authorization {
        Authorization {
            state: ResourceState::of(login, location, "authorization", json),
        }
    }

    pub fn login(&self) -> &Login {
        self.state.login()
    }

    pub fn location(&self) -> &Url {
        self.state.location()
    }

    pub async fn identifier(&self) -> AcmeResult<Identifier> {
        self.state
            .ensure_loaded()
            .await?
            .get("identifier")
            .as_identifier()
    }

    pub async fn status(&self) -> AcmeResult<Status> {
        self.state.status().await
    }

    pub async fn expires(&self) -> AcmeResult<Option<DateTime<Utc>>> {
        self.state
            .ensure_loaded()
            .await?
            .get("expires")
            .optional()
            .map(|v| v.as_instant())
            .transpose()
    }

    /// True when the authorization stems from a wildcard identifier.
    pub async fn wildcard(&self) -> AcmeResult<bool> {
        self.state
            .ensure_loaded()
            .await?
            .get("wildcard")
            .optional()
            .map(|v| v.as_bool())
            .transpose()
            .map(|v| v.unwrap_or(false))
    }

    /// All offered challenges, dispatched through the session's registry.
    pub async fn challenges(&self) -> AcmeResult<Vec<ChallengeVariant>> {
        let json = self.state.ensure_loaded().await?;
        let session = self.login().session().clone();
        json.get("challenges")
            .as_array()?
            .iter()
            .map(|item| session.create_challenge(self.login(), item.as_json()?))
            .collect()
    }

    /// The challenge of the given concrete type. At most one may be
    /// offered; duplicates are a protocol error.
    pub async fn find_challenge<T: TypedChallenge>(&self) -> AcmeResult<Option<T>> {
        Ok(self
            .challenge_of_type(T::TYPE_NAME)
            .await?
            .map(T::assemble))
    }

    /// Like [`Authorization::find_challenge`], but looked up by type string
    /// and dispatched through the registry.
    pub async fn find_challenge_type(&self, type_: &str) -> AcmeResult<Option<ChallengeVariant>> {
        match self.challenge_of_type(type_).await? {
            Some(challenge) => {
                let json = challenge.json().await?;
                Ok(Some(
                    self.login().session().create_challenge(self.login(), json)?,
                ))
            }
            None => Ok(None),
        }
    }

    async fn challenge_of_type(&self, type_: &str) -> AcmeResult<Option<Challenge>> {
        let json = self.state.ensure_loaded().await?;
        let mut found = None;
        for item in json.get("challenges").as_array()? {
            if item.get("type").as_string()? != type_ {
                continue;
            }
            if found.is_some() {
                return Err(AcmeError::Protocol(format!("multiple {type_} challenges")));
            }
            found = Some(Challenge::of(self.login().clone(), item.as_json()?)?);
        }
        Ok(found)
    }

    /// Relinquishes the authorization (RFC 8555 section 7.5.2).
    pub async fn deactivate(&self) -> AcmeResult<()> {
        let payload = JsonBuilder::new().put("status", "deactivated").build();
        let mut conn = Connection::new(self.login().session());
        conn.signed_request(self.state.location(), Some(&payload), self.login())
            .await?;
        self.state.set_json(conn.read_json().await?);
        Ok(())
    }

    pub async fn fetch(&self) -> AcmeResult<Option<DateTime<Utc>>> {
        self.state.fetch().await
    }

    pub fn invalidate(&self) {
        self.state.invalidate()
    }
}

impl PartialEq for Authorization {
    fn eq(&self, other: &Self) -> bool {
        self.state == other.state
    }
}

impl Eq for Authorization {}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::resources::challenge::{Dns01Challenge, Http01Challenge};
    use crate::testing::{
        block_on, directory_body, test_login, test_session, url, CannedResponse, FakeHttp,
    };

    fn authz_json() -> serde_json::Value {
        json!({
            "status": "pending",
            "expires": "2016-01-02T14:09:30Z",
            "identifier": { "type": "dns", "value": "www.example.org" },
            "challenges": [
                {
                    "type": "http-01",
                    "url": "https://ca.example/authz/1/0",
                    "status": "pending",
                    "token": "DGyRejmCefe7v4NfDGDKfA"
                },
                {
                    "type": "dns-01",
                    "url": "https://ca.example/authz/1/1",
                    "status": "pending",
                    "token": "DGyRejmCefe7v4NfDGDKfA"
                }
            ]
        })
    }

    fn hydrated() -> Authorization {
        let session = test_session(&FakeHttp::new());
        let login = test_login(&session);
        Authorization::of(
            login,
            url("https://ca.example/authz/1"),
            Json::from_value(authz_json()).unwrap(),
        )
    }

    #[test]
    fn accessors() {
        let authz = hydrated();
        block_on(async {
            assert_eq!(authz.status().await.unwrap(), Status::Pending);
            assert_eq!(
                authz.identifier().await.unwrap(),
                Identifier::new("dns", "www.example.org")
            );
            assert!(!authz.wildcard().await.unwrap());
            assert_eq!(authz.challenges().await.unwrap().len(), 2);
        });
    }

    #[test]
    fn find_challenge_by_type() {
        let authz = hydrated();
        block_on(async {
            let http01 = authz.find_challenge::<Http01Challenge>().await.unwrap();
            assert!(http01.is_some());
            let dns01 = authz.find_challenge::<Dns01Challenge>().await.unwrap();
            assert_eq!(
                dns01.unwrap().url().as_str(),
                "https://ca.example/authz/1/1"
            );

            let variant = authz.find_challenge_type("http-01").await.unwrap().unwrap();
            assert!(matches!(variant, ChallengeVariant::Http01(_)));
            assert!(authz
                .find_challenge_type("tls-alpn-01")
                .await
                .unwrap()
                .is_none());
        });
    }

    #[test]
    fn duplicate_challenge_types_raise() {
        let session = test_session(&FakeHttp::new());
        let login = test_login(&session);
        let mut json = authz_json();
        json["challenges"][1]["type"] = json!("http-01");
        let authz = Authorization::of(
            login,
            url("https://ca.example/authz/1"),
            Json::from_value(json).unwrap(),
        );
        block_on(async {
            let err = authz
                .find_challenge::<Http01Challenge>()
                .await
                .unwrap_err();
            assert_eq!(err.to_string(), "protocol: multiple http-01 challenges");
        });
    }

    #[test]
    fn lazy_loading_fetches_exactly_once() {
        let http = FakeHttp::new();
        http.push(CannedResponse::json(directory_body()));
        http.push(CannedResponse::empty(200).nonce("nonce-1"));
        http.push(CannedResponse::json(authz_json().to_string()).nonce("nonce-2"));
        let session = test_session(&http);
        let login = test_login(&session);
        let authz = Authorization::bind(login, url("https://ca.example/authz/1"));
        block_on(async {
            assert_eq!(
                authz.identifier().await.unwrap(),
                Identifier::new("dns", "www.example.org")
            );
            let after_first = http.requests().len();
            assert_eq!(
                http.requests()
                    .iter()
                    .filter(|r| r.method == "POST")
                    .count(),
                1
            );
            // the cached JSON answers the second read
            authz.identifier().await.unwrap();
            assert_eq!(http.requests().len(), after_first);
        });
    }

    #[test]
    fn lazy_loading_failure_names_the_resource() {
        let http = FakeHttp::new();
        http.push(CannedResponse::json(directory_body()));
        http.push(CannedResponse::empty(200).nonce("nonce-1"));
        http.push(CannedResponse::problem(
            404,
            r#"{"type":"urn:ietf:params:acme:error:malformed","detail":"gone"}"#,
        ));
        let session = test_session(&http);
        let login = test_login(&session);
        let authz = Authorization::bind(login, url("https://ca.example/authz/1"));
        block_on(async {
            let err = authz.identifier().await.unwrap_err();
            match err {
                AcmeError::LazyLoading { resource, .. } => assert_eq!(resource, "authorization"),
                other => panic!("unexpected error {other:?}"),
            }
        });
    }
}
