use std::fmt;

use chrono::{DateTime, SecondsFormat, Utc};
use http_types::Url;
use serde_json::Value as Inner;

use crate::error::{AcmeError, AcmeResult};
use crate::identifier::Identifier;
use crate::problem::AcmeProblem;
use crate::status::Status;

/// An immutable JSON object, as received from the server.
///
/// Field access goes through [`Json::get`], which returns a [`Value`] view
/// that knows its own path. Typed coercions fail with
/// [`AcmeError::Protocol`] carrying that path, so a bad server response
/// names the offending field.
#[derive(Clone, Debug)]
pub struct Json {
    path: String,
    value: Inner,
}

impl Json {
    /// Parses a JSON object from its serialized form.
    pub fn parse(input: &str) -> AcmeResult<Json> {
        let value: Inner = serde_json::from_str(input)
            .map_err(|err| AcmeError::Protocol(format!("invalid JSON: {err}")))?;
        Json::from_value(value)
    }

    /// Wraps an already deserialized value. It must be a JSON object.
    pub fn from_value(value: Inner) -> AcmeResult<Json> {
        if !value.is_object() {
            return Err(AcmeError::Protocol("expected a JSON object".to_string()));
        }
        Ok(Json {
            path: String::new(),
            value,
        })
    }

    pub fn empty() -> Json {
        Json {
            path: String::new(),
            value: Inner::Object(serde_json::Map::new()),
        }
    }

    pub(crate) fn at_path(path: String, value: Inner) -> Json {
        Json { path, value }
    }

    pub fn get(&self, key: &str) -> Value<'_> {
        Value {
            path: join_path(&self.path, key),
            value: self.value.get(key),
        }
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.value.get(key).is_some()
    }

    pub fn keys(&self) -> Vec<&str> {
        match self.value.as_object() {
            Some(map) => map.keys().map(String::as_str).collect(),
            None => Vec::new(),
        }
    }

    pub(crate) fn inner(&self) -> &Inner {
        &self.value
    }

    pub(crate) fn into_inner(self) -> Inner {
        self.value
    }
}

impl fmt::Display for Json {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.value)
    }
}

impl PartialEq for Json {
    fn eq(&self, other: &Self) -> bool {
        self.value == other.value
    }
}

impl Eq for Json {}

fn join_path(base: &str, key: &str) -> String {
    if base.is_empty() {
        key.to_string()
    } else {
        format!("{base}.{key}")
    }
}

/// A single value inside a [`Json`] tree, possibly absent.
#[derive(Clone, Debug)]
pub struct Value<'a> {
    path: String,
    value: Option<&'a Inner>,
}

impl<'a> Value<'a> {
    pub fn is_present(&self) -> bool {
        self.value.is_some()
    }

    /// `None` when the field is absent, otherwise the view itself. Chains
    /// with `map` and `transpose` for optional fields.
    pub fn optional(self) -> Option<Value<'a>> {
        if self.value.is_some() {
            Some(self)
        } else {
            None
        }
    }

    pub fn get(&self, key: &str) -> Value<'a> {
        Value {
            path: join_path(&self.path, key),
            value: self.value.and_then(|v| v.get(key)),
        }
    }

    fn required(&self) -> AcmeResult<&'a Inner> {
        self.value
            .ok_or_else(|| AcmeError::Protocol(format!("{}: required, but not set", self.path)))
    }

    fn fail(&self, reason: impl fmt::Display) -> AcmeError {
        AcmeError::Protocol(format!("{}: {}", self.path, reason))
    }

    pub fn as_string(&self) -> AcmeResult<String> {
        match self.required()? {
            Inner::String(s) => Ok(s.clone()),
            other => Err(self.fail(format!("expected a string, found {other}"))),
        }
    }

    pub fn as_int(&self) -> AcmeResult<i64> {
        match self.required()? {
            Inner::Number(n) => n
                .as_i64()
                .ok_or_else(|| self.fail(format!("{n} is not an integer"))),
            other => Err(self.fail(format!("expected a number, found {other}"))),
        }
    }

    pub fn as_bool(&self) -> AcmeResult<bool> {
        match self.required()? {
            Inner::Bool(b) => Ok(*b),
            other => Err(self.fail(format!("expected a boolean, found {other}"))),
        }
    }

    pub fn as_url(&self) -> AcmeResult<Url> {
        let raw = self.as_string()?;
        Url::parse(&raw).map_err(|err| self.fail(format!("invalid URL {raw}: {err}")))
    }

    /// Like [`Value::as_url`], for URIs that are not locators (`mailto:` and
    /// friends).
    pub fn as_uri(&self) -> AcmeResult<Url> {
        self.as_url()
    }

    pub fn as_instant(&self) -> AcmeResult<DateTime<Utc>> {
        let raw = self.as_string()?;
        DateTime::parse_from_rfc3339(&raw)
            .map(|t| t.with_timezone(&Utc))
            .map_err(|err| self.fail(format!("invalid timestamp {raw}: {err}")))
    }

    pub fn as_status(&self) -> AcmeResult<Status> {
        Ok(Status::parse(&self.as_string()?))
    }

    pub fn as_identifier(&self) -> AcmeResult<Identifier> {
        let json = self.as_json()?;
        Ok(Identifier::new(
            json.get("type").as_string()?,
            json.get("value").as_string()?,
        ))
    }

    /// Reads a problem document. Relative `type` and `instance` URIs are
    /// resolved against `base`, the URL the document was fetched from.
    pub fn as_problem(&self, base: &Url) -> AcmeResult<AcmeProblem> {
        AcmeProblem::from_json(&self.as_json()?, base)
    }

    pub fn as_array(&self) -> AcmeResult<Vec<Value<'a>>> {
        match self.required()? {
            Inner::Array(items) => Ok(items
                .iter()
                .enumerate()
                .map(|(i, item)| Value {
                    path: format!("{}[{}]", self.path, i),
                    value: Some(item),
                })
                .collect()),
            other => Err(self.fail(format!("expected an array, found {other}"))),
        }
    }

    pub fn as_json(&self) -> AcmeResult<Json> {
        match self.required()? {
            value @ Inner::Object(_) => Ok(Json::at_path(self.path.clone(), value.clone())),
            other => Err(self.fail(format!("expected an object, found {other}"))),
        }
    }
}

/// Builds a JSON object for a request payload.
///
/// Keys keep their insertion order, so the serialized form is stable and can
/// be signed deterministically.
#[derive(Debug, Default)]
pub struct JsonBuilder {
    map: serde_json::Map<String, Inner>,
}

impl JsonBuilder {
    pub fn new() -> JsonBuilder {
        JsonBuilder::default()
    }

    pub fn put(mut self, key: impl Into<String>, value: impl Into<Inner>) -> Self {
        self.map.insert(key.into(), value.into());
        self
    }

    pub fn put_opt(self, key: impl Into<String>, value: Option<impl Into<Inner>>) -> Self {
        match value {
            Some(value) => self.put(key, value),
            None => self,
        }
    }

    /// Stores an RFC 3339 timestamp with seconds precision, in UTC.
    pub fn put_instant(self, key: impl Into<String>, value: DateTime<Utc>) -> Self {
        self.put(key, value.to_rfc3339_opts(SecondsFormat::Secs, true))
    }

    /// Stores binary data in unpadded URL-safe base64.
    pub fn put_base64(self, key: impl Into<String>, data: impl AsRef<[u8]>) -> Self {
        self.put(key, crate::base64url::encode(data))
    }

    pub fn object(mut self, key: impl Into<String>, f: impl FnOnce(JsonBuilder) -> JsonBuilder) -> Self {
        let nested = f(JsonBuilder::new());
        self.map.insert(key.into(), Inner::Object(nested.map));
        self
    }

    pub fn array(
        mut self,
        key: impl Into<String>,
        values: impl IntoIterator<Item = impl Into<Inner>>,
    ) -> Self {
        self.map.insert(
            key.into(),
            Inner::Array(values.into_iter().map(Into::into).collect()),
        );
        self
    }

    pub fn build(self) -> Json {
        Json {
            path: String::new(),
            value: Inner::Object(self.map),
        }
    }
}
