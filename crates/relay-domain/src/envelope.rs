//! The self-describing content stored with every event.
//!
//! Wire shape: `{"body": <payload>, "event_name": "<name>", ...headers}`.

use serde_json::{Map, Value};

pub const BODY_FIELD: &str = "body";
pub const EVENT_NAME_FIELD: &str = "event_name";

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum EnvelopeError {
    #[error("content is not valid json: {0}")]
    InvalidJson(String),
    #[error("content is not a json object")]
    NotAnObject,
    #[error("content has no body")]
    MissingBody,
    #[error("event body is not a json object")]
    BodyNotAnObject,
    #[error("content has no string event_name")]
    MissingEventName,
}

impl EnvelopeError {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::InvalidJson(_) => "INVALID_JSON",
            Self::NotAnObject => "NOT_AN_OBJECT",
            Self::MissingBody => "MISSING_BODY",
            Self::BodyNotAnObject => "BODY_NOT_AN_OBJECT",
            Self::MissingEventName => "MISSING_EVENT_NAME",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    pub event_name: String,
    pub body: Value,
    /// Extra top-level fields, never `body` or `event_name`.
    pub headers: Map<String, Value>,
}

impl Envelope {
    pub fn new(event_name: impl Into<String>, body: Value) -> Self {
        Self {
            event_name: event_name.into(),
            body,
            headers: Map::new(),
        }
    }

    /// Adds headers without overriding reserved fields or earlier headers.
    pub fn with_headers<I, K>(mut self, headers: I) -> Self
    where
        I: IntoIterator<Item = (K, Value)>,
        K: Into<String>,
    {
        for (key, value) in headers {
            let key = key.into();
            if key == BODY_FIELD || key == EVENT_NAME_FIELD {
                continue;
            }
            self.headers.entry(key).or_insert(value);
        }
        self
    }

    pub fn parse(content: &str) -> Result<Self, EnvelopeError> {
        let value: Value = serde_json::from_str(content)
            .map_err(|e| EnvelopeError::InvalidJson(e.to_string()))?;
        let Value::Object(mut fields) = value else {
            return Err(EnvelopeError::NotAnObject);
        };
        let body = fields.remove(BODY_FIELD).ok_or(EnvelopeError::MissingBody)?;
        if !body.is_object() {
            return Err(EnvelopeError::BodyNotAnObject);
        }
        let event_name = match fields.remove(EVENT_NAME_FIELD) {
            Some(Value::String(name)) => name,
            _ => return Err(EnvelopeError::MissingEventName),
        };
        Ok(Self {
            event_name,
            body,
            headers: fields,
        })
    }

    pub fn to_content(&self) -> String {
        let mut fields = Map::with_capacity(self.headers.len() + 2);
        fields.insert(BODY_FIELD.to_owned(), self.body.clone());
        fields.insert(
            EVENT_NAME_FIELD.to_owned(),
            Value::String(self.event_name.clone()),
        );
        for (key, value) in &self.headers {
            fields.insert(key.clone(), value.clone());
        }
        Value::Object(fields).to_string()
    }
}
