//! Trade events and raw push updates.
//!
//! The push collaborator delivers one [`RawUpdate`] per notification. Each update
//! carries up to three named fields (`CONFIRMS`, `OPU`, `WOU`), each either null or
//! a JSON-encoded object. Every non-null field decodes into one [`Event`].

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{StreamError, StreamResult};

/// A named field of the trade subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TradeField {
    /// Deal confirmations.
    #[serde(rename = "CONFIRMS")]
    Confirms,
    /// Open position updates.
    #[serde(rename = "OPU")]
    Opu,
    /// Working order updates.
    #[serde(rename = "WOU")]
    Wou,
}

impl TradeField {
    /// All fields in decode order.
    pub const ALL: [Self; 3] = [Self::Confirms, Self::Opu, Self::Wou];

    /// Wire name of the field.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Confirms => "CONFIRMS",
            Self::Opu => "OPU",
            Self::Wou => "WOU",
        }
    }

    const fn bit(self) -> u8 {
        match self {
            Self::Confirms => 0b001,
            Self::Opu => 0b010,
            Self::Wou => 0b100,
        }
    }
}

impl fmt::Display for TradeField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TradeField {
    type Err = StreamError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "CONFIRMS" => Ok(Self::Confirms),
            "OPU" => Ok(Self::Opu),
            "WOU" => Ok(Self::Wou),
            other => Err(StreamError::config(format!("unknown trade field '{other}'"))),
        }
    }
}

/// Set of trade fields a listener accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FieldSet(u8);

impl FieldSet {
    /// Accept every field.
    #[must_use]
    pub const fn all() -> Self {
        Self(0b111)
    }

    /// Accept a single field.
    #[must_use]
    pub const fn only(field: TradeField) -> Self {
        Self(field.bit())
    }

    /// Returns a copy with `field` added.
    #[must_use]
    pub const fn with(self, field: TradeField) -> Self {
        Self(self.0 | field.bit())
    }

    /// Returns true if `field` is in the set.
    #[must_use]
    pub const fn contains(self, field: TradeField) -> bool {
        self.0 & field.bit() != 0
    }

    /// Returns true if no field is accepted.
    #[must_use]
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }
}

impl Default for FieldSet {
    fn default() -> Self {
        Self::all()
    }
}

impl FromIterator<TradeField> for FieldSet {
    fn from_iter<I: IntoIterator<Item = TradeField>>(iter: I) -> Self {
        iter.into_iter().fold(Self(0), Self::with)
    }
}

/// One decoded notification payload.
///
/// Immutable once built; listeners receive clones.
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    field: TradeField,
    body: Map<String, Value>,
}

impl Event {
    /// Builds an event from an already-decoded JSON object.
    #[must_use]
    pub const fn new(field: TradeField, body: Map<String, Value>) -> Self {
        Self { field, body }
    }

    /// Decodes a JSON-encoded payload. The payload must be a JSON object.
    pub fn decode(field: TradeField, payload: &str) -> StreamResult<Self> {
        let value: Value = serde_json::from_str(payload).map_err(|e| StreamError::Decode {
            field: field.to_string(),
            message: e.to_string(),
        })?;

        match value {
            Value::Object(body) => Ok(Self { field, body }),
            other => Err(StreamError::Decode {
                field: field.to_string(),
                message: format!("expected a JSON object, got {other}"),
            }),
        }
    }

    /// The field this event was decoded from.
    #[must_use]
    pub const fn field(&self) -> TradeField {
        self.field
    }

    /// Value stored under `key`.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.body.get(key)
    }

    /// Returns true if `self[key] == value`. A missing key never matches.
    #[must_use]
    pub fn key_equals(&self, key: &str, value: &Value) -> bool {
        self.body.get(key) == Some(value)
    }

    /// Borrow the decoded JSON object.
    #[must_use]
    pub const fn as_map(&self) -> &Map<String, Value> {
        &self.body
    }

    /// Consume the event, returning its JSON object.
    #[must_use]
    pub fn into_map(self) -> Map<String, Value> {
        self.body
    }
}

/// One push notification as handed over by the streaming collaborator.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawUpdate {
    /// Subscribed item name, when the collaborator reports it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub item: Option<String>,
    /// Field name to serialized payload; `None` means "not updated in this push".
    #[serde(default)]
    pub values: HashMap<String, Option<String>>,
}

impl RawUpdate {
    /// Parses a raw update from its JSON form.
    pub fn from_json_str(raw: &str) -> StreamResult<Self> {
        serde_json::from_str(raw).map_err(|e| StreamError::Decode {
            field: "values".to_string(),
            message: e.to_string(),
        })
    }

    /// Builder helper: sets one field value.
    #[must_use]
    pub fn with_value(mut self, field: TradeField, payload: Option<&str>) -> Self {
        self.values
            .insert(field.as_str().to_string(), payload.map(str::to_string));
        self
    }

    /// Payloads present in this update, in decode order.
    ///
    /// Null, absent and empty values are skipped.
    pub fn payloads(&self) -> impl Iterator<Item = (TradeField, &str)> + '_ {
        TradeField::ALL.into_iter().filter_map(move |field| {
            match self.values.get(field.as_str()) {
                Some(Some(payload)) if !payload.is_empty() => Some((field, payload.as_str())),
                _ => None,
            }
        })
    }

    /// Decodes every present field, keeping failures per field.
    pub fn decode(&self) -> Vec<StreamResult<Event>> {
        self.payloads()
            .map(|(field, payload)| Event::decode(field, payload))
            .collect()
    }
}
