//! Change notifications carried over the bus and to live subscribers.
//!
//! Wire shape: `{"event": <kind>, "item": {...}, "item_id": 1, "meta": {"source": ...}}`,
//! with only the fields the kind needs.

use serde::{Deserialize, Serialize};

use crate::model::{Reading, ReadingDraft};

pub const SOURCE_MANUAL: &str = "manual";
pub const SOURCE_BACKGROUND: &str = "background";
pub const SOURCE_REST: &str = "rest";
pub const SOURCE_EXTERNAL_SCRIPT: &str = "external_script";
/// Used for readings ingested from the bus when the message carried no meta.
pub const SOURCE_NATS: &str = "nats";

/// Origin of the trigger that produced an event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventMeta {
    pub source: String,
}

impl EventMeta {
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
        }
    }
}

/// Reading-shaped payload published by external producers.
///
/// Every field is optional on the wire; incomplete payloads are not persisted.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExternalReading {
    #[serde(default)]
    pub city: Option<String>,
    #[serde(default)]
    pub temperature: Option<f64>,
    #[serde(default)]
    pub wind_speed: Option<f64>,
}

impl ExternalReading {
    /// Read the fields leniently from an inbound `item` object.
    ///
    /// Numbers may also arrive as numeric strings; a field of any other shape
    /// counts as absent.
    pub fn from_value(item: &serde_json::Value) -> Self {
        Self {
            city: item.get("city").and_then(serde_json::Value::as_str).map(str::to_string),
            temperature: item.get("temperature").and_then(lenient_number),
            wind_speed: item.get("wind_speed").and_then(lenient_number),
        }
    }

    /// `None` unless both `city` and `temperature` are present.
    pub fn into_draft(self) -> Option<ReadingDraft> {
        Some(ReadingDraft::new(self.city?, self.temperature?, self.wind_speed))
    }
}

fn lenient_number(value: &serde_json::Value) -> Option<f64> {
    match value {
        serde_json::Value::Number(n) => n.as_f64(),
        serde_json::Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum Event {
    Created {
        item: Reading,
        meta: EventMeta,
    },
    Updated {
        item: Reading,
        meta: EventMeta,
    },
    Deleted {
        item_id: i64,
        meta: EventMeta,
    },
    /// A fetched reading was stored by a scheduled or on-demand cycle.
    CreatedExternal {
        item: Reading,
        meta: EventMeta,
    },
    /// Same as `CreatedExternal`, for cycles triggered with source `manual`.
    CreatedExternalManual {
        item: Reading,
        meta: EventMeta,
    },
    /// A reading published to the bus by an external producer.
    ExternalWeather {
        #[serde(default)]
        item: Option<ExternalReading>,
        #[serde(default)]
        meta: Option<EventMeta>,
    },
    /// Raw echo of any inbound bus message.
    NatsReceived { payload: serde_json::Value },
    /// An `ExternalWeather` message was stored locally.
    CreatedFromNats {
        item: Reading,
        meta: EventMeta,
    },
}

impl Event {
    /// Event for a reading stored by a fetch cycle.
    pub fn created_external(item: Reading, source: &str) -> Self {
        let meta = EventMeta::new(source);
        if source == SOURCE_MANUAL {
            Self::CreatedExternalManual { item, meta }
        } else {
            Self::CreatedExternal { item, meta }
        }
    }

    /// The `event` discriminant as it appears on the wire.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Created { .. } => "created",
            Self::Updated { .. } => "updated",
            Self::Deleted { .. } => "deleted",
            Self::CreatedExternal { .. } => "created_external",
            Self::CreatedExternalManual { .. } => "created_external_manual",
            Self::ExternalWeather { .. } => "external_weather",
            Self::NatsReceived { .. } => "nats_received",
            Self::CreatedFromNats { .. } => "created_from_nats",
        }
    }

    /// The stored reading this event describes, if any.
    pub fn reading(&self) -> Option<&Reading> {
        match self {
            Self::Created { item, .. }
            | Self::Updated { item, .. }
            | Self::CreatedExternal { item, .. }
            | Self::CreatedExternalManual { item, .. }
            | Self::CreatedFromNats { item, .. } => Some(item),
            Self::Deleted { .. } | Self::ExternalWeather { .. } | Self::NatsReceived { .. } => {
                None
            }
        }
    }
}
