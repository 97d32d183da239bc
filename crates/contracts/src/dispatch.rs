//! Dispatch - one event travelling through the pipeline

use serde::{Deserialize, Serialize};

use crate::{DataItem, DataObject};

/// Standard payload keys added to every dispatch
pub mod keys {
    pub const EVENT: &str = "tealium_event";
    pub const EVENT_TYPE: &str = "tealium_event_type";
    pub const REQUEST_UUID: &str = "request_uuid";
    pub const TIMESTAMP_EPOCH_MILLISECONDS: &str = "tealium_timestamp_epoch_milliseconds";
}

/// Kind of tracked event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DispatchType {
    #[default]
    Event,
    View,
}

impl DispatchType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DispatchType::Event => "event",
            DispatchType::View => "view",
        }
    }
}

/// Immutable event record.
///
/// Transformations never mutate a dispatch; they produce a new one through
/// [`Dispatch::with_payload`]. Queue and in-flight tracking use `id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dispatch {
    id: String,
    dispatch_type: DispatchType,
    /// Creation time, Unix epoch milliseconds
    timestamp: i64,
    payload: DataObject,
}

impl Dispatch {
    /// Create a dispatch for a new event, stamping id, type and time into the payload
    pub fn new(event: impl Into<String>, dispatch_type: DispatchType, data: DataObject) -> Self {
        let id = uuid::Uuid::new_v4().to_string();
        let timestamp = chrono::Utc::now().timestamp_millis();
        let payload = data
            .with(keys::EVENT, event.into())
            .with(keys::EVENT_TYPE, dispatch_type.as_str())
            .with(keys::REQUEST_UUID, id.clone())
            .with(keys::TIMESTAMP_EPOCH_MILLISECONDS, timestamp);
        Self {
            id,
            dispatch_type,
            timestamp,
            payload,
        }
    }

    /// Rebuild a dispatch from stored parts
    pub fn restore(
        id: impl Into<String>,
        dispatch_type: DispatchType,
        timestamp: i64,
        payload: DataObject,
    ) -> Self {
        Self {
            id: id.into(),
            dispatch_type,
            timestamp,
            payload,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn dispatch_type(&self) -> DispatchType {
        self.dispatch_type
    }

    pub fn timestamp(&self) -> i64 {
        self.timestamp
    }

    pub fn payload(&self) -> &DataObject {
        &self.payload
    }

    /// Event name, if the payload carries one
    pub fn event_name(&self) -> Option<&str> {
        self.payload.get_str(keys::EVENT)
    }

    /// New dispatch with the same identity and a replaced payload
    pub fn with_payload(&self, payload: DataObject) -> Self {
        Self {
            id: self.id.clone(),
            dispatch_type: self.dispatch_type,
            timestamp: self.timestamp,
            payload,
        }
    }

    /// New dispatch with `entries` overlaid onto the payload
    pub fn with_added(&self, entries: &DataObject) -> Self {
        self.with_payload(self.payload.merged(entries))
    }

    /// Short identifier for logs: id prefix plus event name
    pub fn log_description(&self) -> String {
        let prefix: String = self.id.chars().take(5).collect();
        format!("{}-{}", prefix, self.event_name().unwrap_or("unknown"))
    }
}

impl From<&Dispatch> for DataItem {
    fn from(dispatch: &Dispatch) -> Self {
        DataItem::Object(dispatch.payload.clone())
    }
}
