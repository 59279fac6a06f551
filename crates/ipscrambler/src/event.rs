//! Inbound events from the relay service.
//!
//! The service broadcasts an action name and a loosely typed payload.
//! Decoding is lenient: a field that is missing or has the wrong type is
//! replaced by its default, and a bad status value never prevents the other
//! fields from being read.

use crate::relay::TrafficSample;
use crate::status::{SourceAction, Status, UnknownStatusValue};
use serde_json::{Map, Value};

/// Status query response action
pub const ACTION_STATUS: &str = "org.torproject.android.intent.action.STATUS";
/// Bandwidth sample action
pub const ACTION_BANDWIDTH: &str = "bandwidth";
/// Log line action
pub const ACTION_LOG: &str = "log";
/// Proxy ports action
pub const ACTION_PORTS: &str = "ports";

/// Status value, allowed on any action
pub const EXTRA_STATUS: &str = "org.torproject.android.intent.extra.STATUS";
pub const EXTRA_LOG: &str = "log";
pub const EXTRA_UPLOAD: &str = "up";
pub const EXTRA_DOWNLOAD: &str = "down";
pub const EXTRA_WRITTEN: &str = "written";
pub const EXTRA_READ: &str = "read";
pub const EXTRA_HTTP_PROXY_PORT: &str = "org.torproject.android.intent.extra.HTTP_PROXY_PORT";
pub const EXTRA_SOCKS_PROXY_PORT: &str = "org.torproject.android.intent.extra.SOCKS_PROXY_PORT";

/// Port value before any PORTS event
pub const UNKNOWN_PORT: i32 = -1;

/// Raw event as broadcast by the relay service
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ServiceEvent {
    pub action: String,
    pub payload: Map<String, Value>,
}

impl ServiceEvent {
    pub fn new(action: impl Into<String>) -> Self {
        Self {
            action: action.into(),
            payload: Map::new(),
        }
    }

    /// Add a payload field
    pub fn with(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.payload.insert(key.to_string(), value.into());
        self
    }

    pub fn status(status: Status) -> Self {
        Self::new(ACTION_STATUS).with(EXTRA_STATUS, status.as_str())
    }

    pub fn bandwidth(sample: TrafficSample) -> Self {
        Self::new(ACTION_BANDWIDTH)
            .with(EXTRA_UPLOAD, sample.upload)
            .with(EXTRA_DOWNLOAD, sample.download)
            .with(EXTRA_WRITTEN, sample.written)
            .with(EXTRA_READ, sample.read)
    }

    pub fn log(line: &str) -> Self {
        Self::new(ACTION_LOG).with(EXTRA_LOG, line)
    }

    pub fn ports(http: i32, socks: i32) -> Self {
        Self::new(ACTION_PORTS)
            .with(EXTRA_HTTP_PROXY_PORT, http)
            .with(EXTRA_SOCKS_PROXY_PORT, socks)
    }

    pub fn kind(&self) -> EventKind {
        EventKind::from_action(&self.action)
    }

    /// Status carried by the payload, if any
    pub fn parsed_status(&self) -> Option<Result<Status, UnknownStatusValue>> {
        match self.payload.get(EXTRA_STATUS)? {
            Value::String(s) => Some(Status::parse(s)),
            Value::Null => None,
            other => Some(Err(UnknownStatusValue(other.to_string()))),
        }
    }

    pub fn log_line(&self) -> Option<&str> {
        self.payload.get(EXTRA_LOG).and_then(Value::as_str)
    }

    /// Traffic counters, 0 where missing
    pub fn traffic(&self) -> TrafficSample {
        TrafficSample {
            upload: self.long(EXTRA_UPLOAD).unwrap_or(0),
            download: self.long(EXTRA_DOWNLOAD).unwrap_or(0),
            written: self.long(EXTRA_WRITTEN).unwrap_or(0),
            read: self.long(EXTRA_READ).unwrap_or(0),
        }
    }

    /// Proxy ports, [`UNKNOWN_PORT`] where missing
    pub fn proxy_ports(&self) -> ProxyPorts {
        ProxyPorts {
            http: self.int(EXTRA_HTTP_PROXY_PORT).unwrap_or(UNKNOWN_PORT),
            socks: self.int(EXTRA_SOCKS_PROXY_PORT).unwrap_or(UNKNOWN_PORT),
        }
    }

    fn long(&self, key: &str) -> Option<i64> {
        match self.payload.get(key)? {
            Value::Number(n) => n.as_i64(),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    fn int(&self, key: &str) -> Option<i32> {
        self.long(key).and_then(|n| i32::try_from(n).ok())
    }
}

/// Known event actions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Status,
    Bandwidth,
    Log,
    Ports,
    Other,
}

impl EventKind {
    pub fn from_action(action: &str) -> Self {
        match action {
            ACTION_STATUS => EventKind::Status,
            ACTION_BANDWIDTH => EventKind::Bandwidth,
            ACTION_LOG => EventKind::Log,
            ACTION_PORTS => EventKind::Ports,
            _ => EventKind::Other,
        }
    }

    /// How a status carried by this action is treated
    pub fn source_action(&self) -> SourceAction {
        match self {
            EventKind::Status => SourceAction::ExplicitQuery,
            EventKind::Bandwidth => SourceAction::Bandwidth,
            _ => SourceAction::Other,
        }
    }
}

/// Local proxy ports opened by the relay service
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProxyPorts {
    pub http: i32,
    pub socks: i32,
}

impl ProxyPorts {
    pub fn unknown() -> Self {
        Self {
            http: UNKNOWN_PORT,
            socks: UNKNOWN_PORT,
        }
    }

    pub fn is_known(&self) -> bool {
        self.http != UNKNOWN_PORT || self.socks != UNKNOWN_PORT
    }
}

impl Default for ProxyPorts {
    fn default() -> Self {
        Self::unknown()
    }
}
