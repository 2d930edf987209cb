use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::key::ObjectKey;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventSeverity {
    Normal,
    Warning,
}

impl fmt::Display for EventSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Normal => write!(f, "Normal"),
            Self::Warning => write!(f, "Warning"),
        }
    }
}

/// Human readable event attached to desired state object
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectEvent {
    pub key: ObjectKey,
    pub uid: String,
    pub severity: EventSeverity,
    pub reason: String,
    pub message: String,
    /// component that emitted the event
    pub source: String,
    pub timestamp: DateTime<Utc>,
}
