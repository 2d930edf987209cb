//!
//! # Stream desired state
//!
//! Spec and status of the declarative stream object.
//!
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::ObjectMeta;
use crate::key::{KeyError, ObjectKey};

pub const READY_CONDITION: &str = "Ready";

const fn default_replicas() -> u32 {
    1
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamSpec {
    /// name of stream inside messaging cluster
    pub name: String,
    #[serde(default)]
    pub subjects: Vec<String>,
    /// either `file` or `memory`
    #[serde(default)]
    pub storage: String,
    #[serde(default = "default_replicas")]
    pub replicas: u32,
    /// maximum message age, humantime format such as `1h` or `30m`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_age: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_msgs: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_bytes: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl Default for StreamSpec {
    fn default() -> Self {
        Self {
            name: String::new(),
            subjects: vec![],
            storage: String::new(),
            replicas: default_replicas(),
            max_age: None,
            max_msgs: None,
            max_bytes: None,
            description: None,
        }
    }
}

impl StreamSpec {
    pub fn new(name: impl Into<String>, storage: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            storage: storage.into(),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConditionStatus {
    True,
    False,
    #[default]
    Unknown,
}

impl fmt::Display for ConditionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::True => write!(f, "True"),
            Self::False => write!(f, "False"),
            Self::Unknown => write!(f, "Unknown"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    #[serde(rename = "type")]
    pub type_: String,
    pub status: ConditionStatus,
    #[serde(default)]
    pub reason: String,
    #[serde(default)]
    pub message: String,
    pub last_transition_time: DateTime<Utc>,
}

impl Condition {
    pub fn ready(status: ConditionStatus, reason: &str, message: impl Into<String>) -> Self {
        Self {
            type_: READY_CONDITION.to_owned(),
            status,
            reason: reason.to_owned(),
            message: message.into(),
            last_transition_time: Utc::now(),
        }
    }

    /// same condition ignoring transition time
    pub fn is_same(&self, other: &Self) -> bool {
        self.type_ == other.type_
            && self.status == other.status
            && self.reason == other.reason
            && self.message == other.message
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamStatus {
    #[serde(default)]
    pub observed_generation: u64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
}

impl StreamStatus {
    pub fn condition(&self, type_: &str) -> Option<&Condition> {
        self.conditions.iter().find(|c| c.type_ == type_)
    }

    pub fn ready(&self) -> Option<&Condition> {
        self.condition(READY_CONDITION)
    }

    /// replace condition of same type.
    /// transition time is kept when status did not flip
    pub fn set_condition(&mut self, mut condition: Condition) {
        if let Some(existing) = self
            .conditions
            .iter_mut()
            .find(|c| c.type_ == condition.type_)
        {
            if existing.status == condition.status {
                condition.last_transition_time = existing.last_transition_time;
            }
            *existing = condition;
        } else {
            self.conditions.push(condition);
        }
    }

    /// true if other carries same generation and conditions, ignoring transition times
    pub fn is_same(&self, other: &Self) -> bool {
        self.observed_generation == other.observed_generation
            && self.conditions.len() == other.conditions.len()
            && self
                .conditions
                .iter()
                .all(|c| other.condition(&c.type_).is_some_and(|o| c.is_same(o)))
    }
}

/// Desired state object as stored in resource store
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamObject {
    pub metadata: ObjectMeta,
    pub spec: StreamSpec,
    #[serde(default)]
    pub status: StreamStatus,
}

impl StreamObject {
    pub fn new(metadata: ObjectMeta, spec: StreamSpec) -> Self {
        Self {
            metadata,
            spec,
            status: StreamStatus::default(),
        }
    }

    pub fn key(&self) -> Result<ObjectKey, KeyError> {
        ObjectKey::from_meta(&self.metadata)
    }

    pub fn has_finalizer(&self, token: &str) -> bool {
        self.metadata.has_finalizer(token)
    }

    pub fn is_being_deleted(&self) -> bool {
        self.metadata.is_being_deleted()
    }

    pub fn resource_version(&self) -> u64 {
        self.metadata.resource_version
    }
}
