use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Namespace selector used when listing or watching the store
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum NameSpace {
    #[default]
    All,
    Named(String),
}

impl NameSpace {
    pub fn is_all(&self) -> bool {
        matches!(self, Self::All)
    }

    /// true if object living in `namespace` is selected
    pub fn matches(&self, namespace: &str) -> bool {
        match self {
            Self::All => true,
            Self::Named(name) => name == namespace,
        }
    }
}

impl fmt::Display for NameSpace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::All => write!(f, "*"),
            Self::Named(name) => write!(f, "{name}"),
        }
    }
}

impl From<String> for NameSpace {
    fn from(namespace: String) -> Self {
        if namespace.is_empty() {
            Self::All
        } else {
            Self::Named(namespace)
        }
    }
}

impl From<&str> for NameSpace {
    fn from(namespace: &str) -> Self {
        namespace.to_owned().into()
    }
}

/// Object metadata maintained by the resource store.
///
/// `resource_version` changes on every write, `generation` only when the spec
/// changes. A set `deletion_timestamp` means deletion was requested but the
/// object is held back by its finalizers.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectMeta {
    pub name: String,
    #[serde(default)]
    pub namespace: String,
    #[serde(default)]
    pub uid: String,
    #[serde(default)]
    pub resource_version: u64,
    #[serde(default)]
    pub generation: u64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub finalizers: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deletion_timestamp: Option<DateTime<Utc>>,
}

impl ObjectMeta {
    pub fn new<S>(name: S, namespace: S) -> Self
    where
        S: Into<String>,
    {
        Self {
            name: name.into(),
            namespace: namespace.into(),
            ..Default::default()
        }
    }

    pub fn is_being_deleted(&self) -> bool {
        self.deletion_timestamp.is_some()
    }

    pub fn has_finalizer(&self, token: &str) -> bool {
        self.finalizers.iter().any(|f| f == token)
    }

    /// store assigned metadata is newer or same as other
    pub fn is_newer(&self, another: &Self) -> bool {
        self.resource_version >= another.resource_version
    }
}

#[cfg(test)]
mod test {
    use super::{NameSpace, ObjectMeta};

    #[test]
    fn test_namespace_selector() {
        assert!(NameSpace::All.matches("default"));
        assert!(NameSpace::from("default").matches("default"));
        assert!(!NameSpace::from("default").matches("other"));
        assert_eq!(NameSpace::from(""), NameSpace::All);
    }

    #[test]
    fn test_finalizer_lookup() {
        let mut meta = ObjectMeta::new("orders", "default");
        assert!(!meta.has_finalizer("a"));
        meta.finalizers.push("a".to_owned());
        assert!(meta.has_finalizer("a"));
        assert!(!meta.is_being_deleted());
    }
}
