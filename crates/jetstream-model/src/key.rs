use std::fmt;
use std::str::FromStr;

use crate::core::ObjectMeta;

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum KeyError {
    #[error("unexpected key format: {0:?}")]
    Malformed(String),
    #[error("object has no name")]
    MissingName,
}

/// Identity of a desired-state object: `namespace/name`.
///
/// Objects without a namespace are keyed by name alone.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectKey {
    namespace: String,
    name: String,
}

impl ObjectKey {
    pub fn new<S>(namespace: S, name: S) -> Self
    where
        S: Into<String>,
    {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    /// key of object, rejecting metadata that cannot round trip through
    /// the `namespace/name` form
    pub fn from_meta(meta: &ObjectMeta) -> Result<Self, KeyError> {
        if meta.name.is_empty() {
            return Err(KeyError::MissingName);
        }
        if meta.name.contains('/') || meta.namespace.contains('/') {
            return Err(KeyError::Malformed(format!(
                "{}/{}",
                meta.namespace, meta.name
            )));
        }
        Ok(Self::new(meta.namespace.as_str(), meta.name.as_str()))
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.namespace.is_empty() {
            write!(f, "{}", self.name)
        } else {
            write!(f, "{}/{}", self.namespace, self.name)
        }
    }
}

impl FromStr for ObjectKey {
    type Err = KeyError;

    fn from_str(key: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = key.split('/').collect();
        let (namespace, name) = match parts.as_slice() {
            [name] => ("", *name),
            [namespace, name] => (*namespace, *name),
            _ => return Err(KeyError::Malformed(key.to_owned())),
        };

        if name.is_empty() {
            return Err(KeyError::Malformed(key.to_owned()));
        }

        Ok(Self::new(namespace, name))
    }
}

impl From<&ObjectMeta> for ObjectKey {
    fn from(meta: &ObjectMeta) -> Self {
        Self::new(meta.namespace.as_str(), meta.name.as_str())
    }
}
