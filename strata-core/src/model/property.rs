/*!
Media package properties.

Properties are small typed values attached to a media package rather than to one of its
snapshots. They are addressed by namespace and name, survive new snapshots and are
removed together with the last snapshot of their media package.
*/

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::Version;
use crate::{Result, StrataError};

/// Address of one property
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PropertyId {
    pub media_package_id: String,
    pub namespace: String,
    pub name: String,
}

impl PropertyId {
    pub fn new<M, N, P>(media_package_id: M, namespace: N, name: P) -> Self
    where
        M: Into<String>,
        N: Into<String>,
        P: Into<String>,
    {
        Self {
            media_package_id: media_package_id.into(),
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.media_package_id.trim().is_empty() {
            return Err(StrataError::validation("property media package id cannot be empty"));
        }
        if self.namespace.trim().is_empty() || self.name.trim().is_empty() {
            return Err(StrataError::validation(format!(
                "property {self} needs a namespace and a name"
            )));
        }
        Ok(())
    }
}

impl fmt::Display for PropertyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}:{}", self.media_package_id, self.namespace, self.name)
    }
}

/// Typed property value
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum PropertyValue {
    String(String),
    Long(i64),
    Boolean(bool),
    Date(DateTime<Utc>),
    Version(Version),
}

impl fmt::Display for PropertyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PropertyValue::String(s) => f.write_str(s),
            PropertyValue::Long(n) => write!(f, "{n}"),
            PropertyValue::Boolean(b) => write!(f, "{b}"),
            PropertyValue::Date(t) => write!(f, "{}", t.to_rfc3339()),
            PropertyValue::Version(v) => write!(f, "v{v}"),
        }
    }
}

impl From<&str> for PropertyValue {
    fn from(s: &str) -> Self {
        PropertyValue::String(s.to_string())
    }
}

impl From<String> for PropertyValue {
    fn from(s: String) -> Self {
        PropertyValue::String(s)
    }
}

impl From<i64> for PropertyValue {
    fn from(n: i64) -> Self {
        PropertyValue::Long(n)
    }
}

impl From<bool> for PropertyValue {
    fn from(b: bool) -> Self {
        PropertyValue::Boolean(b)
    }
}

impl From<DateTime<Utc>> for PropertyValue {
    fn from(t: DateTime<Utc>) -> Self {
        PropertyValue::Date(t)
    }
}

impl From<Version> for PropertyValue {
    fn from(v: Version) -> Self {
        PropertyValue::Version(v)
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Property {
    pub id: PropertyId,
    pub value: PropertyValue,
}

impl Property {
    pub fn new<V: Into<PropertyValue>>(id: PropertyId, value: V) -> Self {
        Self {
            id,
            value: value.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_value_serializes_with_type_tag() {
        let property = Property::new(PropertyId::new("mp-1", "org.workflow", "state"), 3i64);
        let json = serde_json::to_value(&property).unwrap();
        assert_eq!(json["value"]["type"], "long");
        assert_eq!(json["value"]["value"], 3);

        let back: Property = serde_json::from_value(json).unwrap();
        assert_eq!(back, property);
    }

    #[test]
    fn test_id_needs_namespace_and_name() {
        assert!(PropertyId::new("mp-1", "ns", "name").validate().is_ok());
        assert!(PropertyId::new("mp-1", " ", "name").validate().is_err());
        assert!(PropertyId::new("mp-1", "ns", "").validate().is_err());
        assert!(PropertyId::new("", "ns", "name").validate().is_err());
    }
}
