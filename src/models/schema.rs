//! Schema-related data models.

use serde::{Deserialize, Serialize};

/// One column of a described table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnDescriptor {
    pub name: String,
    #[serde(rename = "type")]
    pub data_type: String,
    pub nullable: bool,
    /// Key role: "PRI", "UNI", "MUL" or empty
    pub key: String,
    #[serde(rename = "default")]
    pub default_value: Option<String>,
    /// e.g., "auto_increment"
    pub extra: String,
}

impl ColumnDescriptor {
    /// Create a new column descriptor.
    pub fn new(name: impl Into<String>, data_type: impl Into<String>, nullable: bool) -> Self {
        Self {
            name: name.into(),
            data_type: data_type.into(),
            nullable,
            key: String::new(),
            default_value: None,
            extra: String::new(),
        }
    }

    /// Set the key role.
    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = key.into();
        self
    }

    /// Set the default value expression.
    pub fn with_default(mut self, default_value: Option<String>) -> Self {
        self.default_value = default_value;
        self
    }

    /// Set extra attributes.
    pub fn with_extra(mut self, extra: impl Into<String>) -> Self {
        self.extra = extra.into();
        self
    }

    pub fn is_primary_key(&self) -> bool {
        self.key == "PRI"
    }
}

/// Translate a driver's nullability marker ("YES"/"NO") to a boolean.
pub fn parse_nullable(marker: &str) -> bool {
    marker.trim().eq_ignore_ascii_case("yes")
}
