use serde::{Deserialize, Serialize};
use std::fmt;

/// Abstract scalar kind mapped to an engine-native type string.
/// `Text` and `Bit` optionally carry a size parameter.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SqlType {
    Integer,
    TinyInt,
    SmallInt,
    Long,
    Boolean,
    DateTime,
    Blob,
    Text(Option<u32>),
    Bit(Option<u32>),
}

impl SqlType {
    /// Bounded text of 10 characters, enough for an ISO `YYYY-MM-DD` date.
    pub fn date() -> Self {
        Self::Text(Some(10))
    }

    /// Whether native AUTOINCREMENT is legal on this type.
    pub fn is_integer(&self) -> bool {
        matches!(
            self,
            Self::Integer | Self::TinyInt | Self::SmallInt | Self::Long
        )
    }

    /// Engine-native type string for DDL.
    pub fn as_sql(&self) -> String {
        match self {
            Self::Integer => "INTEGER".into(),
            Self::TinyInt => "TINYINT".into(),
            Self::SmallInt => "SMALLINT".into(),
            Self::Long => "LONG".into(),
            Self::Boolean => "BOOLEAN".into(),
            Self::DateTime => "DATETIME".into(),
            Self::Blob => "BLOB".into(),
            Self::Text(None) => "TEXT".into(),
            Self::Text(Some(n)) => format!("TEXT({n})"),
            Self::Bit(None) => "BIT".into(),
            Self::Bit(Some(n)) => format!("BIT({n})"),
        }
    }
}

impl fmt::Display for SqlType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.as_sql())
    }
}
