//! Property value types and their cleaning rules.

use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// The value type of a property.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PropertyType {
    Name,
    String,
    Text,
    /// A reference to another entity id.
    Entity,
    Identifier,
    Country,
    Date,
    Number,
    Email,
    Phone,
    Url,
    Address,
}

fn date_regex() -> &'static Regex {
    static DATE: OnceLock<Regex> = OnceLock::new();
    DATE.get_or_init(|| {
        Regex::new(r"^\d{4}(-\d{2}(-\d{2}(T[0-9:.+\-Z]*)?)?)?$").expect("static date pattern")
    })
}

impl PropertyType {
    pub const ALL: [Self; 12] = [
        Self::Name,
        Self::String,
        Self::Text,
        Self::Entity,
        Self::Identifier,
        Self::Country,
        Self::Date,
        Self::Number,
        Self::Email,
        Self::Phone,
        Self::Url,
        Self::Address,
    ];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Name => "name",
            Self::String => "string",
            Self::Text => "text",
            Self::Entity => "entity",
            Self::Identifier => "identifier",
            Self::Country => "country",
            Self::Date => "date",
            Self::Number => "number",
            Self::Email => "email",
            Self::Phone => "phone",
            Self::Url => "url",
            Self::Address => "address",
        }
    }

    /// Whether values of this type carry identity signal for matching and
    /// blocking.
    #[must_use]
    pub const fn matchable(self) -> bool {
        matches!(
            self,
            Self::Name
                | Self::Identifier
                | Self::Country
                | Self::Date
                | Self::Email
                | Self::Phone
                | Self::Address
        )
    }

    /// Cleans a raw value, returning `None` when it is not valid for this
    /// type.
    #[must_use]
    pub fn clean(self, value: &str) -> Option<String> {
        let value = value.trim();
        if value.is_empty() {
            return None;
        }
        match self {
            Self::Text => Some(value.to_string()),
            Self::Name | Self::String | Self::Address | Self::Identifier | Self::Phone => {
                Some(value.split_whitespace().collect::<Vec<_>>().join(" "))
            }
            Self::Entity => (!value.chars().any(char::is_whitespace)).then(|| value.to_string()),
            Self::Country => {
                let lower = value.to_ascii_lowercase();
                let valid = (2..=10).contains(&lower.len())
                    && lower.split('-').all(|p| !p.is_empty() && p.chars().all(|c| c.is_ascii_lowercase()));
                valid.then_some(lower)
            }
            Self::Date => date_regex().is_match(value).then(|| value.to_string()),
            Self::Number => value
                .replace(',', "")
                .parse::<f64>()
                .ok()
                .map(|_| value.to_string()),
            Self::Email => {
                let (local, domain) = value.split_once('@')?;
                (!local.is_empty() && domain.contains('.')).then(|| value.to_ascii_lowercase())
            }
            Self::Url => (value.starts_with("http://") || value.starts_with("https://"))
                .then(|| value.to_string()),
        }
    }
}

impl fmt::Display for PropertyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PropertyType {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| ValidationError::InvalidValue {
                schema: "Property".to_string(),
                prop: "type".to_string(),
                prop_type: "type".to_string(),
                value: s.to_string(),
            })
    }
}
