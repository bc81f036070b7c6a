use serde::{Deserialize, Serialize};
use std::fmt;

/// Data-type tag shared by attribute and calculation definitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataType {
    ShortText,
    LongText,
    RichText,
    WholeNumber,
    Integer,
    Decimal,
    Percentage,
    Boolean,
    Categorical,
    DateTime,
    Time,
    Role,
    Group,
    User,
}

impl DataType {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            DataType::ShortText => "short_text",
            DataType::LongText => "long_text",
            DataType::RichText => "rich_text",
            DataType::WholeNumber => "whole_number",
            DataType::Integer => "integer",
            DataType::Decimal => "decimal",
            DataType::Percentage => "percentage",
            DataType::Boolean => "boolean",
            DataType::Categorical => "categorical",
            DataType::DateTime => "datetime",
            DataType::Time => "time",
            DataType::Role => "role",
            DataType::Group => "group",
            DataType::User => "user",
        }
    }

    /// Types whose values are free-form text, compared by edit distance in
    /// nearest-match lookups.
    #[must_use]
    pub fn is_textual(self) -> bool {
        matches!(self, DataType::ShortText | DataType::LongText)
    }

    /// Types whose values order numerically (including temporal serials),
    /// compared by absolute difference in nearest-match lookups.
    #[must_use]
    pub fn is_numeric_like(self) -> bool {
        matches!(
            self,
            DataType::WholeNumber
                | DataType::Integer
                | DataType::Decimal
                | DataType::Percentage
                | DataType::DateTime
                | DataType::Time
        )
    }

    /// Types that only ever match exactly in nearest-match lookups.
    #[must_use]
    pub fn is_exact_match(self) -> bool {
        matches!(self, DataType::Boolean | DataType::Categorical)
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn is_none<T>(v: &Option<T>) -> bool {
    v.is_none()
}

/// Type-specific value constraints attached to an attribute or calculation
/// definition. Which fields are meaningful depends on the [`DataType`] tag;
/// absent fields are unconstrained.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Constraints {
    #[serde(default, skip_serializing_if = "is_none")]
    pub min_value: Option<f64>,
    #[serde(default, skip_serializing_if = "is_none")]
    pub max_value: Option<f64>,
    /// Decimal places for decimal/percentage values.
    #[serde(default, skip_serializing_if = "is_none")]
    pub precision: Option<u8>,
    #[serde(default, skip_serializing_if = "is_none")]
    pub display_thousands_separator: Option<bool>,
    /// ISO 4217 currency code for decimal values.
    #[serde(default, skip_serializing_if = "is_none")]
    pub currency: Option<String>,
    /// Validation pattern applied to short/long text values.
    #[serde(default, skip_serializing_if = "is_none")]
    pub text_validation: Option<String>,
    /// Allowed values for categorical attributes.
    #[serde(default, skip_serializing_if = "is_none")]
    pub values: Option<Vec<String>>,
    /// Display label for boolean `true`.
    #[serde(default, skip_serializing_if = "is_none")]
    pub true_value: Option<String>,
    /// Display label for boolean `false`.
    #[serde(default, skip_serializing_if = "is_none")]
    pub false_value: Option<String>,
    #[serde(default, skip_serializing_if = "is_none")]
    pub nullable: Option<bool>,
}
