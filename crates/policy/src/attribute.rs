//! Attribute catalogue and typed attribute values.
//!
//! Stored values are string-encoded; the declared [`AttributeDataType`]
//! decides how they are decoded into an [`AttrValue`] at evaluation time.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use verdict_core::{AttributeId, DomainError, DomainResult, UserId, ValidityWindow};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttributeDataType {
    String,
    Integer,
    Float,
    Boolean,
    DateTime,
    Json,
    Array,
}

/// Which side of a request an attribute describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttributeCategory {
    User,
    Resource,
    Environment,
    Action,
}

impl AttributeCategory {
    pub const ALL: [AttributeCategory; 4] = [
        AttributeCategory::User,
        AttributeCategory::Resource,
        AttributeCategory::Environment,
        AttributeCategory::Action,
    ];

    pub fn prefix(self) -> &'static str {
        match self {
            AttributeCategory::User => "user",
            AttributeCategory::Resource => "resource",
            AttributeCategory::Environment => "environment",
            AttributeCategory::Action => "action",
        }
    }

    /// Side a bare template reference is resolved against.
    pub fn opposite(self) -> AttributeCategory {
        match self {
            AttributeCategory::User => AttributeCategory::Resource,
            AttributeCategory::Resource => AttributeCategory::User,
            other => other,
        }
    }

    /// Split `user.department` into `(User, "department")`.
    pub fn split_path(path: &str) -> Option<(AttributeCategory, &str)> {
        let (prefix, key) = path.split_once('.')?;
        if key.is_empty() {
            return None;
        }
        let category = Self::ALL.into_iter().find(|c| c.prefix() == prefix)?;
        Some((category, key))
    }
}

/// Named, typed fact definition (e.g. `user.department`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attribute {
    pub id: AttributeId,
    pub name: String,
    pub data_type: AttributeDataType,
    #[serde(default)]
    pub description: Option<String>,
    /// When non-empty, values must be one of these (string-encoded).
    #[serde(default)]
    pub allowed_values: Vec<String>,
    #[serde(default)]
    pub min_value: Option<f64>,
    #[serde(default)]
    pub max_value: Option<f64>,
    pub active: bool,
}

impl Attribute {
    pub fn new(name: impl Into<String>, data_type: AttributeDataType) -> DomainResult<Self> {
        let attribute = Self {
            id: AttributeId::new(),
            name: name.into(),
            data_type,
            description: None,
            allowed_values: Vec::new(),
            min_value: None,
            max_value: None,
            active: true,
        };
        attribute.validate()?;
        Ok(attribute)
    }

    pub fn with_allowed_values<I, S>(mut self, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.allowed_values = values.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_range(mut self, min: Option<f64>, max: Option<f64>) -> Self {
        self.min_value = min;
        self.max_value = max;
        self
    }

    pub fn category(&self) -> Option<AttributeCategory> {
        AttributeCategory::split_path(&self.name).map(|(c, _)| c)
    }

    /// Name without the category prefix.
    pub fn key(&self) -> &str {
        AttributeCategory::split_path(&self.name)
            .map(|(_, k)| k)
            .unwrap_or(&self.name)
    }

    pub fn validate(&self) -> DomainResult<()> {
        if AttributeCategory::split_path(&self.name).is_none() {
            return Err(DomainError::validation(format!(
                "attribute '{}' must be prefixed with user., resource., environment. or action.",
                self.name
            )));
        }
        if let (Some(min), Some(max)) = (self.min_value, self.max_value) {
            if min > max {
                return Err(DomainError::validation(format!(
                    "attribute '{}' has min {min} greater than max {max}",
                    self.name
                )));
            }
        }
        Ok(())
    }

    /// Decode and check a raw value against this definition (write-time).
    pub fn validate_value(&self, raw: &str) -> DomainResult<AttrValue> {
        let value = AttrValue::decode(raw, self.data_type).ok_or_else(|| {
            DomainError::validation(format!(
                "value '{raw}' is not a valid {:?} for attribute '{}'",
                self.data_type, self.name
            ))
        })?;

        if !self.allowed_values.is_empty() && !self.allowed_values.iter().any(|v| v == raw) {
            return Err(DomainError::validation(format!(
                "value '{raw}' is not allowed for attribute '{}'",
                self.name
            )));
        }

        if let Some(n) = value.as_f64() {
            if self.min_value.is_some_and(|min| n < min) || self.max_value.is_some_and(|max| n > max) {
                return Err(DomainError::validation(format!(
                    "value {n} is out of range for attribute '{}'",
                    self.name
                )));
            }
        }

        Ok(value)
    }
}

/// Typed runtime attribute value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum AttrValue {
    String(String),
    Integer(i64),
    Float(f64),
    Boolean(bool),
    DateTime(DateTime<Utc>),
    Json(JsonValue),
    Array(Vec<AttrValue>),
}

impl AttrValue {
    /// Decode a string-encoded stored value by its declared type.
    ///
    /// Returns `None` when the value cannot be coerced.
    pub fn decode(raw: &str, data_type: AttributeDataType) -> Option<AttrValue> {
        let trimmed = raw.trim();
        match data_type {
            AttributeDataType::String => Some(AttrValue::String(raw.to_string())),
            AttributeDataType::Integer => trimmed.parse::<i64>().ok().map(AttrValue::Integer),
            AttributeDataType::Float => trimmed
                .parse::<f64>()
                .ok()
                .filter(|f| f.is_finite())
                .map(AttrValue::Float),
            AttributeDataType::Boolean => parse_bool(trimmed).map(AttrValue::Boolean),
            AttributeDataType::DateTime => parse_datetime(trimmed).map(AttrValue::DateTime),
            AttributeDataType::Json => serde_json::from_str(trimmed).ok().map(AttrValue::Json),
            AttributeDataType::Array => {
                if trimmed.starts_with('[') {
                    match serde_json::from_str::<JsonValue>(trimmed).ok()? {
                        JsonValue::Array(items) => {
                            Some(AttrValue::Array(items.iter().map(AttrValue::from_json).collect()))
                        }
                        _ => None,
                    }
                } else if trimmed.is_empty() {
                    Some(AttrValue::Array(Vec::new()))
                } else {
                    Some(AttrValue::Array(
                        trimmed
                            .split(',')
                            .map(|s| AttrValue::String(s.trim().to_string()))
                            .collect(),
                    ))
                }
            }
        }
    }

    /// Natural typing of a caller-supplied JSON value.
    pub fn from_json(value: &JsonValue) -> AttrValue {
        match value {
            JsonValue::String(s) => AttrValue::String(s.clone()),
            JsonValue::Bool(b) => AttrValue::Boolean(*b),
            JsonValue::Number(n) => match n.as_i64() {
                Some(i) => AttrValue::Integer(i),
                None => n
                    .as_f64()
                    .map(AttrValue::Float)
                    .unwrap_or_else(|| AttrValue::Json(value.clone())),
            },
            JsonValue::Array(items) => AttrValue::Array(items.iter().map(AttrValue::from_json).collect()),
            JsonValue::Null | JsonValue::Object(_) => AttrValue::Json(value.clone()),
        }
    }

    pub fn data_type(&self) -> AttributeDataType {
        match self {
            AttrValue::String(_) => AttributeDataType::String,
            AttrValue::Integer(_) => AttributeDataType::Integer,
            AttrValue::Float(_) => AttributeDataType::Float,
            AttrValue::Boolean(_) => AttributeDataType::Boolean,
            AttrValue::DateTime(_) => AttributeDataType::DateTime,
            AttrValue::Json(_) => AttributeDataType::Json,
            AttrValue::Array(_) => AttributeDataType::Array,
        }
    }

    /// Re-type a value to a declared data type, if it can be coerced.
    pub fn coerce_to(&self, data_type: AttributeDataType) -> Option<AttrValue> {
        if self.data_type() == data_type {
            return Some(self.clone());
        }
        match (self, data_type) {
            (AttrValue::Integer(i), AttributeDataType::Float) => Some(AttrValue::Float(*i as f64)),
            (AttrValue::Array(_), AttributeDataType::Json) => Some(AttrValue::Json(self.to_json())),
            (AttrValue::Json(JsonValue::Array(items)), AttributeDataType::Array) => {
                Some(AttrValue::Array(items.iter().map(AttrValue::from_json).collect()))
            }
            (_, AttributeDataType::String) => Some(AttrValue::String(self.to_plain_string())),
            _ => AttrValue::decode(&self.to_plain_string(), data_type),
        }
    }

    /// Exact integer view; floats are not truncated.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            AttrValue::Integer(i) => Some(*i),
            AttrValue::String(s) => s.trim().parse::<i64>().ok(),
            AttrValue::Json(JsonValue::Number(n)) => n.as_i64(),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            AttrValue::Integer(i) => Some(*i as f64),
            AttrValue::Float(f) => Some(*f),
            AttrValue::String(s) => s.trim().parse::<f64>().ok().filter(|f| f.is_finite()),
            AttrValue::Json(JsonValue::Number(n)) => n.as_f64(),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            AttrValue::Boolean(b) => Some(*b),
            AttrValue::String(s) => parse_bool(s.trim()),
            AttrValue::Json(JsonValue::Bool(b)) => Some(*b),
            _ => None,
        }
    }

    pub fn as_datetime(&self) -> Option<DateTime<Utc>> {
        match self {
            AttrValue::DateTime(d) => Some(*d),
            AttrValue::String(s) => parse_datetime(s.trim()),
            AttrValue::Json(JsonValue::String(s)) => parse_datetime(s.trim()),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<Vec<AttrValue>> {
        match self {
            AttrValue::Array(items) => Some(items.clone()),
            AttrValue::Json(JsonValue::Array(items)) => Some(items.iter().map(AttrValue::from_json).collect()),
            _ => None,
        }
    }

    /// String form used for string comparisons and regex matching.
    pub fn to_plain_string(&self) -> String {
        match self {
            AttrValue::String(s) => s.clone(),
            AttrValue::Integer(i) => i.to_string(),
            AttrValue::Float(f) => f.to_string(),
            AttrValue::Boolean(b) => b.to_string(),
            AttrValue::DateTime(d) => d.to_rfc3339(),
            AttrValue::Json(v) => v.to_string(),
            AttrValue::Array(_) => self.to_json().to_string(),
        }
    }

    pub fn to_json(&self) -> JsonValue {
        match self {
            AttrValue::String(s) => JsonValue::String(s.clone()),
            AttrValue::Integer(i) => JsonValue::from(*i),
            AttrValue::Float(f) => JsonValue::from(*f),
            AttrValue::Boolean(b) => JsonValue::Bool(*b),
            AttrValue::DateTime(d) => JsonValue::String(d.to_rfc3339()),
            AttrValue::Json(v) => v.clone(),
            AttrValue::Array(items) => JsonValue::Array(items.iter().map(AttrValue::to_json).collect()),
        }
    }
}

fn parse_bool(s: &str) -> Option<bool> {
    match s.to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" => Some(true),
        "false" | "0" | "no" => Some(false),
        _ => None,
    }
}

fn parse_datetime(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

impl From<&str> for AttrValue {
    fn from(value: &str) -> Self {
        AttrValue::String(value.to_string())
    }
}

impl From<String> for AttrValue {
    fn from(value: String) -> Self {
        AttrValue::String(value)
    }
}

impl From<i64> for AttrValue {
    fn from(value: i64) -> Self {
        AttrValue::Integer(value)
    }
}

impl From<i32> for AttrValue {
    fn from(value: i32) -> Self {
        AttrValue::Integer(value.into())
    }
}

impl From<u32> for AttrValue {
    fn from(value: u32) -> Self {
        AttrValue::Integer(value.into())
    }
}

impl From<f64> for AttrValue {
    fn from(value: f64) -> Self {
        AttrValue::Float(value)
    }
}

impl From<bool> for AttrValue {
    fn from(value: bool) -> Self {
        AttrValue::Boolean(value)
    }
}

impl From<DateTime<Utc>> for AttrValue {
    fn from(value: DateTime<Utc>) -> Self {
        AttrValue::DateTime(value)
    }
}

impl From<JsonValue> for AttrValue {
    fn from(value: JsonValue) -> Self {
        AttrValue::from_json(&value)
    }
}

/// Time-bounded fact about a user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserAttributeValue {
    pub user_id: UserId,
    pub attribute_id: AttributeId,
    pub value: String,
    #[serde(default)]
    pub validity: ValidityWindow,
    pub active: bool,
}

impl UserAttributeValue {
    pub fn is_effective(&self, now: DateTime<Utc>) -> bool {
        self.active && self.validity.contains(now)
    }
}

/// Time-bounded fact about a resource, keyed by the caller's resource id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceAttributeValue {
    pub resource_type: String,
    pub resource_id: String,
    pub attribute_id: AttributeId,
    pub value: String,
    #[serde(default)]
    pub validity: ValidityWindow,
    pub active: bool,
}

impl ResourceAttributeValue {
    pub fn is_effective(&self, now: DateTime<Utc>) -> bool {
        self.active && self.validity.contains(now)
    }
}
