//! Condition trees: a tagged AST parsed once when a policy is written.
//!
//! Two JSON shapes are accepted by [`ConditionNode::parse`]:
//!
//! ```text
//! {"type": "combinator", "op": "AND", "children": [ ... ]}
//! {"type": "leaf", "attribute": "resource.amount", "operator": ">", "value": 100000}
//! ```
//!
//! and the loose legacy shape still found in stored policies:
//!
//! ```text
//! {"operator": "AND", "conditions": [ {"attribute": "...", "operator": "=", "value": ...} ]}
//! ```

use core::fmt;
use core::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use verdict_core::{DomainError, DomainResult};

use crate::{AttributeCategory, AttributeDataType};

/// Default nesting limit for condition trees.
pub const MAX_CONDITION_DEPTH: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogicalOp {
    And,
    Or,
    Not,
}

impl FromStr for LogicalOp {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "AND" | "&&" => Ok(LogicalOp::And),
            "OR" | "||" => Ok(LogicalOp::Or),
            "NOT" | "!" => Ok(LogicalOp::Not),
            other => Err(DomainError::validation(format!("unknown logical operator '{other}'"))),
        }
    }
}

/// Leaf comparison operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Operator {
    Eq,
    Ne,
    Gt,
    Lt,
    Ge,
    Le,
    In,
    Contains,
    Matches,
}

impl Operator {
    pub fn symbol(self) -> &'static str {
        match self {
            Operator::Eq => "=",
            Operator::Ne => "!=",
            Operator::Gt => ">",
            Operator::Lt => "<",
            Operator::Ge => ">=",
            Operator::Le => "<=",
            Operator::In => "IN",
            Operator::Contains => "CONTAINS",
            Operator::Matches => "MATCHES",
        }
    }

    pub fn is_ordering(self) -> bool {
        matches!(self, Operator::Gt | Operator::Lt | Operator::Ge | Operator::Le)
    }
}

impl FromStr for Operator {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let op = match s.trim().to_ascii_lowercase().as_str() {
            "=" | "==" | "eq" | "equals" => Operator::Eq,
            "!=" | "<>" | "ne" | "not_equals" => Operator::Ne,
            ">" | "gt" => Operator::Gt,
            "<" | "lt" => Operator::Lt,
            ">=" | "gte" | "ge" => Operator::Ge,
            "<=" | "lte" | "le" => Operator::Le,
            "in" => Operator::In,
            "contains" => Operator::Contains,
            "matches" | "regex" => Operator::Matches,
            other => return Err(DomainError::validation(format!("unknown operator '{other}'"))),
        };
        Ok(op)
    }
}

impl TryFrom<String> for Operator {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Operator> for String {
    fn from(value: Operator) -> Self {
        value.symbol().to_string()
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

/// Right-hand side of a leaf: a literal, or `{{category.path}}` resolved
/// against the context at evaluation time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "JsonValue", into = "JsonValue")]
pub enum ConditionValue {
    Literal(JsonValue),
    Reference(String),
}

impl ConditionValue {
    pub fn literal(value: impl Into<JsonValue>) -> Self {
        ConditionValue::Literal(value.into())
    }

    pub fn reference(path: impl Into<String>) -> Self {
        ConditionValue::Reference(path.into())
    }

    fn template_path(s: &str) -> Option<&str> {
        let inner = s.trim().strip_prefix("{{")?.strip_suffix("}}")?.trim();
        if inner.is_empty() { None } else { Some(inner) }
    }
}

impl From<JsonValue> for ConditionValue {
    fn from(value: JsonValue) -> Self {
        if let JsonValue::String(s) = &value {
            if let Some(path) = ConditionValue::template_path(s) {
                return ConditionValue::Reference(path.to_string());
            }
        }
        ConditionValue::Literal(value)
    }
}

impl From<ConditionValue> for JsonValue {
    fn from(value: ConditionValue) -> Self {
        match value {
            ConditionValue::Literal(v) => v,
            ConditionValue::Reference(path) => JsonValue::String(format!("{{{{{path}}}}}")),
        }
    }
}

/// Leaf comparison `attribute operator value`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Condition {
    pub attribute: String,
    pub operator: Operator,
    pub value: ConditionValue,
}

impl Condition {
    pub fn new(attribute: impl Into<String>, operator: Operator, value: impl Into<JsonValue>) -> Self {
        Self {
            attribute: attribute.into(),
            operator,
            value: ConditionValue::from(value.into()),
        }
    }
}

/// A node of a condition tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ConditionNode {
    Combinator {
        op: LogicalOp,
        #[serde(default)]
        children: Vec<ConditionNode>,
    },
    Leaf(Condition),
}

impl ConditionNode {
    /// Empty AND: always true.
    pub fn always() -> Self {
        ConditionNode::Combinator {
            op: LogicalOp::And,
            children: Vec::new(),
        }
    }

    pub fn and(children: Vec<ConditionNode>) -> Self {
        ConditionNode::Combinator {
            op: LogicalOp::And,
            children,
        }
    }

    pub fn or(children: Vec<ConditionNode>) -> Self {
        ConditionNode::Combinator {
            op: LogicalOp::Or,
            children,
        }
    }

    pub fn not(child: ConditionNode) -> Self {
        ConditionNode::Combinator {
            op: LogicalOp::Not,
            children: vec![child],
        }
    }

    pub fn leaf(attribute: impl Into<String>, operator: Operator, value: impl Into<JsonValue>) -> Self {
        ConditionNode::Leaf(Condition::new(attribute, operator, value))
    }

    /// Parse and validate a stored condition document.
    pub fn parse(value: &JsonValue) -> DomainResult<Self> {
        let node = Self::parse_node(value)?;
        node.validate(MAX_CONDITION_DEPTH)?;
        Ok(node)
    }

    fn parse_node(value: &JsonValue) -> DomainResult<Self> {
        match value {
            JsonValue::Null => Ok(Self::always()),
            JsonValue::Array(items) => Ok(Self::and(
                items.iter().map(Self::parse_node).collect::<DomainResult<_>>()?,
            )),
            JsonValue::Object(fields) if fields.is_empty() => Ok(Self::always()),
            JsonValue::Object(fields) if fields.contains_key("type") => {
                serde_json::from_value(value.clone())
                    .map_err(|e| DomainError::validation(format!("malformed condition node: {e}")))
            }
            JsonValue::Object(fields) => {
                let attribute = ["attribute", "attribute_path", "attributePath", "field"]
                    .iter()
                    .find_map(|k| fields.get(*k))
                    .and_then(JsonValue::as_str);
                let operator = ["operator", "op"]
                    .iter()
                    .find_map(|k| fields.get(*k))
                    .and_then(JsonValue::as_str);

                match (attribute, operator) {
                    (Some(attribute), Some(operator)) => Ok(ConditionNode::Leaf(Condition {
                        attribute: attribute.to_string(),
                        operator: operator.parse()?,
                        value: ConditionValue::from(fields.get("value").cloned().unwrap_or(JsonValue::Null)),
                    })),
                    (None, Some(operator)) => {
                        let op: LogicalOp = operator.parse()?;
                        let children = ["conditions", "children"]
                            .iter()
                            .find_map(|k| fields.get(*k))
                            .map(|c| match c {
                                JsonValue::Array(items) => items.iter().map(Self::parse_node).collect(),
                                single => Self::parse_node(single).map(|n| vec![n]),
                            })
                            .transpose()?
                            .unwrap_or_default();
                        Ok(ConditionNode::Combinator { op, children })
                    }
                    _ => Err(DomainError::validation(
                        "condition node needs an operator (and an attribute for leaves)",
                    )),
                }
            }
            other => Err(DomainError::validation(format!(
                "condition node must be an object or array, got {other}"
            ))),
        }
    }

    /// Structural validation, independent of any attribute catalogue.
    pub fn validate(&self, max_depth: usize) -> DomainResult<()> {
        self.validate_with(max_depth, &|_| None)
    }

    /// Validation that also checks literals against declared attribute types.
    pub fn validate_with(
        &self,
        max_depth: usize,
        declared_type: &dyn Fn(&str) -> Option<AttributeDataType>,
    ) -> DomainResult<()> {
        self.validate_at(0, max_depth, declared_type)
    }

    fn validate_at(
        &self,
        depth: usize,
        max_depth: usize,
        declared_type: &dyn Fn(&str) -> Option<AttributeDataType>,
    ) -> DomainResult<()> {
        if depth > max_depth {
            return Err(DomainError::validation(format!(
                "condition tree deeper than {max_depth} levels"
            )));
        }
        match self {
            ConditionNode::Combinator { op, children } => {
                if *op == LogicalOp::Not && children.len() != 1 {
                    return Err(DomainError::validation(format!(
                        "NOT takes exactly one child, got {}",
                        children.len()
                    )));
                }
                for child in children {
                    child.validate_at(depth + 1, max_depth, declared_type)?;
                }
                Ok(())
            }
            ConditionNode::Leaf(condition) => validate_leaf(condition, declared_type),
        }
    }

    /// Every leaf in the tree, depth first.
    pub fn leaves(&self) -> Vec<&Condition> {
        let mut out = Vec::new();
        self.collect_leaves(&mut out);
        out
    }

    fn collect_leaves<'a>(&'a self, out: &mut Vec<&'a Condition>) {
        match self {
            ConditionNode::Combinator { children, .. } => {
                for child in children {
                    child.collect_leaves(out);
                }
            }
            ConditionNode::Leaf(c) => out.push(c),
        }
    }

    pub fn depth(&self) -> usize {
        match self {
            ConditionNode::Combinator { children, .. } => {
                1 + children.iter().map(ConditionNode::depth).max().unwrap_or(0)
            }
            ConditionNode::Leaf(_) => 1,
        }
    }
}

impl Default for ConditionNode {
    fn default() -> Self {
        Self::always()
    }
}

fn validate_leaf(
    condition: &Condition,
    declared_type: &dyn Fn(&str) -> Option<AttributeDataType>,
) -> DomainResult<()> {
    if AttributeCategory::split_path(&condition.attribute).is_none() {
        return Err(DomainError::validation(format!(
            "condition attribute '{}' must start with user., resource., environment. or action.",
            condition.attribute
        )));
    }

    let literal = match &condition.value {
        ConditionValue::Reference(path) => {
            // Bare `{{owner_id}}` is resolved against the opposite side at evaluation time.
            if path.contains('.') && AttributeCategory::split_path(path).is_none() {
                return Err(DomainError::validation(format!(
                    "template reference '{{{{{path}}}}}' does not name a known attribute category"
                )));
            }
            return Ok(());
        }
        ConditionValue::Literal(v) => v,
    };

    if literal.is_null() {
        return Err(DomainError::validation(format!(
            "condition on '{}' has no value",
            condition.attribute
        )));
    }

    match condition.operator {
        Operator::Matches => {
            let pattern = literal.as_str().ok_or_else(|| {
                DomainError::validation("MATCHES expects a string regular expression")
            })?;
            crate::pattern::compile(pattern)
                .map_err(|e| DomainError::validation(format!("invalid MATCHES pattern: {e}")))?;
        }
        Operator::In => {
            if !(literal.is_array() || literal.is_string()) {
                return Err(DomainError::validation(
                    "IN expects a list or a comma-separated string",
                ));
            }
        }
        op if op.is_ordering() => {
            if !(literal.is_number() || literal.is_string()) {
                return Err(DomainError::validation(format!(
                    "'{}' expects a number or date, got {literal}",
                    op.symbol()
                )));
            }
        }
        _ => {}
    }

    if let Some(data_type) = declared_type(&condition.attribute) {
        check_literal_type(condition, literal, data_type)?;
    }
    Ok(())
}

fn check_literal_type(condition: &Condition, literal: &JsonValue, data_type: AttributeDataType) -> DomainResult<()> {
    use crate::AttrValue;

    let scalars: Vec<&JsonValue> = match (condition.operator, literal) {
        (Operator::In, JsonValue::Array(items)) => items.iter().collect(),
        (Operator::In, JsonValue::String(_)) | (Operator::Matches, _) | (Operator::Contains, _) => {
            return Ok(());
        }
        _ => vec![literal],
    };

    for scalar in scalars {
        let coerced = AttrValue::from_json(scalar).coerce_to(data_type);
        if coerced.is_none() {
            return Err(DomainError::validation(format!(
                "value {scalar} cannot be compared with {:?} attribute '{}'",
                data_type, condition.attribute
            )));
        }
    }
    Ok(())
}
