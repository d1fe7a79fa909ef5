//! Condition tree evaluation.
//!
//! Evaluation never fails: a missing attribute, an unresolvable template or a
//! value that cannot be coerced turns the leaf false.

use serde::Serialize;
use serde_json::Value as JsonValue;

use crate::{
    AttrValue, AttributeCategory, AttributeDataType, Condition, ConditionNode, ConditionValue,
    EvaluationContext, LogicalOp, Operator, pattern,
};

/// Outcome of one leaf, kept for explanations and audit records.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConditionTrace {
    pub attribute: String,
    pub operator: Operator,
    pub expected: Option<AttrValue>,
    pub actual: Option<AttrValue>,
    pub result: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<&'static str>,
}

pub fn evaluate(node: &ConditionNode, ctx: &EvaluationContext) -> bool {
    eval_node(node, ctx, &mut None)
}

/// Evaluate and record every leaf that was actually visited.
///
/// Short-circuiting applies, so leaves after a decisive child are absent.
pub fn evaluate_traced(node: &ConditionNode, ctx: &EvaluationContext) -> (bool, Vec<ConditionTrace>) {
    let mut traces = Some(Vec::new());
    let result = eval_node(node, ctx, &mut traces);
    (result, traces.unwrap_or_default())
}

fn eval_node(node: &ConditionNode, ctx: &EvaluationContext, traces: &mut Option<Vec<ConditionTrace>>) -> bool {
    match node {
        ConditionNode::Combinator { op: LogicalOp::And, children } => {
            children.iter().all(|c| eval_node(c, ctx, traces))
        }
        ConditionNode::Combinator { op: LogicalOp::Or, children } => {
            children.iter().any(|c| eval_node(c, ctx, traces))
        }
        ConditionNode::Combinator { op: LogicalOp::Not, children } => match children.as_slice() {
            [child] => !eval_node(child, ctx, traces),
            // Rejected at write time; an ill-formed NOT never grants.
            _ => false,
        },
        ConditionNode::Leaf(condition) => {
            let trace = eval_leaf(condition, ctx);
            let result = trace.result;
            if let Some(traces) = traces.as_mut() {
                traces.push(trace);
            }
            result
        }
    }
}

fn eval_leaf(condition: &Condition, ctx: &EvaluationContext) -> ConditionTrace {
    let actual = ctx.lookup(&condition.attribute);
    let expected = resolve_expected(condition, ctx);

    let mut trace = ConditionTrace {
        attribute: condition.attribute.clone(),
        operator: condition.operator,
        expected: expected.clone(),
        actual: actual.clone(),
        result: false,
        note: None,
    };

    let (actual, expected) = match (actual, expected) {
        (Some(a), Some(e)) => (a, e),
        (None, _) => {
            tracing::trace!(attribute = %condition.attribute, "attribute missing, leaf is false");
            trace.note = Some("attribute missing");
            return trace;
        }
        (Some(_), None) => {
            tracing::trace!(attribute = %condition.attribute, "template reference unresolved, leaf is false");
            trace.note = Some("reference unresolved");
            return trace;
        }
    };

    let result = match condition.operator {
        Operator::Eq => values_equal(&actual, &expected),
        Operator::Ne => values_equal(&actual, &expected).map(|eq| !eq),
        Operator::Gt | Operator::Lt | Operator::Ge | Operator::Le => {
            compare(&actual, &expected, condition.operator)
        }
        Operator::In => Some(is_member(&actual, &expected)),
        Operator::Contains => Some(contains(&actual, &expected)),
        Operator::Matches => regex_matches(&actual, &expected),
    };

    match result {
        Some(r) => trace.result = r,
        None => {
            tracing::trace!(
                attribute = %condition.attribute,
                operator = %condition.operator,
                "values not comparable, leaf is false"
            );
            trace.note = Some("values not comparable");
        }
    }
    trace
}

fn resolve_expected(condition: &Condition, ctx: &EvaluationContext) -> Option<AttrValue> {
    match &condition.value {
        ConditionValue::Literal(v) => Some(AttrValue::from_json(v)),
        ConditionValue::Reference(path) if path.contains('.') => ctx.lookup(path),
        ConditionValue::Reference(key) => {
            let (side, _) = AttributeCategory::split_path(&condition.attribute)?;
            ctx.map(side.opposite()).get(key.as_str()).cloned()
        }
    }
}

/// `None` when the two values cannot be brought to a common type.
fn values_equal(actual: &AttrValue, expected: &AttrValue) -> Option<bool> {
    match (actual, expected) {
        (AttrValue::Integer(_) | AttrValue::Float(_), _) => match (actual.as_i64(), expected.as_i64()) {
            (Some(a), Some(e)) => Some(a == e),
            _ => Some(actual.as_f64()? == expected.as_f64()?),
        },
        (AttrValue::DateTime(a), _) => Some(*a == expected.as_datetime()?),
        (AttrValue::Boolean(a), _) => Some(*a == expected.as_bool()?),
        (AttrValue::Array(a), AttrValue::Array(e)) => Some(a == e),
        (AttrValue::Json(a), _) => Some(*a == expected.to_json()),
        _ => {
            let coerced = expected.coerce_to(actual.data_type())?;
            Some(*actual == coerced)
        }
    }
}

/// Ordering comparisons are numeric or chronological only.
fn compare(actual: &AttrValue, expected: &AttrValue, op: Operator) -> Option<bool> {
    let ordering = match (actual.as_i64(), expected.as_i64(), actual.as_f64(), expected.as_f64()) {
        (Some(a), Some(e), _, _) => a.cmp(&e),
        (_, _, Some(a), Some(e)) => a.partial_cmp(&e)?,
        _ => {
            let a = actual.as_datetime()?;
            let e = expected.as_datetime()?;
            a.cmp(&e)
        }
    };
    Some(match op {
        Operator::Gt => ordering.is_gt(),
        Operator::Lt => ordering.is_lt(),
        Operator::Ge => ordering.is_ge(),
        Operator::Le => ordering.is_le(),
        _ => return None,
    })
}

fn candidate_list(expected: &AttrValue) -> Vec<AttrValue> {
    match expected {
        AttrValue::Array(items) => items.clone(),
        AttrValue::Json(JsonValue::Array(items)) => items.iter().map(AttrValue::from_json).collect(),
        AttrValue::String(s) if s.trim_start().starts_with('[') => {
            AttrValue::decode(s, AttributeDataType::Array)
                .and_then(|v| v.as_array())
                .unwrap_or_default()
        }
        AttrValue::String(s) => s
            .split(',')
            .map(|part| AttrValue::String(part.trim().to_string()))
            .collect(),
        other => vec![other.clone()],
    }
}

fn is_member(actual: &AttrValue, expected: &AttrValue) -> bool {
    let candidates = candidate_list(expected);
    let member = |value: &AttrValue| candidates.iter().any(|c| values_equal(value, c) == Some(true));
    match actual.as_array() {
        Some(items) => items.iter().any(member),
        None => member(actual),
    }
}

fn contains(actual: &AttrValue, expected: &AttrValue) -> bool {
    match actual {
        AttrValue::Array(items) => items.iter().any(|i| values_equal(i, expected) == Some(true)),
        AttrValue::Json(JsonValue::Object(fields)) => fields.contains_key(&expected.to_plain_string()),
        AttrValue::Json(JsonValue::Array(items)) => {
            let needle = expected.to_json();
            items.contains(&needle)
        }
        other => other.to_plain_string().contains(&expected.to_plain_string()),
    }
}

fn regex_matches(actual: &AttrValue, expected: &AttrValue) -> Option<bool> {
    let AttrValue::String(pattern) = expected else {
        return None;
    };
    let re = pattern::compiled(pattern)?;
    Some(re.is_match(&actual.to_plain_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    fn purchase_deny_conditions() -> ConditionNode {
        ConditionNode::and(vec![
            ConditionNode::leaf("resource.amount", Operator::Gt, 100_000),
            ConditionNode::or(vec![
                ConditionNode::leaf("environment.hour", Operator::Lt, 9),
                ConditionNode::leaf("environment.hour", Operator::Ge, 17),
            ]),
            ConditionNode::leaf("user.role", Operator::Ne, "super_admin"),
        ])
    }

    #[test]
    fn purchase_after_hours_matches() {
        let ctx = EvaluationContext::new()
            .with_resource("amount", 150_000i64)
            .with_environment("hour", 20i64)
            .with_user("role", "manager");
        assert!(evaluate(&purchase_deny_conditions(), &ctx));

        let office_hours = ctx.clone().with_environment("hour", 11i64);
        assert!(!evaluate(&purchase_deny_conditions(), &office_hours));

        let admin = ctx.with_user("role", "super_admin");
        assert!(!evaluate(&purchase_deny_conditions(), &admin));
    }

    #[test]
    fn owner_template_compares_across_sides() {
        let cond = ConditionNode::leaf("user.id", Operator::Eq, "{{resource.owner_id}}");
        let owner = EvaluationContext::new()
            .with_user("id", "u1")
            .with_resource("owner_id", "u1");
        let other = owner.clone().with_resource("owner_id", "u2");
        assert!(evaluate(&cond, &owner));
        assert!(!evaluate(&cond, &other));
    }

    #[test]
    fn bare_template_resolves_against_opposite_side() {
        let cond = ConditionNode::leaf("user.id", Operator::Eq, "{{owner_id}}");
        let ctx = EvaluationContext::new()
            .with_user("id", "u1")
            .with_resource("owner_id", "u1");
        assert!(evaluate(&cond, &ctx));
    }

    #[test]
    fn unresolved_template_is_false() {
        let cond = ConditionNode::leaf("user.id", Operator::Ne, "{{resource.owner_id}}");
        let ctx = EvaluationContext::new().with_user("id", "u1");
        assert!(!evaluate(&cond, &ctx));
    }

    #[test]
    fn empty_combinators() {
        let ctx = EvaluationContext::new();
        assert!(evaluate(&ConditionNode::and(vec![]), &ctx));
        assert!(!evaluate(&ConditionNode::or(vec![]), &ctx));
    }

    #[test]
    fn missing_attribute_is_false_for_both_polarities() {
        let ctx = EvaluationContext::new();
        assert!(!evaluate(&ConditionNode::leaf("user.department", Operator::Eq, "finance"), &ctx));
        assert!(!evaluate(&ConditionNode::leaf("user.department", Operator::Ne, "finance"), &ctx));
        // NOT of a failed leaf is true; authors who want fail-closed negation use `!=`.
        assert!(evaluate(
            &ConditionNode::not(ConditionNode::leaf("user.department", Operator::Eq, "finance")),
            &ctx
        ));
    }

    #[test]
    fn uncoercible_numeric_comparison_is_false() {
        let ctx = EvaluationContext::new().with_resource("amount", "lots");
        assert!(!evaluate(&ConditionNode::leaf("resource.amount", Operator::Gt, 10), &ctx));
        assert!(!evaluate(&ConditionNode::leaf("resource.amount", Operator::Le, 10), &ctx));
    }

    #[test]
    fn string_encoded_numbers_and_dates_compare() {
        let ctx = EvaluationContext::new()
            .with_resource("amount", "150000")
            .with_environment("date", "2026-03-01");
        assert!(evaluate(&ConditionNode::leaf("resource.amount", Operator::Ge, 150_000), &ctx));
        assert!(evaluate(&ConditionNode::leaf("environment.date", Operator::Lt, "2026-04-01"), &ctx));
        assert!(!evaluate(&ConditionNode::leaf("environment.date", Operator::Lt, "2026-01-01"), &ctx));
    }

    #[test]
    fn equality_coerces_to_actual_type() {
        let ctx = EvaluationContext::new()
            .with_user("clearance", 3i64)
            .with_user("verified", true);
        assert!(evaluate(&ConditionNode::leaf("user.clearance", Operator::Eq, "3"), &ctx));
        assert!(evaluate(&ConditionNode::leaf("user.verified", Operator::Eq, "true"), &ctx));
        assert!(!evaluate(&ConditionNode::leaf("user.verified", Operator::Ne, "maybe"), &ctx));
    }

    #[test]
    fn in_accepts_lists_and_csv() {
        let ctx = EvaluationContext::new()
            .with_user("department", "finance")
            .with_user("groups", json!(["ops", "audit"]));
        assert!(evaluate(
            &ConditionNode::leaf("user.department", Operator::In, json!(["sales", "finance"])),
            &ctx
        ));
        assert!(evaluate(&ConditionNode::leaf("user.department", Operator::In, "sales, finance"), &ctx));
        assert!(!evaluate(&ConditionNode::leaf("user.department", Operator::In, "sales,legal"), &ctx));
        assert!(evaluate(&ConditionNode::leaf("user.groups", Operator::In, json!(["audit"])), &ctx));
    }

    #[test]
    fn contains_and_matches() {
        let ctx = EvaluationContext::new()
            .with_user("email", "ana@example.com")
            .with_user("groups", json!(["ops", "audit"]))
            .with_resource("meta", json!({"confidential": true}));
        assert!(evaluate(&ConditionNode::leaf("user.email", Operator::Contains, "@example"), &ctx));
        assert!(evaluate(&ConditionNode::leaf("user.groups", Operator::Contains, "ops"), &ctx));
        assert!(evaluate(&ConditionNode::leaf("resource.meta", Operator::Contains, "confidential"), &ctx));
        assert!(evaluate(
            &ConditionNode::leaf("user.email", Operator::Matches, r"^[a-z]+@example\.com$"),
            &ctx
        ));
        assert!(!evaluate(&ConditionNode::leaf("user.email", Operator::Matches, "([bad"), &ctx));
    }

    #[test]
    fn integers_beyond_f64_precision_compare_exactly() {
        let big = 1i64 << 53;
        let ctx = EvaluationContext::new().with_resource("amount", big + 1);
        assert!(evaluate(&ConditionNode::leaf("resource.amount", Operator::Gt, big), &ctx));
        assert!(!evaluate(&ConditionNode::leaf("resource.amount", Operator::Eq, big), &ctx));
        assert!(evaluate(&ConditionNode::leaf("resource.amount", Operator::Ne, big), &ctx));
        assert!(!evaluate(&ConditionNode::leaf("resource.amount", Operator::Le, big), &ctx));

        let max = EvaluationContext::new().with_resource("amount", i64::MAX);
        assert!(evaluate(&ConditionNode::leaf("resource.amount", Operator::Gt, i64::MAX - 1), &max));
        assert!(evaluate(&ConditionNode::leaf("resource.amount", Operator::Eq, i64::MAX.to_string()), &max));
    }

    #[test]
    fn mixed_integer_and_float_still_compare() {
        let ctx = EvaluationContext::new().with_resource("amount", 10i64);
        assert!(evaluate(&ConditionNode::leaf("resource.amount", Operator::Lt, 10.5), &ctx));
        assert!(evaluate(&ConditionNode::leaf("resource.amount", Operator::Eq, 10.0), &ctx));
    }

    #[test]
    fn validated_pattern_is_reused_by_evaluation() {
        let leaf = ConditionNode::leaf("user.email", Operator::Matches, r"^reuse-[a-z]+@example\.com$");
        leaf.validate(8).unwrap();
        let ctx = EvaluationContext::new().with_user("email", "reuse-ana@example.com");
        assert!(evaluate(&leaf, &ctx));
        assert!(pattern::compiled(r"^reuse-[a-z]+@example\.com$").is_some());
    }

    #[test]
    fn traced_evaluation_records_visited_leaves() {
        let ctx = EvaluationContext::new()
            .with_resource("amount", 50i64)
            .with_environment("hour", 20i64)
            .with_user("role", "manager");
        let (result, traces) = evaluate_traced(&purchase_deny_conditions(), &ctx);
        assert!(!result);
        // AND stops after the first false leaf.
        assert_eq!(traces.len(), 1);
        assert_eq!(traces[0].attribute, "resource.amount");
        assert!(!traces[0].result);
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 256,
            ..ProptestConfig::default()
        })]

        #[test]
        fn not_is_negation(amount in any::<i64>(), threshold in any::<i64>()) {
            let ctx = EvaluationContext::new().with_resource("amount", amount);
            let leaf = ConditionNode::leaf("resource.amount", Operator::Gt, threshold);
            prop_assert_eq!(evaluate(&ConditionNode::not(leaf.clone()), &ctx), !evaluate(&leaf, &ctx));
        }

        #[test]
        fn integer_ordering_matches_i64(amount in any::<i64>(), threshold in any::<i64>()) {
            let ctx = EvaluationContext::new().with_resource("amount", amount);
            prop_assert_eq!(
                evaluate(&ConditionNode::leaf("resource.amount", Operator::Gt, threshold), &ctx),
                amount > threshold
            );
            prop_assert_eq!(
                evaluate(&ConditionNode::leaf("resource.amount", Operator::Eq, threshold), &ctx),
                amount == threshold
            );
        }

        #[test]
        fn and_or_of_single_child_is_identity(hour in 0i64..24) {
            let ctx = EvaluationContext::new().with_environment("hour", hour);
            let leaf = ConditionNode::leaf("environment.hour", Operator::Ge, 17);
            let plain = evaluate(&leaf, &ctx);
            prop_assert_eq!(evaluate(&ConditionNode::and(vec![leaf.clone()]), &ctx), plain);
            prop_assert_eq!(evaluate(&ConditionNode::or(vec![leaf]), &ctx), plain);
        }
    }
}
