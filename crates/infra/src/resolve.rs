//! Builds the evaluation context for one request from stored attribute
//! values, caller-supplied values and the clock.

use std::collections::HashMap;

use chrono::{DateTime, Timelike, Utc};

use verdict_core::{AttributeId, CancellationToken, DomainResult};
use verdict_policy::{AttrValue, Attribute, AttributeCategory, EvaluationContext, PolicyRequest};

use crate::store::AttributeStore;

/// Environment keys derived from the clock when the caller did not set them.
pub const ENV_HOUR: &str = "hour";
pub const ENV_DAY_OF_WEEK: &str = "day_of_week";
pub const ENV_DATE: &str = "date";
pub const ENV_CURRENT_TIME: &str = "current_time";

struct Catalogue {
    by_id: HashMap<AttributeId, Attribute>,
    by_name: HashMap<String, AttributeId>,
}

impl Catalogue {
    fn load(store: &dyn AttributeStore) -> DomainResult<Self> {
        let mut by_id = HashMap::new();
        let mut by_name = HashMap::new();
        for attribute in store.attributes()? {
            by_name.insert(attribute.name.clone(), attribute.id);
            by_id.insert(attribute.id, attribute);
        }
        Ok(Self { by_id, by_name })
    }

    fn by_name(&self, name: &str) -> Option<&Attribute> {
        self.by_name.get(name).and_then(|id| self.by_id.get(id))
    }

    /// Decode a stored string under its definition. Inactive definitions and
    /// values that no longer decode are skipped.
    fn decode(&self, attribute_id: AttributeId, raw: &str) -> Option<(&Attribute, AttrValue)> {
        let attribute = self.by_id.get(&attribute_id).filter(|a| a.active)?;
        match AttrValue::decode(raw, attribute.data_type) {
            Some(value) => Some((attribute, value)),
            None => {
                tracing::trace!(attribute = %attribute.name, raw, "stored value does not decode; skipped");
                None
            }
        }
    }
}

/// Resolve the full context for `request` at `now`.
///
/// Precedence per key: stored effective values, then caller-supplied values
/// (re-typed by the catalogue where one exists), then derived defaults.
/// Multiple effective values for the same attribute resolve to the newest.
/// `user.id`, `resource.id`, `resource.type`, `action.name` and
/// `action.resource_type` always reflect the request.
pub fn resolve_context(
    store: &dyn AttributeStore,
    request: &PolicyRequest,
    supplied: EvaluationContext,
    now: DateTime<Utc>,
    cancel: &CancellationToken,
) -> DomainResult<EvaluationContext> {
    cancel.check()?;
    let catalogue = Catalogue::load(store)?;
    let mut ctx = retype_supplied(&catalogue, supplied);

    cancel.check()?;
    for value in store.effective_user_values(request.principal, now)? {
        if let Some((attribute, decoded)) = catalogue.decode(value.attribute_id, &value.value) {
            insert_stored(&mut ctx, attribute, decoded);
        }
    }

    if let Some(resource_id) = request.resource_id.as_deref() {
        cancel.check()?;
        for value in store.effective_resource_values(&request.resource_type, resource_id, now)? {
            if let Some((attribute, decoded)) = catalogue.decode(value.attribute_id, &value.value) {
                insert_stored(&mut ctx, attribute, decoded);
            }
        }
    }

    pin_request_identity(&mut ctx, request);
    derive_environment(&mut ctx, now);

    cancel.check()?;
    Ok(ctx)
}

/// Keys that name the request itself. They always come from the request,
/// never from supplied or stored values.
fn pin_request_identity(ctx: &mut EvaluationContext, request: &PolicyRequest) {
    pin(ctx, AttributeCategory::User, "id", request.principal.to_string().into());
    pin(ctx, AttributeCategory::Resource, "type", request.resource_type.as_str().into());
    match request.resource_id.as_deref() {
        Some(resource_id) => pin(ctx, AttributeCategory::Resource, "id", resource_id.into()),
        None => {
            ctx.resource.remove("id");
        }
    }
    pin(ctx, AttributeCategory::Action, "name", request.action.as_str().into());
    pin(ctx, AttributeCategory::Action, "resource_type", request.resource_type.as_str().into());
}

fn pin(ctx: &mut EvaluationContext, category: AttributeCategory, key: &str, value: AttrValue) {
    let previous = ctx.map_mut(category).insert(key.to_string(), value.clone());
    if previous.is_some_and(|p| p != value) {
        tracing::warn!(
            attribute = %format!("{}.{key}", category.prefix()),
            "supplied value replaced by the request's own"
        );
    }
}

fn insert_stored(ctx: &mut EvaluationContext, attribute: &Attribute, value: AttrValue) {
    // Only user and resource facts are stored per subject.
    if let Some(category @ (AttributeCategory::User | AttributeCategory::Resource)) = attribute.category() {
        ctx.map_mut(category).insert(attribute.key().to_string(), value);
    }
}

fn retype_supplied(catalogue: &Catalogue, supplied: EvaluationContext) -> EvaluationContext {
    let mut ctx = supplied;
    for category in AttributeCategory::ALL {
        ctx.map_mut(category).retain(|key, value| {
            let name = format!("{}.{key}", category.prefix());
            let Some(attribute) = catalogue.by_name(&name) else {
                return true;
            };
            match value.coerce_to(attribute.data_type) {
                Some(typed) => {
                    *value = typed;
                    true
                }
                None => {
                    tracing::warn!(
                        attribute = %name,
                        expected = ?attribute.data_type,
                        "supplied value does not fit the declared type; dropped"
                    );
                    false
                }
            }
        });
    }
    ctx
}

fn derive_environment(ctx: &mut EvaluationContext, now: DateTime<Utc>) {
    let env = AttributeCategory::Environment;
    ctx.set_if_absent(env, ENV_HOUR, i64::from(now.hour()));
    ctx.set_if_absent(env, ENV_DAY_OF_WEEK, now.format("%A").to_string());
    ctx.set_if_absent(env, ENV_DATE, now.format("%Y-%m-%d").to_string());
    ctx.set_if_absent(env, ENV_CURRENT_TIME, now);
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use verdict_core::{DomainError, UserId, ValidityWindow};
    use verdict_policy::{AttributeDataType, ResourceAttributeValue, UserAttributeValue};

    use crate::store::InMemoryAttributeStore;

    fn at(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 4, hour, 15, 0).unwrap()
    }

    fn define(store: &InMemoryAttributeStore, name: &str, data_type: AttributeDataType) -> Attribute {
        let attribute = Attribute::new(name, data_type).unwrap();
        store.put_attribute(attribute.clone()).unwrap();
        attribute
    }

    #[test]
    fn stored_values_are_typed_and_override_caller() {
        let store = InMemoryAttributeStore::new();
        let clearance = define(&store, "user.clearance", AttributeDataType::Integer);
        let user = UserId::new();
        store
            .add_user_value(UserAttributeValue {
                user_id: user,
                attribute_id: clearance.id,
                value: "3".to_string(),
                validity: ValidityWindow::always(),
                active: true,
            })
            .unwrap();

        let request = PolicyRequest::new(user, "doc:read", "doc");
        let supplied = EvaluationContext::new().with_user("clearance", 9);
        let ctx = resolve_context(&store, &request, supplied, at(10), &CancellationToken::new()).unwrap();
        assert_eq!(ctx.user.get("clearance"), Some(&AttrValue::Integer(3)));
        assert_eq!(ctx.user.get("id"), Some(&AttrValue::String(user.to_string())));
    }

    #[test]
    fn expired_values_are_missing() {
        let store = InMemoryAttributeStore::new();
        let owner = define(&store, "resource.owner_id", AttributeDataType::String);
        store
            .add_resource_value(ResourceAttributeValue {
                resource_type: "doc".to_string(),
                resource_id: "d1".to_string(),
                attribute_id: owner.id,
                value: "u1".to_string(),
                validity: ValidityWindow::between(at(0), at(9)).unwrap(),
                active: true,
            })
            .unwrap();

        let request = PolicyRequest::new(UserId::new(), "doc:read", "doc").with_resource_id("d1");
        let before = resolve_context(&store, &request, EvaluationContext::new(), at(8), &CancellationToken::new()).unwrap();
        assert_eq!(before.resource.get("owner_id"), Some(&AttrValue::from("u1")));

        let after = resolve_context(&store, &request, EvaluationContext::new(), at(9), &CancellationToken::new()).unwrap();
        assert!(!after.resource.contains_key("owner_id"));
        assert_eq!(after.resource.get("id"), Some(&AttrValue::from("d1")));
    }

    #[test]
    fn newest_effective_value_wins() {
        let store = InMemoryAttributeStore::new();
        let dept = define(&store, "user.department", AttributeDataType::String);
        let user = UserId::new();
        for value in ["sales", "finance"] {
            store
                .add_user_value(UserAttributeValue {
                    user_id: user,
                    attribute_id: dept.id,
                    value: value.to_string(),
                    validity: ValidityWindow::starting(at(0) - Duration::days(1)),
                    active: true,
                })
                .unwrap();
        }
        let request = PolicyRequest::new(user, "doc:read", "doc");
        let ctx = resolve_context(&store, &request, EvaluationContext::new(), at(10), &CancellationToken::new()).unwrap();
        assert_eq!(ctx.user.get("department"), Some(&AttrValue::from("finance")));
    }

    #[test]
    fn environment_is_derived_unless_supplied() {
        let store = InMemoryAttributeStore::new();
        let request = PolicyRequest::new(UserId::new(), "purchase:approve", "purchase");

        let derived = resolve_context(&store, &request, EvaluationContext::new(), at(20), &CancellationToken::new()).unwrap();
        assert_eq!(derived.environment.get(ENV_HOUR), Some(&AttrValue::Integer(20)));
        assert_eq!(derived.environment.get(ENV_DAY_OF_WEEK), Some(&AttrValue::from("Wednesday")));
        assert_eq!(derived.environment.get(ENV_DATE), Some(&AttrValue::from("2026-03-04")));
        assert_eq!(derived.action.get("name"), Some(&AttrValue::from("purchase:approve")));

        let supplied = EvaluationContext::new().with_environment(ENV_HOUR, 8);
        let ctx = resolve_context(&store, &request, supplied, at(20), &CancellationToken::new()).unwrap();
        assert_eq!(ctx.environment.get(ENV_HOUR), Some(&AttrValue::Integer(8)));
    }

    #[test]
    fn caller_values_are_retyped_by_catalogue() {
        let store = InMemoryAttributeStore::new();
        define(&store, "resource.amount", AttributeDataType::Float);
        let request = PolicyRequest::new(UserId::new(), "purchase:approve", "purchase");
        let supplied = EvaluationContext::new().with_resource("amount", "150000");
        let ctx = resolve_context(&store, &request, supplied, at(10), &CancellationToken::new()).unwrap();
        assert_eq!(ctx.resource.get("amount"), Some(&AttrValue::Float(150_000.0)));
    }

    #[test]
    fn request_identity_cannot_be_supplied() {
        let store = InMemoryAttributeStore::new();
        let principal = UserId::new();
        let request = PolicyRequest::new(principal, "doc:edit", "doc").with_resource_id("d1");
        let supplied = EvaluationContext::new()
            .with_user("id", "someone-else")
            .with_resource("id", "d2")
            .with_resource("type", "invoice")
            .with_action("name", "doc:read");
        let ctx = resolve_context(&store, &request, supplied, at(10), &CancellationToken::new()).unwrap();
        assert_eq!(ctx.user.get("id"), Some(&AttrValue::String(principal.to_string())));
        assert_eq!(ctx.resource.get("id"), Some(&AttrValue::from("d1")));
        assert_eq!(ctx.resource.get("type"), Some(&AttrValue::from("doc")));
        assert_eq!(ctx.action.get("name"), Some(&AttrValue::from("doc:edit")));

        let without_id = PolicyRequest::new(principal, "doc:edit", "doc");
        let supplied = EvaluationContext::new().with_resource("id", "d2");
        let ctx = resolve_context(&store, &without_id, supplied, at(10), &CancellationToken::new()).unwrap();
        assert!(!ctx.resource.contains_key("id"));
    }

    #[test]
    fn mistyped_caller_values_are_dropped() {
        let store = InMemoryAttributeStore::new();
        define(&store, "resource.amount", AttributeDataType::Float);
        define(&store, "user.department", AttributeDataType::String);
        let request = PolicyRequest::new(UserId::new(), "purchase:approve", "purchase");
        let supplied = EvaluationContext::new()
            .with_resource("amount", "a lot")
            .with_user("department", "finance");
        let ctx = resolve_context(&store, &request, supplied, at(10), &CancellationToken::new()).unwrap();
        assert!(!ctx.resource.contains_key("amount"));
        assert_eq!(ctx.user.get("department"), Some(&AttrValue::from("finance")));
    }

    #[test]
    fn cancelled_token_aborts() {
        let store = InMemoryAttributeStore::new();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let request = PolicyRequest::new(UserId::new(), "doc:read", "doc");
        let err = resolve_context(&store, &request, EvaluationContext::new(), at(10), &cancel).unwrap_err();
        assert_eq!(err, DomainError::Cancelled);
    }
}
