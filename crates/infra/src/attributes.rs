//! Attribute catalogue and value administration.

use std::sync::Arc;

use verdict_core::{AttributeId, DomainError, DomainResult, UserId, ValidityWindow};
use verdict_policy::{Attribute, AttributeCategory, ResourceAttributeValue, UserAttributeValue};

use crate::store::AttributeStore;

pub struct AttributeAdministration {
    attributes: Arc<dyn AttributeStore>,
}

impl AttributeAdministration {
    pub fn new(attributes: Arc<dyn AttributeStore>) -> Self {
        Self { attributes }
    }

    pub fn define_attribute(&self, attribute: Attribute) -> DomainResult<Attribute> {
        attribute.validate()?;
        self.attributes.put_attribute(attribute.clone())?;
        tracing::info!(attribute = %attribute.name, data_type = ?attribute.data_type, "attribute defined");
        Ok(attribute)
    }

    pub fn deactivate_attribute(&self, id: AttributeId) -> DomainResult<Attribute> {
        let mut attribute = self
            .attributes
            .attribute(id)?
            .ok_or_else(|| DomainError::not_found(format!("attribute {id}")))?;
        attribute.active = false;
        self.attributes.put_attribute(attribute.clone())?;
        Ok(attribute)
    }

    /// Record a fact about a user. The raw value must decode under the
    /// attribute's declared type and metadata.
    pub fn set_user_value(
        &self,
        user_id: UserId,
        attribute_name: &str,
        raw: &str,
        validity: ValidityWindow,
    ) -> DomainResult<UserAttributeValue> {
        let attribute = self.writable(attribute_name, AttributeCategory::User, raw, &validity)?;
        let value = UserAttributeValue {
            user_id,
            attribute_id: attribute.id,
            value: raw.to_string(),
            validity,
            active: true,
        };
        self.attributes.add_user_value(value.clone())?;
        Ok(value)
    }

    pub fn set_resource_value(
        &self,
        resource_type: &str,
        resource_id: &str,
        attribute_name: &str,
        raw: &str,
        validity: ValidityWindow,
    ) -> DomainResult<ResourceAttributeValue> {
        if resource_type.trim().is_empty() || resource_id.trim().is_empty() {
            return Err(DomainError::validation("resource type and id are required"));
        }
        let attribute = self.writable(attribute_name, AttributeCategory::Resource, raw, &validity)?;
        let value = ResourceAttributeValue {
            resource_type: resource_type.to_string(),
            resource_id: resource_id.to_string(),
            attribute_id: attribute.id,
            value: raw.to_string(),
            validity,
            active: true,
        };
        self.attributes.add_resource_value(value.clone())?;
        Ok(value)
    }

    fn writable(
        &self,
        name: &str,
        category: AttributeCategory,
        raw: &str,
        validity: &ValidityWindow,
    ) -> DomainResult<Attribute> {
        let attribute = self
            .attributes
            .attribute_by_name(name)?
            .ok_or_else(|| DomainError::not_found(format!("attribute '{name}'")))?;
        if attribute.category() != Some(category) {
            return Err(DomainError::validation(format!(
                "attribute '{name}' is not a {} attribute",
                category.prefix()
            )));
        }
        if !attribute.active {
            return Err(DomainError::validation(format!("attribute '{name}' is inactive")));
        }
        validity.validate()?;
        attribute.validate_value(raw)?;
        Ok(attribute)
    }
}
