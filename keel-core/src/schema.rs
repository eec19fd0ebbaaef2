//! Schema - Per resource type attribute behaviour
//!
//! Providers describe which attributes force a replacement when they change
//! and which ones are computed by the provider. The differ uses this to choose
//! between an in-place update and a replacement.

use std::collections::HashMap;

/// Attribute schema
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AttributeSchema {
    pub name: String,
    /// Changing this attribute requires destroying and recreating the resource
    pub force_new: bool,
    /// Value is assigned by the provider, never compared against configuration
    pub computed: bool,
    pub description: Option<String>,
}

impl AttributeSchema {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn force_new(mut self) -> Self {
        self.force_new = true;
        self
    }

    pub fn computed(mut self) -> Self {
        self.computed = true;
        self
    }

    pub fn with_description(mut self, desc: impl Into<String>) -> Self {
        self.description = Some(desc.into());
        self
    }
}

/// Resource schema
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResourceSchema {
    pub resource_type: String,
    pub attributes: HashMap<String, AttributeSchema>,
}

impl ResourceSchema {
    pub fn new(resource_type: impl Into<String>) -> Self {
        Self {
            resource_type: resource_type.into(),
            attributes: HashMap::new(),
        }
    }

    pub fn attribute(mut self, schema: AttributeSchema) -> Self {
        self.attributes.insert(schema.name.clone(), schema);
        self
    }

    /// Whether a change to `name` can only be applied by replacement
    pub fn requires_replacement(&self, name: &str) -> bool {
        self.attributes.get(name).is_some_and(|a| a.force_new)
    }

    /// Whether `name` is a user-settable attribute known to this schema.
    ///
    /// Unknown attributes are treated as provider-assigned: their presence in
    /// state without a matching declaration is not a change.
    pub fn is_configurable(&self, name: &str) -> bool {
        self.attributes.get(name).is_some_and(|a| !a.computed)
    }
}
