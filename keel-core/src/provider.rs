//! Provider - Trait abstracting resource operations
//!
//! A Provider performs the side effects for a specific infrastructure. The
//! engine calls it once per change with fully resolved attributes and commits
//! whatever attributes it returns. Calls are never retried by the engine.

use std::future::Future;
use std::pin::Pin;

use crate::resource::{Attributes, ResourceId};
use crate::schema::ResourceSchema;

/// Error type for Provider operations
#[derive(Debug)]
pub struct ProviderError {
    pub message: String,
    pub resource_id: Option<ResourceId>,
    pub cause: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl std::fmt::Display for ProviderError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if let Some(ref id) = self.resource_id {
            write!(f, "[{}] {}", id, self.message)
        } else {
            write!(f, "{}", self.message)
        }
    }
}

impl std::error::Error for ProviderError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.cause
            .as_ref()
            .map(|e| e.as_ref() as &dyn std::error::Error)
    }
}

impl ProviderError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            resource_id: None,
            cause: None,
        }
    }

    pub fn for_resource(mut self, id: ResourceId) -> Self {
        self.resource_id = Some(id);
        self
    }

    pub fn with_cause(mut self, cause: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.cause = Some(Box::new(cause));
        self
    }
}

pub type ProviderResult<T> = Result<T, ProviderError>;

/// Return type for async operations
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Kind of side effect requested from the provider
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Create,
    Update,
    Delete,
}

impl std::fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ChangeKind::Create => "create",
            ChangeKind::Update => "update",
            ChangeKind::Delete => "delete",
        };
        f.write_str(s)
    }
}

/// A single provider call
#[derive(Debug, Clone, PartialEq)]
pub struct ApplyRequest {
    pub id: ResourceId,
    pub kind: ChangeKind,
    /// Committed attributes; `None` for creates
    pub prior: Option<Attributes>,
    /// Fully resolved desired attributes; empty for deletes
    pub desired: Attributes,
}

impl ApplyRequest {
    pub fn create(id: ResourceId, desired: Attributes) -> Self {
        Self {
            id,
            kind: ChangeKind::Create,
            prior: None,
            desired,
        }
    }

    pub fn update(id: ResourceId, prior: Attributes, desired: Attributes) -> Self {
        Self {
            id,
            kind: ChangeKind::Update,
            prior: Some(prior),
            desired,
        }
    }

    pub fn delete(id: ResourceId, prior: Attributes) -> Self {
        Self {
            id,
            kind: ChangeKind::Delete,
            prior: Some(prior),
            desired: Attributes::new(),
        }
    }
}

/// Main Provider trait
///
/// The engine holds exactly one provider. All operations are async and
/// involve side effects.
pub trait Provider: Send + Sync {
    /// Name of this Provider (e.g., "aws")
    fn name(&self) -> &'static str;

    /// Attribute schema for a resource type.
    ///
    /// The default schema has no immutable attributes, so every change is an
    /// in-place update.
    fn schema(&self, resource_type: &str) -> ResourceSchema {
        ResourceSchema::new(resource_type)
    }

    /// Perform one change and return the resulting attributes.
    ///
    /// For deletes the returned attributes are ignored.
    fn apply(&self, request: ApplyRequest) -> BoxFuture<'_, ProviderResult<Attributes>>;
}

/// Provider implementation for Box<dyn Provider>
/// This enables dynamic dispatch for Providers
impl Provider for Box<dyn Provider> {
    fn name(&self) -> &'static str {
        (**self).name()
    }

    fn schema(&self, resource_type: &str) -> ResourceSchema {
        (**self).schema(resource_type)
    }

    fn apply(&self, request: ApplyRequest) -> BoxFuture<'_, ProviderResult<Attributes>> {
        (**self).apply(request)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::AttributeSchema;
    use serde_json::json;

    // Mock Provider for testing
    struct MockProvider;

    impl Provider for MockProvider {
        fn name(&self) -> &'static str {
            "mock"
        }

        fn schema(&self, resource_type: &str) -> ResourceSchema {
            ResourceSchema::new(resource_type)
                .attribute(AttributeSchema::new("cidr_block").force_new())
        }

        fn apply(&self, request: ApplyRequest) -> BoxFuture<'_, ProviderResult<Attributes>> {
            Box::pin(async move {
                match request.kind {
                    ChangeKind::Create => {
                        let mut attrs = request.desired;
                        attrs.insert("id".to_string(), json!("mock-id-123"));
                        Ok(attrs)
                    }
                    ChangeKind::Update => Ok(request.desired),
                    ChangeKind::Delete => Err(ProviderError::new("delete not supported")
                        .for_resource(request.id)),
                }
            })
        }
    }

    #[tokio::test]
    async fn mock_provider_create_assigns_id() {
        let provider: Box<dyn Provider> = Box::new(MockProvider);
        let request = ApplyRequest::create(ResourceId::new("test", "example"), Attributes::new());
        let attrs = provider.apply(request).await.unwrap();
        assert_eq!(attrs.get("id"), Some(&json!("mock-id-123")));
    }

    #[tokio::test]
    async fn provider_error_names_resource() {
        let provider = MockProvider;
        let request = ApplyRequest::delete(ResourceId::new("test", "example"), Attributes::new());
        let err = provider.apply(request).await.unwrap_err();
        assert_eq!(err.to_string(), "[test.example] delete not supported");
    }

    #[test]
    fn boxed_provider_forwards_schema() {
        let provider: Box<dyn Provider> = Box::new(MockProvider);
        assert_eq!(provider.name(), "mock");
        assert!(provider.schema("subnet").requires_replacement("cidr_block"));
    }
}
