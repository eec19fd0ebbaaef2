//! Shared fixtures for engine integration tests

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use keel_core::provider::{
    ApplyRequest, BoxFuture, ChangeKind, Provider, ProviderError, ProviderResult,
};
use keel_core::resource::{Attributes, ResourceId};
use keel_core::schema::{AttributeSchema, ResourceSchema};
use keel_engine::{Engine, EngineConfig};
use keel_state::MemoryBackend;
use serde_json::json;

/// Provider that records every call and fakes cloud behaviour
#[derive(Default)]
pub struct RecordingProvider {
    calls: Mutex<Vec<(ChangeKind, ResourceId)>>,
    failing: Mutex<HashSet<ResourceId>>,
    schemas: HashMap<String, ResourceSchema>,
    next_id: AtomicU64,
}

impl RecordingProvider {
    pub fn new() -> Self {
        let mut schemas = HashMap::new();
        for resource_type in ["vpc", "subnet"] {
            schemas.insert(
                resource_type.to_string(),
                ResourceSchema::new(resource_type)
                    .attribute(AttributeSchema::new("cidr_block").force_new())
                    .attribute(AttributeSchema::new("tags"))
                    .attribute(AttributeSchema::new("id").computed()),
            );
        }
        schemas.insert(
            "instance".to_string(),
            ResourceSchema::new("instance")
                .attribute(AttributeSchema::new("subnet_id").force_new())
                .attribute(AttributeSchema::new("instance_type"))
                .attribute(AttributeSchema::new("id").computed()),
        );
        Self {
            schemas,
            ..Default::default()
        }
    }

    /// Make every call for `id` fail
    pub fn fail_on(&self, id: ResourceId) {
        self.failing.lock().unwrap().insert(id);
    }

    pub fn calls(&self) -> Vec<(ChangeKind, ResourceId)> {
        self.calls.lock().unwrap().clone()
    }

    pub fn clear(&self) {
        self.calls.lock().unwrap().clear();
    }

    /// Position of the first matching call
    pub fn position(&self, kind: ChangeKind, id: &ResourceId) -> Option<usize> {
        self.calls()
            .iter()
            .position(|(k, called)| *k == kind && called == id)
    }

    pub fn was_called(&self, id: &ResourceId) -> bool {
        self.calls().iter().any(|(_, called)| called == id)
    }
}

impl Provider for RecordingProvider {
    fn name(&self) -> &'static str {
        "recording"
    }

    fn schema(&self, resource_type: &str) -> ResourceSchema {
        self.schemas
            .get(resource_type)
            .cloned()
            .unwrap_or_else(|| ResourceSchema::new(resource_type))
    }

    fn apply(&self, request: ApplyRequest) -> BoxFuture<'_, ProviderResult<Attributes>> {
        Box::pin(async move {
            self.calls
                .lock()
                .unwrap()
                .push((request.kind, request.id.clone()));

            if self.failing.lock().unwrap().contains(&request.id) {
                return Err(ProviderError::new("simulated failure").for_resource(request.id));
            }

            match request.kind {
                ChangeKind::Create => {
                    let n = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
                    let mut attrs = request.desired;
                    attrs.insert(
                        "id".to_string(),
                        json!(format!("{}-{}", request.id.resource_type, n)),
                    );
                    Ok(attrs)
                }
                ChangeKind::Update => {
                    let mut attrs = request.desired;
                    if let Some(id) = request.prior.as_ref().and_then(|p| p.get("id")) {
                        attrs.insert("id".to_string(), id.clone());
                    }
                    Ok(attrs)
                }
                ChangeKind::Delete => Ok(Attributes::new()),
            }
        })
    }
}

pub fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub fn engine(provider: Arc<RecordingProvider>) -> Engine {
    engine_on(provider, Arc::new(MemoryBackend::new()))
}

pub fn engine_on(provider: Arc<RecordingProvider>, backend: Arc<MemoryBackend>) -> Engine {
    init_logger();
    Engine::new(provider, backend, EngineConfig::default().with_parallelism(4))
}
