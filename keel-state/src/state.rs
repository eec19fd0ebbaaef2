//! State record structures for persisting infrastructure state

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use keel_core::plan::PriorState;
use keel_core::resource::{
    Attributes, Reference, ResourceId, ValueSource, combine_instances,
};
use serde::{Deserialize, Serialize};

/// Last committed state of one resource instance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateRecord {
    pub id: ResourceId,
    /// Attributes returned by the provider, computed ones included
    pub attributes: Attributes,
    /// Dependencies the resource had when it was applied
    #[serde(default)]
    pub dependencies: BTreeSet<ResourceId>,
    /// `prevent_destroy` at the time of the last apply
    #[serde(default)]
    pub protected: bool,
    /// Incremented by one on every commit, starting at 1
    pub serial: u64,
    /// blake3 hash of the record body
    pub checksum: String,
    /// Version of Keel that last modified this record
    pub keel_version: String,
    pub updated: DateTime<Utc>,
}

/// Fields covered by the checksum
#[derive(Serialize)]
struct RecordBody<'a> {
    id: &'a ResourceId,
    attributes: &'a Attributes,
    dependencies: &'a BTreeSet<ResourceId>,
    protected: bool,
    serial: u64,
}

impl StateRecord {
    /// Create an unsealed record; the store assigns serial and checksum on commit
    pub fn new(id: ResourceId, attributes: Attributes) -> Self {
        Self {
            id,
            attributes,
            dependencies: BTreeSet::new(),
            protected: false,
            serial: 0,
            checksum: String::new(),
            keel_version: env!("CARGO_PKG_VERSION").to_string(),
            updated: Utc::now(),
        }
    }

    pub fn with_dependencies(mut self, dependencies: BTreeSet<ResourceId>) -> Self {
        self.dependencies = dependencies;
        self
    }

    pub fn with_protected(mut self, protected: bool) -> Self {
        self.protected = protected;
        self
    }

    fn compute_checksum(&self) -> String {
        let body = RecordBody {
            id: &self.id,
            attributes: &self.attributes,
            dependencies: &self.dependencies,
            protected: self.protected,
            serial: self.serial,
        };
        // Serializing plain maps and strings cannot fail
        let bytes = serde_json::to_vec(&body).unwrap_or_default();
        blake3::hash(&bytes).to_hex().to_string()
    }

    /// Assign the serial and refresh checksum, version and timestamp
    pub fn seal(&mut self, serial: u64) {
        self.serial = serial;
        self.keel_version = env!("CARGO_PKG_VERSION").to_string();
        self.updated = Utc::now();
        self.checksum = self.compute_checksum();
    }

    /// Whether the stored checksum matches the record body
    pub fn verify(&self) -> bool {
        self.checksum == self.compute_checksum()
    }

    /// The planner's view of this record
    pub fn to_prior(&self) -> PriorState {
        PriorState {
            id: self.id.clone(),
            serial: self.serial,
            attributes: self.attributes.clone(),
            dependencies: self.dependencies.clone(),
            protected: self.protected,
        }
    }
}

/// Every committed record at one point in time
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StateSnapshot {
    records: BTreeMap<ResourceId, StateRecord>,
}

impl StateSnapshot {
    pub fn new(records: impl IntoIterator<Item = StateRecord>) -> Self {
        Self {
            records: records.into_iter().map(|r| (r.id.clone(), r)).collect(),
        }
    }

    pub fn get(&self, id: &ResourceId) -> Option<&StateRecord> {
        self.records.get(id)
    }

    pub fn records(&self) -> impl Iterator<Item = &StateRecord> {
        self.records.values()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Prior states keyed by identity, as consumed by the differ
    pub fn priors(&self) -> BTreeMap<ResourceId, PriorState> {
        self.records
            .iter()
            .map(|(id, record)| (id.clone(), record.to_prior()))
            .collect()
    }
}

impl ValueSource for StateSnapshot {
    fn lookup(&self, reference: &Reference) -> Option<serde_json::Value> {
        let found = self
            .records
            .values()
            .filter(|r| reference.targets(&r.id))
            .map(|r| (r.id.clone(), Some(reference.project(&r.attributes))))
            .collect();
        combine_instances(reference, found)
    }
}
