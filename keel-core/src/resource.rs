//! Resource - Declarations, identities and attribute expressions

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::condition::Condition;

/// Resolved attribute values, as stored in state and exchanged with providers
pub type Attributes = BTreeMap<String, serde_json::Value>;

/// Instance key assigned by `count` or `for_each` expansion
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum InstanceKey {
    Index(u64),
    Name(String),
}

impl InstanceKey {
    /// Key as a plain string (used as a map key when instances are combined)
    pub fn as_plain(&self) -> String {
        match self {
            InstanceKey::Index(i) => i.to_string(),
            InstanceKey::Name(name) => name.clone(),
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        match self {
            InstanceKey::Index(i) => serde_json::Value::from(*i),
            InstanceKey::Name(name) => serde_json::Value::String(name.clone()),
        }
    }
}

impl fmt::Display for InstanceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InstanceKey::Index(i) => write!(f, "[{}]", i),
            InstanceKey::Name(name) => write!(f, "[{:?}]", name),
        }
    }
}

/// Unique identifier for a resource instance
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ResourceId {
    /// Resource type (e.g., "vpc", "subnet")
    pub resource_type: String,
    /// Logical name given in the declaration
    pub name: String,
    /// Instance key when the declaration uses `count` or `for_each`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<InstanceKey>,
}

impl ResourceId {
    pub fn new(resource_type: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            resource_type: resource_type.into(),
            name: name.into(),
            key: None,
        }
    }

    pub fn with_key(mut self, key: InstanceKey) -> Self {
        self.key = Some(key);
        self
    }

    /// Same type and name, ignoring the instance key
    pub fn same_declaration(&self, other: &ResourceId) -> bool {
        self.resource_type == other.resource_type && self.name == other.name
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.resource_type, self.name)?;
        if let Some(key) = &self.key {
            write!(f, "{}", key)?;
        }
        Ok(())
    }
}

/// Explicit reference to another resource (`type.name` or `type.name.attribute`)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Reference {
    pub resource_type: String,
    pub name: String,
    /// Restricts the reference to one expanded instance
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<InstanceKey>,
    /// Referenced attribute; `None` refers to the whole resource
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attribute: Option<String>,
}

impl Reference {
    /// Reference to a whole resource (`type.name`)
    pub fn resource(resource_type: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            resource_type: resource_type.into(),
            name: name.into(),
            key: None,
            attribute: None,
        }
    }

    /// Reference to one attribute (`type.name.attribute`)
    pub fn attribute(
        resource_type: impl Into<String>,
        name: impl Into<String>,
        attribute: impl Into<String>,
    ) -> Self {
        Self {
            attribute: Some(attribute.into()),
            ..Self::resource(resource_type, name)
        }
    }

    pub fn with_key(mut self, key: InstanceKey) -> Self {
        self.key = Some(key);
        self
    }

    /// Whether this reference points at the given instance
    pub fn targets(&self, id: &ResourceId) -> bool {
        self.resource_type == id.resource_type
            && self.name == id.name
            && (self.key.is_none() || self.key == id.key)
    }

    /// Extract the referenced value from a resource's attributes
    pub fn project(&self, attributes: &Attributes) -> serde_json::Value {
        match &self.attribute {
            Some(attr) => attributes
                .get(attr)
                .cloned()
                .unwrap_or(serde_json::Value::Null),
            None => serde_json::Value::Object(
                attributes
                    .iter()
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect(),
            ),
        }
    }
}

impl fmt::Display for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.resource_type, self.name)?;
        if let Some(key) = &self.key {
            write!(f, "{}", key)?;
        }
        if let Some(attr) = &self.attribute {
            write!(f, ".{}", attr)?;
        }
        Ok(())
    }
}

/// Combine the values of every instance a reference targets.
///
/// `found` holds each targeted instance with its value, `None` while unknown.
/// A reference to a single unexpanded resource (or to one explicit key) yields
/// that value; a reference to an expanded declaration yields an object keyed
/// by instance key.
pub fn combine_instances(
    reference: &Reference,
    mut found: Vec<(ResourceId, Option<serde_json::Value>)>,
) -> Option<serde_json::Value> {
    if found.is_empty() {
        return None;
    }
    let single = found.len() == 1 && found.first().is_some_and(|(id, _)| id.key.is_none());
    if reference.key.is_some() || single {
        return found.pop().and_then(|(_, value)| value);
    }

    let mut combined = serde_json::Map::new();
    for (id, value) in found {
        let key = id.key.as_ref().map(InstanceKey::as_plain).unwrap_or_default();
        combined.insert(key, value?);
    }
    Some(serde_json::Value::Object(combined))
}

/// Supplies the values that references resolve to
pub trait ValueSource {
    /// Known value of a reference, or `None` while it is unknown
    fn lookup(&self, reference: &Reference) -> Option<serde_json::Value>;

    /// Attribute of the resource being evaluated (postconditions only)
    fn self_attribute(&self, _name: &str) -> Option<serde_json::Value> {
        None
    }
}

/// A source that knows nothing; every reference stays unknown
pub struct NoValues;

impl ValueSource for NoValues {
    fn lookup(&self, _reference: &Reference) -> Option<serde_json::Value> {
        None
    }
}

/// Attribute expression of a resource declaration
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    List(Vec<Value>),
    Map(BTreeMap<String, Value>),
    /// Reference to another resource or one of its attributes
    Ref(Reference),
    /// String interpolation; parts are concatenated after resolution
    Template(Vec<Value>),
    /// `each.key` inside a `for_each` declaration
    EachKey,
    /// `each.value` inside a `for_each` declaration
    EachValue,
    /// `count.index` inside a `count` declaration
    CountIndex,
    /// Attribute of the resource itself, only meaningful in postconditions
    SelfAttr(String),
}

impl Value {
    pub fn string(s: impl Into<String>) -> Self {
        Value::String(s.into())
    }

    /// Shorthand for `Value::Ref(Reference::attribute(..))`
    pub fn reference(
        resource_type: impl Into<String>,
        name: impl Into<String>,
        attribute: impl Into<String>,
    ) -> Self {
        Value::Ref(Reference::attribute(resource_type, name, attribute))
    }

    pub fn from_json(json: &serde_json::Value) -> Self {
        match json {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(*b),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => Value::Int(i),
                None => Value::Float(n.as_f64().unwrap_or_default()),
            },
            serde_json::Value::String(s) => Value::String(s.clone()),
            serde_json::Value::Array(items) => {
                Value::List(items.iter().map(Value::from_json).collect())
            }
            serde_json::Value::Object(map) => Value::Map(
                map.iter()
                    .map(|(k, v)| (k.clone(), Value::from_json(v)))
                    .collect(),
            ),
        }
    }

    /// Every reference contained in this expression
    pub fn references(&self) -> Vec<&Reference> {
        let mut refs = Vec::new();
        self.collect_references(&mut refs);
        refs
    }

    fn collect_references<'a>(&'a self, refs: &mut Vec<&'a Reference>) {
        match self {
            Value::Ref(r) => refs.push(r),
            Value::List(items) | Value::Template(items) => {
                for item in items {
                    item.collect_references(refs);
                }
            }
            Value::Map(map) => {
                for v in map.values() {
                    v.collect_references(refs);
                }
            }
            _ => {}
        }
    }

    /// Resolve to a concrete value, or `None` if anything it needs is unknown
    pub fn resolve(&self, source: &dyn ValueSource) -> Option<serde_json::Value> {
        use serde_json::Value as Json;

        match self {
            Value::Null => Some(Json::Null),
            Value::Bool(b) => Some(Json::Bool(*b)),
            Value::Int(i) => Some(Json::from(*i)),
            Value::Float(f) => Some(
                serde_json::Number::from_f64(*f)
                    .map(Json::Number)
                    .unwrap_or(Json::Null),
            ),
            Value::String(s) => Some(Json::String(s.clone())),
            Value::List(items) => items
                .iter()
                .map(|v| v.resolve(source))
                .collect::<Option<Vec<_>>>()
                .map(Json::Array),
            Value::Map(map) => map
                .iter()
                .map(|(k, v)| v.resolve(source).map(|j| (k.clone(), j)))
                .collect::<Option<serde_json::Map<_, _>>>()
                .map(Json::Object),
            Value::Ref(reference) => source.lookup(reference),
            Value::Template(parts) => {
                let mut out = String::new();
                for part in parts {
                    match part.resolve(source)? {
                        Json::String(s) => out.push_str(&s),
                        other => out.push_str(&other.to_string()),
                    }
                }
                Some(Json::String(out))
            }
            Value::SelfAttr(name) => source.self_attribute(name),
            // Placeholders are substituted during expansion
            Value::EachKey | Value::EachValue | Value::CountIndex => None,
        }
    }

    /// Replace expansion placeholders with the instance's values
    pub(crate) fn substitute(&self, expansion: &Expansion) -> Result<Value, String> {
        let substituted = match (self, expansion) {
            (Value::EachKey, Expansion::Each { key, .. }) => Value::String(key.clone()),
            (Value::EachValue, Expansion::Each { value, .. }) => Value::from_json(value),
            (Value::CountIndex, Expansion::Count(index)) => {
                Value::Int(i64::try_from(*index).map_err(|e| e.to_string())?)
            }
            (Value::EachKey | Value::EachValue, _) => {
                return Err("each.key/each.value used outside for_each".to_string());
            }
            (Value::CountIndex, _) => {
                return Err("count.index used outside count".to_string());
            }
            (Value::List(items), _) => Value::List(
                items
                    .iter()
                    .map(|v| v.substitute(expansion))
                    .collect::<Result<_, _>>()?,
            ),
            (Value::Template(parts), _) => Value::Template(
                parts
                    .iter()
                    .map(|v| v.substitute(expansion))
                    .collect::<Result<_, _>>()?,
            ),
            (Value::Map(map), _) => Value::Map(
                map.iter()
                    .map(|(k, v)| v.substitute(expansion).map(|v| (k.clone(), v)))
                    .collect::<Result<_, _>>()?,
            ),
            (other, _) => other.clone(),
        };
        Ok(substituted)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<Reference> for Value {
    fn from(r: Reference) -> Self {
        Value::Ref(r)
    }
}

/// Which instance of a repeated declaration is being materialized
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Expansion {
    Single,
    Count(u64),
    Each {
        key: String,
        value: serde_json::Value,
    },
}

/// Attributes whose drift is ignored when diffing
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum IgnoreChanges {
    #[default]
    Nothing,
    Attributes(BTreeSet<String>),
    All,
}

impl IgnoreChanges {
    pub fn attributes<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        IgnoreChanges::Attributes(names.into_iter().map(Into::into).collect())
    }

    pub fn ignores(&self, attribute: &str) -> bool {
        match self {
            IgnoreChanges::Nothing => false,
            IgnoreChanges::Attributes(names) => names.contains(attribute),
            IgnoreChanges::All => true,
        }
    }
}

/// Lifecycle policy of a resource
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Lifecycle {
    /// Create the replacement before destroying the existing object
    pub create_before_destroy: bool,
    /// Refuse any plan that destroys this resource
    pub prevent_destroy: bool,
    pub ignore_changes: IgnoreChanges,
    /// Replace this resource whenever one of these references changes
    pub replace_triggered_by: Vec<Reference>,
}

impl Lifecycle {
    pub fn create_before_destroy(mut self, enabled: bool) -> Self {
        self.create_before_destroy = enabled;
        self
    }

    pub fn prevent_destroy(mut self, enabled: bool) -> Self {
        self.prevent_destroy = enabled;
        self
    }

    pub fn ignore_changes(mut self, ignore: IgnoreChanges) -> Self {
        self.ignore_changes = ignore;
        self
    }

    pub fn replace_triggered_by(mut self, reference: Reference) -> Self {
        self.replace_triggered_by.push(reference);
        self
    }
}

/// Repetition meta-argument of a declaration
#[derive(Debug, Clone, Default, PartialEq)]
pub enum Repetition {
    #[default]
    Single,
    /// `count = <expr>`, must resolve to a non-negative integer
    Count(Value),
    /// `for_each = <expr>`, must resolve to a map or a list of strings
    ForEach(Value),
}

/// Desired resource as declared by the user
#[derive(Debug, Clone, PartialEq)]
pub struct ResourceDecl {
    pub id: ResourceId,
    pub attributes: BTreeMap<String, Value>,
    /// Explicit dependencies in addition to the ones inferred from references
    pub depends_on: Vec<Reference>,
    pub repetition: Repetition,
    pub lifecycle: Lifecycle,
    pub preconditions: Vec<Condition>,
    pub postconditions: Vec<Condition>,
}

impl ResourceDecl {
    pub fn new(resource_type: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: ResourceId::new(resource_type, name),
            attributes: BTreeMap::new(),
            depends_on: Vec::new(),
            repetition: Repetition::Single,
            lifecycle: Lifecycle::default(),
            preconditions: Vec::new(),
            postconditions: Vec::new(),
        }
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    pub fn depends_on(mut self, reference: Reference) -> Self {
        self.depends_on.push(reference);
        self
    }

    pub fn with_count(mut self, count: impl Into<Value>) -> Self {
        self.repetition = Repetition::Count(count.into());
        self
    }

    pub fn with_for_each(mut self, for_each: Value) -> Self {
        self.repetition = Repetition::ForEach(for_each);
        self
    }

    pub fn with_lifecycle(mut self, lifecycle: Lifecycle) -> Self {
        self.lifecycle = lifecycle;
        self
    }

    pub fn with_precondition(mut self, condition: Condition) -> Self {
        self.preconditions.push(condition);
        self
    }

    pub fn with_postcondition(mut self, condition: Condition) -> Self {
        self.postconditions.push(condition);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct FixedValues(BTreeMap<ResourceId, Attributes>);

    impl ValueSource for FixedValues {
        fn lookup(&self, reference: &Reference) -> Option<serde_json::Value> {
            let found = self
                .0
                .iter()
                .filter(|(id, _)| reference.targets(id))
                .map(|(id, attrs)| (id.clone(), Some(reference.project(attrs))))
                .collect();
            combine_instances(reference, found)
        }
    }

    fn vpc_values() -> FixedValues {
        let mut attrs = Attributes::new();
        attrs.insert("id".to_string(), json!("vpc-123"));
        attrs.insert("cidr_block".to_string(), json!("10.0.0.0/16"));
        let mut values = BTreeMap::new();
        values.insert(ResourceId::new("vpc", "main"), attrs);
        FixedValues(values)
    }

    #[test]
    fn resource_id_display() {
        assert_eq!(ResourceId::new("vpc", "main").to_string(), "vpc.main");
        assert_eq!(
            ResourceId::new("subnet", "public")
                .with_key(InstanceKey::Name("a".to_string()))
                .to_string(),
            "subnet.public[\"a\"]"
        );
        assert_eq!(
            ResourceId::new("instance", "web")
                .with_key(InstanceKey::Index(2))
                .to_string(),
            "instance.web[2]"
        );
    }

    #[test]
    fn reference_targets_all_instances_without_key() {
        let reference = Reference::resource("subnet", "public");
        let a = ResourceId::new("subnet", "public").with_key(InstanceKey::Index(0));
        let b = ResourceId::new("subnet", "public").with_key(InstanceKey::Index(1));
        assert!(reference.targets(&a));
        assert!(reference.targets(&b));

        let keyed = reference.with_key(InstanceKey::Index(1));
        assert!(!keyed.targets(&a));
        assert!(keyed.targets(&b));
    }

    #[test]
    fn references_are_collected_recursively() {
        let mut tags = BTreeMap::new();
        tags.insert("vpc".to_string(), Value::reference("vpc", "main", "id"));
        let value = Value::List(vec![
            Value::Map(tags),
            Value::Template(vec![
                Value::string("subnet-of-"),
                Value::reference("vpc", "other", "name"),
            ]),
        ]);

        let refs: Vec<String> = value.references().iter().map(|r| r.to_string()).collect();
        assert_eq!(refs, vec!["vpc.main.id", "vpc.other.name"]);
    }

    #[test]
    fn resolve_reference_and_template() {
        let values = vpc_values();
        assert_eq!(
            Value::reference("vpc", "main", "id").resolve(&values),
            Some(json!("vpc-123"))
        );

        let template = Value::Template(vec![
            Value::string("in-"),
            Value::reference("vpc", "main", "id"),
        ]);
        assert_eq!(template.resolve(&values), Some(json!("in-vpc-123")));
    }

    #[test]
    fn resolve_unknown_reference_is_none() {
        let values = vpc_values();
        let list = Value::List(vec![
            Value::Int(1),
            Value::reference("vpc", "missing", "id"),
        ]);
        assert_eq!(list.resolve(&values), None);
        assert_eq!(Value::reference("vpc", "main", "id").resolve(&NoValues), None);
    }

    #[test]
    fn combine_expanded_instances_into_object() {
        let reference = Reference::attribute("subnet", "public", "id");
        let found = vec![
            (
                ResourceId::new("subnet", "public").with_key(InstanceKey::Name("a".into())),
                Some(json!("subnet-a")),
            ),
            (
                ResourceId::new("subnet", "public").with_key(InstanceKey::Name("b".into())),
                Some(json!("subnet-b")),
            ),
        ];
        assert_eq!(
            combine_instances(&reference, found),
            Some(json!({"a": "subnet-a", "b": "subnet-b"}))
        );
    }

    #[test]
    fn substitute_each_placeholders() {
        let value = Value::Template(vec![Value::EachKey, Value::string("-"), Value::EachValue]);
        let expansion = Expansion::Each {
            key: "a".to_string(),
            value: json!("10.0.1.0/24"),
        };
        let substituted = value.substitute(&expansion).unwrap();
        assert_eq!(substituted.resolve(&NoValues), Some(json!("a-10.0.1.0/24")));
    }

    #[test]
    fn substitute_count_index_outside_count_fails() {
        assert!(Value::CountIndex.substitute(&Expansion::Single).is_err());
    }

    #[test]
    fn ignore_changes_variants() {
        assert!(!IgnoreChanges::Nothing.ignores("tags"));
        assert!(IgnoreChanges::All.ignores("tags"));
        let some = IgnoreChanges::attributes(["tags"]);
        assert!(some.ignores("tags"));
        assert!(!some.ignores("name"));
    }
}
