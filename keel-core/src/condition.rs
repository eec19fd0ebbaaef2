//! Condition - Pre- and postcondition checks attached to resources
//!
//! Checks are structured expressions over [`Value`]s. Evaluation is
//! three-valued: a check whose inputs are not known yet evaluates to `None`
//! and is retried once the values are available.

use crate::resource::{Expansion, Reference, Value, ValueSource};

/// Boolean check over attribute expressions
#[derive(Debug, Clone, PartialEq)]
pub enum Check {
    Eq(Value, Value),
    NotEq(Value, Value),
    /// The value is known and not null
    IsSet(Value),
    /// The value equals one of the candidates
    OneOf(Value, Vec<Value>),
    Not(Box<Check>),
    All(Vec<Check>),
    Any(Vec<Check>),
}

impl Check {
    /// Evaluate the check; `None` when a required value is unknown
    pub fn evaluate(&self, source: &dyn ValueSource) -> Option<bool> {
        match self {
            Check::Eq(left, right) => Some(left.resolve(source)? == right.resolve(source)?),
            Check::NotEq(left, right) => Some(left.resolve(source)? != right.resolve(source)?),
            Check::IsSet(value) => Some(!value.resolve(source)?.is_null()),
            Check::OneOf(value, candidates) => {
                let value = value.resolve(source)?;
                let mut unknown = false;
                for candidate in candidates {
                    match candidate.resolve(source) {
                        Some(c) if c == value => return Some(true),
                        Some(_) => {}
                        None => unknown = true,
                    }
                }
                if unknown { None } else { Some(false) }
            }
            Check::Not(inner) => inner.evaluate(source).map(|b| !b),
            Check::All(checks) => {
                let mut unknown = false;
                for check in checks {
                    match check.evaluate(source) {
                        Some(false) => return Some(false),
                        Some(true) => {}
                        None => unknown = true,
                    }
                }
                if unknown { None } else { Some(true) }
            }
            Check::Any(checks) => {
                let mut unknown = false;
                for check in checks {
                    match check.evaluate(source) {
                        Some(true) => return Some(true),
                        Some(false) => {}
                        None => unknown = true,
                    }
                }
                if unknown { None } else { Some(false) }
            }
        }
    }

    /// References to other resources used by this check
    pub fn references(&self) -> Vec<&Reference> {
        match self {
            Check::Eq(l, r) | Check::NotEq(l, r) => {
                let mut refs = l.references();
                refs.extend(r.references());
                refs
            }
            Check::IsSet(v) => v.references(),
            Check::OneOf(v, candidates) => {
                let mut refs = v.references();
                for c in candidates {
                    refs.extend(c.references());
                }
                refs
            }
            Check::Not(inner) => inner.references(),
            Check::All(checks) | Check::Any(checks) => {
                checks.iter().flat_map(|c| c.references()).collect()
            }
        }
    }

    pub(crate) fn substitute(&self, expansion: &Expansion) -> Result<Check, String> {
        let check = match self {
            Check::Eq(l, r) => Check::Eq(l.substitute(expansion)?, r.substitute(expansion)?),
            Check::NotEq(l, r) => Check::NotEq(l.substitute(expansion)?, r.substitute(expansion)?),
            Check::IsSet(v) => Check::IsSet(v.substitute(expansion)?),
            Check::OneOf(v, candidates) => Check::OneOf(
                v.substitute(expansion)?,
                candidates
                    .iter()
                    .map(|c| c.substitute(expansion))
                    .collect::<Result<_, _>>()?,
            ),
            Check::Not(inner) => Check::Not(Box::new(inner.substitute(expansion)?)),
            Check::All(checks) => Check::All(
                checks
                    .iter()
                    .map(|c| c.substitute(expansion))
                    .collect::<Result<_, _>>()?,
            ),
            Check::Any(checks) => Check::Any(
                checks
                    .iter()
                    .map(|c| c.substitute(expansion))
                    .collect::<Result<_, _>>()?,
            ),
        };
        Ok(check)
    }
}

/// A check plus the message reported when it fails
#[derive(Debug, Clone, PartialEq)]
pub struct Condition {
    pub check: Check,
    pub error_message: String,
}

impl Condition {
    pub fn new(check: Check, error_message: impl Into<String>) -> Self {
        Self {
            check,
            error_message: error_message.into(),
        }
    }

    pub fn evaluate(&self, source: &dyn ValueSource) -> Option<bool> {
        self.check.evaluate(source)
    }
}

/// Result of evaluating a list of conditions
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Pass,
    /// At least one condition could not be evaluated yet
    Deferred,
    /// The first failing condition's message
    Fail(String),
}

/// Evaluate conditions in order; the first known failure wins
pub fn evaluate_all(conditions: &[Condition], source: &dyn ValueSource) -> Verdict {
    let mut deferred = false;
    for condition in conditions {
        match condition.evaluate(source) {
            Some(true) => {}
            Some(false) => return Verdict::Fail(condition.error_message.clone()),
            None => deferred = true,
        }
    }
    if deferred {
        Verdict::Deferred
    } else {
        Verdict::Pass
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::{Attributes, NoValues};
    use serde_json::json;

    struct SelfOnly(Attributes);

    impl ValueSource for SelfOnly {
        fn lookup(&self, _reference: &Reference) -> Option<serde_json::Value> {
            None
        }

        fn self_attribute(&self, name: &str) -> Option<serde_json::Value> {
            self.0.get(name).cloned()
        }
    }

    #[test]
    fn literal_checks() {
        assert_eq!(
            Check::Eq(Value::Int(1), Value::Int(1)).evaluate(&NoValues),
            Some(true)
        );
        assert_eq!(
            Check::NotEq(Value::from("a"), Value::from("a")).evaluate(&NoValues),
            Some(false)
        );
        assert_eq!(Check::IsSet(Value::Null).evaluate(&NoValues), Some(false));
        assert_eq!(
            Check::OneOf(
                Value::from("t3.micro"),
                vec![Value::from("t3.micro"), Value::from("t3.small")]
            )
            .evaluate(&NoValues),
            Some(true)
        );
    }

    #[test]
    fn unknown_reference_is_deferred() {
        let check = Check::Eq(Value::reference("vpc", "main", "id"), Value::from("x"));
        assert_eq!(check.evaluate(&NoValues), None);
    }

    #[test]
    fn all_and_any_are_three_valued() {
        let unknown = Check::IsSet(Value::reference("vpc", "main", "id"));
        let yes = Check::Eq(Value::Int(1), Value::Int(1));
        let no = Check::Eq(Value::Int(1), Value::Int(2));

        assert_eq!(
            Check::All(vec![unknown.clone(), no.clone()]).evaluate(&NoValues),
            Some(false)
        );
        assert_eq!(
            Check::All(vec![unknown.clone(), yes.clone()]).evaluate(&NoValues),
            None
        );
        assert_eq!(
            Check::Any(vec![unknown.clone(), yes]).evaluate(&NoValues),
            Some(true)
        );
        assert_eq!(Check::Any(vec![unknown, no]).evaluate(&NoValues), None);
    }

    #[test]
    fn self_attribute_in_postcondition() {
        let mut attrs = Attributes::new();
        attrs.insert("state".to_string(), json!("available"));
        let source = SelfOnly(attrs);

        let condition = Condition::new(
            Check::Eq(Value::SelfAttr("state".to_string()), Value::from("available")),
            "instance must be available",
        );
        assert_eq!(condition.evaluate(&source), Some(true));
    }

    #[test]
    fn evaluate_all_reports_first_failure() {
        let conditions = vec![
            Condition::new(Check::IsSet(Value::from("x")), "first"),
            Condition::new(Check::IsSet(Value::Null), "second"),
            Condition::new(Check::IsSet(Value::Null), "third"),
        ];
        assert_eq!(
            evaluate_all(&conditions, &NoValues),
            Verdict::Fail("second".to_string())
        );

        let deferred = vec![Condition::new(
            Check::IsSet(Value::reference("vpc", "main", "id")),
            "vpc id",
        )];
        assert_eq!(evaluate_all(&deferred, &NoValues), Verdict::Deferred);
    }
}
