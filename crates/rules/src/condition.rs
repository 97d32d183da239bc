//! Rule tree evaluation

use contracts::{Condition, DataItem, DataObject, Rule};

use crate::{RuleError, operators};

/// Anything that can be tested against a payload
pub trait Matchable {
    fn matches(&self, payload: &DataObject) -> Result<bool, RuleError>;
}

impl Matchable for Condition {
    fn matches(&self, payload: &DataObject) -> Result<bool, RuleError> {
        let value = resolve_variable(payload, &self.path, &self.variable);
        operators::apply(self.operator, &self.variable, value, self.filter.as_deref())
    }
}

impl<T: Matchable> Matchable for Rule<T> {
    fn matches(&self, payload: &DataObject) -> Result<bool, RuleError> {
        evaluate_with(self, &mut |leaf: &T| leaf.matches(payload))
    }
}

/// Evaluate a rule tree, deciding leaves with `leaf`.
///
/// `All` and `Any` short-circuit left to right; an empty `All` is true and an
/// empty `Any` is false. The first leaf error aborts the evaluation.
pub fn evaluate_with<T, F>(rule: &Rule<T>, leaf: &mut F) -> Result<bool, RuleError>
where
    F: FnMut(&T) -> Result<bool, RuleError>,
{
    match rule {
        Rule::Just(item) => leaf(item),
        Rule::All(children) => {
            for child in children {
                if !evaluate_with(child, leaf)? {
                    return Ok(false);
                }
            }
            Ok(true)
        }
        Rule::Any(children) => {
            for child in children {
                if evaluate_with(child, leaf)? {
                    return Ok(true);
                }
            }
            Ok(false)
        }
        Rule::Not(inner) => Ok(!evaluate_with(inner, leaf)?),
    }
}

/// Follow `path` through nested objects, then read `variable`
pub fn resolve_variable<'a>(
    payload: &'a DataObject,
    path: &[String],
    variable: &str,
) -> Option<&'a DataItem> {
    let mut current = payload;
    for key in path {
        current = current.get(key)?.as_object()?;
    }
    current.get(variable)
}
