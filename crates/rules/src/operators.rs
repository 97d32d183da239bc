//! Condition operators
//!
//! String operators compare the canonical string form of the value. Numeric
//! operators accept numbers and numeric strings; two integral operands are
//! compared as `i64`, anything else as `f64`. A missing value makes every
//! operator false except the existence checks and `empty` / `notempty`,
//! which fail with [`RuleError::MissingDataItem`].

use regex::Regex;
use std::cmp::Ordering;

use contracts::{DataItem, Operator};

use crate::RuleError;

/// Apply `operator` to the value found for `variable`
pub fn apply(
    operator: Operator,
    variable: &str,
    value: Option<&DataItem>,
    filter: Option<&str>,
) -> Result<bool, RuleError> {
    let with_filter = |test: &dyn Fn(&DataItem, &str) -> bool| -> Result<bool, RuleError> {
        let filter = filter.ok_or_else(|| RuleError::MissingFilter {
            operator: operator.id().to_string(),
        })?;
        Ok(value.is_some_and(|v| test(v, filter)))
    };

    match operator {
        Operator::Defined | Operator::IsBadgeAssigned => Ok(value.is_some()),
        Operator::NotDefined | Operator::IsBadgeNotAssigned => Ok(value.is_none()),
        Operator::Populated => Ok(value.is_some_and(|v| !is_empty(v))),
        Operator::NotPopulated => Ok(value.is_none_or(is_empty)),
        Operator::IsEmpty => value
            .map(is_empty)
            .ok_or_else(|| RuleError::missing_data_item(variable, operator.id())),
        Operator::IsNotEmpty => value
            .map(|v| !is_empty(v))
            .ok_or_else(|| RuleError::missing_data_item(variable, operator.id())),
        Operator::Equals => with_filter(&|v, f| equals(v, f, false)),
        Operator::EqualsIgnoreCase => with_filter(&|v, f| equals(v, f, true)),
        Operator::DoesNotEqual => with_filter(&|v, f| !equals(v, f, false)),
        Operator::DoesNotEqualIgnoreCase => with_filter(&|v, f| !equals(v, f, true)),
        Operator::StartsWith => with_filter(&|v, f| text_test(v, f, false, |a, b| a.starts_with(b))),
        Operator::StartsWithIgnoreCase => {
            with_filter(&|v, f| text_test(v, f, true, |a, b| a.starts_with(b)))
        }
        Operator::DoesNotStartWith => {
            with_filter(&|v, f| !text_test(v, f, false, |a, b| a.starts_with(b)))
        }
        Operator::DoesNotStartWithIgnoreCase => {
            with_filter(&|v, f| !text_test(v, f, true, |a, b| a.starts_with(b)))
        }
        Operator::EndsWith => with_filter(&|v, f| text_test(v, f, false, |a, b| a.ends_with(b))),
        Operator::EndsWithIgnoreCase => with_filter(&|v, f| text_test(v, f, true, |a, b| a.ends_with(b))),
        Operator::DoesNotEndWith => with_filter(&|v, f| !text_test(v, f, false, |a, b| a.ends_with(b))),
        Operator::DoesNotEndWithIgnoreCase => {
            with_filter(&|v, f| !text_test(v, f, true, |a, b| a.ends_with(b)))
        }
        Operator::Contains => with_filter(&|v, f| text_test(v, f, false, |a, b| a.contains(b))),
        Operator::ContainsIgnoreCase => with_filter(&|v, f| text_test(v, f, true, |a, b| a.contains(b))),
        Operator::DoesNotContain => with_filter(&|v, f| !text_test(v, f, false, |a, b| a.contains(b))),
        Operator::DoesNotContainIgnoreCase => {
            with_filter(&|v, f| !text_test(v, f, true, |a, b| a.contains(b)))
        }
        Operator::GreaterThan => with_filter(&|v, f| compare(v, f).is_some_and(Ordering::is_gt)),
        Operator::GreaterThanEqualTo => {
            with_filter(&|v, f| compare(v, f).is_some_and(Ordering::is_ge))
        }
        Operator::LessThan => with_filter(&|v, f| compare(v, f).is_some_and(Ordering::is_lt)),
        Operator::LessThanEqualTo => {
            with_filter(&|v, f| compare(v, f).is_some_and(Ordering::is_le))
        }
        Operator::RegularExpression => {
            let pattern = filter.ok_or_else(|| RuleError::MissingFilter {
                operator: operator.id().to_string(),
            })?;
            let Some(value) = value else {
                return Ok(false);
            };
            let regex = Regex::new(pattern).map_err(|e| RuleError::InvalidPattern {
                pattern: pattern.to_string(),
                message: e.to_string(),
            })?;
            Ok(regex.is_match(&value.to_string()))
        }
    }
}

/// Null, empty strings, empty lists and empty objects are empty; numbers and
/// booleans never are.
pub fn is_empty(value: &DataItem) -> bool {
    match value {
        DataItem::Null => true,
        DataItem::String(s) => s.is_empty(),
        DataItem::List(items) => items.is_empty(),
        DataItem::Object(obj) => obj.is_empty(),
        DataItem::Bool(_) | DataItem::Int(_) | DataItem::Long(_) | DataItem::Double(_) => false,
    }
}

fn text_test(
    value: &DataItem,
    filter: &str,
    ignore_case: bool,
    test: fn(&str, &str) -> bool,
) -> bool {
    let text = value.to_string();
    if ignore_case {
        test(&text.to_lowercase(), &filter.to_lowercase())
    } else {
        test(&text, filter)
    }
}

fn equals(value: &DataItem, filter: &str, ignore_case: bool) -> bool {
    if let Some(ordering) = compare(value, filter) {
        return ordering == Ordering::Equal;
    }
    if numeric(value).is_some() && parse_number(filter).is_some() {
        // both numeric but unordered, i.e. NaN
        return false;
    }
    let text = value.to_string();
    if ignore_case {
        text.to_lowercase() == filter.to_lowercase()
    } else {
        text == filter
    }
}

#[derive(Debug, Clone, Copy)]
enum Number {
    Integral(i64),
    Real(f64),
}

impl Number {
    fn as_f64(self) -> f64 {
        match self {
            Number::Integral(i) => i as f64,
            Number::Real(r) => r,
        }
    }
}

fn numeric(value: &DataItem) -> Option<Number> {
    match value {
        DataItem::Int(_) | DataItem::Long(_) => value.as_i64().map(Number::Integral),
        DataItem::Double(d) => Some(Number::Real(*d)),
        DataItem::String(s) => parse_number(s),
        _ => None,
    }
}

fn parse_number(text: &str) -> Option<Number> {
    let text = text.trim();
    if let Ok(i) = text.parse::<i64>() {
        return Some(Number::Integral(i));
    }
    text.parse::<f64>()
        .ok()
        .filter(|f| f.is_finite())
        .map(Number::Real)
}

/// Numeric ordering of value against filter; `None` if either side is not a
/// number or the comparison involves NaN.
fn compare(value: &DataItem, filter: &str) -> Option<Ordering> {
    let left = numeric(value)?;
    let right = parse_number(filter)?;
    match (left, right) {
        (Number::Integral(l), Number::Integral(r)) => Some(l.cmp(&r)),
        (l, r) => l.as_f64().partial_cmp(&r.as_f64()),
    }
}
