//! Load rule data: boolean rule trees, conditions and operators

use serde::{Deserialize, Serialize};
use std::fmt;

/// Boolean expression tree over leaves of type `T`
///
/// Destinations reference named condition trees with `Rule<String>`; the named
/// trees themselves are `Rule<Condition>`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Rule<T> {
    Just(T),
    All(Vec<Rule<T>>),
    Any(Vec<Rule<T>>),
    Not(Box<Rule<T>>),
}

impl<T> Rule<T> {
    pub fn just(item: T) -> Self {
        Rule::Just(item)
    }

    pub fn negate(rule: Rule<T>) -> Self {
        Rule::Not(Box::new(rule))
    }

    /// Visit every leaf in order
    pub fn leaves(&self) -> Vec<&T> {
        let mut out = Vec::new();
        self.collect_leaves(&mut out);
        out
    }

    fn collect_leaves<'a>(&'a self, out: &mut Vec<&'a T>) {
        match self {
            Rule::Just(item) => out.push(item),
            Rule::All(children) | Rule::Any(children) => {
                for child in children {
                    child.collect_leaves(out);
                }
            }
            Rule::Not(inner) => inner.collect_leaves(out),
        }
    }
}

/// A leaf test against one payload variable
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Condition {
    /// Object keys leading to the variable; empty for top-level variables
    #[serde(default)]
    pub path: Vec<String>,
    pub variable: String,
    pub operator: Operator,
    #[serde(default)]
    pub filter: Option<String>,
}

impl Condition {
    pub fn new(variable: impl Into<String>, operator: Operator, filter: Option<&str>) -> Self {
        Self {
            path: Vec::new(),
            variable: variable.into(),
            operator,
            filter: filter.map(str::to_string),
        }
    }

    pub fn with_path(mut self, path: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.path = path.into_iter().map(Into::into).collect();
        self
    }
}

/// Condition operators, serialized by their ids
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operator {
    Equals,
    EqualsIgnoreCase,
    DoesNotEqual,
    DoesNotEqualIgnoreCase,
    StartsWith,
    StartsWithIgnoreCase,
    DoesNotStartWith,
    DoesNotStartWithIgnoreCase,
    EndsWith,
    EndsWithIgnoreCase,
    DoesNotEndWith,
    DoesNotEndWithIgnoreCase,
    Contains,
    ContainsIgnoreCase,
    DoesNotContain,
    DoesNotContainIgnoreCase,
    Defined,
    #[serde(rename = "notdefined")]
    NotDefined,
    Populated,
    #[serde(rename = "notpopulated")]
    NotPopulated,
    #[serde(rename = "empty")]
    IsEmpty,
    #[serde(rename = "notempty")]
    IsNotEmpty,
    GreaterThan,
    GreaterThanEqualTo,
    LessThan,
    LessThanEqualTo,
    RegularExpression,
    IsBadgeAssigned,
    IsBadgeNotAssigned,
}

impl Operator {
    pub fn id(&self) -> &'static str {
        match self {
            Operator::Equals => "equals",
            Operator::EqualsIgnoreCase => "equals_ignore_case",
            Operator::DoesNotEqual => "does_not_equal",
            Operator::DoesNotEqualIgnoreCase => "does_not_equal_ignore_case",
            Operator::StartsWith => "starts_with",
            Operator::StartsWithIgnoreCase => "starts_with_ignore_case",
            Operator::DoesNotStartWith => "does_not_start_with",
            Operator::DoesNotStartWithIgnoreCase => "does_not_start_with_ignore_case",
            Operator::EndsWith => "ends_with",
            Operator::EndsWithIgnoreCase => "ends_with_ignore_case",
            Operator::DoesNotEndWith => "does_not_end_with",
            Operator::DoesNotEndWithIgnoreCase => "does_not_end_with_ignore_case",
            Operator::Contains => "contains",
            Operator::ContainsIgnoreCase => "contains_ignore_case",
            Operator::DoesNotContain => "does_not_contain",
            Operator::DoesNotContainIgnoreCase => "does_not_contain_ignore_case",
            Operator::Defined => "defined",
            Operator::NotDefined => "notdefined",
            Operator::Populated => "populated",
            Operator::NotPopulated => "notpopulated",
            Operator::IsEmpty => "empty",
            Operator::IsNotEmpty => "notempty",
            Operator::GreaterThan => "greater_than",
            Operator::GreaterThanEqualTo => "greater_than_equal_to",
            Operator::LessThan => "less_than",
            Operator::LessThanEqualTo => "less_than_equal_to",
            Operator::RegularExpression => "regular_expression",
            Operator::IsBadgeAssigned => "is_badge_assigned",
            Operator::IsBadgeNotAssigned => "is_badge_not_assigned",
        }
    }

    /// Operators that need a filter value to be evaluated
    pub fn requires_filter(&self) -> bool {
        !matches!(
            self,
            Operator::Defined
                | Operator::NotDefined
                | Operator::Populated
                | Operator::NotPopulated
                | Operator::IsEmpty
                | Operator::IsNotEmpty
                | Operator::IsBadgeAssigned
                | Operator::IsBadgeNotAssigned
        )
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}
