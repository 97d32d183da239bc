//! PathReference - addresses a nested location inside a `DataObject`
//!
//! Text form: dot separated keys with bracketed list indexes, e.g.
//! `order.items[0].sku`. Keys containing special characters can be quoted
//! inside brackets: `props["page.name"]`.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::ContractError;

/// One step of a path
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PathComponent {
    Key(String),
    Index(usize),
}

/// Parsed path into a `DataObject` tree. Always starts with a key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PathReference {
    components: Vec<PathComponent>,
}

impl PathReference {
    /// Single top-level key
    pub fn key(key: impl Into<String>) -> Self {
        Self {
            components: vec![PathComponent::Key(key.into())],
        }
    }

    /// Build from components; fails when empty or not rooted at a key
    pub fn from_components(components: Vec<PathComponent>) -> Result<Self, ContractError> {
        match components.first() {
            Some(PathComponent::Key(_)) => Ok(Self { components }),
            Some(PathComponent::Index(_)) => Err(ContractError::invalid_path(
                components_text(&components),
                "path must start with a key",
            )),
            None => Err(ContractError::invalid_path("", "path is empty")),
        }
    }

    pub fn components(&self) -> &[PathComponent] {
        &self.components
    }

    pub fn child(mut self, key: impl Into<String>) -> Self {
        self.components.push(PathComponent::Key(key.into()));
        self
    }

    pub fn index(mut self, index: usize) -> Self {
        self.components.push(PathComponent::Index(index));
        self
    }
}

impl FromStr for PathReference {
    type Err = ContractError;

    fn from_str(text: &str) -> Result<Self, Self::Err> {
        let fail = |message: &str| ContractError::invalid_path(text, message);

        let mut components = Vec::new();
        let mut key = String::new();
        let mut after_dot = false;
        let mut chars = text.chars().peekable();

        while let Some(c) = chars.next() {
            match c {
                '.' => {
                    if key.is_empty() && (components.is_empty() || after_dot) {
                        return Err(fail("empty segment"));
                    }
                    if !key.is_empty() {
                        components.push(PathComponent::Key(std::mem::take(&mut key)));
                    }
                    after_dot = true;
                }
                '[' => {
                    if !key.is_empty() {
                        components.push(PathComponent::Key(std::mem::take(&mut key)));
                    } else if after_dot {
                        return Err(fail("empty segment"));
                    }
                    after_dot = false;

                    if chars.peek() == Some(&'"') {
                        chars.next();
                        let mut quoted = String::new();
                        loop {
                            match chars.next() {
                                Some('"') => break,
                                Some(c) => quoted.push(c),
                                None => return Err(fail("unterminated quoted key")),
                            }
                        }
                        if chars.next() != Some(']') {
                            return Err(fail("expected ']' after quoted key"));
                        }
                        components.push(PathComponent::Key(quoted));
                    } else {
                        let mut digits = String::new();
                        loop {
                            match chars.next() {
                                Some(']') => break,
                                Some(c) => digits.push(c),
                                None => return Err(fail("unterminated index")),
                            }
                        }
                        let index = digits
                            .trim()
                            .parse::<usize>()
                            .map_err(|_| fail("index is not a non-negative integer"))?;
                        components.push(PathComponent::Index(index));
                    }
                }
                ']' => return Err(fail("unexpected ']'")),
                _ => {
                    if key.is_empty() && !after_dot && !components.is_empty() {
                        return Err(fail("expected '.' or '[' after index"));
                    }
                    after_dot = false;
                    key.push(c);
                }
            }
        }

        if after_dot {
            return Err(fail("trailing '.'"));
        }
        if !key.is_empty() {
            components.push(PathComponent::Key(key));
        }
        Self::from_components(components).map_err(|_| {
            if text.is_empty() {
                fail("path is empty")
            } else {
                fail("path must start with a key")
            }
        })
    }
}

impl TryFrom<String> for PathReference {
    type Error = ContractError;

    fn try_from(text: String) -> Result<Self, Self::Error> {
        text.parse()
    }
}

impl From<PathReference> for String {
    fn from(path: PathReference) -> Self {
        path.to_string()
    }
}

impl fmt::Display for PathReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&components_text(&self.components))
    }
}

fn components_text(components: &[PathComponent]) -> String {
    let mut text = String::new();
    for component in components {
        match component {
            PathComponent::Key(key) if is_plain(key) => {
                if !text.is_empty() {
                    text.push('.');
                }
                text.push_str(key);
            }
            PathComponent::Key(key) => {
                text.push_str("[\"");
                text.push_str(key);
                text.push_str("\"]");
            }
            PathComponent::Index(index) => {
                text.push_str(&format!("[{index}]"));
            }
        }
    }
    text
}

fn is_plain(key: &str) -> bool {
    !key.is_empty() && !key.contains(['.', '[', ']', '"'])
}
