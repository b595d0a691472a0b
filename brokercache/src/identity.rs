// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Object identity and broker keys
//!
//! An [`Identity`] names one persistent entity: its real class, the topmost
//! persistent class of its hierarchy and its ordered primary-key values.
//! It is immutable and serves as the cache key for every tier.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::value::Value;

/// Package-qualified class name, e.g. `shop.model.Article`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ClassName(String);

impl ClassName {
    pub fn new(name: impl Into<String>) -> Self {
        ClassName(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Everything before the last dot, empty for classes in the root package
    pub fn package(&self) -> &str {
        match self.0.rfind('.') {
            Some(pos) => &self.0[..pos],
            None => "",
        }
    }

    pub fn simple_name(&self) -> &str {
        match self.0.rfind('.') {
            Some(pos) => &self.0[pos + 1..],
            None => &self.0,
        }
    }
}

impl fmt::Display for ClassName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ClassName {
    fn from(s: &str) -> Self {
        ClassName(s.to_string())
    }
}

impl From<String> for ClassName {
    fn from(s: String) -> Self {
        ClassName(s)
    }
}

/// Unique identity of a persistent entity
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Identity {
    real_class: ClassName,
    top_level_class: ClassName,
    pk_values: Vec<Value>,
}

impl Identity {
    pub fn new(
        real_class: impl Into<ClassName>,
        top_level_class: impl Into<ClassName>,
        pk_values: Vec<Value>,
    ) -> Self {
        Self {
            real_class: real_class.into(),
            top_level_class: top_level_class.into(),
            pk_values,
        }
    }

    pub fn real_class(&self) -> &ClassName {
        &self.real_class
    }

    pub fn top_level_class(&self) -> &ClassName {
        &self.top_level_class
    }

    pub fn pk_values(&self) -> &[Value] {
        &self.pk_values
    }

    /// An identity with a null key component cannot name a stored row
    pub fn is_transient(&self) -> bool {
        self.pk_values.is_empty() || self.pk_values.iter().any(Value::is_null)
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{{", self.real_class)?;
        for (i, value) in self.pk_values.iter().enumerate() {
            if i > 0 {
                write!(f, ",")?;
            }
            write!(f, "{}", value)?;
        }
        write!(f, "}}")
    }
}

/// Key selecting the connection (and user) a broker works against
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PBKey {
    pub jcd_alias: String,
    pub user: Option<String>,
}

impl PBKey {
    pub fn new(jcd_alias: impl Into<String>) -> Self {
        Self {
            jcd_alias: jcd_alias.into(),
            user: None,
        }
    }

    pub fn with_user(mut self, user: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self
    }
}

impl fmt::Display for PBKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.user {
            Some(user) => write!(f, "{}@{}", user, self.jcd_alias),
            None => f.write_str(&self.jcd_alias),
        }
    }
}
