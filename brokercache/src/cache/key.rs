// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Keys of shared tables

use std::fmt;
use uuid::Uuid;

use super::cache_config::CachingKeyType;
use crate::identity::Identity;

/// Identity optionally qualified by connection alias and repository, so
/// several connections or repositories can share one table safely
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    identity: Identity,
    jcd_alias: Option<String>,
    repository: Option<Uuid>,
}

impl CacheKey {
    pub fn new(identity: &Identity, key_type: CachingKeyType, jcd_alias: &str, repository: Uuid) -> Self {
        Self {
            identity: identity.clone(),
            jcd_alias: key_type.includes_alias().then(|| jcd_alias.to_string()),
            repository: key_type.includes_repository().then_some(repository),
        }
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.identity)?;
        if let Some(alias) = &self.jcd_alias {
            write!(f, "@{}", alias)?;
        }
        if let Some(repository) = &self.repository {
            write!(f, "#{}", repository)?;
        }
        Ok(())
    }
}
