// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Broker-wide configuration

use serde::{Deserialize, Serialize};

use crate::cache::CacheSettings;
use crate::error::{PersistenceError, PersistenceResult};

pub const PROXY_DYNAMIC: &str = "dynamic";
pub const PROXY_SUBCLASS: &str = "subclass";
pub const COLLECTION_PROXY_DEFAULT: &str = "default";

/// Which proxy flavours the broker creates for lazy references
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProxySettings {
    /// `dynamic` (interface based) or `subclass`
    pub reference_proxy: String,

    pub collection_proxy: String,
}

impl Default for ProxySettings {
    fn default() -> Self {
        Self {
            reference_proxy: PROXY_DYNAMIC.to_string(),
            collection_proxy: COLLECTION_PROXY_DEFAULT.to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BrokerConfig {
    pub cache: CacheSettings,
    pub proxy: ProxySettings,
}

impl BrokerConfig {
    pub fn from_json_str(json: &str) -> PersistenceResult<Self> {
        let config: BrokerConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> PersistenceResult<()> {
        if !matches!(
            self.proxy.reference_proxy.as_str(),
            PROXY_DYNAMIC | PROXY_SUBCLASS
        ) {
            return Err(PersistenceError::Configuration(format!(
                "Unknown reference proxy '{}', expected '{}' or '{}'",
                self.proxy.reference_proxy, PROXY_DYNAMIC, PROXY_SUBCLASS
            )));
        }

        if self.proxy.collection_proxy != COLLECTION_PROXY_DEFAULT {
            return Err(PersistenceError::Configuration(format!(
                "Unknown collection proxy '{}'",
                self.proxy.collection_proxy
            )));
        }

        if let Some(empty) = self
            .cache
            .exclude_packages
            .iter()
            .find(|p| p.trim().is_empty())
        {
            return Err(PersistenceError::Configuration(format!(
                "Blank package in exclusion list: '{}'",
                empty
            )));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        assert!(BrokerConfig::default().validate().is_ok());
    }

    #[test]
    fn test_from_json() {
        let config = BrokerConfig::from_json_str(
            r#"{
                "cache": { "exclude_packages": ["shop.values"], "descriptor_based_caches": true },
                "proxy": { "reference_proxy": "subclass" }
            }"#,
        )
        .unwrap();
        assert!(config.cache.descriptor_based_caches);
        assert_eq!(config.cache.exclude_packages, vec!["shop.values"]);
        assert_eq!(config.proxy.reference_proxy, PROXY_SUBCLASS);
        assert_eq!(config.proxy.collection_proxy, COLLECTION_PROXY_DEFAULT);
    }

    #[test]
    fn test_unknown_proxy_rejected() {
        let err = BrokerConfig::from_json_str(r#"{"proxy": {"reference_proxy": "bytecode"}}"#)
            .unwrap_err();
        assert!(matches!(err, PersistenceError::Configuration(_)));
    }
}
