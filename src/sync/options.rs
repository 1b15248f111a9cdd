//! Per-run sync options.
//!
//! Requests carry a [`SyncOptionsInput`] where every field is optional; it is resolved against
//! the service's [`SyncConfig`] into the [`SyncOptions`] a run actually uses.

use std::collections::BTreeMap;

use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::config::SyncConfig;
use crate::error::SyncError;
use crate::models::sync_run::DispatchMode;
use crate::source::timestamp::parse_timezone;

/// Filter keys the orchestrator owns; callers may not set them
pub const RESERVED_FILTER_KEYS: [&str; 4] = ["updated_at_min", "page_info", "limit", "fields"];

/// Options as accepted from callers. Unknown keys are rejected.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(deny_unknown_fields)]
pub struct SyncOptionsInput {
    /// Extra enumeration filters passed through to the source, e.g. `{"status": "active"}`
    #[serde(default)]
    pub filters: Option<BTreeMap<String, String>>,
    #[serde(default, alias = "forceFullSync")]
    pub force_full_sync: Option<bool>,
    #[serde(default, alias = "batchSize")]
    pub batch_size: Option<usize>,
    #[serde(default, alias = "detailBatchSize")]
    pub detail_batch_size: Option<usize>,
    /// Stop enumerating after this many distinct ids
    #[serde(default, alias = "maxItems")]
    pub max_items: Option<u64>,
    #[serde(default, alias = "purgeDeletedAfterDays")]
    pub purge_deleted_after_days: Option<u32>,
    #[serde(default)]
    pub dispatch: Option<DispatchMode>,
}

/// Fully resolved options for one run
#[derive(Debug, Clone, PartialEq)]
pub struct SyncOptions {
    pub filters: BTreeMap<String, String>,
    pub force_full_sync: bool,
    pub batch_size: usize,
    pub detail_batch_size: usize,
    pub detail_concurrency: usize,
    pub max_items: Option<u64>,
    pub purge_deleted_after_days: Option<u32>,
    pub dispatch: DispatchMode,
    pub timezone: Tz,
}

impl SyncOptions {
    pub fn resolve(input: SyncOptionsInput, config: &SyncConfig) -> Result<Self, SyncError> {
        let timezone = parse_timezone(&config.timezone).map_err(SyncError::InvalidOptions)?;

        let options = Self {
            filters: input.filters.unwrap_or_default(),
            force_full_sync: input.force_full_sync.unwrap_or(false),
            batch_size: input.batch_size.unwrap_or(config.batch_size),
            detail_batch_size: input.detail_batch_size.unwrap_or(config.detail_batch_size),
            detail_concurrency: config.detail_concurrency,
            max_items: input.max_items,
            purge_deleted_after_days: input
                .purge_deleted_after_days
                .or(config.purge_deleted_after_days),
            dispatch: input.dispatch.unwrap_or(config.dispatch),
            timezone,
        };
        options.validate()?;
        Ok(options)
    }

    /// Options with every default taken from `config`
    pub fn from_config(config: &SyncConfig) -> Result<Self, SyncError> {
        Self::resolve(SyncOptionsInput::default(), config)
    }

    pub fn validate(&self) -> Result<(), SyncError> {
        if self.batch_size == 0 {
            return Err(SyncError::InvalidOptions(
                "batch_size must be at least 1".to_string(),
            ));
        }
        if self.detail_batch_size == 0 {
            return Err(SyncError::InvalidOptions(
                "detail_batch_size must be at least 1".to_string(),
            ));
        }
        if self.detail_concurrency == 0 {
            return Err(SyncError::InvalidOptions(
                "detail concurrency must be at least 1".to_string(),
            ));
        }
        if self.max_items == Some(0) {
            return Err(SyncError::InvalidOptions(
                "max_items must be at least 1".to_string(),
            ));
        }
        if self.purge_deleted_after_days == Some(0) {
            return Err(SyncError::InvalidOptions(
                "purge_deleted_after_days must be at least 1".to_string(),
            ));
        }
        if let Some(key) = self
            .filters
            .keys()
            .find(|key| RESERVED_FILTER_KEYS.contains(&key.as_str()))
        {
            return Err(SyncError::InvalidOptions(format!(
                "filter '{key}' is managed by the sync engine and cannot be overridden"
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn defaults_come_from_config() {
        let config = SyncConfig {
            batch_size: 100,
            purge_deleted_after_days: Some(30),
            timezone: "Europe/Berlin".to_string(),
            ..SyncConfig::default()
        };

        let options = SyncOptions::from_config(&config).unwrap();
        assert_eq!(options.batch_size, 100);
        assert_eq!(options.detail_batch_size, 25);
        assert_eq!(options.purge_deleted_after_days, Some(30));
        assert_eq!(options.timezone, chrono_tz::Europe::Berlin);
        assert!(!options.force_full_sync);
        assert_eq!(options.dispatch, DispatchMode::Inline);
    }

    #[test]
    fn input_overrides_config() {
        let input: SyncOptionsInput = serde_json::from_value(json!({
            "forceFullSync": true,
            "batch_size": 10,
            "detailBatchSize": 2,
            "max_items": 50,
            "dispatch": "queued",
            "filters": { "status": "active" }
        }))
        .unwrap();

        let options = SyncOptions::resolve(input, &SyncConfig::default()).unwrap();
        assert!(options.force_full_sync);
        assert_eq!(options.batch_size, 10);
        assert_eq!(options.detail_batch_size, 2);
        assert_eq!(options.max_items, Some(50));
        assert_eq!(options.dispatch, DispatchMode::Queued);
        assert_eq!(options.filters.get("status").map(String::as_str), Some("active"));
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let parsed = serde_json::from_value::<SyncOptionsInput>(json!({ "batchSzie": 10 }));
        assert!(parsed.is_err());
    }

    #[test]
    fn invalid_values_are_rejected() {
        let zero_batch = SyncOptionsInput {
            batch_size: Some(0),
            ..SyncOptionsInput::default()
        };
        assert!(matches!(
            SyncOptions::resolve(zero_batch, &SyncConfig::default()),
            Err(SyncError::InvalidOptions(_))
        ));

        let zero_max = SyncOptionsInput {
            max_items: Some(0),
            ..SyncOptionsInput::default()
        };
        assert!(SyncOptions::resolve(zero_max, &SyncConfig::default()).is_err());

        let reserved = SyncOptionsInput {
            filters: Some(BTreeMap::from([(
                "updated_at_min".to_string(),
                "2024-01-01T00:00:00+00:00".to_string(),
            )])),
            ..SyncOptionsInput::default()
        };
        let err = SyncOptions::resolve(reserved, &SyncConfig::default()).unwrap_err();
        assert!(err.to_string().contains("updated_at_min"));
    }
}
