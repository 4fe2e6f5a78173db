//! Collection catalog model.
//!
//! [`CollectionConfig`] carries the index parameters accepted at creation;
//! [`CollectionInfo`] is the catalog entry the record store keeps per collection.

use crate::config;
use crate::embedding::EmbeddingAdapter;
use crate::error::{Error, Result};
use crate::hnsw::{HnswConfig, Space};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Index parameters of a collection.
///
/// JSON shape: `{"space": "l2"|"cosine"|"ip", "construction_ef": 100, "M": 16,
/// "search_ef": 10}`. Omitted keys take their defaults; unknown keys are rejected.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct CollectionConfig {
    pub space: Space,
    pub construction_ef: usize,
    #[serde(rename = "M")]
    pub m: usize,
    pub search_ef: usize,
}

impl Default for CollectionConfig {
    fn default() -> Self {
        Self {
            space: Space::L2,
            construction_ef: config::HNSW_DEFAULT_EF_CONSTRUCTION,
            m: config::HNSW_DEFAULT_M,
            search_ef: config::HNSW_DEFAULT_EF_SEARCH,
        }
    }
}

impl CollectionConfig {
    /// Parses and validates a JSON configuration object.
    pub fn from_json(value: &serde_json::Value) -> Result<Self> {
        let config: CollectionConfig = serde_json::from_value(value.clone())
            .map_err(|e| Error::invalid_config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.construction_ef == 0 {
            return Err(Error::invalid_config("construction_ef must be positive"));
        }
        if self.search_ef == 0 {
            return Err(Error::invalid_config("search_ef must be positive"));
        }
        if self.m < 2 {
            return Err(Error::invalid_config(format!(
                "M must be at least 2, got {}",
                self.m
            )));
        }
        Ok(())
    }

    pub fn to_hnsw_config(&self) -> HnswConfig {
        HnswConfig {
            m: self.m,
            m_max0: self.m * 2,
            ef_construction: self.construction_ef,
            ef_search: self.search_ef,
            max_layers: config::HNSW_DEFAULT_MAX_LAYERS,
            space: self.space,
        }
    }
}

/// Catalog entry of a collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectionInfo {
    pub id: Uuid,
    pub name: String,
    pub config: CollectionConfig,
    /// Fixed by the first successful insert.
    pub dimension: Option<usize>,
    pub embedding: EmbeddingAdapter,
    pub created_at: DateTime<Utc>,
}

impl CollectionInfo {
    pub fn new(name: &str, config: CollectionConfig, embedding: EmbeddingAdapter) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.to_string(),
            config,
            dimension: None,
            embedding,
            created_at: Utc::now(),
        }
    }
}

/// Checks a collection name: 3-128 characters of `[A-Za-z0-9._-]`, starting and
/// ending with an alphanumeric character, and no `..`.
pub fn validate_collection_name(name: &str) -> Result<()> {
    let len = name.chars().count();
    if !(config::MIN_COLLECTION_NAME_LEN..=config::MAX_COLLECTION_NAME_LEN).contains(&len) {
        return Err(Error::invalid_argument(format!(
            "collection name must be {}-{} characters, got {len}",
            config::MIN_COLLECTION_NAME_LEN,
            config::MAX_COLLECTION_NAME_LEN
        )));
    }
    let allowed = |c: char| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-');
    if !name.chars().all(allowed) {
        return Err(Error::invalid_argument(format!(
            "collection name '{name}' may only contain letters, digits, '.', '_' and '-'"
        )));
    }
    let edges_ok = name.chars().next().is_some_and(|c| c.is_ascii_alphanumeric())
        && name.chars().last().is_some_and(|c| c.is_ascii_alphanumeric());
    if !edges_ok || name.contains("..") {
        return Err(Error::invalid_argument(format!(
            "collection name '{name}' must start and end with a letter or digit and not contain '..'"
        )));
    }
    Ok(())
}
