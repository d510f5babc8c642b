use octofhir_core::{ResourceType, SUPPORTED_RESOURCE_TYPES};
use serde::{Deserialize, Serialize};

/// Largest `_count` the gateway honours.
pub const MAX_PAGE_SIZE: u32 = 100;

/// Sync run settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Requested page size; values above [`MAX_PAGE_SIZE`] are capped.
    #[serde(default = "default_page_size")]
    pub page_size: u32,
    /// Page safety bound per resource type.
    #[serde(default = "default_max_pages")]
    pub max_pages: u32,
    /// Resource types to fetch, in order.
    #[serde(default = "default_resource_types")]
    pub resource_types: Vec<ResourceType>,
    /// Capacity of the progress event channel.
    #[serde(default = "default_event_buffer")]
    pub event_buffer: usize,
}

fn default_page_size() -> u32 {
    50
}

fn default_max_pages() -> u32 {
    50
}

fn default_resource_types() -> Vec<ResourceType> {
    SUPPORTED_RESOURCE_TYPES.to_vec()
}

fn default_event_buffer() -> usize {
    64
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            page_size: default_page_size(),
            max_pages: default_max_pages(),
            resource_types: default_resource_types(),
            event_buffer: default_event_buffer(),
        }
    }
}

impl SyncConfig {
    pub fn effective_page_size(&self) -> u32 {
        self.page_size.clamp(1, MAX_PAGE_SIZE)
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.page_size == 0 {
            return Err("sync.page_size must be > 0".into());
        }
        if self.max_pages == 0 {
            return Err("sync.max_pages must be > 0".into());
        }
        if self.resource_types.is_empty() {
            return Err("sync.resource_types must not be empty".into());
        }
        let mut seen = self.resource_types.clone();
        seen.sort();
        seen.dedup();
        if seen.len() != self.resource_types.len() {
            return Err("sync.resource_types contains duplicates".into());
        }
        if self.event_buffer == 0 {
            return Err("sync.event_buffer must be > 0".into());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_size_is_capped() {
        let cfg = SyncConfig {
            page_size: 500,
            ..SyncConfig::default()
        };
        assert_eq!(cfg.effective_page_size(), MAX_PAGE_SIZE);
        assert_eq!(SyncConfig::default().effective_page_size(), 50);
    }

    #[test]
    fn test_defaults_cover_declared_order() {
        let cfg: SyncConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(cfg.resource_types, SUPPORTED_RESOURCE_TYPES.to_vec());
        assert_eq!(cfg.max_pages, 50);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_validation() {
        let cfg = SyncConfig {
            resource_types: vec![ResourceType::Patient, ResourceType::Patient],
            ..SyncConfig::default()
        };
        assert!(cfg.validate().unwrap_err().contains("duplicates"));

        let cfg = SyncConfig {
            max_pages: 0,
            ..SyncConfig::default()
        };
        assert!(cfg.validate().is_err());
    }
}
