//! Persistence contract for detected image updates

use async_trait::async_trait;
use std::collections::HashMap;

use crate::error::StoreError;
use crate::types::ImageUpdateRecord;

/// Stores at most one [`ImageUpdateRecord`] per (host, image ID)
#[async_trait]
pub trait UpdateStore: Send + Sync {
    /// Records for the given image IDs on `host`, keyed by image ID.
    /// Image IDs without a record are absent from the map.
    async fn get_update_available(
        &self,
        host: &str,
        image_ids: &[String],
    ) -> Result<HashMap<String, ImageUpdateRecord>, StoreError>;

    /// Insert or overwrite the record for its (host, image ID)
    async fn save(&self, record: ImageUpdateRecord) -> Result<(), StoreError>;

    /// Drop the records for the given image IDs on `host`
    async fn delete(&self, host: &str, image_ids: &[String]) -> Result<(), StoreError>;
}
