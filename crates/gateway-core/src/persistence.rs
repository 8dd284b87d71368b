//! Entity persistence using JSON file storage
//!
//! Saves are requested by setting dirty-category bits and flushed by the
//! event loop on a short coalescing delay. Files are written atomically
//! (tmp then rename).

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::Path;
use tokio::fs;

use crate::error::CoreError;

/// Dirty persistence categories
pub mod dirty {
    pub const LIGHTS: u32 = 1 << 0;
    pub const GROUPS: u32 = 1 << 1;
    pub const SCENES: u32 = 1 << 2;
    pub const RULES: u32 = 1 << 3;
    pub const SENSORS: u32 = 1 << 4;
    pub const CONFIG: u32 = 1 << 5;
}

/// Load a list of entities from a JSON file.
///
/// A missing or unparseable file yields an empty list; the gateway
/// rebuilds its model from the mesh.
pub async fn load_entities<T: DeserializeOwned>(path: &Path) -> Vec<T> {
    match fs::read_to_string(path).await {
        Ok(contents) => match serde_json::from_str::<Vec<T>>(&contents) {
            Ok(entities) => {
                tracing::info!("Loaded {} entries from {:?}", entities.len(), path);
                entities
            }
            Err(e) => {
                tracing::warn!("Failed to parse {:?}: {}", path, e);
                Vec::new()
            }
        },
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!("No file at {:?}, starting fresh", path);
            Vec::new()
        }
        Err(e) => {
            tracing::warn!("Failed to read {:?}: {}", path, e);
            Vec::new()
        }
    }
}

/// Save a list of entities to a JSON file atomically.
#[allow(clippy::missing_errors_doc)]
pub async fn save_entities<T: Serialize>(path: &Path, entities: &[T]) -> Result<(), CoreError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).await?;
    }

    let json = serde_json::to_string_pretty(entities)?;

    let tmp_path = path.with_extension("json.tmp");
    fs::write(&tmp_path, &json).await?;
    fs::rename(&tmp_path, path).await?;

    tracing::debug!("Saved {} entries to {:?}", entities.len(), path);
    Ok(())
}
