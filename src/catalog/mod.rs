//! Local model catalog — directory scanning and path resolution.
//!
//! Local model identifiers follow the `<category>/<filename>` convention,
//! one directory level below the model root. The catalog never loads
//! anything; it only says what exists and where.

use std::path::{Component, Path, PathBuf};

use serde::Serialize;
use tracing::{debug, warn};

use crate::llm::GatewayError;

/// One discoverable local model file.
#[derive(Debug, Clone, Serialize)]
pub struct CatalogEntry {
    /// `<category>/<filename>` identifier.
    pub id: String,
    /// Category directory name.
    pub category: String,
    /// Bare file name.
    pub file_name: String,
    /// File size in bytes.
    pub size_bytes: u64,
}

/// A model root directory with the `<category>/<filename>` layout.
#[derive(Debug, Clone)]
pub struct Catalog {
    root: PathBuf,
}

impl Catalog {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Resolves a local identifier to its file path.
    ///
    /// Rejects identifiers that escape the model root (absolute paths or
    /// `..` traversal) and identifiers whose file does not exist — both as
    /// [`GatewayError::NotFound`], before any engine work happens.
    pub fn resolve(&self, id: &str) -> Result<PathBuf, GatewayError> {
        let relative = Path::new(id);
        let escapes = relative.components().any(|c| {
            !matches!(c, Component::Normal(_))
        });
        if escapes || relative.components().count() == 0 {
            return Err(GatewayError::NotFound(id.to_owned()));
        }

        let path = self.root.join(relative);
        if !path.is_file() {
            return Err(GatewayError::NotFound(id.to_owned()));
        }
        Ok(path)
    }

    /// Scans the model root for GGUF files.
    ///
    /// Only `<root>/<category>/<file>.gguf` entries are reported; anything
    /// else (loose files at the root, deeper nesting, other extensions) is
    /// ignored. A missing root yields an empty catalog rather than an
    /// error so a fresh deployment starts clean.
    pub async fn scan(&self) -> Vec<CatalogEntry> {
        let mut entries = Vec::new();

        let mut categories = match tokio::fs::read_dir(&self.root).await {
            Ok(rd) => rd,
            Err(e) => {
                warn!(root = %self.root.display(), error = %e, "model root not readable");
                return entries;
            }
        };

        while let Ok(Some(category)) = categories.next_entry().await {
            let category_path = category.path();
            if !category_path.is_dir() {
                continue;
            }
            let category_name = category.file_name().to_string_lossy().into_owned();

            let Ok(mut files) = tokio::fs::read_dir(&category_path).await else {
                continue;
            };
            while let Ok(Some(file)) = files.next_entry().await {
                let path = file.path();
                let is_gguf = path
                    .extension()
                    .is_some_and(|ext| ext.eq_ignore_ascii_case("gguf"));
                if !path.is_file() || !is_gguf {
                    continue;
                }
                let Ok(meta) = file.metadata().await else {
                    continue;
                };
                let file_name = file.file_name().to_string_lossy().into_owned();
                entries.push(CatalogEntry {
                    id: format!("{category_name}/{file_name}"),
                    category: category_name.clone(),
                    file_name,
                    size_bytes: meta.len(),
                });
            }
        }

        entries.sort_by(|a, b| a.id.cmp(&b.id));
        debug!(count = entries.len(), root = %self.root.display(), "catalog scanned");
        entries
    }
}
