use std::fs::File;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

const MANIFEST_FILE: &str = "manifest.json";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
struct ManifestEntry {
    relative_path: String,
    size_bytes: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    checksum: Option<String>,
}

/// Per-directory record of verified downloads. Lets a re-run skip completed
/// multi-gigabyte files without re-hashing them.
#[derive(Debug)]
pub struct FetchManifest {
    path: PathBuf,
    entries: Vec<ManifestEntry>,
}

impl FetchManifest {
    pub fn load(dir: &Path) -> Result<Self> {
        let path = dir.join(MANIFEST_FILE);
        let entries = if path.exists() {
            let file = File::open(&path).context("open fetch manifest")?;
            serde_json::from_reader(file).context("parse fetch manifest")?
        } else {
            Vec::new()
        };
        Ok(Self { path, entries })
    }

    /// True when `relative_path` was previously downloaded and verified at
    /// exactly `size_bytes`.
    #[must_use]
    pub fn is_verified(&self, relative_path: &str, size_bytes: u64) -> bool {
        self.entries
            .iter()
            .any(|entry| entry.relative_path == relative_path && entry.size_bytes == size_bytes)
    }

    pub fn record(&mut self, relative_path: &str, size_bytes: u64, checksum: Option<String>) {
        if let Some(existing) = self
            .entries
            .iter_mut()
            .find(|entry| entry.relative_path == relative_path)
        {
            existing.size_bytes = size_bytes;
            existing.checksum = checksum;
        } else {
            self.entries.push(ManifestEntry {
                relative_path: relative_path.to_string(),
                size_bytes,
                checksum,
            });
        }
    }

    pub fn save(&self) -> Result<()> {
        let file = File::create(&self.path).context("create fetch manifest")?;
        serde_json::to_writer_pretty(file, &self.entries).context("write fetch manifest")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_and_replaces_entries() {
        let dir = std::env::temp_dir();
        let mut manifest = FetchManifest::load(&dir).unwrap_or(FetchManifest {
            path: dir.join(MANIFEST_FILE),
            entries: Vec::new(),
        });
        manifest.entries.clear();

        manifest.record("ve.safetensors", 10, None);
        manifest.record("ve.safetensors", 20, Some("abc".into()));
        assert_eq!(manifest.entries.len(), 1);
        assert!(manifest.is_verified("ve.safetensors", 20));
        assert!(!manifest.is_verified("ve.safetensors", 10));
        assert!(!manifest.is_verified("conds.pt", 20));
    }
}
