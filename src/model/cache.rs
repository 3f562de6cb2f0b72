use std::fs;
use std::path::{Path, PathBuf};

use hf_hub::{Cache, Repo};
use tracing::{debug, info};

use crate::error::Result;

/// Manifest every diffusers snapshot must contain.
pub const MANIFEST_FILE: &str = "model_index.json";

/// Local model cache in the Hugging Face hub layout.
///
/// Lookups go through [`hf_hub::Cache`], so a snapshot is only visible once
/// `refs/main` points at it.
#[derive(Debug, Clone)]
pub struct ModelCache {
    hub: Cache,
}

impl ModelCache {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            hub: Cache::new(root.into()),
        }
    }

    pub fn root(&self) -> &Path {
        self.hub.path()
    }

    pub fn repo_dir(&self, model_id: &str) -> PathBuf {
        self.root()
            .join(Repo::model(model_id.to_string()).folder_name())
    }

    /// Model ids with an entry in the cache, sorted.
    pub fn cached_models(&self) -> Vec<String> {
        let Ok(entries) = fs::read_dir(self.root()) else {
            return Vec::new();
        };
        let mut models: Vec<String> = entries
            .flatten()
            .filter(|e| e.path().is_dir())
            .filter_map(|e| {
                let name = e.file_name().to_string_lossy().into_owned();
                name.strip_prefix("models--")
                    .map(|rest| rest.replace("--", "/"))
            })
            .collect();
        models.sort();
        models.dedup();
        models
    }

    pub fn contains(&self, model_id: &str) -> bool {
        self.repo_dir(model_id).is_dir()
    }

    /// Cached path of `filename` in the current snapshot of `model_id`.
    pub fn file(&self, model_id: &str, filename: &str) -> Option<PathBuf> {
        self.hub.model(model_id.to_string()).get(filename)
    }

    /// Snapshot directory that `refs/main` points at.
    pub fn snapshot_dir(&self, model_id: &str) -> Option<PathBuf> {
        self.file(model_id, MANIFEST_FILE)
            .and_then(|manifest| manifest.parent().map(Path::to_path_buf))
    }

    /// Structural check: the current snapshot holds the pipeline manifest.
    pub fn is_valid(&self, model_id: &str) -> bool {
        let valid = self.file(model_id, MANIFEST_FILE).is_some();
        debug!("Cache validation for {}: {}", model_id, valid);
        valid
    }

    /// Remove every cached file of `model_id`.
    pub fn purge(&self, model_id: &str) -> Result<()> {
        let repo = self.repo_dir(model_id);
        if repo.exists() {
            info!("Removing corrupted cache entry {}", repo.display());
            fs::remove_dir_all(&repo)?;
        }
        Ok(())
    }

    /// Lay out a snapshot the way a hub download leaves it.
    #[cfg(test)]
    pub(crate) fn seed_snapshot(&self, model_id: &str, revision: &str, files: &[&str]) -> PathBuf {
        let repo = self.repo_dir(model_id);
        let snapshot = repo.join("snapshots").join(revision);
        fs::create_dir_all(&snapshot).unwrap();
        for file in files {
            let path = snapshot.join(file);
            fs::create_dir_all(path.parent().unwrap()).unwrap();
            fs::write(path, "{}").unwrap();
        }
        fs::create_dir_all(repo.join("refs")).unwrap();
        fs::write(repo.join("refs").join("main"), revision).unwrap();
        snapshot
    }
}
