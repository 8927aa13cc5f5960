//! Versioned model artifacts with an atomically promoted `latest` pointer.
//!
//! Layout, one directory per target:
//!
//! ```text
//! <root>/<target>/model_<version>.json
//! <root>/<target>/model_<version>_meta.json
//! <root>/<target>/model_latest.json
//! <root>/<target>/model_latest_meta.json
//! ```
//!
//! Versioned files are never rewritten. Promotion copies a version to
//! temporary files and renames them over the `latest` pair, metadata last.
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::metrics::CvMetrics;
use crate::models::GbdtRegressor;
use crate::target::Target;

pub const LATEST: &str = "latest";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureImportance {
    pub feature: String,
    pub importance: f64,
}

/// Sidecar describing one stored model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelMetadata {
    pub version: String,
    pub target: Target,
    pub engine: String,
    pub created_at: String,
    pub n_features: usize,
    pub n_samples: usize,
    /// Exact feature order the model was trained on.
    pub feature_names: Vec<String>,
    pub cv_metrics: CvMetrics,
    pub top_features: Vec<FeatureImportance>,
}

/// Everything needed to write a new artifact except its version.
#[derive(Debug, Clone)]
pub struct ArtifactInfo {
    pub cv_metrics: CvMetrics,
    pub feature_names: Vec<String>,
    pub top_features: Vec<FeatureImportance>,
    pub n_samples: usize,
}

#[derive(Debug, Clone)]
pub struct ModelStore {
    root: PathBuf,
}

impl ModelStore {
    pub fn new<P: Into<PathBuf>>(root: P) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn target_dir(&self, target: Target) -> PathBuf {
        self.root.join(target.as_str())
    }

    pub fn model_path(&self, target: Target, version: &str) -> PathBuf {
        self.target_dir(target).join(format!("model_{}.json", version))
    }

    pub fn meta_path(&self, target: Target, version: &str) -> PathBuf {
        self.target_dir(target).join(format!("model_{}_meta.json", version))
    }

    /// Write a new version and promote it to `latest`.
    pub fn save(&self, target: Target, model: &GbdtRegressor, info: ArtifactInfo) -> Result<ModelMetadata> {
        let metadata = self.save_version(target, model, info)?;
        self.promote(target, &metadata.version)?;
        log::info!(
            "Saved {} model version {} to {}",
            target,
            metadata.version,
            self.model_path(target, &metadata.version).display()
        );
        Ok(metadata)
    }

    /// Write a new immutable version without touching `latest`.
    pub fn save_version(
        &self,
        target: Target,
        model: &GbdtRegressor,
        info: ArtifactInfo,
    ) -> Result<ModelMetadata> {
        let dir = self.target_dir(target);
        fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create model directory: {}", dir.display()))?;

        let version = self.next_version(target);
        let metadata = ModelMetadata {
            version: version.clone(),
            target,
            engine: model.params().model_type.engine_name().to_string(),
            created_at: Utc::now().to_rfc3339(),
            n_features: info.feature_names.len(),
            n_samples: info.n_samples,
            feature_names: info.feature_names,
            cv_metrics: info.cv_metrics,
            top_features: info.top_features,
        };

        let model_json = serde_json::to_string(model).context("Failed to serialize model")?;
        let meta_json =
            serde_json::to_string_pretty(&metadata).context("Failed to serialize model metadata")?;
        write_atomic(&self.model_path(target, &version), model_json.as_bytes())?;
        write_atomic(&self.meta_path(target, &version), meta_json.as_bytes())?;
        Ok(metadata)
    }

    /// Point `latest` at an existing version. The metadata rename is the commit point.
    pub fn promote(&self, target: Target, version: &str) -> Result<()> {
        let model_src = self.model_path(target, version);
        let meta_src = self.meta_path(target, version);
        if !model_src.is_file() || !meta_src.is_file() {
            return Err(anyhow!(
                "Version {} of target '{}' does not exist in {}",
                version,
                target,
                self.target_dir(target).display()
            ));
        }
        copy_atomic(&model_src, &self.model_path(target, LATEST))?;
        copy_atomic(&meta_src, &self.meta_path(target, LATEST))?;
        log::debug!("Promoted {} version {} to latest", target, version);
        Ok(())
    }

    /// Promote several versions together. If any promotion fails, every
    /// touched target is pointed back at its previous version before the
    /// error is returned.
    pub fn promote_all(&self, versions: &[(Target, String)]) -> Result<()> {
        let mut previous = Vec::with_capacity(versions.len());
        for (target, _) in versions {
            previous.push((*target, self.latest_version(*target)?));
        }
        for (i, (target, version)) in versions.iter().enumerate() {
            if let Err(err) = self.promote(*target, version) {
                log::error!("Promotion of {} version {} failed, reverting", target, version);
                for (target, prior) in &previous[..=i] {
                    let reverted = match prior {
                        Some(prior) => self.promote(*target, prior),
                        None => self.clear_latest(*target),
                    };
                    if let Err(revert_err) = reverted {
                        log::error!("Failed to revert {} latest pointer: {:#}", target, revert_err);
                    }
                }
                return Err(err);
            }
        }
        Ok(())
    }

    /// Remove the `latest` pair, metadata first.
    pub fn clear_latest(&self, target: Target) -> Result<()> {
        for path in [self.meta_path(target, LATEST), self.model_path(target, LATEST)] {
            if path.is_file() {
                fs::remove_file(&path)
                    .with_context(|| format!("Failed to remove {}", path.display()))?;
            }
        }
        Ok(())
    }

    /// Re-promote an older version, e.g. after a bad deployment.
    pub fn restore(&self, target: Target, version: &str) -> Result<()> {
        self.promote(target, version)?;
        log::info!("Restored {} model to version {}", target, version);
        Ok(())
    }

    pub fn latest_metadata(&self, target: Target) -> Result<Option<ModelMetadata>> {
        let path = self.meta_path(target, LATEST);
        if !path.is_file() {
            return Ok(None);
        }
        read_json(&path).map(Some)
    }

    pub fn latest_version(&self, target: Target) -> Result<Option<String>> {
        Ok(self.latest_metadata(target)?.map(|m| m.version))
    }

    /// Load the model `latest` points at, `None` if the target was never trained.
    pub fn load_latest(&self, target: Target) -> Result<Option<(GbdtRegressor, ModelMetadata)>> {
        let metadata = match self.latest_metadata(target)? {
            Some(metadata) => metadata,
            None => return Ok(None),
        };
        // versioned files are immutable; prefer them over the latest copy
        let versioned = self.model_path(target, &metadata.version);
        let path = if versioned.is_file() {
            versioned
        } else {
            self.model_path(target, LATEST)
        };
        let model: GbdtRegressor = read_json(&path)?;
        Ok(Some((model, metadata)))
    }

    pub fn load_version(&self, target: Target, version: &str) -> Result<(GbdtRegressor, ModelMetadata)> {
        let model = read_json(&self.model_path(target, version))?;
        let metadata = read_json(&self.meta_path(target, version))?;
        Ok((model, metadata))
    }

    /// All stored versions of a target, oldest first.
    pub fn versions(&self, target: Target) -> Result<Vec<String>> {
        let dir = self.target_dir(target);
        if !dir.is_dir() {
            return Ok(Vec::new());
        }
        let mut versions = Vec::new();
        for entry in fs::read_dir(&dir).with_context(|| format!("Failed to list {}", dir.display()))? {
            let entry = entry?;
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if let Some(version) = name
                .strip_prefix("model_")
                .and_then(|rest| rest.strip_suffix("_meta.json"))
            {
                if version != LATEST {
                    versions.push(version.to_string());
                }
            }
        }
        versions.sort();
        Ok(versions)
    }

    fn next_version(&self, target: Target) -> String {
        let base = Utc::now().format("%Y%m%d_%H%M%S_%6f").to_string();
        let mut version = base.clone();
        let mut n = 1;
        while self.meta_path(target, &version).exists() || self.model_path(target, &version).exists() {
            version = format!("{}_{}", base, n);
            n += 1;
        }
        version
    }
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let tmp = tmp_path(path);
    fs::write(&tmp, bytes).with_context(|| format!("Failed to write {}", tmp.display()))?;
    fs::rename(&tmp, path)
        .with_context(|| format!("Failed to move {} into place", path.display()))?;
    Ok(())
}

fn copy_atomic(src: &Path, dst: &Path) -> Result<()> {
    let tmp = tmp_path(dst);
    fs::copy(src, &tmp)
        .with_context(|| format!("Failed to copy {} to {}", src.display(), tmp.display()))?;
    fs::rename(&tmp, dst).with_context(|| format!("Failed to move {} into place", dst.display()))?;
    Ok(())
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let content =
        fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_str(&content).with_context(|| format!("Failed to parse {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ModelConfig;
    use crate::math::Array2;
    use crate::models::Regressor;

    fn tiny_model() -> GbdtRegressor {
        let x = Array2::from_shape_vec((4, 1), vec![1.0, 2.0, 3.0, 4.0]).unwrap();
        let mut model = GbdtRegressor::new(ModelConfig::default());
        model.fit(&x, &[1.0, 2.0, 3.0, 4.0], None).unwrap();
        model
    }

    fn info() -> ArtifactInfo {
        ArtifactInfo {
            cv_metrics: CvMetrics::from_folds(Vec::new()),
            feature_names: vec!["f0".to_string()],
            top_features: Vec::new(),
            n_samples: 4,
        }
    }

    #[test]
    fn save_promotes_latest_and_lists_versions() {
        let dir = tempfile::tempdir().unwrap();
        let store = ModelStore::new(dir.path());
        assert!(store.load_latest(Target::Overall).unwrap().is_none());

        let first = store.save(Target::Overall, &tiny_model(), info()).unwrap();
        let second = store.save(Target::Overall, &tiny_model(), info()).unwrap();
        assert_ne!(first.version, second.version);
        assert_eq!(store.latest_version(Target::Overall).unwrap(), Some(second.version.clone()));
        assert_eq!(store.versions(Target::Overall).unwrap(), vec![first.version.clone(), second.version]);

        let (_, meta) = store.load_latest(Target::Overall).unwrap().unwrap();
        assert_eq!(meta.feature_names, vec!["f0".to_string()]);
        assert_eq!(meta.engine, "gbdt");
    }

    #[test]
    fn restore_repoints_latest() {
        let dir = tempfile::tempdir().unwrap();
        let store = ModelStore::new(dir.path());
        let first = store.save(Target::Innovation, &tiny_model(), info()).unwrap();
        store.save(Target::Innovation, &tiny_model(), info()).unwrap();
        store.restore(Target::Innovation, &first.version).unwrap();
        assert_eq!(store.latest_version(Target::Innovation).unwrap(), Some(first.version));
        assert!(store.restore(Target::Innovation, "19990101_000000_000000").is_err());
    }

    #[test]
    fn failed_promote_all_reverts_every_pointer() {
        let dir = tempfile::tempdir().unwrap();
        let store = ModelStore::new(dir.path());
        let old = store.save(Target::Overall, &tiny_model(), info()).unwrap();
        let new_overall = store.save_version(Target::Overall, &tiny_model(), info()).unwrap();
        let new_innovation = store.save_version(Target::Innovation, &tiny_model(), info()).unwrap();
        // a directory in place of the temp file makes the copy fail
        fs::create_dir_all(tmp_path(&store.model_path(Target::Innovation, LATEST))).unwrap();

        let result = store.promote_all(&[
            (Target::Overall, new_overall.version),
            (Target::Innovation, new_innovation.version),
        ]);
        assert!(result.is_err());
        assert_eq!(store.latest_version(Target::Overall).unwrap(), Some(old.version));
        assert!(store.latest_metadata(Target::Innovation).unwrap().is_none());
    }

    #[test]
    fn clear_latest_removes_pointer_only() {
        let dir = tempfile::tempdir().unwrap();
        let store = ModelStore::new(dir.path());
        store.save(Target::Overall, &tiny_model(), info()).unwrap();
        store.clear_latest(Target::Overall).unwrap();
        assert!(store.latest_metadata(Target::Overall).unwrap().is_none());
        assert!(!store.model_path(Target::Overall, LATEST).exists());
        assert_eq!(store.versions(Target::Overall).unwrap().len(), 1);
    }

    #[test]
    fn save_version_leaves_latest_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let store = ModelStore::new(dir.path());
        store.save_version(Target::Overall, &tiny_model(), info()).unwrap();
        assert!(store.latest_metadata(Target::Overall).unwrap().is_none());
        assert_eq!(store.versions(Target::Overall).unwrap().len(), 1);
    }
}
