use crate::error::GppError;
use crate::ownership::OwnershipPrediction;
use crate::payout::PayoutCurve;
use serde::{de::DeserializeOwned, Serialize};
use std::path::{Path, PathBuf};

/// Write-once per-slate cache of fitted artifacts, keyed by the slate
/// fingerprint (see [`crate::slate::Slate::fingerprint`]). A changed
/// fingerprint simply misses; entries are never overwritten.
#[derive(Debug, Clone)]
pub struct SlateCache {
    dir: PathBuf,
}

impl SlateCache {
    pub fn new(dir: impl Into<PathBuf>) -> SlateCache {
        SlateCache { dir: dir.into() }
    }

    fn path(&self, fingerprint: &str, kind: &str) -> PathBuf {
        self.dir.join(format!("{}.{}.json", fingerprint, kind))
    }

    fn store<T: Serialize>(&self, path: &Path, value: &T) -> Result<bool, GppError> {
        if path.exists() {
            return Ok(false);
        }
        std::fs::create_dir_all(&self.dir)?;
        let json = serde_json::to_string_pretty(value).map_err(|e| GppError::Internal {
            detail: format!("cache serialization failed: {}", e),
            context: crate::error::ErrorContext::new("-", "slate_cache"),
        })?;
        std::fs::write(path, json)?;
        Ok(true)
    }

    fn load<T: DeserializeOwned>(&self, path: &Path) -> Result<Option<T>, GppError> {
        if !path.exists() {
            return Ok(None);
        }
        let json = std::fs::read_to_string(path)?;
        let value = serde_json::from_str(&json).map_err(|e| GppError::Internal {
            detail: format!("cache entry corrupt: {}", e),
            context: crate::error::ErrorContext::new("-", "slate_cache"),
        })?;
        Ok(Some(value))
    }

    /// Returns false when an entry already existed (write-once).
    pub fn store_payout_curve(
        &self,
        fingerprint: &str,
        curve: &PayoutCurve,
    ) -> Result<bool, GppError> {
        self.store(&self.path(fingerprint, "payout_curve"), curve)
    }

    pub fn load_payout_curve(&self, fingerprint: &str) -> Result<Option<PayoutCurve>, GppError> {
        self.load(&self.path(fingerprint, "payout_curve"))
    }

    pub fn store_ownership(
        &self,
        fingerprint: &str,
        predictions: &[OwnershipPrediction],
    ) -> Result<bool, GppError> {
        self.store(&self.path(fingerprint, "ownership"), &predictions)
    }

    pub fn load_ownership(
        &self,
        fingerprint: &str,
    ) -> Result<Option<Vec<OwnershipPrediction>>, GppError> {
        self.load(&self.path(fingerprint, "ownership"))
    }
}
