//! JSON run configuration: two sources, the column mapping, comparison
//! options and optional per-side quality checks

use crate::compare::CompareOptions;
use crate::engine::Engine;
use crate::error::{Result, TabreconError};
use crate::mapping::ColumnMapping;
use crate::quality::QualityOptions;
use crate::sources::{open_source, SourceAdapter, SourceConfig, SourceKind};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Quality checks for each side of a run
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct QualityConfig {
    pub source: Option<QualityOptions>,
    pub target: Option<QualityOptions>,
}

/// A complete comparison run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    pub source: SourceConfig,
    pub target: SourceConfig,
    #[serde(default)]
    pub mapping: ColumnMapping,
    #[serde(default)]
    pub compare: CompareOptions,
    #[serde(default)]
    pub quality: QualityConfig,
}

impl RunConfig {
    pub fn new(source: SourceConfig, target: SourceConfig) -> Self {
        Self {
            source,
            target,
            mapping: ColumnMapping::default(),
            compare: CompareOptions::default(),
            quality: QualityConfig::default(),
        }
    }

    /// Read a config file; relative file locations resolve against its directory
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| TabreconError::config(format!("Cannot read {}: {}", path.display(), e)))?;
        let mut config: RunConfig = serde_json::from_str(&content)
            .map_err(|e| TabreconError::config(format!("Invalid run configuration {}: {}", path.display(), e)))?;

        if let Some(base) = path.parent() {
            resolve_location(&mut config.source, base);
            resolve_location(&mut config.target, base);
        }
        config.validate()?;
        log::debug!("Loaded run configuration from {}", path.display());
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let compare = &self.compare;
        if compare.chunk_size == 0 {
            return Err(TabreconError::config("compare.chunk_size must be at least 1"));
        }
        if compare.queue_depth == 0 {
            return Err(TabreconError::config("compare.queue_depth must be at least 1"));
        }
        let strategy = &compare.strategy;
        if strategy.absolute_tolerance < 0.0 || strategy.relative_tolerance < 0.0 {
            return Err(TabreconError::config("tolerances must not be negative"));
        }
        for (side, quality) in [("source", &self.quality.source), ("target", &self.quality.target)] {
            let Some(quality) = quality else { continue };
            let ratios = std::iter::once(quality.max_null_ratio).chain(quality.null_thresholds.values().copied());
            for ratio in ratios {
                if !(0.0..=1.0).contains(&ratio) {
                    return Err(TabreconError::config(format!(
                        "{} null ratio threshold {} is outside 0..=1",
                        side, ratio
                    )));
                }
            }
        }
        for source in [&self.source, &self.target] {
            if source.location.trim().is_empty() {
                return Err(TabreconError::config(format!("{:?} source has an empty location", source.kind)));
            }
        }
        Ok(())
    }

    pub fn open_sources(&self) -> Result<(Box<dyn SourceAdapter>, Box<dyn SourceAdapter>)> {
        Ok((
            open_source(&self.source, self.compare.chunk_size)?,
            open_source(&self.target, self.compare.chunk_size)?,
        ))
    }

    /// Engine configured with this run's comparison and quality options
    pub fn engine(&self) -> Engine {
        let mut engine = Engine::new(self.compare.clone());
        if let Some(quality) = &self.quality.source {
            engine = engine.with_source_quality(quality.clone());
        }
        if let Some(quality) = &self.quality.target {
            engine = engine.with_target_quality(quality.clone());
        }
        engine
    }
}

fn resolve_location(config: &mut SourceConfig, base: &Path) {
    if config.kind == SourceKind::Http || config.location == ":memory:" {
        return;
    }
    let location = Path::new(&config.location);
    if location.is_relative() && !base.as_os_str().is_empty() {
        config.location = base.join(location).to_string_lossy().to_string();
    }
}
