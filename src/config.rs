//! Build configuration: backend selection and fixed scene limits.
//!
//! Stored as JSON. Every field has a default, so a partial file only
//! overrides what it names.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::util::{Error, Result};

/// Which builder produces the trees.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    /// Comparison sort + Karras build on the host.
    #[default]
    Cpu,
    /// Radix-sort dispatch pipeline (init/poll/up-sweep/down-sweep/reorder/build/update).
    GpuMirror,
}

/// Hard scene-complexity limits. Exceeding any of them fails the build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SceneLimits {
    pub max_triangles: usize,
    pub max_meshes: usize,
    pub max_triangle_bvh_nodes: usize,
    pub max_mesh_bvh_nodes: usize,
}

impl Default for SceneLimits {
    fn default() -> Self {
        Self {
            max_triangles: 1 << 20,
            max_meshes: 4096,
            max_triangle_bvh_nodes: 1 << 20,
            max_mesh_bvh_nodes: 4096,
        }
    }
}

/// Settings for a scene BVH build
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BuildConfig {
    pub backend: BackendKind,
    /// Run split and refit passes on the rayon pool.
    pub parallel: bool,
    pub limits: SceneLimits,
    /// Bits consumed per radix pass by the GPU mirror (1, 2, 4 or 8).
    pub radix_bits: u32,
    /// Elements handled by one radix workgroup.
    pub radix_block_size: u32,
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            backend: BackendKind::Cpu,
            parallel: false,
            limits: SceneLimits::default(),
            radix_bits: 4,
            radix_block_size: 256,
        }
    }
}

impl BuildConfig {
    /// Default config file path (`<config dir>/lbvh-scene/config.json`).
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|mut p| {
            p.push("lbvh-scene");
            p.push("config.json");
            p
        })
    }

    /// Load and validate config from a JSON file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        Self::from_json_str(&text)
    }

    /// Load from the default path, falling back to defaults when absent.
    pub fn load_or_default() -> Result<Self> {
        match Self::default_path() {
            Some(p) if p.exists() => Self::load(p),
            _ => Ok(Self::default()),
        }
    }

    /// Parse and validate config from JSON text.
    pub fn from_json_str(text: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Save config as pretty JSON, creating parent directories.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if !matches!(self.radix_bits, 1 | 2 | 4 | 8) {
            return Err(Error::Config(format!(
                "radix_bits must be 1, 2, 4 or 8 (got {})",
                self.radix_bits
            )));
        }
        if self.radix_block_size == 0 {
            return Err(Error::Config("radix_block_size must be non-zero".into()));
        }
        let l = &self.limits;
        if l.max_triangles < 2 || l.max_meshes < 2 {
            return Err(Error::Config(
                "max_triangles and max_meshes must allow at least 2 leaves".into(),
            ));
        }
        if l.max_triangle_bvh_nodes == 0 || l.max_mesh_bvh_nodes == 0 {
            return Err(Error::Config("BVH node limits must be non-zero".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_json_keeps_defaults() {
        let c = BuildConfig::from_json_str(r#"{ "backend": "gpu_mirror", "limits": { "max_meshes": 8 } }"#)
            .unwrap();
        assert_eq!(c.backend, BackendKind::GpuMirror);
        assert_eq!(c.limits.max_meshes, 8);
        assert_eq!(c.limits.max_triangles, SceneLimits::default().max_triangles);
        assert_eq!(c.radix_bits, 4);
        assert!(!c.parallel);
    }

    #[test]
    fn test_bad_radix_bits_rejected() {
        let err = BuildConfig::from_json_str(r#"{ "radix_bits": 3 }"#).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_malformed_json() {
        let err = BuildConfig::from_json_str("{ backend: ").unwrap_err();
        assert!(matches!(err, Error::Json(_)));
    }
}
