use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use tracing::{info, warn};

const MAX_CONFIG_BYTES: u64 = 1024 * 1024;
const MAX_STREAM_SIZE: usize = 512 * 1024 * 1024;
const MAX_OBJECTS: usize = 10_000_000;
const MAX_VISUAL_PAGES: usize = 50;
const MAX_VISUAL_DPI: u32 = 600;

/// Thresholds and limits for one scan. The numeric cutoffs are policy, not
/// physics; every one of them is adjustable here and from the YAML config.
#[derive(Debug, Clone)]
pub struct ScanConfig {
    /// Positioning operators within one BT/ET block before the page is flagged.
    pub text_positioning_threshold: usize,
    /// Drawing operators per page before the page is flagged.
    pub drawing_ops_threshold: usize,
    /// Defined-but-unreferenced objects tolerated before flagging.
    pub orphan_objects_threshold: usize,
    /// Fraction of `[1, max_object_number]` allowed to be absent.
    pub object_gap_fraction: f64,
    /// AcroForm fields tolerated before flagging.
    pub form_fields_threshold: usize,
    /// Pages compared by the visual-identity check.
    pub visual_check_pages: usize,
    pub visual_check_dpi: u32,
    /// Decoded stream size cap; larger streams are skipped with an error.
    pub max_stream_size: usize,
    /// Object scan budget.
    pub max_objects: usize,
    /// Where revision files land, relative to the scanned file's directory
    /// unless absolute.
    pub revision_output_dir: PathBuf,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            text_positioning_threshold: 40,
            drawing_ops_threshold: 50,
            orphan_objects_threshold: 10,
            object_gap_fraction: 0.30,
            form_fields_threshold: 50,
            visual_check_pages: 5,
            visual_check_dpi: 72,
            max_stream_size: 64 * 1024 * 1024,
            max_objects: 500_000,
            revision_output_dir: PathBuf::from("Altered_files"),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ConfigFile {
    pub scan: Option<ScanOverrides>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ScanOverrides {
    pub text_positioning_threshold: Option<usize>,
    pub drawing_ops_threshold: Option<usize>,
    pub orphan_objects_threshold: Option<usize>,
    pub object_gap_fraction: Option<f64>,
    pub form_fields_threshold: Option<usize>,
    pub visual_check_pages: Option<usize>,
    pub visual_check_dpi: Option<u32>,
    pub max_stream_size: Option<usize>,
    pub max_objects: Option<usize>,
    pub revision_output_dir: Option<PathBuf>,
}

impl ConfigFile {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        if let Ok(meta) = fs::metadata(path) {
            if meta.len() > MAX_CONFIG_BYTES {
                return Err(anyhow::anyhow!(
                    "config {} exceeds {} bytes",
                    path.display(),
                    MAX_CONFIG_BYTES
                ));
            }
        }
        let data = fs::read_to_string(path)?;
        Ok(serde_yaml::from_str::<ConfigFile>(&data)?)
    }

    /// Applies the file's overrides. Out-of-range values are rejected with a
    /// warning and the existing setting stays in force.
    pub fn apply(&self, config: &mut ScanConfig) {
        let Some(scan) = &self.scan else { return };
        if let Some(v) = scan.text_positioning_threshold {
            info!(value = v, "config override text_positioning_threshold");
            config.text_positioning_threshold = v;
        }
        if let Some(v) = scan.drawing_ops_threshold {
            info!(value = v, "config override drawing_ops_threshold");
            config.drawing_ops_threshold = v;
        }
        if let Some(v) = scan.orphan_objects_threshold {
            config.orphan_objects_threshold = v;
        }
        if let Some(v) = scan.object_gap_fraction {
            if (0.0..=1.0).contains(&v) {
                config.object_gap_fraction = v;
            } else {
                warn!(value = v, "invalid object_gap_fraction in config (expected 0.0..=1.0)");
            }
        }
        if let Some(v) = scan.form_fields_threshold {
            config.form_fields_threshold = v;
        }
        if let Some(v) = scan.visual_check_pages {
            if v == 0 || v > MAX_VISUAL_PAGES {
                warn!(value = v, limit = MAX_VISUAL_PAGES, "invalid visual_check_pages in config");
            } else {
                config.visual_check_pages = v;
            }
        }
        if let Some(v) = scan.visual_check_dpi {
            if v == 0 || v > MAX_VISUAL_DPI {
                warn!(value = v, limit = MAX_VISUAL_DPI, "invalid visual_check_dpi in config");
            } else {
                config.visual_check_dpi = v;
            }
        }
        if let Some(v) = scan.max_stream_size {
            if v == 0 || v > MAX_STREAM_SIZE {
                warn!(value = v, limit = MAX_STREAM_SIZE, "invalid max_stream_size in config");
            } else {
                info!(value = v, "config override max_stream_size");
                config.max_stream_size = v;
            }
        }
        if let Some(v) = scan.max_objects {
            if v == 0 || v > MAX_OBJECTS {
                warn!(value = v, limit = MAX_OBJECTS, "invalid max_objects in config");
            } else {
                config.max_objects = v;
            }
        }
        if let Some(v) = &scan.revision_output_dir {
            config.revision_output_dir = v.clone();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = ScanConfig::default();
        assert_eq!(config.text_positioning_threshold, 40);
        assert_eq!(config.drawing_ops_threshold, 50);
        assert_eq!(config.orphan_objects_threshold, 10);
        assert_eq!(config.form_fields_threshold, 50);
        assert_eq!(config.visual_check_pages, 5);
        assert_eq!(config.visual_check_dpi, 72);
        assert_eq!(config.max_stream_size, 64 * 1024 * 1024);
        assert_eq!(config.revision_output_dir, PathBuf::from("Altered_files"));
    }

    #[test]
    fn invalid_override_is_rejected() {
        let file: ConfigFile =
            serde_yaml::from_str("scan:\n  max_stream_size: 0\n  drawing_ops_threshold: 25\n")
                .unwrap();
        let mut config = ScanConfig::default();
        file.apply(&mut config);
        assert_eq!(config.max_stream_size, 64 * 1024 * 1024);
        assert_eq!(config.drawing_ops_threshold, 25);
    }
}
