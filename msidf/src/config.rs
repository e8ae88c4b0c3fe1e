//! TOML configuration of the profile and extraction steps.
//!
//! Every value has a default, so a config file only lists what it changes:
//!
//! ```toml
//! # msidf.toml
//! [profile]
//! horizon_size_um = 1000
//! min_samples = 5
//! spot_policy = "any"
//! normalization = "tic"
//! reduction = "data['int_a'].sum() / data['int_b'].sum()"
//!
//! [profile.adaptive]
//! enabled = true
//! resolution_um = 200
//! max_retries = 5
//!
//! [extraction]
//! min_intensity = 5000
//! ```

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use msicore::algorithm::aggregation::Reduction;
use msicore::algorithm::chunking::ChunkConfig;
use serde::Deserialize;

use crate::error::{DataError, Result};

/// Micrometres per centimetre; configured lengths are in µm, depths in cm.
pub const UM_PER_CM: f64 = 10_000.0;

/// Which spots enter the horizons, judged on their intensity columns.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(try_from = "String")]
pub enum SpotPolicy {
    /// every intensity present
    All,
    /// at least one intensity present
    Any,
    /// the listed compounds present, matched as `int_<name>`
    Compounds(Vec<String>),
}

impl Default for SpotPolicy {
    fn default() -> Self {
        SpotPolicy::All
    }
}

impl FromStr for SpotPolicy {
    type Err = DataError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            "all" => Ok(SpotPolicy::All),
            "any" => Ok(SpotPolicy::Any),
            other => {
                let compounds: Vec<String> = other
                    .split(';')
                    .map(str::trim)
                    .filter(|c| !c.is_empty())
                    .map(String::from)
                    .collect();
                if compounds.is_empty() {
                    Err(DataError::InvalidSetting(format!("empty spot policy {:?}", s)))
                } else {
                    Ok(SpotPolicy::Compounds(compounds))
                }
            }
        }
    }
}

impl TryFrom<String> for SpotPolicy {
    type Error = DataError;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl fmt::Display for SpotPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SpotPolicy::All => write!(f, "all"),
            SpotPolicy::Any => write!(f, "any"),
            SpotPolicy::Compounds(c) => write!(f, "{}", c.join(";")),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Normalization {
    #[default]
    None,
    /// divide intensities by the spot's TIC
    Tic,
}

impl FromStr for Normalization {
    type Err = DataError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "none" | "" => Ok(Normalization::None),
            "tic" => Ok(Normalization::Tic),
            other => Err(DataError::InvalidSetting(format!("unknown normalization {:?}", other))),
        }
    }
}

/// Root configuration structure for msidf.toml files.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct Config {
    pub profile: ProfileConfig,
    pub extraction: ExtractionConfig,
}

/// Depth binning settings.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ProfileConfig {
    pub horizon_size_um: f64,
    pub min_samples: usize,
    pub spot_policy: SpotPolicy,
    pub normalization: Normalization,
    /// `mean`, `sum`, `median`, `std`, `sumall` or a custom expression
    pub reduction: String,
    pub adaptive: AdaptiveConfig,
}

impl Default for ProfileConfig {
    fn default() -> Self {
        ProfileConfig {
            horizon_size_um: 500.0,
            min_samples: 10,
            spot_policy: SpotPolicy::All,
            normalization: Normalization::None,
            reduction: "mean".to_string(),
            adaptive: AdaptiveConfig::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct AdaptiveConfig {
    pub enabled: bool,
    pub resolution_um: f64,
    pub max_retries: usize,
}

impl Default for AdaptiveConfig {
    fn default() -> Self {
        AdaptiveConfig { enabled: false, resolution_um: 200.0, max_retries: 5 }
    }
}

/// Settings handed to the spectrum extractor.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ExtractionConfig {
    /// m/z window in Da
    pub tolerance_da: f64,
    pub min_snr: f64,
    pub min_intensity: f64,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        ExtractionConfig { tolerance_da: 0.01, min_snr: 1.0, min_intensity: 10_000.0 }
    }
}

impl ProfileConfig {
    pub fn horizon_size_cm(&self) -> f64 {
        self.horizon_size_um / UM_PER_CM
    }

    /// Chunker settings with lengths converted to cm.
    pub fn chunk_config(&self) -> Result<ChunkConfig> {
        if !(self.horizon_size_um > 0.0) {
            return Err(DataError::InvalidSetting(format!(
                "horizon size must be positive, got {}",
                self.horizon_size_um
            )));
        }
        let config = ChunkConfig::new(self.horizon_size_cm(), self.min_samples);
        Ok(if self.adaptive.enabled {
            config.with_adaptive(self.adaptive.resolution_um / UM_PER_CM, self.adaptive.max_retries)
        } else {
            config
        })
    }

    pub fn reduction(&self) -> Result<Reduction> {
        Ok(self.reduction.parse::<Reduction>()?)
    }
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Parse configuration from a TOML string.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }
}
