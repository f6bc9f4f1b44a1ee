//! Run-level configuration bundling every component's parameters

use crate::core::aggregate::AggregationParams;
use crate::core::kalman::FusionParams;
use crate::core::kriging::KrigingParams;
use crate::io::prior_grid::DEFAULT_VALID_RANGE;
use crate::types::{BathyError, BathyResult};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

/// Parameters for a full photons-to-fused-grid run.
///
/// Every section falls back to its defaults when missing from the file, so
/// `{}` is a valid configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    pub aggregation: AggregationParams,
    pub kriging: KrigingParams,
    pub fusion: FusionParams,
    /// Prior elevations outside this range are masked when subsetting to the output grid
    pub prior_valid_range: (f64, f64),
    /// Output cell size in metres
    pub resolution: f64,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            aggregation: AggregationParams::default(),
            kriging: KrigingParams::default(),
            fusion: FusionParams::default(),
            prior_valid_range: DEFAULT_VALID_RANGE, // -40 to 2 m
            resolution: 50.0,
        }
    }
}

impl RunConfig {
    /// Load and validate a JSON configuration file
    pub fn from_file<P: AsRef<Path>>(path: P) -> BathyResult<Self> {
        let path = path.as_ref();
        log::info!("Loading run configuration from {}", path.display());
        let config: RunConfig = serde_json::from_reader(BufReader::new(File::open(path)?))?;
        config.validate()?;
        log::debug!("Run configuration: {:?}", config);
        Ok(config)
    }

    pub fn validate(&self) -> BathyResult<()> {
        self.aggregation.validate()?;
        self.kriging.validate()?;
        self.fusion.validate()?;
        let (low, high) = self.prior_valid_range;
        if !(low < high) {
            return Err(BathyError::configuration(
                "prior_grid",
                format!("valid range [{}, {}] is empty", low, high),
            ));
        }
        if !(self.resolution > 0.0) || !self.resolution.is_finite() {
            return Err(BathyError::configuration(
                "output_grid",
                format!("resolution {} must be positive", self.resolution),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::kde::WindowSpec;
    use crate::core::sea_surface::SeaSurfacePolicy;
    use std::io::Write;

    #[test]
    fn test_empty_object_gives_defaults() {
        let config: RunConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config, RunConfig::default());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_file_partial_sections() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{
                "aggregation": {{
                    "filter": {{ "sea_surface": {{ "policy": "rolling_interpolated", "window": 51 }} }},
                    "kde": {{ "window": {{ "distance": 200.0 }} }},
                    "granule_timeout_secs": 600
                }},
                "fusion": {{ "prior_std": 1.5 }}
            }}"#
        )
        .unwrap();

        let config = RunConfig::from_file(file.path()).unwrap();
        assert_eq!(
            config.aggregation.filter.sea_surface,
            SeaSurfacePolicy::RollingInterpolated { window: 51 }
        );
        assert_eq!(config.aggregation.kde.window, WindowSpec::Distance(200.0));
        assert_eq!(config.aggregation.filter.low_limit, -50.0);
        assert_eq!(config.fusion.prior_std, 1.5);
        assert_eq!(config.kriging, KrigingParams::default());
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        let mut config = RunConfig::default();
        config.aggregation.filter.low_limit = 10.0;
        assert!(config.validate().unwrap_err().is_fatal());

        let mut config = RunConfig::default();
        config.prior_valid_range = (2.0, -40.0);
        assert!(config.validate().is_err());

        let mut config = RunConfig::default();
        config.fusion.prior_std = -1.0;
        assert!(config.validate().is_err());
    }
}
