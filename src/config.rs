//! Preintegration configuration
//!
//! Noise densities, gravity and retention settings are passed explicitly at
//! construction time. Defaults follow the usual VINS-Mono tuning.

use std::fs;
use std::path::Path;

use nalgebra::{Matrix3, Vector3};
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::types::{NoiseMat18, N_ACC_0, N_ACC_1, N_BA_WALK, N_BG_WALK, N_GYR_0, N_GYR_1};

const G: f64 = 9.81; // Earth gravity (m/s²)

/// Continuous-time noise spectral densities
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NoiseDensities {
    /// Accelerometer white noise [m/s²/√Hz]
    pub accel_noise_density: f64,

    /// Gyroscope white noise [rad/s/√Hz]
    pub gyro_noise_density: f64,

    /// Accelerometer bias random walk [m/s³/√Hz]
    pub accel_bias_walk: f64,

    /// Gyroscope bias random walk [rad/s²/√Hz]
    pub gyro_bias_walk: f64,
}

impl Default for NoiseDensities {
    fn default() -> Self {
        Self {
            accel_noise_density: 0.08,
            gyro_noise_density: 0.004,
            accel_bias_walk: 4.0e-5,
            gyro_bias_walk: 2.0e-6,
        }
    }
}

impl NoiseDensities {
    /// Build the 18×18 diagonal noise model
    ///
    /// Block order: accel(k), gyro(k), accel(k+1), gyro(k+1), accel walk, gyro walk.
    pub fn noise_matrix(&self) -> NoiseMat18 {
        let acc_var = self.accel_noise_density * self.accel_noise_density;
        let gyr_var = self.gyro_noise_density * self.gyro_noise_density;
        let ba_var = self.accel_bias_walk * self.accel_bias_walk;
        let bg_var = self.gyro_bias_walk * self.gyro_bias_walk;

        let mut noise = NoiseMat18::zeros();
        for (offset, var) in [
            (N_ACC_0, acc_var),
            (N_GYR_0, gyr_var),
            (N_ACC_1, acc_var),
            (N_GYR_1, gyr_var),
            (N_BA_WALK, ba_var),
            (N_BG_WALK, bg_var),
        ] {
            noise
                .fixed_view_mut::<3, 3>(offset, offset)
                .copy_from(&(Matrix3::identity() * var));
        }
        noise
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let fields = [
            ("accel_noise_density", self.accel_noise_density),
            ("gyro_noise_density", self.gyro_noise_density),
            ("accel_bias_walk", self.accel_bias_walk),
            ("gyro_bias_walk", self.gyro_bias_walk),
        ];
        for (name, value) in fields {
            if !value.is_finite() || value < 0.0 {
                return Err(ConfigError::Invalid(format!(
                    "{name} must be finite and non-negative, got {value}"
                )));
            }
        }
        Ok(())
    }
}

/// Retention policy for the recorded sample history
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum HistoryPolicy {
    /// Keep every sample for the lifetime of the window
    #[default]
    Unbounded,

    /// Drop the history once it exceeds `max_samples`; replay is then unavailable
    Capped { max_samples: usize },
}

/// Bias drift beyond which the first-order correction should give way to replay
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BiasTolerance {
    /// Accelerometer bias drift norm [m/s²]
    pub accel: f64,

    /// Gyroscope bias drift norm [rad/s]
    pub gyro: f64,
}

impl Default for BiasTolerance {
    fn default() -> Self {
        Self {
            accel: 0.1,
            gyro: 0.01,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PreintegrationConfig {
    pub noise: NoiseDensities,

    /// Gravity vector in the world frame [m/s²]
    pub gravity: [f64; 3],

    pub history: HistoryPolicy,

    pub bias_tolerance: BiasTolerance,
}

impl Default for PreintegrationConfig {
    fn default() -> Self {
        Self {
            noise: NoiseDensities::default(),
            gravity: [0.0, 0.0, G],
            history: HistoryPolicy::default(),
            bias_tolerance: BiasTolerance::default(),
        }
    }
}

impl PreintegrationConfig {
    pub fn gravity(&self) -> Vector3<f64> {
        Vector3::from(self.gravity)
    }

    pub fn with_gravity(mut self, gravity: Vector3<f64>) -> Self {
        self.gravity = [gravity.x, gravity.y, gravity.z];
        self
    }

    pub fn with_history(mut self, history: HistoryPolicy) -> Self {
        self.history = history;
        self
    }

    pub fn with_noise(mut self, noise: NoiseDensities) -> Self {
        self.noise = noise;
        self
    }

    /// Parse and validate a JSON config; missing fields take defaults
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let json = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&json)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.noise.validate()?;

        if self.gravity.iter().any(|g| !g.is_finite()) {
            return Err(ConfigError::Invalid(format!(
                "gravity must be finite, got {:?}",
                self.gravity
            )));
        }

        if let HistoryPolicy::Capped { max_samples: 0 } = self.history {
            return Err(ConfigError::Invalid(
                "history cap must allow at least one sample".to_string(),
            ));
        }

        let tol = &self.bias_tolerance;
        if !(tol.accel.is_finite() && tol.gyro.is_finite()) || tol.accel < 0.0 || tol.gyro < 0.0 {
            return Err(ConfigError::Invalid(format!(
                "bias tolerance must be finite and non-negative, got {tol:?}"
            )));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_default_noise_matrix_diagonal() {
        let noise = NoiseDensities::default().noise_matrix();

        assert_relative_eq!(noise[(0, 0)], 0.08 * 0.08);
        assert_relative_eq!(noise[(4, 4)], 0.004 * 0.004);
        assert_relative_eq!(noise[(8, 8)], 0.08 * 0.08);
        assert_relative_eq!(noise[(10, 10)], 0.004 * 0.004);
        assert_relative_eq!(noise[(13, 13)], 4.0e-5 * 4.0e-5);
        assert_relative_eq!(noise[(17, 17)], 2.0e-6 * 2.0e-6);

        // Strictly diagonal
        let off_diag: f64 = (0..18)
            .flat_map(|r| (0..18).map(move |c| (r, c)))
            .filter(|(r, c)| r != c)
            .map(|(r, c)| noise[(r, c)].abs())
            .sum();
        assert_eq!(off_diag, 0.0);
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config = PreintegrationConfig::from_json_str(
            r#"{ "noise": { "accel_noise_density": 0.2 }, "history": { "capped": { "max_samples": 400 } } }"#,
        )
        .unwrap();

        assert_relative_eq!(config.noise.accel_noise_density, 0.2);
        assert_relative_eq!(config.noise.gyro_noise_density, 0.004);
        assert_eq!(config.gravity, [0.0, 0.0, 9.81]);
        assert_eq!(config.history, HistoryPolicy::Capped { max_samples: 400 });
    }

    #[test]
    fn test_unbounded_history_from_json() {
        let config = PreintegrationConfig::from_json_str(r#"{ "history": "unbounded" }"#).unwrap();
        assert_eq!(config.history, HistoryPolicy::Unbounded);
    }

    #[test]
    fn test_rejects_negative_density() {
        let err = PreintegrationConfig::from_json_str(r#"{ "noise": { "gyro_bias_walk": -1.0 } }"#)
            .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn test_rejects_zero_history_cap() {
        let config = PreintegrationConfig::default()
            .with_history(HistoryPolicy::Capped { max_samples: 0 });
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_malformed_json() {
        let err = PreintegrationConfig::from_json_str("{ noise: ").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn test_load_missing_file() {
        let err = PreintegrationConfig::load(Path::new("/nonexistent/preint.json")).unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }
}
