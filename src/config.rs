//! Configuration management for the simloss kernels

use lazy_static::lazy_static;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use crate::error::{SimLossError, SimLossResult};

/// How the dissimilar-pair branch of Backward is evaluated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DissimilarGradient {
    /// `beta * gamma * coeff * l1dist * exp(gamma * l1dist) * sign`
    #[default]
    Reference,
    /// `beta * gamma * coeff * exp(gamma * l1dist) * sign`, the exact
    /// derivative of the Forward term
    Analytic,
}

/// Hyperparameters of the pair similarity loss
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimilarityLossParams {
    /// Weight on the similar-pair squared-L1 penalty
    pub alpha: f32,
    /// Weight on the dissimilar-pair exponential penalty
    pub beta: f32,
    /// Growth rate of the dissimilar-pair penalty
    pub gamma: f32,
    pub dissimilar_gradient: DissimilarGradient,
}

impl Default for SimilarityLossParams {
    fn default() -> Self {
        Self {
            alpha: 1.0,
            beta: 1.0,
            gamma: -1.0,
            dissimilar_gradient: DissimilarGradient::Reference,
        }
    }
}

impl SimilarityLossParams {
    pub fn new(alpha: f32, beta: f32, gamma: f32) -> Self {
        Self {
            alpha,
            beta,
            gamma,
            ..Self::default()
        }
    }

    pub fn with_dissimilar_gradient(mut self, mode: DissimilarGradient) -> Self {
        self.dissimilar_gradient = mode;
        self
    }

    pub fn validate(&self) -> SimLossResult<()> {
        for (name, value) in [("alpha", self.alpha), ("beta", self.beta), ("gamma", self.gamma)] {
            if !value.is_finite() {
                return Err(SimLossError::ConfigurationError(format!(
                    "{} must be finite, got {}",
                    name, value
                )));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GradientCheckConfig {
    pub stepsize: f32,
    pub threshold: f32,
    /// Elements with `|a - b|` at or below this margin straddle the L1 kink
    /// and are skipped; `None` uses the stepsize
    pub kink_margin: Option<f32>,
    pub seed: u64,
}

impl Default for GradientCheckConfig {
    fn default() -> Self {
        Self {
            stepsize: 1e-2,
            threshold: 1e-2,
            kink_margin: None,
            seed: 1701,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DevelopmentConfig {
    pub verbose_logging: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimLossConfig {
    pub loss: SimilarityLossParams,
    pub gradient_check: GradientCheckConfig,
    pub development: DevelopmentConfig,
}

impl SimLossConfig {
    pub fn validate(&self) -> SimLossResult<()> {
        self.loss.validate()?;
        let check = &self.gradient_check;
        if !(check.stepsize > 0.0) || !(check.threshold > 0.0) {
            return Err(SimLossError::ConfigurationError(format!(
                "gradient check stepsize and threshold must be positive, got {} and {}",
                check.stepsize, check.threshold
            )));
        }
        Ok(())
    }

    pub fn from_json(content: &str) -> SimLossResult<Self> {
        let config: SimLossConfig = serde_json::from_str(content)?;
        config.validate()?;
        Ok(config)
    }
}

/// Configuration manager holding the active configuration
pub struct ConfigManager {
    config: Arc<RwLock<SimLossConfig>>,
    custom_settings: HashMap<String, serde_json::Value>,
}

impl Default for ConfigManager {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigManager {
    pub fn new() -> Self {
        Self {
            config: Arc::new(RwLock::new(SimLossConfig::default())),
            custom_settings: HashMap::new(),
        }
    }

    pub fn load_from_file(&mut self, path: &Path) -> SimLossResult<()> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| SimLossError::operation_error("config", &format!("Failed to read config file: {}", e)))?;

        let config = SimLossConfig::from_json(&content)?;
        *self.config.write() = config;

        tracing::info!("Configuration loaded from {:?}", path);
        Ok(())
    }

    pub fn save_to_file(&self, path: &Path) -> SimLossResult<()> {
        let content = serde_json::to_string_pretty(&*self.config.read())?;

        std::fs::write(path, content)
            .map_err(|e| SimLossError::operation_error("config", &format!("Failed to write config file: {}", e)))?;

        tracing::info!("Configuration saved to {:?}", path);
        Ok(())
    }

    pub fn get_config(&self) -> SimLossConfig {
        self.config.read().clone()
    }

    /// Apply `f` to a copy of the configuration and keep it only if it
    /// still validates
    pub fn update_config<F>(&mut self, f: F) -> SimLossResult<()>
    where
        F: FnOnce(&mut SimLossConfig),
    {
        let mut config = self.get_config();
        f(&mut config);
        config.validate()?;
        *self.config.write() = config;
        Ok(())
    }

    pub fn set_custom_setting(&mut self, key: &str, value: serde_json::Value) {
        self.custom_settings.insert(key.to_string(), value);
    }

    pub fn get_custom_setting(&self, key: &str) -> Option<&serde_json::Value> {
        self.custom_settings.get(key)
    }
}

lazy_static! {
    static ref CONFIG_MANAGER: RwLock<ConfigManager> = RwLock::new(ConfigManager::new());
}

/// Get the global configuration
pub fn get_config() -> SimLossConfig {
    CONFIG_MANAGER.read().get_config()
}

/// Update the global configuration
pub fn update_config<F>(f: F) -> SimLossResult<()>
where
    F: FnOnce(&mut SimLossConfig),
{
    CONFIG_MANAGER.write().update_config(f)
}

/// Load the global configuration from a JSON file
pub fn load_config_from_file(path: &Path) -> SimLossResult<()> {
    CONFIG_MANAGER.write().load_from_file(path)
}

/// Create a configuration builder for easy setup
#[derive(Default)]
pub struct ConfigBuilder {
    config: SimLossConfig,
}

impl ConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn loss(mut self, f: impl FnOnce(&mut SimilarityLossParams)) -> Self {
        f(&mut self.config.loss);
        self
    }

    pub fn gradient_check(mut self, f: impl FnOnce(&mut GradientCheckConfig)) -> Self {
        f(&mut self.config.gradient_check);
        self
    }

    pub fn development(mut self, f: impl FnOnce(&mut DevelopmentConfig)) -> Self {
        f(&mut self.config.development);
        self
    }

    pub fn build(self) -> SimLossResult<SimLossConfig> {
        self.config.validate()?;
        Ok(self.config)
    }

    pub fn apply(self) -> SimLossResult<()> {
        let config = self.build()?;
        update_config(|c| *c = config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_defaults() {
        let config = SimLossConfig::default();
        assert_eq!(config.loss.alpha, 1.0);
        assert_eq!(config.loss.beta, 1.0);
        assert_eq!(config.loss.gamma, -1.0);
        assert_eq!(config.loss.dissimilar_gradient, DissimilarGradient::Reference);
        assert_eq!(config.gradient_check.stepsize, 1e-2);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_builder() {
        let config = ConfigBuilder::new()
            .loss(|l| {
                l.alpha = 0.5;
                l.gamma = 2.0;
            })
            .gradient_check(|g| g.threshold = 1e-3)
            .build()
            .unwrap();

        assert_eq!(config.loss.alpha, 0.5);
        assert_eq!(config.loss.beta, 1.0);
        assert_eq!(config.loss.gamma, 2.0);
        assert_eq!(config.gradient_check.threshold, 1e-3);
    }

    #[test]
    fn test_builder_rejects_non_finite() {
        let result = ConfigBuilder::new().loss(|l| l.beta = f32::NAN).build();
        assert!(matches!(result, Err(SimLossError::ConfigurationError(_))));

        let result = ConfigBuilder::new().gradient_check(|g| g.stepsize = 0.0).build();
        assert!(matches!(result, Err(SimLossError::ConfigurationError(_))));
    }

    #[test]
    fn test_config_manager_update() {
        let mut manager = ConfigManager::new();
        manager.update_config(|c| c.loss.alpha = 3.0).unwrap();
        assert_eq!(manager.get_config().loss.alpha, 3.0);

        // Rejected updates leave the previous configuration in place
        let result = manager.update_config(|c| c.loss.alpha = f32::INFINITY);
        assert!(result.is_err());
        assert_eq!(manager.get_config().loss.alpha, 3.0);
    }

    #[test]
    fn test_custom_settings() {
        let mut manager = ConfigManager::new();
        manager.set_custom_setting("run", serde_json::json!("siamese-01"));
        assert_eq!(manager.get_custom_setting("run"), Some(&serde_json::json!("siamese-01")));
        assert!(manager.get_custom_setting("missing").is_none());
    }

    #[test]
    fn test_config_file_io() {
        let temp_dir = tempdir().unwrap();
        let config_path = temp_dir.path().join("simloss_config.json");

        let mut manager = ConfigManager::new();
        manager
            .update_config(|c| {
                c.loss.gamma = 0.5;
                c.loss.dissimilar_gradient = DissimilarGradient::Analytic;
            })
            .unwrap();
        manager.save_to_file(&config_path).unwrap();

        let mut loaded = ConfigManager::new();
        loaded.load_from_file(&config_path).unwrap();
        assert_eq!(loaded.get_config(), manager.get_config());
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config = SimLossConfig::from_json(r#"{ "loss": { "alpha": 2.0, "dissimilar_gradient": "analytic" } }"#).unwrap();
        assert_eq!(config.loss.alpha, 2.0);
        assert_eq!(config.loss.beta, 1.0);
        assert_eq!(config.loss.dissimilar_gradient, DissimilarGradient::Analytic);
        assert_eq!(config.gradient_check, GradientCheckConfig::default());
    }

    #[test]
    fn test_missing_file() {
        let temp_dir = tempdir().unwrap();
        let mut manager = ConfigManager::new();
        let result = manager.load_from_file(&temp_dir.path().join("absent.json"));
        assert!(matches!(result, Err(SimLossError::OperationError { .. })));
    }
}
