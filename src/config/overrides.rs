//! Command-line overrides layered over the file configuration.

use crate::config::loader::ConfigError;
use crate::config::schema::GatewayConfig;
use crate::config::validation::validate_config;

/// Values given on the command line. They win over the file, including on
/// every reload.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Overrides {
    pub bind_address: Option<String>,
    pub upstream_address: Option<String>,
}

impl Overrides {
    pub fn apply(&self, config: &mut GatewayConfig) {
        if let Some(bind) = &self.bind_address {
            config.listener.bind_address = bind.clone();
        }
        if let Some(upstream) = &self.upstream_address {
            config.upstream.address = upstream.clone();
        }
    }

    /// Apply the overrides, then validate the result.
    pub fn resolve(&self, mut config: GatewayConfig) -> Result<GatewayConfig, ConfigError> {
        self.apply(&mut config);
        validate_config(&config).map_err(ConfigError::Validation)?;
        Ok(config)
    }
}
