//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → GatewayConfig (validated, immutable)
//!
//! On file change:
//!     watcher.rs detects change, waits for the burst of events to settle
//!     → loader.rs loads new config
//!     → overrides.rs re-applies command-line values
//!     → validation.rs validates
//!     → sent to the server, which swaps the gate atomically
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded; changes require full reload
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod overrides;
pub mod schema;
pub mod validation;
pub mod watcher;

pub use loader::{load_config, load_config_with, parse_config, parse_config_with, ConfigError};
pub use overrides::Overrides;
pub use schema::{
    GateConfig, GatewayConfig, LimitsConfig, ListenerConfig, ObservabilityConfig, TimeoutConfig,
    UpstreamConfig,
};
