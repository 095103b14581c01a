//! Configuration management for the scanner session server.
//!
//! Options come from command-line arguments or `SCAN_`-prefixed environment
//! variables:
//!
//! - `SCAN_HOST` - Server bind address (default: 0.0.0.0)
//! - `SCAN_PORT` - Server port (default: 3100)
//! - `SCAN_DEVICE` - `simulated` or `none` (default: simulated)
//! - `SCAN_SAVE_PATH` - Directory projects are saved to and loaded from
//! - `SCAN_OPERATION_TIMEOUT_SECS` - Wall-clock budget per operation
//! - `SCAN_CORS_ORIGINS` - Allowed CORS origins (comma-separated)
//!
//! # Example
//!
//! ```ignore
//! use clap::Parser;
//! use scan_relay::config::Config;
//!
//! let config = Config::parse();
//! println!("Listening on {}", config.bind_address());
//! ```

use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, ValueEnum};

// =============================================================================
// Default Values
// =============================================================================

/// Default server host.
pub const DEFAULT_HOST: &str = "0.0.0.0";

/// Default server port.
pub const DEFAULT_PORT: u16 = 3100;

/// Default simulated depth grid resolution.
pub const DEFAULT_SIMULATED_GRID: u32 = 32;

// =============================================================================
// CLI Arguments
// =============================================================================

/// Capture device bound to the session.
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceKind {
    /// Synthetic depth frames
    Simulated,
    /// No device: captures fail, models can still be loaded and saved
    None,
}

/// scan-relay - remote session service for 3D scanners.
///
/// Exposes captures, deferred reconstruction, scan projects and step-driven
/// operations over HTTP.
#[derive(Parser, Debug, Clone)]
#[command(name = "scan-relay")]
#[command(author, version, about, long_about = None)]
pub struct Config {
    // =========================================================================
    // Server Configuration
    // =========================================================================
    /// Host address to bind the server to.
    #[arg(long, default_value = DEFAULT_HOST, env = "SCAN_HOST")]
    pub host: String,

    /// Port to listen on.
    #[arg(short, long, default_value_t = DEFAULT_PORT, env = "SCAN_PORT")]
    pub port: u16,

    // =========================================================================
    // Session Configuration
    // =========================================================================
    /// Capture device to bind.
    #[arg(long, value_enum, default_value_t = DeviceKind::Simulated, env = "SCAN_DEVICE")]
    pub device: DeviceKind,

    /// Depth grid resolution of the simulated device.
    #[arg(long, default_value_t = DEFAULT_SIMULATED_GRID, env = "SCAN_SIMULATED_GRID")]
    pub simulated_grid: u32,

    /// Directory projects are saved to and loaded from.
    ///
    /// Must be an existing directory. Can also be set at runtime through
    /// `PUT /session/save-path`.
    #[arg(long, env = "SCAN_SAVE_PATH")]
    pub save_path: Option<PathBuf>,

    /// Wall-clock budget for each long-running operation, in seconds.
    ///
    /// Checked when a step starts; a step in progress is never interrupted.
    #[arg(long, env = "SCAN_OPERATION_TIMEOUT_SECS")]
    pub operation_timeout_secs: Option<u64>,

    // =========================================================================
    // CORS Configuration
    // =========================================================================
    /// Allowed CORS origins (comma-separated).
    ///
    /// If not specified, allows any origin.
    #[arg(long, env = "SCAN_CORS_ORIGINS", value_delimiter = ',')]
    pub cors_origins: Option<Vec<String>>,

    // =========================================================================
    // Logging Configuration
    // =========================================================================
    /// Enable verbose logging (debug level).
    #[arg(short, long, default_value_t = false)]
    pub verbose: bool,

    /// Disable request tracing.
    #[arg(long, default_value_t = false)]
    pub no_tracing: bool,
}

impl Config {
    /// Validate the configuration and return an error message if invalid.
    pub fn validate(&self) -> Result<(), String> {
        if let Some(path) = &self.save_path {
            if !path.is_dir() {
                return Err(format!(
                    "save path {} is not an existing directory",
                    path.display()
                ));
            }
        }

        if self.operation_timeout_secs == Some(0) {
            return Err("operation_timeout_secs must be greater than 0".to_string());
        }

        if self.device == DeviceKind::Simulated && self.simulated_grid < 2 {
            return Err("simulated_grid must be at least 2".to_string());
        }

        Ok(())
    }

    /// Get the server bind address as "host:port".
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn operation_timeout(&self) -> Option<Duration> {
        self.operation_timeout_secs.map(Duration::from_secs)
    }
}

// =============================================================================
// Tests
// =============================================================================
