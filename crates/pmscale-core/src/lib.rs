pub mod config;
pub mod types;
pub mod units;

pub use config::{ConfigError, ScaleConfig};
pub use types::*;
pub use units::{MEMORY_MB, bytes_to_mb, epoch_millis, format_bytes};
