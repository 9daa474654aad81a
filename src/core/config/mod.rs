pub mod data;
pub mod defaults;
pub mod io;

pub use data::{Config, NetworkConfig, ProviderConfig, RetryConfig};
pub use io::ConfigError;
