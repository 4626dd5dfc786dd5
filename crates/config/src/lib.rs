mod config_loader;


pub use config_loader::{AppConfig, ConfigLoader, ServerConfig, StoreConfig, UpstreamConfig};
