pub mod config;
pub mod error;
pub mod file_config;

pub use config::AppConfig;
pub use error::GridmarkError;
pub use file_config::{
    load_config, DriverSettings, EiaSettings, FileConfig, PricingPlatform, VastSettings,
};
