pub mod cli_engine;
pub mod config;

pub use cli_engine::CliEngine;
pub use config::{AppConfig, load_app_config, load_layered};
