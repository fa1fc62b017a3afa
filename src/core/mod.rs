// Core infrastructure modules
pub mod config;
pub mod config_manager;
pub mod logger;
pub mod updater;
