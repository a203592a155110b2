pub mod app;
pub mod config;
pub mod db;
pub mod gate;
pub mod lifecycle;
pub mod models;
pub mod reconciler;
pub mod settings;
pub mod store;
pub mod telemetry;
pub mod vault;
