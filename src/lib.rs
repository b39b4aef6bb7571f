pub mod cli;
pub mod commands;
pub mod config;
pub mod dashboard;
pub mod docker;
pub mod orchestrator;
pub mod platform;
pub mod registry;
pub mod ui;
