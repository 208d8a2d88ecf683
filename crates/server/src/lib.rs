//! Forge git server library

pub mod api;
pub mod auth;
pub mod config;
pub mod db;
pub mod metrics_exporter;
pub mod repository;
pub mod validation;

pub mod test_helpers;
