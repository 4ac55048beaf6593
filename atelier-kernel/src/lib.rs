//! Kernel de supervision atelier : canal télémétrie résilient, cache
//! hors-ligne versionné, état des lignes et maintenance prédictive.

pub mod cache;
pub mod config;
pub mod context;
pub mod health;
pub mod http;
pub mod maintenance;
pub mod models;
pub mod notifications;
pub mod store;
pub mod sync;
pub mod telemetry;
