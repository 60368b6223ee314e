//! Backup and restore for the per-framework PostgreSQL and Qdrant services.

pub mod cli;
pub mod core;
pub mod utils;
