pub mod api;
pub mod auth;
pub mod blob;
pub mod cli;
pub mod config;
pub mod database;
pub mod filter;
pub mod identity;
pub mod types;
