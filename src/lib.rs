pub mod auth;
pub mod cache;
pub mod config;
pub mod database;
pub mod error;
pub mod formatter;
pub mod pipeline;
pub mod provider;
pub mod rate_limit;
pub mod request;
pub mod resource;
pub mod sample;
pub mod server;
pub mod types;
