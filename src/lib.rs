pub mod alpaca;
pub mod api;
pub mod app;
pub mod auth;
pub mod broker;
pub mod config;
pub mod error;
pub mod ingest;
pub mod model;
pub mod store;
