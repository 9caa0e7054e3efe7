pub mod cli;
pub mod commands;
pub mod config;
pub mod logging;
pub mod node_client;
pub mod run_lock;
pub mod server;
pub mod state;
pub mod store;
pub mod sync_service;
