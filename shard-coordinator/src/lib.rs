pub mod assignment;
pub mod catalog;
pub mod channel;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod instance_registry;
pub mod memberlist_manager;
pub mod memberlist_store;
pub mod metrics_consts;
pub mod node_watcher;
pub mod server;
pub mod types;
