pub mod anchor;
pub mod audit;
pub mod config;
pub mod digest;
pub mod error;
pub mod ledger;
pub mod merkle;
pub mod notify;
pub mod server;
pub mod state;
pub mod sweeper;
pub mod webhook;
