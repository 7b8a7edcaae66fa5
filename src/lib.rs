pub mod capture;
pub mod chat;
pub mod client;
pub mod config;
pub mod relay;
