pub mod config;
pub mod database;
pub mod entity;
pub mod models;

pub use config::{BrokerBackend, Config};
pub use database::get_db_connection;
pub use models::*;
