pub mod config;
pub mod db;
pub mod error;
pub mod provider;
pub mod schema;

pub use config::AppConfig;
pub use db::Database;
pub use error::{CoreError, Result};
