pub mod behavior;
pub mod config;
pub mod cookies;
pub mod events;
pub mod identity;
pub mod models;
pub mod price_store;
pub mod registry;
pub mod scanner;
pub mod scheduler;
pub mod scraper;
pub mod store;
pub mod utils;
pub mod web;

// Re-export commonly used types
pub use config::AppConfig;
pub use utils::error::{AppError, Result};
