pub mod api;
pub mod config;
pub mod error;
pub mod identity;
pub mod storage;

pub use config::AdminConfig;
pub use error::{AppError, AppResult};
pub use identity::SessionContext;
