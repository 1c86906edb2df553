pub mod api;
pub mod archive;
pub mod database_sqlx;
pub mod error;
pub mod models;
pub mod pipelines;
pub mod utils;

pub use error::{Result, SyncError};
