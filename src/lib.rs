pub mod config;
pub mod db;
pub mod error;
pub mod fetch;
pub mod images;
pub mod ingest;
pub mod normalize;
pub mod parser;
pub mod watch;

pub use error::{Error, Result};
