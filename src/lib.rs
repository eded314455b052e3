pub mod config;
pub mod doctor;
pub mod error;
pub mod fsutil;
pub mod ops;


pub use error::{HubError, Result};
