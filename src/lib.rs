pub mod config;
pub mod error;
pub mod persistence;
pub mod player;
pub mod youtube;

pub use error::{Error, Result};
