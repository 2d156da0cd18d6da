pub mod config;
pub mod dates;
pub mod entity;
pub mod error;
pub mod records;
pub mod telemetry;

pub use config::Config;
pub use entity::*;
pub use error::*;
pub use records::*;
