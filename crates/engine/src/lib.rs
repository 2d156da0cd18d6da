pub mod engine;
pub mod error;
pub mod geo;
pub mod local;
pub mod request;
pub mod schema;

pub use engine::QueryEngine;
pub use error::EngineError;
pub use local::LocalEngine;
pub use request::{ContactWindowRequest, QueryStats, StagingRequest};
pub use schema::{ColumnSpec, ColumnType, TableKind, TableSpec};
