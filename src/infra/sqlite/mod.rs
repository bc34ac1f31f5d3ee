pub mod dialect;
pub mod queries;
pub mod schema;
pub mod source;
