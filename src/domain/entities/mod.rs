pub mod filter;
pub mod request;
pub mod response;
pub mod schema;
pub mod value;
