pub mod dialect;
pub mod source;
