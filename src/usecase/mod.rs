pub mod compiler;
pub mod ports;
pub mod services;
pub mod shaper;
