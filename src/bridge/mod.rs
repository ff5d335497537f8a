//! Bitcoin bridge - foreign header chain and burn validation

mod foreign;
mod validator;

pub use foreign::*;
pub use validator::*;
