pub mod log;
pub mod roster;

pub use log::*;
pub use roster::*;
