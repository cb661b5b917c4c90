pub mod config;
pub mod rank;

pub use config::*;
pub use rank::*;
