pub mod profile;
pub mod patterns;
pub mod quotes;
pub mod tokens;
pub mod fuzzy;
pub mod collector;

#[cfg(test)]
mod tests;

pub use profile::*;
pub use patterns::*;
pub use quotes::*;
pub use tokens::*;
pub use fuzzy::*;
pub use collector::*;
