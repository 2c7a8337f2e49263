pub mod data_structures;
pub mod error;
pub mod ids;
pub mod parser;
pub mod setup;
pub mod strutils;

pub use data_structures::Map;
