pub mod admin;
pub mod cache;
pub mod common;
pub mod records;
pub mod store;

pub use common::data_structures::Map;
pub use common::error::AcctqError as Error;
pub use common::ids::AssocId;

pub type Result<T> = std::result::Result<T, Error>;

pub const ACCTQ_VERSION: &str = env!("CARGO_PKG_VERSION");
