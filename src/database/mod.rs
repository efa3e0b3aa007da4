pub mod dynamic;
pub mod manager;

pub use manager::{quote_identifier, DatabaseError, DatabaseManager};
