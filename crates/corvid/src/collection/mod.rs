/// Collection aggregation operations.
pub mod aggregation;
/// Collection bulk writes.
pub mod bulk;
/// Core collection implementation.
pub mod coll;
/// Collection index management.
pub mod indexes;
/// Collection write operations.
pub mod operations;
/// Collection query operations.
pub mod query;
#[cfg(test)]
/// Collection tests.
mod tests;

pub use coll::*;
