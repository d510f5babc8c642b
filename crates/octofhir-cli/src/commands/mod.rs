pub mod gateway;
pub mod query;
pub mod sync;
