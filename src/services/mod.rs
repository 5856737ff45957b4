pub mod storage;
pub mod subscribers;
pub mod trips;
