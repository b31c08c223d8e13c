pub mod core;
pub mod delivery;
pub mod download;
pub mod extract;
pub mod observability;
pub mod storage;
