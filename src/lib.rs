pub mod actors;
pub mod config;
pub mod storage;
