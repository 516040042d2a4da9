pub mod app;
pub mod cli;
pub mod config;
pub mod errors;
pub mod remote;
pub mod sanitize;
pub mod storage;
pub mod sync;
pub mod types;
pub mod view;
