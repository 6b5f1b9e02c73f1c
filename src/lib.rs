pub mod aws;
pub mod catalog;
pub mod config;
pub mod errors;
pub mod models;
pub mod services;
pub mod state;
pub mod storage;
pub mod utils;
