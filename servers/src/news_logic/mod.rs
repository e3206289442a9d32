pub mod config;
pub mod logger;
pub mod model;
pub mod store;
pub mod pipeline;
pub mod monitor;
