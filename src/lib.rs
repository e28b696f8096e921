pub mod app;
pub mod constants;
pub mod errors;
pub mod managers;
pub mod server;
pub mod services;
pub mod stores;
pub mod utils;
