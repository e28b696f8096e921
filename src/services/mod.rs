pub mod execution;
pub mod interactive;
pub mod logger;
pub mod rate_limiter;
pub mod remote;
pub mod security;
pub mod settings;
pub mod ssh_connector;
