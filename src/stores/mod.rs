pub mod history_store;
pub mod session_store;
