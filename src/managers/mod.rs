pub mod commands;
pub mod files;
pub mod scripts;
pub mod sessions;
pub mod system;
