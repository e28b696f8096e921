pub mod fs_atomic;
pub mod paths;
pub mod reply;
pub mod retry;
pub mod shell;
