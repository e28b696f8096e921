pub mod network {
    pub const SSH_DEFAULT_PORT: u16 = 22;
    pub const TIMEOUT_SSH_READY_MS: u64 = 10_000;
    pub const TIMEOUT_SSH_EXEC_DEFAULT_MS: u64 = 20_000;
    pub const TIMEOUT_SSH_LAUNCH_MS: u64 = 15_000;
    pub const KEEPALIVE_INTERVAL_MS: u64 = 30_000;
}

pub mod retry {
    pub const MAX_ATTEMPTS: usize = 3;
    pub const BASE_DELAY_MS: u64 = 1_000;
    pub const MAX_DELAY_MS: u64 = 10_000;
}

pub mod rate_limit {
    pub const WINDOW_MS: u64 = 60_000;
    pub const MAX_REQUESTS: usize = 20;
    pub const SWEEP_EVERY: u64 = 256;
}

pub mod history {
    pub const MAX_RECORDS: usize = 1_000;
    pub const RETAIN_ON_TRIM: usize = 500;
    pub const DIRECT_SESSION_ID: &str = "direct";
    pub const DEFAULT_RECENT: usize = 10;
}

pub mod sessions {
    pub const ID_RANDOM_LEN: usize = 8;
    pub const ID_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";
    pub const ID_GENERATION_ATTEMPTS: usize = 5;
    pub const RETENTION_DAYS: i64 = 7;
    pub const MIN_RETENTION_DAYS: i64 = 1;
    pub const MAX_RETENTION_DAYS: i64 = 36_500;
    pub const MAX_EXECUTION_ERRORS: u32 = 3;
}

pub mod launch {
    pub const CONFIRM_DELAY_MS: u64 = 1_500;
    pub const STOP_CONFIRM_DELAY_MS: u64 = 500;
    pub const REMOTE_FILES_DIR: &str = "/root/files";
    pub const REMOTE_LOGS_DIR: &str = "/root/logs";
}

pub mod limits {
    pub const MAX_REPLY_CHARS: usize = 3_500;
    pub const MAX_CAPTURE_BYTES: usize = 256 * 1024;
    pub const DEFAULT_TAIL_LINES: usize = 100;
    pub const MAX_TAIL_LINES: usize = 200;
    pub const LAST_LOG_LINES: usize = 50;
}

pub mod security {
    pub const ALLOWED_EXTENSIONS: &[&str] = &[".py", ".sh", ".js", ".txt", ".json", ".yml", ".yaml"];
    pub const DANGEROUS_PATTERNS: &[&str] = &[
        "rm -rf /",
        "rm -rf *",
        "rm -rf ~",
        "rm -fr /",
        "mkfs",
        "dd if=",
        "> /dev/sd",
        ">/dev/sd",
        ":(){ :|:& };:",
        ":(){:|:&};:",
        "chmod -r 777 /",
        "shutdown",
        "reboot",
        "halt",
        "init 0",
        "| sh",
        "| bash",
    ];
}
