use rand::{distributions::Alphanumeric, Rng};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

fn temp_sibling_path(path: &Path) -> PathBuf {
    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    let file_name = path.file_name().and_then(|s| s.to_str()).unwrap_or("state");
    let token: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(8)
        .map(char::from)
        .collect();
    parent.join(format!(".{}.{}.tmp", file_name, token))
}

/// Writes the whole file through a temp sibling and a rename, so readers see
/// either the previous content or the new one.
pub fn atomic_write_text_file(path: impl AsRef<Path>, content: &str, mode: u32) -> io::Result<()> {
    let path = path.as_ref();
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let tmp = temp_sibling_path(path);
    let written = (|| {
        let mut file = fs::OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&tmp)?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&tmp, fs::Permissions::from_mode(mode))?;
        }
        #[cfg(not(unix))]
        let _ = mode;
        file.write_all(content.as_bytes())?;
        file.sync_all()
    })();
    if let Err(err) = written {
        let _ = fs::remove_file(&tmp);
        return Err(err);
    }
    fs::rename(tmp, path)
}

pub fn write_json_atomic<T: Serialize>(path: impl AsRef<Path>, value: &T) -> io::Result<()> {
    let payload = serde_json::to_string_pretty(value)?;
    atomic_write_text_file(path, &format!("{}\n", payload), 0o600)
}

pub enum JsonLoad<T> {
    Missing,
    Loaded(T),
    Malformed(String),
}

pub fn read_json<T: DeserializeOwned>(path: impl AsRef<Path>) -> JsonLoad<T> {
    let raw = match fs::read_to_string(path.as_ref()) {
        Ok(raw) => raw,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return JsonLoad::Missing,
        Err(err) => return JsonLoad::Malformed(err.to_string()),
    };
    if raw.trim().is_empty() {
        return JsonLoad::Missing;
    }
    match serde_json::from_str(&raw) {
        Ok(value) => JsonLoad::Loaded(value),
        Err(err) => JsonLoad::Malformed(err.to_string()),
    }
}
