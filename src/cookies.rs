use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Cookie shape persisted in the shared jar file. Field names follow the
/// DevTools protocol so the jar stays readable by the browser layer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StoredCookie {
    pub name: String,
    pub value: String,
    pub domain: String,
    pub path: String,
    #[serde(default)]
    pub expires: Option<f64>,
    #[serde(default)]
    pub http_only: bool,
    #[serde(default)]
    pub secure: bool,
}

/// Single shared, file-persisted cookie jar. Read before each session and
/// overwritten after a successful extraction; the whole file is the unit
/// of state, there is no merging.
#[derive(Debug, Clone)]
pub struct CookieJar {
    path: PathBuf,
}

impl CookieJar {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// `None` when the jar is missing or unreadable; sessions simply
    /// start from a clean slate in that case.
    pub fn load(&self) -> Option<Vec<StoredCookie>> {
        let raw = match std::fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(_) => {
                debug!(path = %self.path.display(), "no cookie jar, starting clean");
                return None;
            }
        };

        match serde_json::from_str(&raw) {
            Ok(cookies) => Some(cookies),
            Err(err) => {
                warn!(path = %self.path.display(), %err, "cookie jar unreadable, ignoring");
                None
            }
        }
    }

    pub fn save(&self, cookies: &[StoredCookie]) -> std::io::Result<()> {
        let raw = serde_json::to_string_pretty(cookies)
            .map_err(|err| std::io::Error::new(std::io::ErrorKind::InvalidData, err))?;
        std::fs::write(&self.path, raw)
    }

    /// Deleting an absent jar is not an error.
    pub fn clear(&self) {
        match std::fs::remove_file(&self.path) {
            Ok(()) => debug!(path = %self.path.display(), "cookie jar cleared"),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => warn!(path = %self.path.display(), %err, "failed to clear cookie jar"),
        }
    }
}
