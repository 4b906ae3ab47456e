//! File explorer reads and download tokens.
//!
//! Explorer operations are constrained to the agent's cwd — resolved paths
//! that escape it are refused. Download tokens are opaque, single-use,
//! TTL-bounded grants redeemed over the HTTP side-channel.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rand::RngCore;
use sha2::{Digest, Sha256};

use paseo_domain::{Error, Result};
use paseo_protocol::types::FileEntry;

const DOWNLOAD_TOKEN_TTL: Duration = Duration::from_secs(600);
const MAX_READ_BYTES: u64 = 4 * 1024 * 1024;

/// Resolve `relative` under `cwd`, refusing traversal outside it.
pub fn resolve_within(cwd: &Path, relative: &str) -> Result<PathBuf> {
    if Path::new(relative).is_absolute() {
        return Err(Error::NotAllowed("path must be relative to the agent cwd".into()));
    }
    let joined = cwd.join(relative);
    let canonical_cwd = cwd
        .canonicalize()
        .map_err(|e| Error::BadRequest(format!("cwd unavailable: {e}")))?;
    let canonical = joined
        .canonicalize()
        .map_err(|e| Error::BadRequest(format!("no such path '{relative}': {e}")))?;
    if !canonical.starts_with(&canonical_cwd) {
        return Err(Error::NotAllowed(format!(
            "path '{relative}' escapes the agent cwd"
        )));
    }
    Ok(canonical)
}

/// List a directory under the agent cwd.
pub fn list_dir(cwd: &Path, relative: &str) -> Result<Vec<FileEntry>> {
    let dir = resolve_within(cwd, relative)?;
    let mut entries = Vec::new();
    for entry in std::fs::read_dir(&dir)? {
        let entry = entry?;
        let meta = entry.metadata()?;
        entries.push(FileEntry {
            name: entry.file_name().to_string_lossy().to_string(),
            is_dir: meta.is_dir(),
            size: meta.len(),
        });
    }
    entries.sort_by(|a, b| (b.is_dir, &a.name).cmp(&(a.is_dir, &b.name)));
    Ok(entries)
}

/// Read a file under the agent cwd (bounded).
pub fn read_file(cwd: &Path, relative: &str) -> Result<Vec<u8>> {
    let path = resolve_within(cwd, relative)?;
    let meta = std::fs::metadata(&path)?;
    if !meta.is_file() {
        return Err(Error::BadRequest(format!("'{relative}' is not a file")));
    }
    if meta.len() > MAX_READ_BYTES {
        return Err(Error::BadRequest(format!(
            "'{relative}' exceeds the {MAX_READ_BYTES}-byte read limit"
        )));
    }
    Ok(std::fs::read(&path)?)
}

/// Locate a project icon near the agent cwd.
pub fn project_icon(cwd: &Path) -> Option<(Vec<u8>, String)> {
    const CANDIDATES: &[(&str, &str)] = &[
        (".paseo/icon.png", "image/png"),
        ("icon.png", "image/png"),
        ("logo.png", "image/png"),
        ("favicon.ico", "image/x-icon"),
    ];
    for (name, media_type) in CANDIDATES {
        let path = cwd.join(name);
        if let Ok(bytes) = std::fs::read(&path) {
            return Some((bytes, media_type.to_string()));
        }
    }
    None
}

struct DownloadGrant {
    path: PathBuf,
    expires_at: DateTime<Utc>,
}

/// Registry of single-use download grants.
pub struct DownloadTokens {
    grants: Mutex<HashMap<String, DownloadGrant>>,
}

impl DownloadTokens {
    pub fn new() -> Self {
        Self {
            grants: Mutex::new(HashMap::new()),
        }
    }

    /// Issue a token for a path inside the agent cwd.
    pub fn issue(&self, cwd: &Path, relative: &str) -> Result<(String, DateTime<Utc>)> {
        let path = resolve_within(cwd, relative)?;
        if !path.is_file() {
            return Err(Error::BadRequest(format!("'{relative}' is not a file")));
        }

        let mut seed = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut seed);
        let token = hex::encode(Sha256::digest(seed));
        let expires_at = Utc::now()
            + chrono::Duration::from_std(DOWNLOAD_TOKEN_TTL)
                .unwrap_or_else(|_| chrono::Duration::seconds(600));

        self.grants.lock().insert(
            token.clone(),
            DownloadGrant {
                path,
                expires_at,
            },
        );
        Ok((token, expires_at))
    }

    /// Redeem a token. Single-use: the grant is consumed even when expired.
    pub fn redeem(&self, token: &str) -> Option<PathBuf> {
        let grant = self.grants.lock().remove(token)?;
        if grant.expires_at < Utc::now() {
            return None;
        }
        Some(grant.path)
    }

    pub fn prune_expired(&self) {
        let now = Utc::now();
        self.grants.lock().retain(|_, g| g.expires_at >= now);
    }
}

impl Default for DownloadTokens {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixture() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("src")).unwrap();
        std::fs::write(dir.path().join("src/main.rs"), "fn main() {}").unwrap();
        std::fs::write(dir.path().join("README.md"), "# hi").unwrap();
        dir
    }

    #[test]
    fn list_and_read_within_cwd() {
        let dir = fixture();
        let entries = list_dir(dir.path(), ".").unwrap();
        assert!(entries.iter().any(|e| e.name == "src" && e.is_dir));
        assert!(entries.iter().any(|e| e.name == "README.md" && !e.is_dir));

        let content = read_file(dir.path(), "src/main.rs").unwrap();
        assert_eq!(content, b"fn main() {}");
    }

    #[test]
    fn traversal_is_refused() {
        let dir = fixture();
        assert!(matches!(
            resolve_within(dir.path(), "../outside"),
            Err(Error::NotAllowed(_)) | Err(Error::BadRequest(_))
        ));
        assert!(matches!(
            resolve_within(dir.path(), "/etc/passwd"),
            Err(Error::NotAllowed(_))
        ));
    }

    #[test]
    fn download_token_is_single_use_and_bounded() {
        let dir = fixture();
        let tokens = DownloadTokens::new();
        let (token, expires_at) = tokens.issue(dir.path(), "README.md").unwrap();
        assert!(expires_at > Utc::now());

        let path = tokens.redeem(&token).unwrap();
        assert!(path.ends_with("README.md"));
        // Second redemption fails.
        assert!(tokens.redeem(&token).is_none());
        // Unknown tokens fail.
        assert!(tokens.redeem("nope").is_none());
    }

    #[test]
    fn issue_rejects_directories() {
        let dir = fixture();
        let tokens = DownloadTokens::new();
        assert!(tokens.issue(dir.path(), "src").is_err());
    }
}
