//! Append-only storage for screenshots, page sources and recordings.
//!
//! Files live under `{root}/{session_id}/` and are named
//! `{testName}_{platform}_{deviceName}_{timestamp}.{ext}`. Existing files are
//! never overwritten; a name collision gets a numeric suffix instead, so
//! concurrent sessions and repeated steps can't clobber each other.

use std::fs::OpenOptions;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};

use crate::config::Platform;

/// Replaces anything outside `[A-Za-z0-9._-]` with `_`.
pub fn sanitize(component: &str) -> String {
    let cleaned: String = component
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect();
    if cleaned.is_empty() {
        "_".to_string()
    } else {
        cleaned
    }
}

/// ISO-8601 timestamp with `:` and `.` replaced by `-`.
pub fn file_timestamp(at: DateTime<Utc>) -> String {
    at.format("%Y-%m-%dT%H-%M-%S-%3fZ").to_string()
}

/// `{testName}_{platform}_{deviceName}_{timestamp}.{ext}`
pub fn artifact_name(
    test_name: &str,
    platform: Platform,
    device_name: &str,
    at: DateTime<Utc>,
    ext: &str,
) -> String {
    format!(
        "{}_{}_{}_{}.{}",
        sanitize(test_name),
        platform.as_str(),
        sanitize(device_name),
        file_timestamp(at),
        ext
    )
}

/// Root of the artifact tree for one run.
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    root: PathBuf,
}

impl ArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory holding one session's artifacts.
    pub fn session_dir(&self, session_key: &str) -> PathBuf {
        self.root.join(sanitize(session_key))
    }

    /// Writes `bytes` into the session directory under `file_name`.
    ///
    /// Never overwrites: if the name is taken, `-1`, `-2`, ... is inserted
    /// before the extension.
    pub fn write(&self, session_key: &str, file_name: &str, bytes: &[u8]) -> io::Result<PathBuf> {
        let dir = self.session_dir(session_key);
        std::fs::create_dir_all(&dir)?;

        let (stem, ext) = match file_name.rsplit_once('.') {
            Some((stem, ext)) if !stem.is_empty() => (stem, Some(ext)),
            _ => (file_name, None),
        };

        for attempt in 0u32.. {
            let candidate = match (attempt, ext) {
                (0, _) => file_name.to_string(),
                (n, Some(ext)) => format!("{stem}-{n}.{ext}"),
                (n, None) => format!("{stem}-{n}"),
            };
            let path = dir.join(candidate);
            match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(mut file) => {
                    file.write_all(bytes)?;
                    return Ok(path);
                }
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => continue,
                Err(e) => return Err(e),
            }
        }
        Err(io::Error::new(
            io::ErrorKind::AlreadyExists,
            "no free artifact name",
        ))
    }
}
