/// Helper utilities for fwbackup

use anyhow::{Context, Result};
use chrono::{DateTime, Local};
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

use crate::utils::FRAMEWORK_PLACEHOLDER;

/// Format bytes to human-readable size
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
    let mut size = bytes as f64;
    let mut unit_index = 0;

    while size >= 1024.0 && unit_index < UNITS.len() - 1 {
        size /= 1024.0;
        unit_index += 1;
    }

    if unit_index == 0 {
        format!("{} {}", bytes, UNITS[unit_index])
    } else {
        format!("{:.2} {}", size, UNITS[unit_index])
    }
}

/// Format a file modification time for listings
pub fn format_timestamp(time: std::time::SystemTime) -> String {
    let local: DateTime<Local> = time.into();
    local.format("%Y-%m-%d %H:%M:%S").to_string()
}

/// Mask sensitive data (show only first and last N characters)
pub fn mask_sensitive(value: &str, visible_chars: usize) -> String {
    let len = value.chars().count();
    if len <= visible_chars * 2 {
        "*".repeat(len)
    } else {
        let start: String = value.chars().take(visible_chars).collect();
        let end: String = value.chars().skip(len - visible_chars).collect();
        format!("{}...{}", start, end)
    }
}

/// Stream a file through SHA-256 and return the lowercase hex digest
pub fn sha256_file<P: AsRef<Path>>(path: P) -> Result<String> {
    let path = path.as_ref();
    let mut file = File::open(path)
        .with_context(|| format!("Failed to open {} for hashing", path.display()))?;

    let mut hasher = Sha256::new();
    let mut buffer = [0u8; 64 * 1024];
    loop {
        let read = file.read(&mut buffer)?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
    }

    Ok(to_hex(&hasher.finalize()))
}

fn to_hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

/// Substitute the framework name into a container name pattern
pub fn render_container_name(pattern: &str, framework: &str) -> String {
    pattern.replace(FRAMEWORK_PLACEHOLDER, framework)
}

/// Remove a file, treating "already gone" as success
pub fn remove_if_exists<P: AsRef<Path>>(path: P) -> io::Result<()> {
    match std::fs::remove_file(path) {
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        other => other,
    }
}

/// Simplified Docker container state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerState {
    Running,
    Stopped,
    Paused,
    Restarting,
    Dead,
    Missing,
    Unknown,
}

impl From<&str> for ContainerState {
    fn from(status: &str) -> Self {
        let status_lower = status.to_lowercase();
        if status_lower.contains("up") || status_lower.contains("running") {
            ContainerState::Running
        } else if status_lower.contains("paused") {
            ContainerState::Paused
        } else if status_lower.contains("restarting") {
            ContainerState::Restarting
        } else if status_lower.contains("dead") || status_lower.contains("removing") {
            ContainerState::Dead
        } else if status_lower.contains("exited")
            || status_lower.contains("stopped")
            || status_lower.contains("created")
        {
            ContainerState::Stopped
        } else {
            ContainerState::Unknown
        }
    }
}

impl ContainerState {
    pub fn is_running(&self) -> bool {
        matches!(self, ContainerState::Running)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ContainerState::Running => "Running",
            ContainerState::Stopped => "Stopped",
            ContainerState::Paused => "Paused",
            ContainerState::Restarting => "Restarting",
            ContainerState::Dead => "Dead",
            ContainerState::Missing => "Missing",
            ContainerState::Unknown => "Unknown",
        }
    }
}
