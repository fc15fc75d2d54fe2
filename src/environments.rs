//! Connected environment registry
//!
//! Records are kept in `environments.json` as a JSON array, at most one
//! record per known organization id.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use crate::Result;
use crate::auth::TokenResponse;

/// One connected org
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnvironmentRecord {
    /// Operator supplied label, not unique
    pub alias: String,

    /// Base URL for subsequent API calls
    pub instance_url: String,

    /// Organization id from the identity URL, `None` when it could not be determined
    #[serde(default)]
    pub org_id: Option<String>,

    /// Not populated by the connect flow
    #[serde(default)]
    pub username: Option<String>,

    pub access_token: String,

    #[serde(default)]
    pub refresh_token: Option<String>,

    pub connected_at: DateTime<Utc>,
}

impl EnvironmentRecord {
    /// Build a record from a successful token exchange
    pub fn from_token(alias: &str, token: &TokenResponse, connected_at: DateTime<Utc>) -> Self {
        Self {
            alias: alias.to_string(),
            instance_url: token.instance_url.clone(),
            org_id: token.org_id(),
            username: None,
            access_token: token.access_token.clone(),
            refresh_token: token.refresh_token.clone(),
            connected_at,
        }
    }
}

/// What a merge did with the new record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOutcome {
    Added,
    /// Replaced the record at this index
    Updated(usize),
}

/// Merge `record` into `records`.
///
/// A record with a known org id replaces the existing record for that org in
/// place; otherwise it is appended. Records without an org id are never
/// matched, so they always append.
pub fn merge(
    mut records: Vec<EnvironmentRecord>,
    record: EnvironmentRecord,
) -> (Vec<EnvironmentRecord>, MergeOutcome) {
    let existing = record.org_id.as_deref().and_then(|org_id| {
        records
            .iter()
            .position(|r| r.org_id.as_deref() == Some(org_id))
    });

    match existing {
        Some(index) => {
            records[index] = record;
            (records, MergeOutcome::Updated(index))
        }
        None => {
            records.push(record);
            (records, MergeOutcome::Added)
        }
    }
}

/// File-backed registry of connected environments
#[derive(Debug, Clone)]
pub struct EnvironmentStore {
    path: PathBuf,
}

impl EnvironmentStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load all records; a missing or empty file is an empty registry
    pub fn load(&self) -> Result<Vec<EnvironmentRecord>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }

        let content = std::fs::read_to_string(&self.path)?;
        if content.trim().is_empty() {
            return Ok(Vec::new());
        }

        let records = serde_json::from_str(&content)?;
        Ok(records)
    }

    /// Replace the registry contents
    pub fn save(&self, records: &[EnvironmentRecord]) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = serde_json::to_string_pretty(records)?;
        std::fs::write(&self.path, content)?;

        // Tokens live in this file
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let perms = std::fs::Permissions::from_mode(0o600);
            std::fs::set_permissions(&self.path, perms)?;
        }

        Ok(())
    }

    /// Load, merge and persist one record.
    ///
    /// Not locked: two concurrent runs against the same file race, last writer wins.
    pub fn upsert(&self, record: EnvironmentRecord) -> Result<MergeOutcome> {
        let records = self.load()?;
        let (records, outcome) = merge(records, record);
        self.save(&records)?;
        Ok(outcome)
    }
}

/// Mask a token for display, keeping only its edges
pub fn mask_token(token: &str) -> String {
    let chars: Vec<char> = token.chars().collect();
    if chars.len() <= 12 {
        return "*".repeat(chars.len());
    }
    let head: String = chars[..4].iter().collect();
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("{}...{}", head, tail)
}
