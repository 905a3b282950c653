//! New revision files

use crate::error::CliError;
use chrono::{DateTime, Utc};
use regex::Regex;
use std::fs;
use std::path::{Path, PathBuf};

/// Fresh 12-hex-digit revision token
pub fn new_token() -> String {
    let hex = uuid::Uuid::new_v4().simple().to_string();
    hex[..12].to_string()
}

/// Lowercase identifier fragment for a message, at most 40 characters
pub fn slug(message: &str) -> String {
    let re = Regex::new(r"[^a-z0-9]+").expect("valid regex");
    let lowered = message.to_lowercase();
    let slug = re.replace_all(&lowered, "_");
    let slug = slug.trim_matches('_');
    let mut slug: String = slug.chars().take(40).collect();
    while slug.ends_with('_') {
        slug.pop();
    }
    if slug.is_empty() {
        "revision".to_string()
    } else {
        slug
    }
}

/// Module name for a revision file; tokens may start with a digit, so prefix `r`
pub fn module_name(token: &str, message: &str) -> String {
    format!("r{token}_{}", slug(message))
}

/// Source of a new revision revising `down_revision` (or a root when `None`)
pub fn render(
    token: &str,
    down_revision: Option<&str>,
    message: &str,
    generated_at: DateTime<Utc>,
) -> String {
    let generated = generated_at.format("%Y-%m-%d %H:%M:%S UTC");
    let (revises_doc, down_const, revises_call) = match down_revision {
        Some(down) => (
            down.to_string(),
            format!("pub const DOWN_REVISION: &str = \"{down}\";"),
            "\n        .revises(DOWN_REVISION)",
        ),
        None => (
            "<base>".to_string(),
            "pub const DOWN_REVISION: Option<&str> = None;".to_string(),
            "",
        ),
    };

    format!(
        r#"//! Revision: {message}
//! Revises: {revises_doc}
//! Generated: {generated}

use revchain::migration::Revision;

pub const REVISION: &str = "{token}";
{down_const}

pub fn revision() -> Revision {{
    Revision::new(REVISION, {message:?}){revises_call}
        .upgrade(|_manager| Ok(()))
        .downgrade(|_manager| Ok(()))
}}
"#
    )
}

/// Write a new revision file into `dir`; returns its path
///
/// # Errors
///
/// `RevisionExists` if the file is already there, `WriteRevision` on I/O failure.
pub fn write_revision(
    dir: &Path,
    message: &str,
    down_revision: Option<&str>,
) -> Result<(String, PathBuf), CliError> {
    let token = new_token();
    let path = dir.join(format!("{}.rs", module_name(&token, message)));
    if path.exists() {
        return Err(CliError::RevisionExists(path));
    }

    fs::create_dir_all(dir).map_err(|source| CliError::WriteRevision {
        path: path.clone(),
        source,
    })?;
    fs::write(&path, render(&token, down_revision, message, Utc::now())).map_err(|source| {
        CliError::WriteRevision {
            path: path.clone(),
            source,
        }
    })?;

    Ok((token, path))
}
