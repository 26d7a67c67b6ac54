//! Utility functions for folder naming and period path layout

use crate::error::{Error, Result};
use crate::period::Period;
use std::path::{Path, PathBuf};

/// Characters replaced with `_` in folder names, beyond whitespace and
/// control characters. Includes the Windows-reserved set so the layout is
/// identical across platforms.
const REPLACED_CHARS: &[char] = &[
    '<', '>', ':', '"', '/', '\\', '|', '?', '*', '-', '(', ')', ',', '.',
];

/// Sanitize a display name into a safe folder name
///
/// Replaces whitespace, control characters, and path-hostile punctuation with
/// underscores, collapses underscore runs, and trims underscores from both
/// ends.
///
/// # Arguments
///
/// * `name` - The display name to sanitize
///
/// # Returns
///
/// Returns the sanitized folder name, or a validation error when the input is
/// blank or nothing survives sanitizing.
///
/// # Examples
///
/// ```
/// use nomina_dl::utils::sanitize_folder_name;
///
/// let name = sanitize_folder_name("Período 01: Enero").unwrap();
/// assert_eq!(name, "Período_01_Enero");
/// ```
pub fn sanitize_folder_name(name: &str) -> Result<String> {
    if name.trim().is_empty() {
        return Err(Error::Validation("folder name cannot be blank".into()));
    }

    let replaced: String = name
        .chars()
        .map(|c| {
            if c.is_whitespace() || c.is_control() || REPLACED_CHARS.contains(&c) {
                '_'
            } else {
                c
            }
        })
        .collect();

    // Collapse underscore runs, then trim the ends
    let mut collapsed = String::with_capacity(replaced.len());
    let mut prev_underscore = false;
    for c in replaced.chars() {
        if c == '_' {
            if !prev_underscore {
                collapsed.push('_');
            }
            prev_underscore = true;
        } else {
            collapsed.push(c);
            prev_underscore = false;
        }
    }

    let trimmed = collapsed.trim_matches('_');
    if trimmed.is_empty() {
        return Err(Error::Validation(format!(
            "folder name {name:?} sanitizes to nothing"
        )));
    }

    Ok(trimmed.to_string())
}

/// Compute the canonical target folder for a period
///
/// The layout is `root / year / sanitized(display name)`. The snapshot
/// baseline, the recovery purge, and the portal fetch contract all use this
/// mapping, so a fetch and its later verification always look at the same
/// folder.
///
/// # Arguments
///
/// * `root` - The download root folder
/// * `period` - The period whose folder to compute
///
/// # Returns
///
/// Returns the period's target folder path.
///
/// # Examples
///
/// ```
/// use nomina_dl::Period;
/// use nomina_dl::utils::period_folder_path;
/// use std::path::Path;
///
/// let period = Period::new(2024, 1).unwrap();
/// let path = period_folder_path(Path::new("/downloads"), &period).unwrap();
/// assert_eq!(path, Path::new("/downloads/2024/Período_01_Enero"));
/// ```
pub fn period_folder_path(root: &Path, period: &Period) -> Result<PathBuf> {
    let folder = sanitize_folder_name(&period.display_name())?;
    Ok(root.join(period.year().to_string()).join(folder))
}
