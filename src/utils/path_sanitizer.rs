// SPDX-License-Identifier: GPL-3.0-only
use std::path::{Component, Path};
use anyhow::{Context, Result};

/// Sanitize a package name by removing invalid characters and normalizing
///
/// Removes path separators, parent directory references, and other unsafe characters.
/// Normalizes to lowercase and replaces spaces with underscores.
pub fn sanitize_package_name(name: &str) -> Result<String> {
    let sanitized: String = name
        .chars()
        .filter(|c| c.is_alphanumeric() || *c == '-' || *c == '_' || *c == ' ')
        .collect();

    let normalized = sanitized
        .trim()
        .to_lowercase()
        .replace(' ', "_");

    if normalized.is_empty() {
        return Err(anyhow::anyhow!("Package name cannot be empty after sanitization"));
    }

    if normalized.len() > 200 {
        return Err(anyhow::anyhow!("Package name too long (max 200 characters)"));
    }

    if normalized.starts_with('-') {
        return Err(anyhow::anyhow!("Package name cannot start with '-'"));
    }

    Ok(normalized)
}

/// Validate that an existing path is within a base directory
///
/// Uses canonicalization so symlinks cannot escape the base.
pub fn validate_path_within_base(path: &Path, base: &Path) -> Result<()> {
    let canonical_path = path.canonicalize()
        .context("Failed to canonicalize path")?;

    let canonical_base = base.canonicalize()
        .context("Failed to canonicalize base path")?;

    if !canonical_path.starts_with(&canonical_base) {
        return Err(anyhow::anyhow!(
            "Path {} is outside base directory {}",
            canonical_path.display(),
            canonical_base.display()
        ));
    }

    Ok(())
}

/// Validate that a path would be within a base directory when created
///
/// Works for paths that don't exist yet by rejecting parent directory
/// references; existing paths also get the canonical check.
pub fn validate_path_within_base_new(path: &Path, base: &Path) -> Result<()> {
    let resolved = base.join(path);

    if resolved.components().any(|c| matches!(c, Component::ParentDir)) {
        return Err(anyhow::anyhow!(
            "Path contains parent directory reference (..)"
        ));
    }

    if resolved.exists() {
        validate_path_within_base(&resolved, base)?;
    }

    Ok(())
}

/// Sanitize a file name taken from a remote locator or user input
///
/// Removes path separators and other unsafe characters, ensuring only
/// a valid filename component remains.
pub fn sanitize_filename(filename: &str) -> String {
    let filename_only = Path::new(filename)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or(filename);

    let sanitized: String = filename_only
        .chars()
        .filter(|c| c.is_alphanumeric() || *c == '-' || *c == '_' || *c == '.' || *c == ' ')
        .collect();

    sanitized.trim().trim_start_matches('.').to_string()
}
