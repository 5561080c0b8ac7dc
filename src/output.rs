//! Output file naming and saving for the one-shot CLI commands.

use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::error::ImageError;
use crate::payload::ImagePayload;

/// Generate an output filename from an instruction.
///
/// Sanitizes the first 50 characters to kebab-case and appends a unix
/// timestamp and `extension`.
#[must_use]
pub fn auto_filename(instruction: &str, extension: &str) -> String {
    let sanitized = sanitize_for_filename(instruction, 50);
    let timestamp = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs();
    format!("{sanitized}-{timestamp}.{extension}")
}

/// Sanitize a string for use in a filename.
///
/// Converts to lowercase, replaces non-alphanumeric chars with hyphens,
/// collapses consecutive hyphens, and trims to max length.
#[must_use]
pub fn sanitize_for_filename(input: &str, max_len: usize) -> String {
    let mut result = String::with_capacity(max_len);
    let mut last_was_hyphen = true; // Prevents leading hyphen

    for ch in input.chars().take(max_len * 2) {
        if result.len() >= max_len {
            break;
        }
        if ch.is_ascii_alphanumeric() {
            result.push(ch.to_ascii_lowercase());
            last_was_hyphen = false;
        } else if !last_was_hyphen {
            result.push('-');
            last_was_hyphen = true;
        }
    }

    while result.ends_with('-') {
        result.pop();
    }

    if result.is_empty() {
        "image".to_string()
    } else {
        result
    }
}

/// Use the explicit path, or derive one from the instruction.
#[must_use]
pub fn resolve_output_path(explicit: Option<&str>, instruction: &str, extension: &str) -> PathBuf {
    match explicit {
        Some(p) => PathBuf::from(p),
        None => PathBuf::from(auto_filename(instruction, extension)),
    }
}

/// Paths for `count` outputs: `base` itself for one, `stem-N.ext` for several.
#[must_use]
pub fn numbered_paths(base: &Path, count: usize) -> Vec<PathBuf> {
    if count == 1 {
        return vec![base.to_path_buf()];
    }
    let stem = base.file_stem().unwrap_or_default().to_string_lossy();
    let ext = base.extension().unwrap_or_default().to_string_lossy();
    (1..=count)
        .map(|i| {
            let name = if ext.is_empty() { format!("{stem}-{i}") } else { format!("{stem}-{i}.{ext}") };
            base.with_file_name(name)
        })
        .collect()
}

/// Write provider images as returned; pixels are never re-encoded.
///
/// # Errors
///
/// Returns an error if any file cannot be written.
pub fn save_images(images: &[ImagePayload], base: &Path) -> Result<Vec<PathBuf>, ImageError> {
    let paths = numbered_paths(base, images.len());
    for (image, path) in images.iter().zip(&paths) {
        std::fs::write(path, &image.bytes)?;
    }
    Ok(paths)
}
