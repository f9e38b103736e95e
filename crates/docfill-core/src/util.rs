//! Utility functions shared across the crate.

use std::io;
use std::path::{Path, PathBuf};

use tempfile::TempDir;

/// Marker substituted for the scratch directory in diagnostics.
pub const SCRATCH_MARKER: &str = "<scratch>";

/// Get the user's config directory following XDG conventions.
///
/// Returns `$XDG_CONFIG_HOME` if set, otherwise `$HOME/.config`.
pub fn config_dir() -> Option<PathBuf> {
    std::env::var_os("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .or_else(|| std::env::var_os("HOME").map(|home| PathBuf::from(home).join(".config")))
}

/// Create a request-scoped scratch directory.
///
/// The directory and everything in it is removed when the returned guard is
/// dropped, on success and error paths alike.
pub fn scratch_dir(parent: Option<&Path>, prefix: &str) -> io::Result<TempDir> {
    let mut builder = tempfile::Builder::new();
    builder.prefix(prefix);
    match parent {
        Some(parent) => {
            std::fs::create_dir_all(parent)?;
            builder.tempdir_in(parent)
        }
        None => builder.tempdir(),
    }
}

/// Replace occurrences of `dir` in `text` with [`SCRATCH_MARKER`].
pub fn redact_path(text: &str, dir: &Path) -> String {
    let needle = dir.to_string_lossy();
    if needle.is_empty() {
        return text.to_string();
    }
    text.replace(needle.as_ref(), SCRATCH_MARKER)
}

/// Trim captured process output for inclusion in a diagnostic.
pub fn captured_text(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_redact_path_replaces_every_occurrence() {
        let dir = Path::new("/tmp/docfill-abc");
        let text = "cannot open /tmp/docfill-abc/base.pdf and /tmp/docfill-abc/out.pdf";
        assert_eq!(
            redact_path(text, dir),
            "cannot open <scratch>/base.pdf and <scratch>/out.pdf"
        );
    }

    #[test]
    fn test_scratch_dir_is_removed_on_drop() {
        let parent = tempfile::tempdir().unwrap();
        let path = {
            let scratch = scratch_dir(Some(parent.path()), "docfill-test-").unwrap();
            std::fs::write(scratch.path().join("file.bin"), b"x").unwrap();
            scratch.path().to_path_buf()
        };
        assert!(!path.exists());
    }

    #[test]
    fn test_captured_text_trims_and_tolerates_invalid_utf8() {
        assert_eq!(captured_text(b"  warning\n"), "warning");
        assert_eq!(captured_text(&[0xff, b'a']), "\u{fffd}a");
    }
}
