//! Utilities (script source loading).

use std::fs;
use std::io::{self, Read};
use std::path::Path;

use anyhow::{bail, Context, Result};

/// Scripts larger than this are refused before parsing.
pub const MAX_SCRIPT_BYTES: u64 = 4 * 1024 * 1024;

/// Read a script file and return its content as string.
/// Accepts `.py`, `.txt`, `.osc` and files without extension.
pub fn read_script(path: &Path) -> Result<String> {
    if !path.exists() {
        bail!("Script file '{}' does not exist", path.display());
    }
    if !path.is_file() {
        bail!("'{}' is not a file", path.display());
    }

    let extension = path
        .extension()
        .and_then(|ext| ext.to_str())
        .unwrap_or("")
        .to_lowercase();
    if !matches!(extension.as_str(), "py" | "txt" | "osc" | "") {
        bail!("Unsupported script type: .{}\nCurrently supported: .py, .txt, .osc, and files without extension", extension);
    }

    let size = fs::metadata(path)
        .with_context(|| format!("Failed to stat '{}'", path.display()))?
        .len();
    if size > MAX_SCRIPT_BYTES {
        bail!("Script file '{}' is {} bytes; the limit is {}", path.display(), size, MAX_SCRIPT_BYTES);
    }

    fs::read_to_string(path).with_context(|| format!("Failed to read script '{}'", path.display()))
}

/// Read a whole script from `reader`, refusing oversized input.
pub fn read_script_from(reader: impl Read) -> Result<String> {
    let mut buf = String::new();
    reader
        .take(MAX_SCRIPT_BYTES + 1)
        .read_to_string(&mut buf)
        .context("Failed to read script from stdin")?;
    if buf.len() as u64 > MAX_SCRIPT_BYTES {
        bail!("Script on stdin exceeds {} bytes", MAX_SCRIPT_BYTES);
    }
    Ok(buf)
}

pub fn read_stdin_script() -> Result<String> {
    read_script_from(io::stdin().lock())
}
