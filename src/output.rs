// src/output.rs
use std::io;
use std::iter;
use std::path::{Path, PathBuf};

use tokio::fs::OpenOptions;

use crate::constants::OUTPUT_EXT;

/// `<domain-name>.mp4`
pub fn default_output_path(domain_name: &str) -> PathBuf {
    PathBuf::from(format!("{domain_name}.{OUTPUT_EXT}"))
}

/// `path`, then `base_0.ext`, `base_1.ext`, ...
fn candidates(path: &Path) -> impl Iterator<Item = PathBuf> + '_ {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let ext = path
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy()))
        .unwrap_or_default();
    iter::once(path.to_path_buf())
        .chain((0u64..).map(move |idx| path.with_file_name(format!("{stem}_{idx}{ext}"))))
}

/// Claim the first free name among [`candidates`] by creating it
/// exclusively. The empty file belongs to the caller, who replaces it
/// with the finished video or removes it.
pub async fn reserve(path: &Path) -> io::Result<PathBuf> {
    for candidate in candidates(path) {
        match OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&candidate)
            .await
        {
            Ok(_) => return Ok(candidate),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => continue,
            Err(e) => return Err(e),
        }
    }
    Err(io::Error::new(
        io::ErrorKind::AlreadyExists,
        format!("no free name for {}", path.display()),
    ))
}
