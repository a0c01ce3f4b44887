use anyhow::{Context, Result, bail};
use std::{
    fs,
    io::Write,
    path::Path,
};
use tempfile::{NamedTempFile, TempPath};
use tracing::debug;
use walkdir::WalkDir;
use zip::{CompressionMethod, ZipWriter, write::SimpleFileOptions};

/// Entries never worth submitting
pub const DEFAULT_IGNORE_FILES: &[&str] = &[
    ".git",
    ".gitignore",
    ".vscode",
    ".idea",
    ".DS_Store",
    "Thumbs.db",
    "desktop.ini",
    "__pycache__",
    "node_modules",
];

pub fn should_ignore(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|name| DEFAULT_IGNORE_FILES.contains(&name))
}

/// Zips `dir` (deflate) into a temporary file that is removed when the returned path drops.
pub fn zip_dir(dir: &Path) -> Result<TempPath> {
    if !dir.is_dir() {
        bail!("{} is not a directory", dir.display());
    }

    let tmp_file = NamedTempFile::new()?;

    {
        let mut zip = ZipWriter::new(&tmp_file);
        let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

        let walker = WalkDir::new(dir)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|entry| !should_ignore(entry.path()));

        for entry in walker {
            let entry = entry?;
            let path = entry.path();
            let relative = path.strip_prefix(dir)?;

            if relative.as_os_str().is_empty() {
                continue;
            }

            // zip entry names always use forward slashes
            let name = relative
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/");

            if path.is_file() {
                debug!(entry = %name, "adding file to archive");
                zip.start_file(name, options)?;
                let content =
                    fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
                zip.write_all(&content)?;
            } else if path.is_dir() {
                zip.add_directory(name, options)?;
            }
        }

        zip.finish()?;
    }

    Ok(tmp_file.into_temp_path())
}
