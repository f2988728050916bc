//! Archive extraction into session-scoped ephemeral storage.
//!
//! Only zip containers are actually opened; `.rar` and `.7z` are recognized
//! as containers but rejected with a distinct unsupported-format error.
//! Nested containers are recursed up to a bounded depth; members past the
//! depth limit are dropped from the result set, which callers must treat as
//! "no candidates found" rather than an error.

use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};
use zip::ZipArchive;

use crate::error::{PipelineError, Result};

/// Default bound on nested-container recursion (archive-bomb guard).
pub const DEFAULT_MAX_DEPTH: usize = 3;

const CONTAINER_EXTENSIONS: &[&str] = &["zip", "rar", "7z"];

#[derive(Debug, Clone)]
pub struct ArchiveExtractor {
    max_depth: usize,
}

impl ArchiveExtractor {
    pub fn new() -> Self {
        Self {
            max_depth: DEFAULT_MAX_DEPTH,
        }
    }

    pub fn with_max_depth(mut self, depth: usize) -> Self {
        self.max_depth = depth;
        self
    }

    /// Whether a path looks like a compressed container by extension.
    pub fn is_container(path: &Path) -> bool {
        path.extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| CONTAINER_EXTENSIONS.contains(&e.to_lowercase().as_str()))
    }

    /// Extract `container` under `dest`, recursing into nested containers.
    ///
    /// Returns the paths of every extracted regular file (nested-container
    /// members included). The caller owns cleanup of `dest`.
    pub fn extract(&self, container: &Path, dest: &Path) -> Result<Vec<PathBuf>> {
        self.extract_at_depth(container, dest, 0)
    }

    fn extract_at_depth(
        &self,
        container: &Path,
        dest: &Path,
        depth: usize,
    ) -> Result<Vec<PathBuf>> {
        if depth >= self.max_depth {
            debug!(container = %container.display(), depth, "depth limit reached, dropping nested container");
            return Ok(Vec::new());
        }

        if !container.exists() {
            return Err(PipelineError::Extraction {
                container: container.to_path_buf(),
                details: "container not found".to_string(),
            });
        }

        let extension = container
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_lowercase())
            .unwrap_or_default();

        match extension.as_str() {
            "zip" => self.extract_zip(container, dest, depth),
            "rar" | "7z" => Err(PipelineError::UnsupportedArchive {
                container: container.to_path_buf(),
                extension,
            }),
            other => Err(PipelineError::UnsupportedArchive {
                container: container.to_path_buf(),
                extension: other.to_string(),
            }),
        }
    }

    fn extract_zip(&self, container: &Path, dest: &Path, depth: usize) -> Result<Vec<PathBuf>> {
        let file = File::open(container)?;
        let mut archive = ZipArchive::new(file).map_err(|e| PipelineError::Extraction {
            container: container.to_path_buf(),
            details: format!("corrupt or invalid zip: {e}"),
        })?;

        std::fs::create_dir_all(dest)?;

        let mut extracted = Vec::new();
        for index in 0..archive.len() {
            let mut entry = archive.by_index(index).map_err(|e| PipelineError::Extraction {
                container: container.to_path_buf(),
                details: format!("unreadable zip entry {index}: {e}"),
            })?;

            if entry.is_dir() {
                continue;
            }

            // enclosed_name rejects absolute paths and `..` traversal.
            let Some(relative) = entry.enclosed_name() else {
                warn!(container = %container.display(), entry = entry.name(), "skipping unsafe entry name");
                continue;
            };
            let target = dest.join(relative);
            if let Some(parent) = target.parent() {
                std::fs::create_dir_all(parent)?;
            }

            let mut out = File::create(&target)?;
            io::copy(&mut entry, &mut out)?;
            extracted.push(target);
        }
        drop(archive);

        debug!(container = %container.display(), files = extracted.len(), "extracted zip");

        // Recurse into nested containers; their members replace the container
        // entry in the result set. Nested failures are skipped, not fatal.
        let mut results = Vec::new();
        for path in extracted {
            if Self::is_container(&path) {
                let nested_dest = dest.join(format!(
                    "{}_nested",
                    path.file_stem().unwrap_or_default().to_string_lossy()
                ));
                match self.extract_at_depth(&path, &nested_dest, depth + 1) {
                    Ok(nested) => results.extend(nested),
                    Err(e) => {
                        warn!(nested = %path.display(), error = %e, "nested container skipped");
                    }
                }
            } else {
                results.push(path);
            }
        }

        Ok(results)
    }
}

impl Default for ArchiveExtractor {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;
    use zip::write::SimpleFileOptions;

    fn write_zip(path: &Path, entries: &[(&str, &[u8])]) {
        let file = File::create(path).unwrap();
        let mut writer = zip::ZipWriter::new(file);
        for (name, content) in entries {
            writer
                .start_file(name.to_string(), SimpleFileOptions::default())
                .unwrap();
            writer.write_all(content).unwrap();
        }
        writer.finish().unwrap();
    }

    fn zip_bytes(entries: &[(&str, &[u8])]) -> Vec<u8> {
        let mut buffer = std::io::Cursor::new(Vec::new());
        {
            let mut writer = zip::ZipWriter::new(&mut buffer);
            for (name, content) in entries {
                writer
                    .start_file(name.to_string(), SimpleFileOptions::default())
                    .unwrap();
                writer.write_all(content).unwrap();
            }
            writer.finish().unwrap();
        }
        buffer.into_inner()
    }

    #[test]
    fn test_is_container() {
        assert!(ArchiveExtractor::is_container(Path::new("batch.zip")));
        assert!(ArchiveExtractor::is_container(Path::new("batch.ZIP")));
        assert!(ArchiveExtractor::is_container(Path::new("batch.rar")));
        assert!(ArchiveExtractor::is_container(Path::new("batch.7z")));
        assert!(!ArchiveExtractor::is_container(Path::new("nota.xml")));
        assert!(!ArchiveExtractor::is_container(Path::new("noext")));
    }

    #[test]
    fn test_extract_flat_zip() {
        let temp = TempDir::new().unwrap();
        let archive = temp.path().join("batch.zip");
        write_zip(
            &archive,
            &[
                ("nota1.xml", b"<NFe/>".as_slice()),
                ("sub/nota2.xml", b"<NFe/>".as_slice()),
                ("readme.txt", b"hi".as_slice()),
            ],
        );

        let dest = temp.path().join("out");
        let files = ArchiveExtractor::new().extract(&archive, &dest).unwrap();

        assert_eq!(files.len(), 3);
        assert!(dest.join("nota1.xml").exists());
        assert!(dest.join("sub/nota2.xml").exists());
    }

    #[test]
    fn test_extract_nested_zip() {
        let temp = TempDir::new().unwrap();
        let inner = zip_bytes(&[("inner.xml", b"<NFe/>".as_slice())]);
        let archive = temp.path().join("outer.zip");
        write_zip(
            &archive,
            &[
                ("outer.xml", b"<NFe/>".as_slice()),
                ("nested.zip", inner.as_slice()),
            ],
        );

        let dest = temp.path().join("out");
        let files = ArchiveExtractor::new().extract(&archive, &dest).unwrap();

        // Container entry replaced by its members.
        let names: Vec<_> = files
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().to_string())
            .collect();
        assert!(names.contains(&"outer.xml".to_string()));
        assert!(names.contains(&"inner.xml".to_string()));
        assert!(!names.contains(&"nested.zip".to_string()));
    }

    #[test]
    fn test_depth_limit_drops_members_silently() {
        let temp = TempDir::new().unwrap();
        // depth 0: level1.zip > depth 1: level2.zip > depth 2: deep.xml
        let level2 = zip_bytes(&[("deep.xml", b"<NFe/>".as_slice())]);
        let level1 = zip_bytes(&[("level2.zip", level2.as_slice())]);
        let archive = temp.path().join("level1.zip");
        std::fs::write(&archive, level1).unwrap();

        let dest = temp.path().join("out");
        let shallow = ArchiveExtractor::new()
            .with_max_depth(1)
            .extract(&archive, &dest)
            .unwrap();
        // level2.zip sits at nesting depth 1 and is dropped, not an error.
        assert!(shallow.is_empty());

        let dest2 = temp.path().join("out2");
        let full = ArchiveExtractor::new()
            .with_max_depth(2)
            .extract(&archive, &dest2)
            .unwrap();
        assert_eq!(full.len(), 1);
        assert!(full[0].ends_with("deep.xml"));
    }

    #[test]
    fn test_unsupported_format() {
        let temp = TempDir::new().unwrap();
        let rar = temp.path().join("batch.rar");
        std::fs::write(&rar, b"not really rar").unwrap();

        let err = ArchiveExtractor::new()
            .extract(&rar, &temp.path().join("out"))
            .unwrap_err();
        assert!(matches!(err, PipelineError::UnsupportedArchive { .. }));
    }

    #[test]
    fn test_corrupt_zip() {
        let temp = TempDir::new().unwrap();
        let bad = temp.path().join("bad.zip");
        std::fs::write(&bad, b"definitely not a zip").unwrap();

        let err = ArchiveExtractor::new()
            .extract(&bad, &temp.path().join("out"))
            .unwrap_err();
        assert!(matches!(err, PipelineError::Extraction { .. }));
    }

    #[test]
    fn test_missing_container() {
        let err = ArchiveExtractor::new()
            .extract(Path::new("/nonexistent/batch.zip"), Path::new("/tmp/out"))
            .unwrap_err();
        assert!(matches!(err, PipelineError::Extraction { .. }));
    }
}
