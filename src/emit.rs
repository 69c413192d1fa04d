//! Output emission.
//!
//! The flat image is written verbatim with no header. File output goes through a
//! temporary file in the destination directory that is renamed into place, so a
//! failed write never leaves a partial file at the target path.

use crate::error::{Error, Result};

use std::io::Write;
use std::path::Path;

use tempfile::NamedTempFile;

/// Write `image` to any sink.
pub fn emit<W: Write>(image: &[u8], sink: &mut W) -> Result<()> {
    sink.write_all(image)
        .and_then(|()| sink.flush())
        .map_err(|e| Error::OutputWriteFailed(e.to_string()))
}

/// Atomically replace `path` with `image`.
pub fn write_output<P: AsRef<Path>>(path: P, image: &[u8]) -> Result<()> {
    let path = path.as_ref();
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };

    let mut file = NamedTempFile::new_in(dir)
        .map_err(|e| Error::OutputCreationFailed(format!("{}: {}", dir.display(), e)))?;

    emit(image, &mut file)?;

    // Dropping the temporary on any error above removes it.
    file.persist(path)
        .map_err(|e| Error::OutputCreationFailed(format!("{}: {}", path.display(), e.error)))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_emit_to_memory() {
        let image = vec![0x90u8; 0x1000];
        let mut sink = Vec::new();
        emit(&image, &mut sink).unwrap();
        assert_eq!(sink, image);
    }

    #[test]
    fn test_write_output_replaces_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("output.bin");
        std::fs::write(&path, b"stale").unwrap();

        write_output(&path, &[1, 2, 3, 4]).unwrap();

        assert_eq!(std::fs::read(&path).unwrap(), vec![1, 2, 3, 4]);
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[test]
    fn test_write_output_missing_directory() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing").join("output.bin");

        assert!(matches!(
            write_output(&path, &[0; 16]),
            Err(Error::OutputCreationFailed(_))
        ));
        assert!(!path.exists());
    }
}
