//! Private temporary directories and files whose removal is spooled.

use crate::error::{CoreError, Result};
use crate::spool::Spool;
use std::path::{Path, PathBuf};

/// Prefix of every temporary directory created by Capsula.
pub const TEMP_PREFIX: &str = "capsula-";

/// Create a private (mode 0750) temporary directory and spool its removal.
pub fn private_tempdir(spool: &Spool) -> Result<PathBuf> {
    let dir = tempfile::Builder::new().prefix(TEMP_PREFIX).tempdir()?;
    set_mode(dir.path(), 0o750)?;
    let path = dir.path().to_path_buf();
    tracing::trace!(path = %path.display(), "Created temporary directory");
    spool.register(dir, |dir| dir.close().map_err(CoreError::from));
    Ok(path)
}

/// Write `contents` to `path` with the given mode and spool its deletion.
///
/// The deletion is registered before writing so that a partially written
/// file is cleaned up as well.
pub async fn write_spooled(spool: &Spool, path: PathBuf, contents: &str, mode: u32) -> Result<PathBuf> {
    spool.register_async(path.clone(), |path: PathBuf| async move {
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    });
    tokio::fs::write(&path, contents).await?;
    set_mode(&path, mode)?;
    tracing::trace!(path = %path.display(), bytes = contents.len(), "Wrote temporary file");
    Ok(path)
}

#[cfg(unix)]
fn set_mode(path: &Path, mode: u32) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode))?;
    Ok(())
}

#[cfg(not(unix))]
fn set_mode(_path: &Path, _mode: u32) -> Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_spooled_files_are_removed_in_reverse_order() {
        let spool = Spool::new();
        let dir = private_tempdir(&spool).unwrap();
        let file = write_spooled(&spool, dir.join("Dockerfile"), "FROM scratch\n", 0o640)
            .await
            .unwrap();

        assert!(dir.file_name().unwrap().to_string_lossy().starts_with(TEMP_PREFIX));
        assert_eq!(tokio::fs::read_to_string(&file).await.unwrap(), "FROM scratch\n");
        assert_eq!(spool.len(), 2);

        spool.release_all().await.unwrap();
        assert!(!file.exists());
        assert!(!dir.exists());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_modes_are_applied() {
        use std::os::unix::fs::PermissionsExt;

        let spool = Spool::new();
        let dir = private_tempdir(&spool).unwrap();
        let script = write_spooled(&spool, dir.join("run.bash"), "#!/bin/bash\n", 0o750)
            .await
            .unwrap();

        let dir_mode = std::fs::metadata(&dir).unwrap().permissions().mode() & 0o777;
        let file_mode = std::fs::metadata(&script).unwrap().permissions().mode() & 0o777;
        assert_eq!(dir_mode, 0o750);
        assert_eq!(file_mode, 0o750);

        spool.release_all().await.unwrap();
    }

    #[tokio::test]
    async fn test_file_removed_externally_is_not_an_error() {
        let spool = Spool::new();
        let dir = private_tempdir(&spool).unwrap();
        let file = write_spooled(&spool, dir.join("gone"), "x", 0o600).await.unwrap();
        std::fs::remove_file(&file).unwrap();

        spool.release_all().await.unwrap();
        assert!(!dir.exists());
    }
}
