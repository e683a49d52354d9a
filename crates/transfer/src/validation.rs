use std::path::{Component, Path, PathBuf};

use crate::TransferError;

/// Validates that an announced relative path does not escape its base directory.
///
/// Rejects:
/// - Empty paths
/// - Absolute paths (Unix `/` or Windows `C:\`)
/// - Parent directory traversal (`..`)
/// - Windows prefix components (`C:`, `\\server`)
pub fn validate_upload_path(file_path: &str) -> Result<(), TransferError> {
    if file_path.is_empty() {
        return Err(TransferError::InvalidPath("empty path".into()));
    }

    let path = Path::new(file_path);

    if path.is_absolute() {
        return Err(TransferError::InvalidPath(format!(
            "absolute path not allowed: {file_path}"
        )));
    }

    let mut has_name = false;
    for component in path.components() {
        match component {
            Component::ParentDir => {
                return Err(TransferError::InvalidPath(format!(
                    "parent directory traversal not allowed: {file_path}"
                )));
            }
            Component::Prefix(_) => {
                return Err(TransferError::InvalidPath(format!(
                    "path prefix not allowed: {file_path}"
                )));
            }
            Component::RootDir => {
                return Err(TransferError::InvalidPath(format!(
                    "absolute path not allowed: {file_path}"
                )));
            }
            Component::Normal(_) => has_name = true,
            Component::CurDir => {}
        }
    }

    if !has_name {
        return Err(TransferError::InvalidPath(format!(
            "path names no file: {file_path}"
        )));
    }

    Ok(())
}

/// Resolves where an announced file should be written under `output_dir`.
///
/// Validates the relative path, then walks its parent directories one
/// component at a time from the canonical output directory. Existing
/// components (including symlinks) are checked to stay inside the output
/// directory before anything below them is created, so a rejected path
/// leaves nothing behind outside it.
pub async fn resolve_destination(
    output_dir: &Path,
    relative_path: &str,
) -> Result<PathBuf, TransferError> {
    validate_upload_path(relative_path)?;

    tokio::fs::create_dir_all(output_dir).await?;
    let root = tokio::fs::canonicalize(output_dir).await?;

    let relative = Path::new(relative_path);
    let file_name = relative
        .file_name()
        .ok_or_else(|| TransferError::InvalidPath(format!("no file name: {relative_path}")))?;

    let mut current = root.clone();
    if let Some(parent) = relative.parent() {
        for component in parent.components() {
            let Component::Normal(name) = component else {
                continue;
            };
            current = enter_dir(&root, current.join(name), relative_path).await?;
        }
    }

    let destination = current.join(file_name);
    if let Ok(meta) = tokio::fs::symlink_metadata(&destination).await {
        if meta.file_type().is_symlink() {
            return Err(TransferError::InvalidPath(format!(
                "destination is a symlink: {relative_path}"
            )));
        }
    }
    Ok(destination)
}

/// Returns the canonical form of directory `next`, creating it if missing.
async fn enter_dir(
    root: &Path,
    next: PathBuf,
    relative_path: &str,
) -> Result<PathBuf, TransferError> {
    loop {
        let meta = match tokio::fs::symlink_metadata(&next).await {
            Ok(meta) => meta,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                match tokio::fs::create_dir(&next).await {
                    Ok(()) => return Ok(next),
                    // Another session created it first; inspect what is there now.
                    Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => continue,
                    Err(e) => return Err(e.into()),
                }
            }
            Err(e) => return Err(e.into()),
        };

        if meta.is_dir() {
            return Ok(next);
        }
        if !meta.file_type().is_symlink() {
            return Err(not_a_directory(&next, relative_path));
        }

        let target = tokio::fs::canonicalize(&next).await?;
        if !target.starts_with(root) {
            return Err(TransferError::InvalidPath(format!(
                "resolves outside output directory: {relative_path}"
            )));
        }
        if !tokio::fs::metadata(&target).await?.is_dir() {
            return Err(not_a_directory(&next, relative_path));
        }
        return Ok(target);
    }
}

fn not_a_directory(path: &Path, relative_path: &str) -> TransferError {
    TransferError::InvalidPath(format!(
        "{} is not a directory: {relative_path}",
        path.display()
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_empty_path() {
        assert!(validate_upload_path("").is_err());
    }

    #[test]
    fn rejects_parent_dir_traversal() {
        assert!(validate_upload_path("../../../etc/passwd").is_err());
    }

    #[test]
    fn rejects_nested_parent_dir_traversal() {
        assert!(validate_upload_path("sub/../../../escape").is_err());
    }

    #[test]
    fn rejects_absolute_unix_path() {
        assert!(validate_upload_path("/tmp/malicious").is_err());
    }

    #[test]
    fn rejects_current_dir_only() {
        assert!(validate_upload_path(".").is_err());
        assert!(validate_upload_path("./").is_err());
    }

    #[test]
    fn windows_style_path() {
        let result = validate_upload_path("C:\\Windows\\evil");
        // On Unix this is a single (odd but harmless) file name.
        #[cfg(windows)]
        assert!(result.is_err());
        #[cfg(not(windows))]
        assert!(result.is_ok());
    }

    #[test]
    fn accepts_simple_filename() {
        assert!(validate_upload_path("a.txt").is_ok());
    }

    #[test]
    fn accepts_subdirectory_path() {
        assert!(validate_upload_path("tree/sub/sub2/c.dat").is_ok());
    }

    #[test]
    fn accepts_dotfile() {
        assert!(validate_upload_path(".config/settings.toml").is_ok());
    }

    #[tokio::test]
    async fn resolve_creates_parents() {
        let out = tempfile::tempdir().unwrap();
        let dest = resolve_destination(out.path(), "tree/sub/b.bin").await.unwrap();

        assert!(out.path().join("tree/sub").is_dir());
        assert_eq!(dest.file_name().unwrap(), "b.bin");
        assert!(dest.starts_with(std::fs::canonicalize(out.path()).unwrap()));
    }

    #[tokio::test]
    async fn resolve_rejects_traversal() {
        let out = tempfile::tempdir().unwrap();
        let err = resolve_destination(out.path(), "../escape.txt")
            .await
            .unwrap_err();
        assert!(matches!(err, TransferError::InvalidPath(_)));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn resolve_rejects_symlink_escape() {
        let out = tempfile::tempdir().unwrap();
        let elsewhere = tempfile::tempdir().unwrap();
        std::os::unix::fs::symlink(elsewhere.path(), out.path().join("link")).unwrap();

        let err = resolve_destination(out.path(), "link/evil.txt")
            .await
            .unwrap_err();
        assert!(matches!(err, TransferError::InvalidPath(_)));
        assert!(!elsewhere.path().join("evil.txt").exists());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn resolve_creates_nothing_behind_escaping_symlink() {
        let out = tempfile::tempdir().unwrap();
        let elsewhere = tempfile::tempdir().unwrap();
        std::os::unix::fs::symlink(elsewhere.path(), out.path().join("link")).unwrap();

        let err = resolve_destination(out.path(), "link/planted/deeper/evil.txt")
            .await
            .unwrap_err();
        assert!(matches!(err, TransferError::InvalidPath(_)));
        assert!(!elsewhere.path().join("planted").exists());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn resolve_follows_symlink_inside_output() {
        let out = tempfile::tempdir().unwrap();
        std::fs::create_dir(out.path().join("real")).unwrap();
        std::os::unix::fs::symlink(out.path().join("real"), out.path().join("alias")).unwrap();

        let dest = resolve_destination(out.path(), "alias/new/a.txt").await.unwrap();
        let root = std::fs::canonicalize(out.path()).unwrap();
        assert_eq!(dest, root.join("real/new/a.txt"));
        assert!(out.path().join("real/new").is_dir());
    }

    #[tokio::test]
    async fn resolve_rejects_file_as_directory() {
        let out = tempfile::tempdir().unwrap();
        std::fs::write(out.path().join("a.txt"), b"x").unwrap();

        let err = resolve_destination(out.path(), "a.txt/b.txt").await.unwrap_err();
        assert!(matches!(err, TransferError::InvalidPath(_)));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn resolve_rejects_symlinked_destination() {
        let out = tempfile::tempdir().unwrap();
        let elsewhere = tempfile::tempdir().unwrap();
        let target = elsewhere.path().join("victim.txt");
        std::fs::write(&target, b"keep").unwrap();
        std::os::unix::fs::symlink(&target, out.path().join("a.txt")).unwrap();

        let err = resolve_destination(out.path(), "a.txt").await.unwrap_err();
        assert!(matches!(err, TransferError::InvalidPath(_)));
        assert_eq!(std::fs::read(&target).unwrap(), b"keep");
    }
}
