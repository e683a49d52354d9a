//! Source enumeration for the sender.

use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::TransferError;

/// A regular file scheduled for sending.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceFile {
    /// Where the file lives on this host.
    pub local_path: PathBuf,
    /// Path announced to the receiver (UTF-8, forward slashes).
    pub relative_path: String,
    /// File size at enumeration time.
    pub size: u64,
}

/// Lists the files to send for `root`.
///
/// A regular file yields itself, announced by its file name. A directory is
/// walked depth-first with an explicit worklist; entries of each directory are
/// visited in name order and every relative path starts with the directory's
/// own name (`tree/a.txt`, `tree/sub/b.bin`). Symlinks, special files and
/// names that are not valid UTF-8 are skipped.
pub async fn collect_files(root: &Path) -> Result<Vec<SourceFile>, TransferError> {
    let root = match tokio::fs::canonicalize(root).await {
        Ok(p) => p,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(TransferError::NotFound(root.display().to_string()));
        }
        Err(e) => return Err(e.into()),
    };

    let root_name = root
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| TransferError::InvalidPath(format!("no usable name: {}", root.display())))?
        .to_string();

    let metadata = tokio::fs::metadata(&root).await?;
    if metadata.is_file() {
        return Ok(vec![SourceFile {
            local_path: root,
            relative_path: root_name,
            size: metadata.len(),
        }]);
    }
    if !metadata.is_dir() {
        return Err(TransferError::InvalidPath(format!(
            "not a regular file or directory: {}",
            root.display()
        )));
    }

    let mut files = Vec::new();
    let mut stack = vec![(root, root_name)];

    while let Some((path, relative)) = stack.pop() {
        let metadata = tokio::fs::symlink_metadata(&path).await?;
        let file_type = metadata.file_type();

        if file_type.is_file() {
            files.push(SourceFile {
                local_path: path,
                relative_path: relative,
                size: metadata.len(),
            });
        } else if file_type.is_dir() {
            debug!(dir = %relative, "processing directory");
            let mut children = Vec::new();
            let mut entries = tokio::fs::read_dir(&path).await?;
            while let Some(entry) = entries.next_entry().await? {
                let name = entry.file_name();
                match name.to_str() {
                    Some(name) => children.push((entry.path(), format!("{relative}/{name}"))),
                    None => warn!(path = %entry.path().display(), "skipping non UTF-8 file name"),
                }
            }
            children.sort_by(|a, b| a.1.cmp(&b.1));
            // Reversed so the smallest name is popped first.
            stack.extend(children.into_iter().rev());
        } else {
            warn!(path = %relative, "skipping symlink or special file");
        }
    }

    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn relative_paths(files: &[SourceFile]) -> Vec<&str> {
        files.iter().map(|f| f.relative_path.as_str()).collect()
    }

    #[tokio::test]
    async fn single_file_uses_its_name() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.txt");
        std::fs::write(&path, vec![1u8; 5000]).unwrap();

        let files = collect_files(&path).await.unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].relative_path, "a.txt");
        assert_eq!(files[0].size, 5000);
    }

    #[tokio::test]
    async fn directory_is_depth_first_in_name_order() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("tree");
        std::fs::create_dir_all(root.join("sub/sub2")).unwrap();
        std::fs::create_dir_all(root.join("empty")).unwrap();
        std::fs::write(root.join("a.txt"), b"a").unwrap();
        std::fs::write(root.join("z.txt"), b"z").unwrap();
        std::fs::write(root.join("sub/b.bin"), b"").unwrap();
        std::fs::write(root.join("sub/sub2/c.dat"), b"c").unwrap();

        let files = collect_files(&root).await.unwrap();
        assert_eq!(
            relative_paths(&files),
            vec!["tree/a.txt", "tree/sub/b.bin", "tree/sub/sub2/c.dat", "tree/z.txt"]
        );
        assert_eq!(files[1].size, 0);
    }

    #[tokio::test]
    async fn deep_tree_does_not_recurse() {
        let dir = tempfile::tempdir().unwrap();
        let mut deepest = dir.path().join("deep");
        for i in 0..64 {
            deepest = deepest.join(format!("d{i}"));
        }
        std::fs::create_dir_all(&deepest).unwrap();
        std::fs::write(deepest.join("leaf"), b"leaf").unwrap();

        let files = collect_files(&dir.path().join("deep")).await.unwrap();
        assert_eq!(files.len(), 1);
        assert!(files[0].relative_path.starts_with("deep/d0/d1/"));
        assert!(files[0].relative_path.ends_with("/d63/leaf"));
    }

    #[tokio::test]
    async fn missing_root() {
        let dir = tempfile::tempdir().unwrap();
        let err = collect_files(&dir.path().join("nope")).await.unwrap_err();
        assert!(matches!(err, TransferError::NotFound(_)));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn skips_symlinks() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("tree");
        std::fs::create_dir_all(&root).unwrap();
        std::fs::write(root.join("real.txt"), b"real").unwrap();
        std::os::unix::fs::symlink(root.join("real.txt"), root.join("alias.txt")).unwrap();

        let files = collect_files(&root).await.unwrap();
        assert_eq!(relative_paths(&files), vec!["tree/real.txt"]);
    }
}
