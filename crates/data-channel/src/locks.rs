//! Path-keyed lock table shared by all receiver sessions.
//!
//! Two connections announcing the same destination path are serialized: the
//! second one waits until the first finishes (or aborts) its file.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use tokio::sync::OwnedMutexGuard;

type Table = Mutex<HashMap<PathBuf, Arc<tokio::sync::Mutex<()>>>>;

/// Cloneable handle to the lock table.
#[derive(Clone, Default)]
pub struct PathLocks {
    table: Arc<Table>,
}

/// Exclusive right to write one destination path.
///
/// Dropping the lease releases the path and removes its table entry once no
/// other session is waiting on it.
pub struct PathLease {
    path: PathBuf,
    guard: Option<OwnedMutexGuard<()>>,
    table: Arc<Table>,
}

impl PathLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Waits until `path` is free and takes it.
    pub async fn acquire(&self, path: &Path) -> PathLease {
        let entry = {
            let mut table = self.table.lock().unwrap_or_else(|e| e.into_inner());
            Arc::clone(table.entry(path.to_path_buf()).or_default())
        };
        let guard = entry.lock_owned().await;
        PathLease {
            path: path.to_path_buf(),
            guard: Some(guard),
            table: Arc::clone(&self.table),
        }
    }

    /// Number of paths currently leased or awaited.
    pub fn len(&self) -> usize {
        self.table.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl PathLease {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for PathLease {
    fn drop(&mut self) {
        // Release the mutex before inspecting the entry's reference count.
        drop(self.guard.take());
        let mut table = self.table.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(entry) = table.get(&self.path) {
            // Only the table itself still references an idle entry.
            if Arc::strong_count(entry) == 1 {
                table.remove(&self.path);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn entry_removed_after_release() {
        let locks = PathLocks::new();
        let lease = locks.acquire(Path::new("/out/a.txt")).await;
        assert_eq!(locks.len(), 1);
        assert_eq!(lease.path(), Path::new("/out/a.txt"));
        drop(lease);
        assert!(locks.is_empty());
    }

    #[tokio::test]
    async fn distinct_paths_do_not_block() {
        let locks = PathLocks::new();
        let _a = locks.acquire(Path::new("/out/a.txt")).await;
        let b = tokio::time::timeout(
            Duration::from_millis(200),
            locks.acquire(Path::new("/out/b.txt")),
        )
        .await;
        assert!(b.is_ok());
        assert_eq!(locks.len(), 2);
    }

    #[tokio::test]
    async fn same_path_is_serialized() {
        let locks = PathLocks::new();
        let first = locks.acquire(Path::new("/out/a.txt")).await;

        let waiter = {
            let locks = locks.clone();
            tokio::spawn(async move {
                let _second = locks.acquire(Path::new("/out/a.txt")).await;
            })
        };

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!waiter.is_finished());

        drop(first);
        tokio::time::timeout(Duration::from_secs(5), waiter)
            .await
            .unwrap()
            .unwrap();
        assert!(locks.is_empty());
    }
}
