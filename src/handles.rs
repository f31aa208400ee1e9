use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use anyhow::Result;
use parking_lot::{Mutex, RwLock};
use rand::Rng;
use tokio::sync::watch;

use crate::admission::WorkbookPermit;
use crate::errors::invalid_handle;
use crate::workbook::Workbook;

const HANDLE_ID_ALPHABET: &[u8] = b"23456789abcdefghijkmnpqrstuvwxyz";
const HANDLE_ID_LEN: usize = 16;

fn generate_handle_id() -> String {
    let mut rng = rand::thread_rng();
    (0..HANDLE_ID_LEN)
        .map(|_| HANDLE_ID_ALPHABET[rng.gen_range(0..HANDLE_ID_ALPHABET.len())] as char)
        .collect()
}

/// One open workbook: an async RW lock guarding the parsed `Workbook`, a
/// write-version counter bumped on every successful write, and the idle
/// clock the evictor reads. Holds the admission workbook permit for its
/// entire lifetime so closing or evicting a handle frees that slot.
pub struct Handle {
    id: String,
    path: PathBuf,
    workbook: tokio::sync::RwLock<Workbook>,
    write_version: AtomicU64,
    opened_at: Instant,
    last_used: Mutex<Instant>,
    _permit: WorkbookPermit,
}

impl Handle {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn write_version(&self) -> u64 {
        self.write_version.load(Ordering::SeqCst)
    }

    pub fn opened_at(&self) -> Instant {
        self.opened_at
    }

    fn touch(&self) {
        *self.last_used.lock() = Instant::now();
    }

    fn idle_for(&self, now: Instant) -> Duration {
        now.saturating_duration_since(*self.last_used.lock())
    }

    pub async fn with_read<T>(&self, f: impl FnOnce(&Workbook) -> Result<T>) -> Result<T> {
        self.touch();
        let guard = self.workbook.read().await;
        f(&guard)
    }

    pub async fn with_write<T>(&self, f: impl FnOnce(&mut Workbook) -> Result<T>) -> Result<T> {
        self.touch();
        let mut guard = self.workbook.write().await;
        let result = f(&mut guard)?;
        self.write_version.fetch_add(1, Ordering::SeqCst);
        Ok(result)
    }
}

/// Keyed table of open workbooks plus a background idle evictor. Generalizes
/// the app cache's RW-locked map into per-handle read/write exclusion with
/// time-to-live eviction instead of LRU-capacity eviction; capacity itself is
/// enforced upstream by the admission controller's workbook semaphore.
pub struct HandleManager {
    table: RwLock<HashMap<String, Arc<Handle>>>,
    by_path: RwLock<HashMap<PathBuf, String>>,
    idle_ttl: Duration,
    shutdown: watch::Sender<bool>,
}

impl HandleManager {
    pub fn new(idle_ttl: Duration) -> Arc<Self> {
        let (shutdown, _) = watch::channel(false);
        Arc::new(Self {
            table: RwLock::new(HashMap::new()),
            by_path: RwLock::new(HashMap::new()),
            idle_ttl,
            shutdown,
        })
    }

    /// Starts the background eviction loop. The returned task exits once
    /// `shutdown` is called; callers should hold onto the `JoinHandle` only
    /// if they want to await a clean stop.
    pub fn spawn_evictor(self: &Arc<Self>, cleanup_period: Duration) -> tokio::task::JoinHandle<()> {
        let manager = self.clone();
        let mut shutdown_rx = manager.shutdown.subscribe();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(cleanup_period);
            loop {
                tokio::select! {
                    _ = ticker.tick() => manager.evict_idle(),
                    _ = shutdown_rx.changed() => break,
                }
            }
        })
    }

    pub fn shutdown(&self) {
        let _ = self.shutdown.send(true);
        self.close_all();
    }

    fn evict_idle(&self) {
        let now = Instant::now();
        let idle_ttl = self.idle_ttl;
        let expired: Vec<String> = self
            .table
            .read()
            .iter()
            .filter(|(_, handle)| handle.idle_for(now) >= idle_ttl)
            .map(|(id, _)| id.clone())
            .collect();
        for id in expired {
            tracing::debug!(handle_id = %id, "evicting idle workbook handle");
            self.remove(&id);
        }
    }

    /// Returns the existing handle for `path` if one is already open,
    /// bumping its idle clock; otherwise opens it on a blocking thread
    /// (umya's reader is synchronous) and registers a new handle, consuming
    /// `permit` for the handle's lifetime.
    pub async fn open_or_reuse(self: &Arc<Self>, path: PathBuf, permit: WorkbookPermit) -> Result<Arc<Handle>> {
        if let Some(existing) = self.find_by_path(&path) {
            existing.touch();
            return Ok(existing);
        }

        let open_path = path.clone();
        let workbook = tokio::task::spawn_blocking(move || Workbook::open(&open_path)).await??;

        let id = generate_handle_id();
        let now = Instant::now();
        let handle = Arc::new(Handle {
            id: id.clone(),
            path: path.clone(),
            workbook: tokio::sync::RwLock::new(workbook),
            write_version: AtomicU64::new(0),
            opened_at: now,
            last_used: Mutex::new(now),
            _permit: permit,
        });

        // Re-check under the write lock: another task may have opened the
        // same path while we were parsing on the blocking pool.
        let mut by_path = self.by_path.write();
        if let Some(existing_id) = by_path.get(&path) {
            if let Some(existing) = self.table.read().get(existing_id).cloned() {
                existing.touch();
                return Ok(existing);
            }
        }
        self.table.write().insert(id.clone(), handle.clone());
        by_path.insert(path, id);
        Ok(handle)
    }

    pub fn find_by_path(&self, path: &Path) -> Option<Arc<Handle>> {
        let id = self.by_path.read().get(path).cloned()?;
        self.table.read().get(&id).cloned()
    }

    pub fn get(&self, id: &str) -> Result<Arc<Handle>> {
        self.table
            .read()
            .get(id)
            .cloned()
            .ok_or_else(|| invalid_handle(format!("handle '{id}' is not open")).into())
    }

    pub fn close(&self, id: &str) -> Result<()> {
        let removed = self.table.write().remove(id);
        match removed {
            Some(handle) => {
                self.by_path.write().remove(&handle.path);
                Ok(())
            }
            None => Err(invalid_handle(format!("handle '{id}' is not open")).into()),
        }
    }

    fn remove(&self, id: &str) {
        if let Some(handle) = self.table.write().remove(id) {
            self.by_path.write().remove(&handle.path);
        }
    }

    fn close_all(&self) {
        let ids: Vec<String> = self.table.read().keys().cloned().collect();
        for id in ids {
            self.remove(&id);
        }
    }

    #[cfg(test)]
    pub fn open_count(&self) -> usize {
        self.table.read().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration as StdDuration;

    fn fixture_path(name: &str) -> PathBuf {
        let mut book = umya_spreadsheet::new_file();
        {
            let sheet = book.get_sheet_by_name_mut("Sheet1").unwrap();
            sheet.get_cell_mut("A1").set_value("x");
        }
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(name);
        umya_spreadsheet::writer::xlsx::write(&book, &path).unwrap();
        std::mem::forget(dir);
        path
    }

    async fn dummy_permit() -> WorkbookPermit {
        use crate::admission::AdmissionController;
        // Leaked on purpose: the controller only needs to outlive this one
        // `acquire_workbook` call in each test.
        let controller: &'static AdmissionController =
            Box::leak(Box::new(AdmissionController::new(1, 1, StdDuration::from_millis(50))));
        controller.acquire_workbook().await.unwrap()
    }

    #[tokio::test]
    async fn opens_and_reuses_by_path() {
        let manager = HandleManager::new(StdDuration::from_secs(600));
        let path = fixture_path("a.xlsx");

        let first = manager.open_or_reuse(path.clone(), dummy_permit().await).await.unwrap();
        let second = manager.open_or_reuse(path.clone(), dummy_permit().await).await.unwrap();
        assert_eq!(first.id(), second.id());
        assert_eq!(manager.open_count(), 1);
    }

    #[tokio::test]
    async fn with_write_bumps_version() {
        let manager = HandleManager::new(StdDuration::from_secs(600));
        let path = fixture_path("b.xlsx");
        let handle = manager.open_or_reuse(path, dummy_permit().await).await.unwrap();
        assert_eq!(handle.write_version(), 0);
        handle
            .with_write(|wb| {
                wb.set_cell_value("Sheet1", 2, 1, "y")?;
                Ok(())
            })
            .await
            .unwrap();
        assert_eq!(handle.write_version(), 1);
    }

    #[tokio::test]
    async fn close_removes_handle() {
        let manager = HandleManager::new(StdDuration::from_secs(600));
        let path = fixture_path("c.xlsx");
        let handle = manager.open_or_reuse(path, dummy_permit().await).await.unwrap();
        manager.close(handle.id()).unwrap();
        assert!(manager.get(handle.id()).is_err());
    }

    #[tokio::test]
    async fn evict_idle_closes_stale_handles() {
        let manager = HandleManager::new(StdDuration::from_millis(10));
        let path = fixture_path("d.xlsx");
        let handle = manager.open_or_reuse(path, dummy_permit().await).await.unwrap();
        tokio::time::sleep(StdDuration::from_millis(30)).await;
        manager.evict_idle();
        assert!(manager.get(handle.id()).is_err());
    }

    #[tokio::test]
    async fn shutdown_closes_all_handles() {
        let manager = HandleManager::new(StdDuration::from_secs(600));
        manager.open_or_reuse(fixture_path("e.xlsx"), dummy_permit().await).await.unwrap();
        manager.open_or_reuse(fixture_path("f.xlsx"), dummy_permit().await).await.unwrap();
        manager.shutdown();
        assert_eq!(manager.open_count(), 0);
    }
}
