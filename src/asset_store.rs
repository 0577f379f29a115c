use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::cell::{Cell, RefCell};
use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::PathBuf;
use std::rc::Rc;
use std::sync::Arc;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreNamespace {
    Model,
    Image,
}

impl StoreNamespace {
    pub fn dir(self) -> &'static str {
        match self {
            StoreNamespace::Model => "models",
            StoreNamespace::Image => "images",
        }
    }
}

/// One cached asset. `blob_url` is derived from the namespace and uuid at
/// read time and is never written to disk; only the origin url and blob data
/// persist.
#[derive(Debug, Clone)]
pub struct StoreRecord {
    pub uuid: Uuid,
    pub origin_url: String,
    pub data: Arc<Vec<u8>>,
    pub blob_url: String,
}

impl StoreRecord {
    fn placeholder(uuid: Uuid, origin_url: &str, namespace: StoreNamespace) -> Self {
        Self {
            uuid,
            origin_url: origin_url.to_string(),
            data: Arc::new(Vec::new()),
            blob_url: blob_url(namespace, uuid),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

pub fn blob_url(namespace: StoreNamespace, uuid: Uuid) -> String {
    format!("blob:{}/{uuid}", namespace.dir())
}

pub fn is_blob_url(url: &str) -> bool {
    url.starts_with("blob:")
}

pub fn parse_blob_url(url: &str) -> Option<(StoreNamespace, Uuid)> {
    let rest = url.strip_prefix("blob:")?;
    let (dir, id) = rest.split_once('/')?;
    let namespace = match dir {
        "models" => StoreNamespace::Model,
        "images" => StoreNamespace::Image,
        _ => return None,
    };
    Uuid::parse_str(id).ok().map(|uuid| (namespace, uuid))
}

#[derive(Debug, Clone, Copy)]
pub struct StoreUsage {
    pub used: u64,
    pub total: u64,
}

impl StoreUsage {
    pub fn remaining(&self) -> u64 {
        self.total.saturating_sub(self.used)
    }
}

pub struct SetStoreItem {
    pub uuid: Uuid,
    pub path: String,
    pub namespace: StoreNamespace,
}

pub struct GetStoreItem {
    pub uuid: Uuid,
    pub path: String,
    pub namespace: StoreNamespace,
    pub need_await_fetch: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct IndexEntry {
    origin_url: String,
    len: u64,
}

#[derive(Default)]
struct NamespaceState {
    records: HashMap<Uuid, StoreRecord>,
    index: HashMap<Uuid, IndexEntry>,
}

struct StoreInner {
    root: PathBuf,
    budget_bytes: u64,
    http: reqwest::Client,
    models: RefCell<NamespaceState>,
    images: RefCell<NamespaceState>,
    pending: RefCell<HashSet<(StoreNamespace, Uuid)>>,
    disk_disabled: Cell<bool>,
}

/// Durable, namespaced blob cache keyed by logical id and backed by remote
/// fetch. Cheap to clone; all clones share one state. Background population
/// uses `tokio::task::spawn_local`, so the handle must live inside a
/// `LocalSet` when `need_await_fetch` is false.
#[derive(Clone)]
pub struct PersistentAssetStore {
    inner: Rc<StoreInner>,
}

impl PersistentAssetStore {
    pub fn open(root: impl Into<PathBuf>, budget_bytes: u64) -> Result<Self> {
        let root = root.into();
        let inner = StoreInner {
            root: root.clone(),
            budget_bytes,
            http: reqwest::Client::new(),
            models: RefCell::new(NamespaceState::default()),
            images: RefCell::new(NamespaceState::default()),
            pending: RefCell::new(HashSet::new()),
            disk_disabled: Cell::new(false),
        };
        let store = Self { inner: Rc::new(inner) };
        for namespace in [StoreNamespace::Model, StoreNamespace::Image] {
            let dir = store.namespace_dir(namespace);
            fs::create_dir_all(&dir)
                .with_context(|| format!("Failed to create store dir {}", dir.display()))?;
            store.load_index(namespace);
        }
        Ok(store)
    }

    pub fn usage(&self) -> StoreUsage {
        let mut used = 0;
        for namespace in [StoreNamespace::Model, StoreNamespace::Image] {
            used += self
                .state(namespace)
                .borrow()
                .index
                .values()
                .map(|entry| entry.len)
                .sum::<u64>();
        }
        StoreUsage { used, total: self.inner.budget_bytes }
    }

    /// Fetches `path`, persists the blob when the budget allows, and always
    /// returns a usable record. Quota and network failures degrade instead of
    /// propagating.
    pub async fn set_store_item(&self, req: SetStoreItem) -> StoreRecord {
        let SetStoreItem { uuid, path, namespace } = req;
        let data = match self.fetch_bytes(&path).await {
            Ok(bytes) => Arc::new(bytes),
            Err(err) => {
                log::warn!("[store] fetch failed for '{path}' ({uuid}): {err:?}");
                return StoreRecord::placeholder(uuid, &path, namespace);
            }
        };
        let record = StoreRecord {
            uuid,
            origin_url: path.clone(),
            data: data.clone(),
            blob_url: blob_url(namespace, uuid),
        };
        self.state(namespace).borrow_mut().records.insert(uuid, record.clone());
        self.persist(namespace, uuid, &path, &data);
        record
    }

    /// Cache hit requires the stored origin url to equal `path`; anything else
    /// is stale. With `need_await_fetch` the caller blocks on a fresh fetch,
    /// otherwise an empty placeholder comes back immediately and the cache is
    /// repopulated in the background for next time.
    pub async fn get_store_item(&self, req: GetStoreItem) -> StoreRecord {
        let GetStoreItem { uuid, path, namespace, need_await_fetch } = req;
        if let Some(record) = self.lookup(namespace, uuid, Some(&path)).await {
            return record;
        }
        if need_await_fetch {
            return self.set_store_item(SetStoreItem { uuid, path, namespace }).await;
        }
        let key = (namespace, uuid);
        if self.inner.pending.borrow_mut().insert(key) {
            let store = self.clone();
            let background_path = path.clone();
            tokio::task::spawn_local(async move {
                store
                    .set_store_item(SetStoreItem {
                        uuid,
                        path: background_path,
                        namespace,
                    })
                    .await;
                store.inner.pending.borrow_mut().remove(&key);
            });
        }
        StoreRecord::placeholder(uuid, &path, namespace)
    }

    /// Resolves a record by id alone, never touching the network. Used for
    /// blob-url sources whose bytes are already local.
    pub async fn read_local(
        &self,
        namespace: StoreNamespace,
        uuid: Uuid,
    ) -> Option<StoreRecord> {
        self.lookup(namespace, uuid, None).await
    }

    async fn lookup(
        &self,
        namespace: StoreNamespace,
        uuid: Uuid,
        expected_origin: Option<&str>,
    ) -> Option<StoreRecord> {
        let (cached, indexed_origin) = {
            let state = self.state(namespace).borrow();
            let cached = state.records.get(&uuid).cloned();
            let indexed = state.index.get(&uuid).map(|entry| entry.origin_url.clone());
            (cached, indexed)
        };
        if let Some(record) = cached {
            if expected_origin.map_or(true, |origin| record.origin_url == origin) {
                return Some(record);
            }
        }
        let origin = indexed_origin?;
        if let Some(expected) = expected_origin {
            if origin != expected {
                return None;
            }
        }
        match tokio::fs::read(self.blob_path(namespace, uuid)).await {
            Ok(bytes) => {
                let record = StoreRecord {
                    uuid,
                    origin_url: origin,
                    data: Arc::new(bytes),
                    blob_url: blob_url(namespace, uuid),
                };
                self.state(namespace).borrow_mut().records.insert(uuid, record.clone());
                Some(record)
            }
            Err(err) => {
                log::warn!("[store] blob read failed for {uuid}: {err}");
                None
            }
        }
    }

    async fn fetch_bytes(&self, path: &str) -> Result<Vec<u8>> {
        if path.starts_with("http://") || path.starts_with("https://") {
            let response = self
                .inner
                .http
                .get(path)
                .send()
                .await
                .with_context(|| format!("Request to '{path}' failed"))?
                .error_for_status()
                .with_context(|| format!("Request to '{path}' returned an error status"))?;
            let bytes = response
                .bytes()
                .await
                .with_context(|| format!("Reading body of '{path}' failed"))?;
            Ok(bytes.to_vec())
        } else {
            tokio::fs::read(path)
                .await
                .with_context(|| format!("Failed to read local asset '{path}'"))
        }
    }

    fn persist(&self, namespace: StoreNamespace, uuid: Uuid, origin: &str, data: &Arc<Vec<u8>>) {
        if self.inner.disk_disabled.get() {
            return;
        }
        let usage = self.usage();
        let replaced = self
            .state(namespace)
            .borrow()
            .index
            .get(&uuid)
            .map(|entry| entry.len)
            .unwrap_or(0);
        let projected = usage.used - replaced + data.len() as u64;
        if projected > self.inner.budget_bytes {
            log::warn!(
                "[store] quota exceeded writing {uuid}: used {} / total {} / remaining {} bytes; \
                 keeping record in memory only for this session",
                usage.used,
                usage.total,
                usage.remaining()
            );
            self.inner.disk_disabled.set(true);
            return;
        }
        let path = self.blob_path(namespace, uuid);
        if let Err(err) = fs::write(&path, data.as_slice()) {
            log::warn!(
                "[store] blob write failed at {} ({err}); disabling disk cache for this session",
                path.display()
            );
            self.inner.disk_disabled.set(true);
            return;
        }
        self.state(namespace).borrow_mut().index.insert(
            uuid,
            IndexEntry { origin_url: origin.to_string(), len: data.len() as u64 },
        );
        self.write_index(namespace);
    }

    fn load_index(&self, namespace: StoreNamespace) {
        let path = self.index_path(namespace);
        let raw = match fs::read_to_string(&path) {
            Ok(raw) => raw,
            Err(_) => return,
        };
        match serde_json::from_str::<HashMap<Uuid, IndexEntry>>(&raw) {
            Ok(index) => self.state(namespace).borrow_mut().index = index,
            Err(err) => log::warn!(
                "[store] discarding unreadable index at {}: {err}",
                path.display()
            ),
        }
    }

    fn write_index(&self, namespace: StoreNamespace) {
        let path = self.index_path(namespace);
        let serialized = match serde_json::to_string_pretty(&self.state(namespace).borrow().index) {
            Ok(serialized) => serialized,
            Err(err) => {
                log::warn!("[store] index serialization failed: {err}");
                return;
            }
        };
        if let Err(err) = fs::write(&path, serialized) {
            log::warn!("[store] index write failed at {}: {err}", path.display());
            self.inner.disk_disabled.set(true);
        }
    }

    fn state(&self, namespace: StoreNamespace) -> &RefCell<NamespaceState> {
        match namespace {
            StoreNamespace::Model => &self.inner.models,
            StoreNamespace::Image => &self.inner.images,
        }
    }

    fn namespace_dir(&self, namespace: StoreNamespace) -> PathBuf {
        self.inner.root.join(namespace.dir())
    }

    fn blob_path(&self, namespace: StoreNamespace, uuid: Uuid) -> PathBuf {
        self.namespace_dir(namespace).join(format!("{uuid}.blob"))
    }

    fn index_path(&self, namespace: StoreNamespace) -> PathBuf {
        self.namespace_dir(namespace).join("index.json")
    }

    /// Seeds an in-memory record directly, as when the editor imports a file
    /// the user dropped in. Persists under the same budget rules.
    pub fn seed(&self, namespace: StoreNamespace, uuid: Uuid, origin: &str, bytes: Vec<u8>) -> StoreRecord {
        let data = Arc::new(bytes);
        let record = StoreRecord {
            uuid,
            origin_url: origin.to_string(),
            data: data.clone(),
            blob_url: blob_url(namespace, uuid),
        };
        self.state(namespace).borrow_mut().records.insert(uuid, record.clone());
        self.persist(namespace, uuid, origin, &data);
        record
    }

}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;
    use tempfile::tempdir;

    fn write_source(dir: &Path, name: &str, contents: &[u8]) -> String {
        let path = dir.join(name);
        fs::write(&path, contents).expect("source file written");
        path.to_string_lossy().into_owned()
    }

    #[tokio::test(flavor = "current_thread")]
    async fn stale_origin_triggers_refetch_and_overwrite() {
        let dir = tempdir().expect("tempdir");
        let store = PersistentAssetStore::open(dir.path().join("cache"), 1 << 20).expect("store");
        let uuid = Uuid::new_v4();
        let first = write_source(dir.path(), "a.bin", b"first");
        let second = write_source(dir.path(), "b.bin", b"second");

        let record = store
            .get_store_item(GetStoreItem {
                uuid,
                path: first.clone(),
                namespace: StoreNamespace::Image,
                need_await_fetch: true,
            })
            .await;
        assert_eq!(record.data.as_slice(), b"first");
        assert_eq!(record.origin_url, first);

        let record = store
            .get_store_item(GetStoreItem {
                uuid,
                path: second.clone(),
                namespace: StoreNamespace::Image,
                need_await_fetch: true,
            })
            .await;
        assert_eq!(record.data.as_slice(), b"second");
        assert_eq!(record.origin_url, second);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn index_survives_reopen_without_eager_blob_reads() {
        let dir = tempdir().expect("tempdir");
        let root = dir.path().join("cache");
        let uuid = Uuid::new_v4();
        let source = write_source(dir.path(), "model.bin", b"payload");
        {
            let store = PersistentAssetStore::open(&root, 1 << 20).expect("store");
            store
                .set_store_item(SetStoreItem {
                    uuid,
                    path: source.clone(),
                    namespace: StoreNamespace::Model,
                })
                .await;
        }
        let store = PersistentAssetStore::open(&root, 1 << 20).expect("reopened store");
        let record = store
            .get_store_item(GetStoreItem {
                uuid,
                path: source,
                namespace: StoreNamespace::Model,
                need_await_fetch: true,
            })
            .await;
        assert_eq!(record.data.as_slice(), b"payload");
    }

    #[tokio::test(flavor = "current_thread")]
    async fn quota_failure_degrades_to_memory_only() {
        let dir = tempdir().expect("tempdir");
        let store = PersistentAssetStore::open(dir.path().join("cache"), 4).expect("store");
        let uuid = Uuid::new_v4();
        let source = write_source(dir.path(), "big.bin", b"more than four bytes");
        let record = store
            .set_store_item(SetStoreItem {
                uuid,
                path: source,
                namespace: StoreNamespace::Image,
            })
            .await;
        assert_eq!(record.data.as_slice(), b"more than four bytes");
        assert!(!store.blob_path(StoreNamespace::Image, uuid).exists());
        let resolved = store.read_local(StoreNamespace::Image, uuid).await.expect("memory record");
        assert_eq!(resolved.data.as_slice(), b"more than four bytes");
    }

    #[tokio::test(flavor = "current_thread")]
    async fn non_awaited_miss_returns_placeholder_and_backfills() {
        let dir = tempdir().expect("tempdir");
        let store = PersistentAssetStore::open(dir.path().join("cache"), 1 << 20).expect("store");
        let uuid = Uuid::new_v4();
        let source = write_source(dir.path(), "late.bin", b"late");

        let local = tokio::task::LocalSet::new();
        let record = local
            .run_until(async {
                let placeholder = store
                    .get_store_item(GetStoreItem {
                        uuid,
                        path: source.clone(),
                        namespace: StoreNamespace::Image,
                        need_await_fetch: false,
                    })
                    .await;
                assert!(placeholder.is_empty());
                let mut tries = 0;
                loop {
                    if let Some(record) = store.read_local(StoreNamespace::Image, uuid).await {
                        break record;
                    }
                    tries += 1;
                    assert!(tries < 200, "background fetch never completed");
                    tokio::time::sleep(std::time::Duration::from_millis(5)).await;
                }
            })
            .await;
        assert_eq!(record.data.as_slice(), b"late");
    }
}
