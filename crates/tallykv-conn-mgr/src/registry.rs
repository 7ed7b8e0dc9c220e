//! Global registry that caches open database instances per path
//!
//! Connecting to the same path twice must return the same [`KvDatabase`]
//! instance. Two independent instances for one file would each hold their own
//! single-connection write pool, defeating in-process write serialization.

use crate::Result;
use crate::database::KvDatabase;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock, Weak};
use tokio::sync::Mutex;

/// Weak references let the map self-clean: a database dropped by all callers
/// is simply re-opened on the next connect.
static REGISTRY: OnceLock<Mutex<HashMap<PathBuf, Weak<KvDatabase>>>> = OnceLock::new();

fn registry() -> &'static Mutex<HashMap<PathBuf, Weak<KvDatabase>>> {
   REGISTRY.get_or_init(|| Mutex::new(HashMap::new()))
}

/// Returns true for in-memory databases, which are never cached: every
/// `:memory:` connection is an independent database.
pub(crate) fn is_memory_database(path: &Path) -> bool {
   path.as_os_str() == ":memory:"
}

/// Return the cached instance for `path`, or open a new one and cache it.
///
/// The registry lock is held across `open` so that two concurrent connects
/// for the same path cannot both open the database.
pub(crate) async fn get_or_open_database<F, Fut>(path: &Path, open: F) -> Result<Arc<KvDatabase>>
where
   F: FnOnce() -> Fut,
   Fut: Future<Output = Result<KvDatabase>>,
{
   if is_memory_database(path) {
      return Ok(Arc::new(open().await?));
   }

   let mut map = registry().lock().await;

   if let Some(existing) = map.get(path).and_then(Weak::upgrade) {
      return Ok(existing);
   }

   let db = Arc::new(open().await?);
   map.insert(path.to_path_buf(), Arc::downgrade(&db));

   Ok(db)
}

/// Remove a database from the cache (called on close)
pub(crate) async fn uncache_database(path: &Path) {
   registry().lock().await.remove(path);
}
