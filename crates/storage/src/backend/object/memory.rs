//! In-process object store.
//!
//! Behaves like an S3 bucket for everything the object backend uses:
//! delimited listing with continuation tokens, missing keys as `None`,
//! idempotent deletes. Page size, server-side copy and per-key delete
//! failures are configurable for tests and local development.

use std::collections::{BTreeMap, HashSet};
use std::ops::Bound;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::SystemTime;

use bytes::Bytes;

use super::client::{ClientFuture, ListPage, ObjectClient, ObjectError, ObjectMeta, ObjectResult};

#[derive(Debug, Clone)]
struct StoredObject {
    body: Bytes,
    modified: SystemTime,
}

/// Object store kept in memory.
#[derive(Debug)]
pub struct MemoryObjectClient {
    objects: RwLock<BTreeMap<String, StoredObject>>,
    failing_deletes: RwLock<HashSet<String>>,
    page_cap: usize,
    server_side_copy: bool,
    calls: AtomicUsize,
}

impl Default for MemoryObjectClient {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryObjectClient {
    /// An empty store returning up to 1000 keys per page.
    pub fn new() -> Self {
        Self {
            objects: RwLock::new(BTreeMap::new()),
            failing_deletes: RwLock::new(HashSet::new()),
            page_cap: 1000,
            server_side_copy: true,
            calls: AtomicUsize::new(0),
        }
    }

    /// Never return more than `cap` keys per page, whatever the caller asks.
    pub fn with_page_cap(mut self, cap: usize) -> Self {
        self.page_cap = cap.max(1);
        self
    }

    /// Report server-side copy as unsupported.
    pub fn without_server_side_copy(mut self) -> Self {
        self.server_side_copy = false;
        self
    }

    /// Store an object directly, bypassing the call counter.
    pub fn insert(&self, key: impl Into<String>, body: impl Into<Bytes>) {
        self.write_objects().insert(
            key.into(),
            StoredObject {
                body: body.into(),
                modified: SystemTime::now(),
            },
        );
    }

    /// Make every delete of `key` fail with access denied.
    pub fn fail_delete(&self, key: impl Into<String>) {
        self.failing_deletes
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.into());
    }

    /// Remove all injected failures.
    pub fn clear_failures(&self) {
        self.failing_deletes
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    /// All stored keys in order.
    pub fn keys(&self) -> Vec<String> {
        self.read_objects().keys().cloned().collect()
    }

    /// Whether `key` is stored.
    pub fn contains(&self, key: &str) -> bool {
        self.read_objects().contains_key(key)
    }

    /// Number of client calls made so far.
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn read_objects(&self) -> RwLockReadGuard<'_, BTreeMap<String, StoredObject>> {
        self.objects.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_objects(&self) -> RwLockWriteGuard<'_, BTreeMap<String, StoredObject>> {
        self.objects.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn record_call(&self) {
        self.calls.fetch_add(1, Ordering::SeqCst);
    }

    /// Delimited listing. A common prefix counts as one key and is consumed
    /// whole, so a group never spans two pages.
    fn page(&self, prefix: &str, delimiter: Option<&str>, token: Option<String>, max_keys: usize) -> ListPage {
        let max_keys = max_keys.min(self.page_cap).max(1);
        let start = match token {
            Some(token) if token.as_str() >= prefix => Bound::Excluded(token),
            _ => Bound::Included(prefix.to_string()),
        };

        let objects = self.read_objects();
        let mut page = ListPage::default();
        let mut emitted = 0;
        let mut last_key: Option<String> = None;
        let mut truncated = false;

        for (key, object) in objects.range((start, Bound::Unbounded)) {
            if !key.starts_with(prefix) {
                break;
            }
            let group = delimiter.and_then(|delimiter| {
                let rest = &key[prefix.len()..];
                rest.find(delimiter)
                    .map(|pos| key[..prefix.len() + pos + delimiter.len()].to_string())
            });
            let starts_item = match &group {
                Some(group) => page.common_prefixes.last() != Some(group),
                None => true,
            };
            if starts_item && emitted == max_keys {
                truncated = true;
                break;
            }
            if starts_item {
                emitted += 1;
                match group {
                    Some(group) => page.common_prefixes.push(group),
                    None => page.objects.push(ObjectMeta {
                        key: key.clone(),
                        size: object.body.len() as u64,
                        last_modified: Some(object.modified),
                    }),
                }
            }
            last_key = Some(key.clone());
        }

        if truncated {
            page.next_token = last_key;
        }
        page
    }
}

impl ObjectClient for MemoryObjectClient {
    fn list_page<'a>(
        &'a self,
        prefix: &'a str,
        delimiter: Option<&'a str>,
        token: Option<String>,
        max_keys: usize,
    ) -> ClientFuture<'a, ListPage> {
        Box::pin(async move {
            self.record_call();
            Ok(self.page(prefix, delimiter, token, max_keys))
        })
    }

    fn head<'a>(&'a self, key: &'a str) -> ClientFuture<'a, Option<ObjectMeta>> {
        Box::pin(async move {
            self.record_call();
            Ok(self.read_objects().get(key).map(|object| ObjectMeta {
                key: key.to_string(),
                size: object.body.len() as u64,
                last_modified: Some(object.modified),
            }))
        })
    }

    fn get<'a>(&'a self, key: &'a str) -> ClientFuture<'a, Option<Bytes>> {
        Box::pin(async move {
            self.record_call();
            Ok(self.read_objects().get(key).map(|object| object.body.clone()))
        })
    }

    fn put<'a>(&'a self, key: &'a str, data: Bytes) -> ClientFuture<'a, ()> {
        Box::pin(async move {
            self.record_call();
            self.insert(key, data);
            Ok(())
        })
    }

    fn copy<'a>(&'a self, from: &'a str, to: &'a str) -> ClientFuture<'a, ()> {
        Box::pin(async move {
            self.record_call();
            self.copy_now(from, to)
        })
    }

    fn delete<'a>(&'a self, key: &'a str) -> ClientFuture<'a, ()> {
        Box::pin(async move {
            self.record_call();
            let failing = self
                .failing_deletes
                .read()
                .unwrap_or_else(PoisonError::into_inner)
                .contains(key);
            if failing {
                return Err(ObjectError::AccessDenied(format!("delete of {} refused", key)));
            }
            self.write_objects().remove(key);
            Ok(())
        })
    }

    fn supports_server_side_copy(&self) -> bool {
        self.server_side_copy
    }
}

impl MemoryObjectClient {
    fn copy_now(&self, from: &str, to: &str) -> ObjectResult<()> {
        if !self.server_side_copy {
            return Err(ObjectError::Status {
                status: 501,
                message: "server-side copy not supported".to_string(),
            });
        }
        let mut objects = self.write_objects();
        let source = objects.get(from).cloned().ok_or_else(|| ObjectError::Status {
            status: 404,
            message: format!("no such key: {}", from),
        })?;
        objects.insert(
            to.to_string(),
            StoredObject {
                body: source.body,
                modified: SystemTime::now(),
            },
        );
        Ok(())
    }
}
