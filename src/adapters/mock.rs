use std::{
    collections::BTreeMap,
    io::{Cursor, Read},
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Mutex,
    },
    time::SystemTime,
};

use crate::{
    adapters,
    model::object::{
        AccountOwner, BucketAcl, ListingPage, ObjectMetadata, PutOptions, StoreError,
    },
};

struct MockObject {
    body: Vec<u8>,
    modified_time: SystemTime,
    content_hash: Option<String>,
}

/// In-memory bucket with failure injection.
pub struct MockClient {
    objects: Mutex<BTreeMap<String, MockObject>>,
    failing_copies: AtomicUsize,
    failing_heads: AtomicBool,
    failing_lists: AtomicBool,
    failing_puts: AtomicBool,
    failing_deletes: AtomicBool,
    pub copy_attempts: AtomicUsize,
    pub head_calls: AtomicUsize,
    pub list_calls: AtomicUsize,
    acl: BucketAcl,
    owner: AccountOwner,
}

impl MockClient {
    pub fn new() -> Self {
        Self {
            objects: Mutex::new(BTreeMap::new()),
            failing_copies: AtomicUsize::new(0),
            failing_heads: AtomicBool::new(false),
            failing_lists: AtomicBool::new(false),
            failing_puts: AtomicBool::new(false),
            failing_deletes: AtomicBool::new(false),
            copy_attempts: AtomicUsize::new(0),
            head_calls: AtomicUsize::new(0),
            list_calls: AtomicUsize::new(0),
            acl: BucketAcl::default(),
            owner: AccountOwner {
                id: "owner-id".to_string(),
                display_name: None,
            },
        }
    }

    pub fn with_objects(keys: &[&str]) -> Self {
        let client = Self::new();
        for key in keys {
            client.insert(key, key.as_bytes());
        }
        client
    }

    pub fn with_acl(mut self, owner: AccountOwner, acl: BucketAcl) -> Self {
        self.owner = owner;
        self.acl = acl;
        self
    }

    /// Fails the next `count` copies. `usize::MAX` fails every copy.
    pub fn fail_copies(&self, count: usize) {
        self.failing_copies.store(count, Ordering::SeqCst);
    }

    pub fn fail_heads(&self, fail: bool) {
        self.failing_heads.store(fail, Ordering::SeqCst);
    }

    pub fn fail_lists(&self, fail: bool) {
        self.failing_lists.store(fail, Ordering::SeqCst);
    }

    pub fn fail_puts(&self, fail: bool) {
        self.failing_puts.store(fail, Ordering::SeqCst);
    }

    pub fn fail_deletes(&self, fail: bool) {
        self.failing_deletes.store(fail, Ordering::SeqCst);
    }

    pub fn insert(&self, key: &str, body: &[u8]) {
        self.objects.lock().unwrap().insert(
            key.to_string(),
            MockObject {
                body: body.to_vec(),
                modified_time: SystemTime::now(),
                content_hash: None,
            },
        );
    }

    pub fn contains(&self, key: &str) -> bool {
        self.objects.lock().unwrap().contains_key(key)
    }

    pub fn body(&self, key: &str) -> Option<Vec<u8>> {
        self.objects.lock().unwrap().get(key).map(|o| o.body.clone())
    }

    pub fn keys(&self) -> Vec<String> {
        self.objects.lock().unwrap().keys().cloned().collect()
    }

    /// Ordered listing entries, deeper keys folded into common prefixes.
    fn entries(&self, prefix: &str, delimiter: &str) -> Vec<(String, bool)> {
        let objects = self.objects.lock().unwrap();
        let mut entries: Vec<(String, bool)> = Vec::new();

        for key in objects.keys().filter(|key| key.starts_with(prefix)) {
            let rest = &key[prefix.len()..];
            let folded = if delimiter.is_empty() {
                None
            } else {
                rest.find(delimiter)
                    .map(|pos| format!("{}{}", prefix, &rest[..pos + delimiter.len()]))
            };

            match folded {
                Some(common) => {
                    if entries.last() != Some(&(common.clone(), true)) {
                        entries.push((common, true));
                    }
                }
                None => entries.push((key.clone(), false)),
            }
        }

        entries
    }
}

impl adapters::ObjectStore for MockClient {
    fn fs_head_object(
        &self,
        _bucket: &str,
        key: &str,
    ) -> Result<Option<ObjectMetadata>, StoreError> {
        self.head_calls.fetch_add(1, Ordering::SeqCst);

        if self.failing_heads.load(Ordering::SeqCst) {
            return Err(StoreError::new(format!("failed to head_object: {}", key)));
        }

        Ok(self.objects.lock().unwrap().get(key).map(|o| ObjectMetadata {
            key: key.to_string(),
            size: o.body.len() as u64,
            modified_time: o.modified_time,
            content_hash: o.content_hash.clone(),
        }))
    }

    fn fs_list_objects(
        &self,
        _bucket: &str,
        prefix: &str,
        delimiter: &str,
        max_keys: i32,
        continuation: Option<String>,
    ) -> Result<ListingPage, StoreError> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);

        if self.failing_lists.load(Ordering::SeqCst) {
            return Err(StoreError::new(format!("failed to list_objects at: {}", prefix)));
        }

        let remaining: Vec<(String, bool)> = self
            .entries(prefix, delimiter)
            .into_iter()
            .filter(|(name, _)| continuation.as_ref().map_or(true, |tok| name > tok))
            .collect();

        let max_keys = max_keys.max(1) as usize;
        let truncated = remaining.len() > max_keys;
        let page: Vec<(String, bool)> = remaining.into_iter().take(max_keys).collect();

        Ok(ListingPage {
            continuation: if truncated {
                page.last().map(|(name, _)| name.clone())
            } else {
                None
            },
            object_names: page
                .iter()
                .filter(|(_, is_prefix)| !is_prefix)
                .map(|(name, _)| name.clone())
                .collect(),
            common_prefixes: page
                .iter()
                .filter(|(_, is_prefix)| *is_prefix)
                .map(|(name, _)| name.clone())
                .collect(),
            truncated,
        })
    }

    fn fs_put_object(
        &self,
        _bucket: &str,
        key: &str,
        body: Vec<u8>,
        options: &PutOptions,
    ) -> Result<(), StoreError> {
        if self.failing_puts.load(Ordering::SeqCst) {
            return Err(StoreError::new(format!("failed to put_object at: {}", key)));
        }

        self.objects.lock().unwrap().insert(
            key.to_string(),
            MockObject {
                body,
                modified_time: SystemTime::now(),
                content_hash: options.content_md5.clone(),
            },
        );

        Ok(())
    }

    fn fs_delete_object(&self, _bucket: &str, key: &str) -> Result<(), StoreError> {
        if self.failing_deletes.load(Ordering::SeqCst) {
            return Err(StoreError::new(format!("failed to delete_object at: {}", key)));
        }

        self.objects.lock().unwrap().remove(key);
        Ok(())
    }

    fn fs_copy_object(
        &self,
        _bucket: &str,
        src: &str,
        dst: &str,
        _encrypt: bool,
    ) -> Result<(), StoreError> {
        self.copy_attempts.fetch_add(1, Ordering::SeqCst);

        let failing = self.failing_copies.load(Ordering::SeqCst);
        if failing > 0 {
            if failing != usize::MAX {
                self.failing_copies.store(failing - 1, Ordering::SeqCst);
            }
            return Err(StoreError::new(format!("failed to copy_object from: {}", src)));
        }

        let mut objects = self.objects.lock().unwrap();
        let body = objects
            .get(src)
            .map(|o| o.body.clone())
            .ok_or_else(|| StoreError::new(format!("no such key: {}", src)))?;

        objects.insert(
            dst.to_string(),
            MockObject {
                body,
                modified_time: SystemTime::now(),
                content_hash: None,
            },
        );

        Ok(())
    }

    fn fs_get_object(
        &self,
        _bucket: &str,
        key: &str,
        offset: u64,
    ) -> Result<Box<dyn Read + Send>, StoreError> {
        let objects = self.objects.lock().unwrap();
        let body = &objects
            .get(key)
            .ok_or_else(|| StoreError::new(format!("no such key: {}", key)))?
            .body;

        if offset as usize > body.len() {
            return Err(StoreError::new(format!("invalid range on: {}", key)));
        }

        Ok(Box::new(Cursor::new(body[offset as usize..].to_vec())))
    }

    fn fs_get_bucket_acl(&self, _bucket: &str) -> Result<BucketAcl, StoreError> {
        Ok(self.acl.clone())
    }

    fn fs_get_account_owner(&self, _bucket: &str) -> Result<AccountOwner, StoreError> {
        Ok(self.owner.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::ObjectStore;

    #[test]
    fn test_list_objects_delimiter() {
        let client = MockClient::with_objects(&["a/b", "a/c/d", "a/c/e", "a/f", "b"]);

        let page = client.fs_list_objects("bucket", "a/", "/", 1000, None).unwrap();

        assert_eq!(page.object_names, vec!["a/b", "a/f"]);
        assert_eq!(page.common_prefixes, vec!["a/c/"]);
        assert!(!page.truncated);
    }

    #[test]
    fn test_list_objects_pages() {
        let client = MockClient::with_objects(&["a", "b", "c"]);

        let first = client.fs_list_objects("bucket", "", "", 2, None).unwrap();
        assert_eq!(first.object_names, vec!["a", "b"]);
        assert!(first.truncated);

        let second = client
            .fs_list_objects("bucket", "", "", 2, first.continuation)
            .unwrap();
        assert_eq!(second.object_names, vec!["c"]);
        assert!(!second.truncated);
    }
}
