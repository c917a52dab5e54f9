use std::{io::Read, sync::Arc, time::SystemTime};

use tracing::{debug, error, info, warn};

use crate::{
    adapters::ObjectStore,
    config::Config,
    model::{
        fs::{FSError, MountIdentity},
        object::{ObjectMetadata, PutOptions},
    },
    util::object,
};

pub mod listing;
pub mod permission;
pub mod writer;

/// Attempts made by `copy` before giving up.
pub const COPY_RETRIES: usize = 3;

/// Base64 MD5 of empty content, the fixed hash of every folder marker.
pub const DIR_HASH: &str = "1B2M2Y8AsgTpgAmY7PhCfg==";

const MARKER_CONTENT_TYPE: &str = "application/octet-stream";

/// Hierarchical view of a flat bucket.
///
/// Holds no mutable state: every query goes to the store, so one instance can
/// serve concurrent callers.
pub struct UnderFS {
    client: Arc<dyn ObjectStore>,
    bucket: String,
    identity: MountIdentity,
    listing_length: i32,
    server_side_encryption: bool,
}

impl UnderFS {
    pub fn new(client: Arc<dyn ObjectStore>, config: &Config) -> Result<Self, FSError> {
        let identity = permission::synthesize_identity(client.as_ref(), config)?;
        info!(root_key=%identity.root_key, owner=%identity.owner, mode=identity.mode, "mounted");

        Ok(Self {
            client,
            bucket: config.bucket.clone(),
            identity,
            listing_length: config.listing_length,
            server_side_encryption: config.server_side_encryption,
        })
    }

    pub fn identity(&self) -> &MountIdentity {
        &self.identity
    }

    pub fn root_key(&self) -> &str {
        &self.identity.root_key
    }

    pub fn to_key(&self, path: &str) -> String {
        object::to_key(self.root_key(), path)
    }

    pub fn is_root(&self, path: &str) -> bool {
        self.to_key(path).trim_end_matches(object::SEPARATOR).is_empty()
    }

    fn head(&self, key: &str) -> Option<ObjectMetadata> {
        match self.client.fs_head_object(&self.bucket, key) {
            Err(err) => {
                warn!(error_message=%err, error_group="head_object", key=key);
                None
            }
            Ok(meta) => meta,
        }
    }

    /// Folder marker metadata for a non-root `key`. Materializes the marker of
    /// an implicit folder.
    fn folder_metadata(&self, key: &str) -> Option<ObjectMetadata> {
        let folder_key = object::to_folder_key(key);
        if let Some(meta) = self.head(&folder_key) {
            return Some(meta);
        }

        let prefix = object::to_dir_prefix(key);
        let page = match self.client.fs_list_objects(&self.bucket, &prefix, "", 1, None) {
            Err(err) => {
                error!(error_message=%err, error_group="list_objects", prefix=%prefix);
                return None;
            }
            Ok(page) => page,
        };

        if page.object_names.is_empty() && page.common_prefixes.is_empty() {
            return None;
        }

        info!(key = key, "materializing implicit folder");
        self.create_marker(&folder_key);

        Some(ObjectMetadata {
            key: folder_key,
            size: 0,
            modified_time: SystemTime::now(),
            content_hash: Some(DIR_HASH.to_string()),
        })
    }

    /// File metadata, falling back to the folder marker.
    fn object_details(&self, path: &str) -> Result<ObjectMetadata, FSError> {
        let key = self.to_key(path);

        self.head(&key)
            .or_else(|| self.folder_metadata(&key))
            .ok_or_else(|| FSError::NotFound(path.to_string()))
    }

    pub fn exists(&self, path: &str) -> bool {
        self.is_root(path) || self.is_file(path) || self.is_directory(path)
    }

    pub fn is_directory(&self, path: &str) -> bool {
        if self.is_root(path) {
            return true;
        }

        self.folder_metadata(&self.to_key(path)).is_some()
    }

    pub fn is_file(&self, path: &str) -> bool {
        if self.is_root(path) {
            return false;
        }

        self.head(&self.to_key(path)).is_some()
    }

    pub fn get_size(&self, path: &str) -> Result<u64, FSError> {
        if self.is_root(path) {
            return Ok(0);
        }

        Ok(self.object_details(path)?.size)
    }

    pub fn get_modified_time(&self, path: &str) -> Result<SystemTime, FSError> {
        if self.is_root(path) {
            return Ok(self.identity.mounted_at);
        }

        Ok(self.object_details(path)?.modified_time)
    }

    pub fn get_owner(&self, _path: &str) -> &str {
        &self.identity.owner
    }

    /// Buckets have no group, the owner stands in.
    pub fn get_group(&self, _path: &str) -> &str {
        &self.identity.owner
    }

    pub fn get_mode(&self, _path: &str) -> u16 {
        self.identity.mode
    }

    pub fn set_owner(&self, path: &str, user: &str, group: &str) {
        debug!(path = path, user = user, group = group, "set_owner is not supported");
    }

    pub fn set_mode(&self, path: &str, mode: u16) {
        debug!(path = path, mode = mode, "set_mode is not supported");
    }

    pub fn open(&self, path: &str) -> Option<Box<dyn Read + Send>> {
        self.open_at(path, 0)
    }

    pub fn open_at(&self, path: &str, offset: u64) -> Option<Box<dyn Read + Send>> {
        let key = self.to_key(path);

        match self.client.fs_get_object(&self.bucket, &key, offset) {
            Err(err) => {
                error!(error_message=%err, error_group="get_object", key=%key, offset=offset);
                None
            }
            Ok(reader) => Some(reader),
        }
    }

    pub fn create_write_sink(&self, path: &str) -> writer::ObjectWriter {
        writer::ObjectWriter::new(self.client.clone(), &self.bucket, &self.to_key(path))
    }

    /// Server-side copy, retried up to `COPY_RETRIES` times.
    pub fn copy(&self, src: &str, dst: &str) -> bool {
        let src = self.to_key(src);
        let dst = self.to_key(dst);
        debug!(src=%src, dst=%dst, "copying");

        for attempt in 1..=COPY_RETRIES {
            let res = self.client.fs_copy_object(
                &self.bucket,
                &src,
                &dst,
                self.server_side_encryption,
            );

            match res {
                Ok(_) => return true,
                Err(err) => {
                    error!(error_message=%err, error_group="copy_object", src=%src, dst=%dst, attempt=attempt);
                    if attempt < COPY_RETRIES {
                        warn!(src=%src, dst=%dst, "retrying copy");
                    }
                }
            }
        }

        error!(src=%src, dst=%dst, retries=COPY_RETRIES, "giving up on copy");
        false
    }

    fn delete_object(&self, key: &str) -> bool {
        match self.client.fs_delete_object(&self.bucket, key) {
            Err(err) => {
                error!(error_message=%err, error_group="delete_object", key=key);
                false
            }
            Ok(_) => true,
        }
    }

    /// Deletes the object at `path`. Does not tell whether it existed.
    pub fn delete(&self, path: &str) -> bool {
        if self.is_root(path) {
            error!(path = path, "refusing to delete the root");
            return false;
        }

        self.delete_object(&self.to_key(path))
    }

    /// Whether anything besides its own marker lives below `path`.
    pub fn has_children(&self, path: &str) -> bool {
        let folder_key = object::to_folder_key(&self.to_key(path));

        self.list(path, false).any(|page| {
            !page.common_prefixes.is_empty()
                || page.object_names.iter().any(|name| *name != folder_key)
        })
    }

    /// Removes a folder marker. Unless `recursive`, fails when the folder has children.
    pub fn delete_directory(&self, path: &str, recursive: bool) -> bool {
        if self.is_root(path) {
            error!(path = path, "refusing to delete the root");
            return false;
        }

        let key = self.to_key(path);
        let folder_key = object::to_folder_key(&key);

        let mut children = Vec::new();
        for page in self.list(path, recursive) {
            children.extend(page.common_prefixes);
            children.extend(
                page.object_names
                    .into_iter()
                    .filter(|name| *name != folder_key),
            );
        }

        if !recursive && !children.is_empty() {
            error!(path = path, children = children.len(), "folder is not empty");
            return false;
        }

        let mut deleted = true;
        for child in children {
            deleted &= self.delete_object(&child);
        }

        deleted && self.delete_object(&folder_key)
    }

    fn create_marker(&self, folder_key: &str) -> bool {
        let options = PutOptions {
            content_md5: Some(DIR_HASH.to_string()),
            content_type: Some(MARKER_CONTENT_TYPE.to_string()),
        };

        match self
            .client
            .fs_put_object(&self.bucket, folder_key, Vec::new(), &options)
        {
            Err(err) => {
                error!(error_message=%err, error_group="put_object", key=folder_key);
                false
            }
            Ok(_) => true,
        }
    }

    /// Writes the folder marker of `path`. Writing it again is harmless.
    pub fn mkdir(&self, path: &str) -> bool {
        if self.is_root(path) {
            return true;
        }

        self.create_marker(&object::to_folder_key(&self.to_key(path)))
    }

    /// Like `mkdir`, but an existing folder is success. Missing ancestors are
    /// created when `create_parent`, otherwise they fail the call.
    pub fn mkdirs(&self, path: &str, create_parent: bool) -> bool {
        if self.is_root(path) {
            return true;
        }

        let key = self.to_key(path);
        if self.is_file(&key) {
            error!(key = key, "cannot create folder over a file");
            return false;
        }
        if self.is_directory(&key) {
            return true;
        }

        if create_parent {
            let mut ancestors = Vec::new();
            let mut parent = object::parent_key(&key);
            while let Some(p) = parent {
                parent = object::parent_key(&p);
                ancestors.push(p);
            }

            for ancestor in ancestors.iter().rev() {
                if !self.is_directory(ancestor) && !self.mkdir(ancestor) {
                    return false;
                }
            }
        } else if let Some(parent) = object::parent_key(&key) {
            if !self.is_directory(&parent) {
                error!(key = key, parent = parent, "parent folder does not exist");
                return false;
            }
        }

        self.mkdir(&key)
    }

    /// Copy then delete. Not atomic.
    pub fn rename_file(&self, src: &str, dst: &str) -> bool {
        self.copy(src, dst) && self.delete(src)
    }

    /// Moves every descendant of `src` below `dst`. Not atomic.
    pub fn rename_directory(&self, src: &str, dst: &str) -> bool {
        let src_prefix = object::to_dir_prefix(&self.to_key(src));
        let dst_prefix = object::to_dir_prefix(&self.to_key(dst));

        if !self.mkdir(dst) {
            return false;
        }

        let names: Vec<String> = self
            .list(src, true)
            .flat_map(|page| page.object_names)
            .collect();

        for name in names {
            let Some(rest) = name.strip_prefix(&src_prefix) else {
                continue;
            };

            if !self.rename_file(&name, &format!("{}{}", dst_prefix, rest)) {
                return false;
            }
        }

        self.delete_object(&object::to_folder_key(&self.to_key(src)))
    }

    /// Pages of names below `path`. Non-recursive listings fold deeper keys
    /// into common prefixes.
    pub fn list(&self, path: &str, recursive: bool) -> listing::ObjectListing<'_> {
        let prefix = object::to_dir_prefix(&self.to_key(path));

        listing::ObjectListing::new(
            self.client.as_ref(),
            &self.bucket,
            prefix,
            recursive,
            self.listing_length,
        )
    }
}

#[cfg(test)]
mod tests {
    use std::{io::Write, sync::atomic::Ordering};

    use super::*;
    use crate::adapters::mock::MockClient;

    fn new_ufs(keys: &[&str]) -> (Arc<MockClient>, UnderFS) {
        let client = Arc::new(MockClient::with_objects(keys));
        let config = Config::new("s3://bucket").unwrap();
        let ufs = UnderFS::new(client.clone(), &config).unwrap();

        (client, ufs)
    }

    #[test]
    fn test_is_root() {
        let (_, ufs) = new_ufs(&[]);

        let cases = vec![
            ("s3://bucket", true),
            ("s3://bucket/", true),
            ("/", true),
            ("", true),
            ("s3://bucket/folder", false),
            ("folder", false),
        ];

        for (path, expected) in cases {
            assert_eq!(ufs.is_root(path), expected, "failed for case: {}", path);
        }
    }

    #[test]
    fn test_root_is_directory_without_store_calls() {
        let (client, ufs) = new_ufs(&[]);

        assert!(ufs.is_directory("s3://bucket"));
        assert!(ufs.exists("/"));
        assert!(!ufs.is_file("/"));
        assert_eq!(client.head_calls.load(Ordering::SeqCst), 0);
        assert_eq!(client.list_calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_is_directory() {
        let (_, ufs) = new_ufs(&["explicit/_$folder$", "implicit/file", "file", "filed"]);

        let cases = vec![
            ("explicit", true),
            ("s3://bucket/explicit", true),
            ("implicit", true),
            ("file", false),
            ("missing", false),
            ("fil", false),
        ];

        for (path, expected) in cases {
            assert_eq!(ufs.is_directory(path), expected, "failed for case: {}", path);
        }
    }

    #[test]
    fn test_implicit_directory_is_materialized() {
        let (client, ufs) = new_ufs(&["implicit/sub/file"]);

        assert!(ufs.is_directory("implicit"));
        assert!(client.contains("implicit/_$folder$"));

        let lists = client.list_calls.load(Ordering::SeqCst);
        assert!(ufs.is_directory("implicit"));
        assert_eq!(
            client.list_calls.load(Ordering::SeqCst),
            lists,
            "second check is a single metadata fetch"
        );
    }

    #[test]
    fn test_is_file() {
        let (_, ufs) = new_ufs(&["folder/file"]);

        let cases = vec![
            ("folder/file", true),
            ("/folder/file", true),
            ("folder", false),
            ("folder/missing", false),
        ];

        for (path, expected) in cases {
            assert_eq!(ufs.is_file(path), expected, "failed for case: {}", path);
        }
    }

    #[test]
    fn test_exists() {
        let (_, ufs) = new_ufs(&["folder/file"]);

        assert!(ufs.exists("folder/file"));
        assert!(ufs.exists("folder"));
        assert!(!ufs.exists("other"));
    }

    #[test]
    fn test_get_size() {
        let (_, ufs) = new_ufs(&["folder/file", "empty/_$folder$", "implicit/x"]);

        assert_eq!(ufs.get_size("folder/file").unwrap(), "folder/file".len() as u64);
        assert_eq!(ufs.get_size("empty").unwrap(), 0);
        assert_eq!(ufs.get_size("implicit").unwrap(), 0);
        assert_eq!(ufs.get_size("/").unwrap(), 0);
        assert!(matches!(ufs.get_size("missing"), Err(FSError::NotFound(_))));
    }

    #[test]
    fn test_get_modified_time() {
        let (_, ufs) = new_ufs(&["file"]);

        assert!(ufs.get_modified_time("file").is_ok());
        assert_eq!(
            ufs.get_modified_time("s3://bucket").unwrap(),
            ufs.identity().mounted_at
        );
        assert!(matches!(
            ufs.get_modified_time("missing"),
            Err(FSError::NotFound(_))
        ));
    }

    #[test]
    fn test_owner_and_mode() {
        let (_, ufs) = new_ufs(&[]);

        assert_eq!(ufs.get_owner("any"), "");
        assert_eq!(ufs.get_group("any"), "");
        assert_eq!(ufs.get_mode("any"), permission::DEFAULT_MODE);

        ufs.set_owner("any", "alice", "staff");
        ufs.set_mode("any", 0o777);
        assert_eq!(ufs.get_owner("any"), "");
        assert_eq!(ufs.get_mode("any"), permission::DEFAULT_MODE);
    }

    #[test]
    fn test_mkdir() {
        let (client, ufs) = new_ufs(&["parent/file"]);

        assert!(ufs.mkdir("parent/child"));
        assert!(ufs.mkdir("parent/child"), "mkdir is idempotent");
        assert!(client.contains("parent/child/_$folder$"));
        assert!(ufs.is_directory("parent/child"));

        let prefixes: Vec<String> = ufs
            .list("parent", false)
            .flat_map(|page| page.common_prefixes)
            .collect();
        assert_eq!(prefixes, vec!["parent/child/"]);
    }

    #[test]
    fn test_mkdirs() {
        let (client, ufs) = new_ufs(&["file"]);

        assert!(ufs.mkdirs("a/b/c", true));
        for key in ["a/_$folder$", "a/b/_$folder$", "a/b/c/_$folder$"] {
            assert!(client.contains(key), "missing marker: {}", key);
        }

        let cases = vec![
            ("x/y", false, false),
            ("a/b/d", false, true),
            ("a/b", false, true),
            ("file", true, false),
            ("file/sub", false, false),
        ];

        for (path, create_parent, expected) in cases {
            assert_eq!(
                ufs.mkdirs(path, create_parent),
                expected,
                "failed for case: {}",
                path
            );
        }

        assert!(!client.contains("x/_$folder$"));
        assert!(!client.contains("x/y/_$folder$"));
        assert!(client.contains("a/b/d/_$folder$"));
    }

    #[test]
    fn test_has_children() {
        let (_, ufs) = new_ufs(&["dir/_$folder$", "dir/sub/file", "empty/_$folder$", "flat/file"]);

        let cases = vec![("dir", true), ("empty", false), ("flat", true), ("missing", false)];

        for (path, expected) in cases {
            assert_eq!(ufs.has_children(path), expected, "failed for case: {}", path);
        }
    }

    #[test]
    fn test_metadata_on_head_failure() {
        let (client, ufs) = new_ufs(&["file", "implicit/file", "marked/_$folder$"]);
        client.fail_heads(true);

        let cases = vec![
            ("file", false, false),
            ("implicit", false, true),
            ("marked", false, true),
            ("missing", false, false),
        ];

        for (path, is_file, is_directory) in cases {
            assert_eq!(ufs.is_file(path), is_file, "failed is_file for case: {}", path);
            assert_eq!(
                ufs.is_directory(path),
                is_directory,
                "failed is_directory for case: {}",
                path
            );
        }

        assert_eq!(ufs.get_size("marked").unwrap(), 0);
        assert!(matches!(ufs.get_size("file"), Err(FSError::NotFound(_))));
        assert!(client.contains("implicit/_$folder$"));
    }

    #[test]
    fn test_mutations_on_delete_failure() {
        let (client, ufs) = new_ufs(&["file", "a", "dir/_$folder$", "dir/file", "empty/_$folder$"]);
        client.fail_deletes(true);

        assert!(!ufs.delete("file"));
        assert!(client.contains("file"));

        assert!(!ufs.rename_file("a", "b"));
        assert!(client.contains("a"), "source survives a failed delete");
        assert!(client.contains("b"));

        assert!(!ufs.delete_directory("dir", true));
        assert!(!ufs.delete_directory("empty", false));
        assert!(client.contains("empty/_$folder$"));
    }

    #[test]
    fn test_copy_retries() {
        let cases = vec![(0, true, 1), (2, true, 3), (usize::MAX, false, 3)];

        for (failures, expected, attempts) in cases {
            let (client, ufs) = new_ufs(&["src"]);
            client.fail_copies(failures);

            assert_eq!(ufs.copy("src", "dst"), expected, "failed for case: {}", failures);
            assert_eq!(
                client.copy_attempts.load(Ordering::SeqCst),
                attempts,
                "failed attempts for case: {}",
                failures
            );
            assert_eq!(client.contains("dst"), expected);
        }
    }

    #[test]
    fn test_delete() {
        let (client, ufs) = new_ufs(&["file"]);

        assert!(ufs.delete("file"));
        assert!(!client.contains("file"));
        assert!(ufs.delete("file"), "missing keys are not distinguished");
        assert!(!ufs.delete("/"));
    }

    #[test]
    fn test_delete_directory() {
        let (client, ufs) = new_ufs(&["dir/_$folder$", "dir/file", "dir/sub/file", "empty/_$folder$"]);

        assert!(!ufs.delete_directory("dir", false));
        assert!(client.contains("dir/file"));

        assert!(ufs.delete_directory("empty", false));
        assert!(!client.contains("empty/_$folder$"));

        assert!(ufs.delete_directory("dir", true));
        assert!(client.keys().is_empty());
    }

    #[test]
    fn test_rename_file() {
        let (client, ufs) = new_ufs(&["a"]);

        assert!(ufs.rename_file("a", "b"));
        assert!(!client.contains("a"));
        assert_eq!(client.body("b"), Some(b"a".to_vec()));
    }

    #[test]
    fn test_rename_directory() {
        let (client, ufs) = new_ufs(&["src/_$folder$", "src/file", "src/sub/file"]);

        assert!(ufs.rename_directory("src", "dst"));
        assert_eq!(
            client.keys(),
            vec!["dst/_$folder$", "dst/file", "dst/sub/file"]
        );
    }

    #[test]
    fn test_open_at() {
        let (_, ufs) = new_ufs(&["file"]);

        let mut out = String::new();
        ufs.open_at("file", 2).unwrap().read_to_string(&mut out).unwrap();
        assert_eq!(out, "le");

        assert!(ufs.open("missing").is_none());
    }

    #[test]
    fn test_create_write_sink() {
        let (client, ufs) = new_ufs(&[]);

        let mut sink = ufs.create_write_sink("s3://bucket/folder/file");
        assert_eq!(sink.key(), "folder/file");
        sink.write_all(b"content").unwrap();
        assert!(sink.finish());

        assert_eq!(client.body("folder/file"), Some(b"content".to_vec()));
        assert!(ufs.is_directory("folder"));
    }

    #[test]
    fn test_list() {
        let keys = vec!["dir/a", "dir/b/c", "dir/d", "other"];
        let (_, ufs) = new_ufs(&keys);

        let page = ufs.list("dir", false).next().unwrap();
        assert_eq!(page.object_names, vec!["dir/a", "dir/d"]);
        assert_eq!(page.common_prefixes, vec!["dir/b/"]);

        let names: Vec<String> = ufs.list("/", true).flat_map(|p| p.object_names).collect();
        assert_eq!(names, keys);
    }
}
