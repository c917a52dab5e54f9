use std::io::Read;

use crate::model::object::{
    AccountOwner, BucketAcl, ListingPage, ObjectMetadata, PutOptions, StoreError,
};

pub mod gcs;
#[cfg(test)]
pub mod mock;
pub mod s3;

/// Capabilities the filesystem layer needs from an object store client.
pub trait ObjectStore: Send + Sync {
    /// `Ok(None)` when the key does not exist.
    fn fs_head_object(
        &self,
        bucket: &str,
        key: &str,
    ) -> Result<Option<ObjectMetadata>, StoreError>;

    /// One page of keys under `prefix`. An empty `delimiter` lists recursively.
    fn fs_list_objects(
        &self,
        bucket: &str,
        prefix: &str,
        delimiter: &str,
        max_keys: i32,
        continuation: Option<String>,
    ) -> Result<ListingPage, StoreError>;

    fn fs_put_object(
        &self,
        bucket: &str,
        key: &str,
        body: Vec<u8>,
        options: &PutOptions,
    ) -> Result<(), StoreError>;

    fn fs_delete_object(&self, bucket: &str, key: &str) -> Result<(), StoreError>;

    /// Server-side copy within `bucket`.
    fn fs_copy_object(
        &self,
        bucket: &str,
        src: &str,
        dst: &str,
        encrypt: bool,
    ) -> Result<(), StoreError>;

    fn fs_get_object(
        &self,
        bucket: &str,
        key: &str,
        offset: u64,
    ) -> Result<Box<dyn Read + Send>, StoreError>;

    fn fs_get_bucket_acl(&self, bucket: &str) -> Result<BucketAcl, StoreError>;

    fn fs_get_account_owner(&self, bucket: &str) -> Result<AccountOwner, StoreError>;
}
