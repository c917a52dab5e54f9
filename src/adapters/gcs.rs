use std::{
    io::Read,
    time::{Duration, SystemTime},
};

use futures::StreamExt;
use google_cloud_storage::client::{Client, ClientConfig};
use google_cloud_storage::http::{
    bucket_access_controls::{
        list::ListBucketAccessControlsRequest, BucketACLRole, BucketAccessControl,
    },
    objects::{
        copy::CopyObjectRequest,
        delete::DeleteObjectRequest,
        download::Range,
        get::GetObjectRequest,
        list::ListObjectsRequest,
        upload::{Media, UploadObjectRequest, UploadType},
        Object,
    },
};
use time::OffsetDateTime;
use tracing::debug;

use crate::{
    adapters,
    config::Config,
    model::object::{
        AccountOwner, AclGrant, AclPermission, BucketAcl, Grantee, ListingPage, ObjectMetadata,
        PutOptions, StoreError,
    },
    util,
};

const ALL_USERS: &str = "allUsers";
const ALL_AUTHENTICATED_USERS: &str = "allAuthenticatedUsers";

fn is_not_found(err: &google_cloud_storage::http::Error) -> bool {
    matches!(err, google_cloud_storage::http::Error::Response(resp) if resp.code == 404)
}

fn to_system_time(dt: Option<OffsetDateTime>) -> SystemTime {
    match dt {
        Some(dt) if dt.unix_timestamp() >= 0 => {
            SystemTime::UNIX_EPOCH
                + Duration::new(dt.unix_timestamp() as u64, dt.nanosecond())
        }
        _ => SystemTime::UNIX_EPOCH,
    }
}

fn to_metadata(obj: Object) -> ObjectMetadata {
    ObjectMetadata {
        modified_time: to_system_time(obj.updated),
        key: obj.name,
        size: obj.size.max(0) as u64,
        content_hash: obj.md5_hash,
    }
}

fn to_grant(acl: &BucketAccessControl) -> AclGrant {
    let grantee = match acl.entity.as_str() {
        ALL_USERS => Grantee::AllUsers,
        ALL_AUTHENTICATED_USERS => Grantee::AuthenticatedUsers,
        entity => Grantee::User(entity.to_string()),
    };

    let permission = match acl.role {
        BucketACLRole::READER => AclPermission::Read,
        BucketACLRole::WRITER => AclPermission::Write,
        BucketACLRole::OWNER => AclPermission::FullControl,
    };

    AclGrant {
        grantee,
        permission,
    }
}

/// Simple upload, or multipart when an MD5 must travel with the object.
fn upload_type(bucket: &str, key: &str, len: usize, options: &PutOptions) -> UploadType {
    match &options.content_md5 {
        Some(md5) => UploadType::Multipart(Box::new(Object {
            name: key.to_string(),
            bucket: bucket.to_string(),
            content_type: options.content_type.clone(),
            md5_hash: Some(md5.clone()),
            ..Default::default()
        })),
        None => {
            let mut media = Media::new(key.to_string());
            media.content_length = Some(len as u64);
            if let Some(content_type) = &options.content_type {
                media.content_type = content_type.clone().into();
            }
            UploadType::Simple(media)
        }
    }
}

pub async fn new_client(config: &Config) -> Result<Client, StoreError> {
    let mut client_config = ClientConfig::default()
        .with_auth()
        .await
        .map_err(|err| StoreError::new(format!("failed to authenticate with gcs, {}", err)))?;

    if let Some(endpoint) = &config.endpoint {
        client_config.storage_endpoint = endpoint.clone();
    }

    Ok(Client::new(client_config))
}

fn bucket_access_controls(
    client: &Client,
    bucket: &str,
) -> Result<Vec<BucketAccessControl>, StoreError> {
    let req = ListBucketAccessControlsRequest {
        bucket: bucket.to_string(),
    };

    let res = util::poll::poll_until_ready(client.list_bucket_access_controls(&req)).map_err(
        |err| {
            StoreError::new(format!(
                "failed to list_bucket_access_controls of: {}, {}",
                bucket, err
            ))
        },
    )?;

    Ok(res.items)
}

impl adapters::ObjectStore for Client {
    fn fs_head_object(
        &self,
        bucket: &str,
        key: &str,
    ) -> Result<Option<ObjectMetadata>, StoreError> {
        let req = GetObjectRequest {
            bucket: bucket.to_string(),
            object: key.to_string(),
            ..Default::default()
        };

        match util::poll::poll_until_ready(self.get_object(&req)) {
            Err(err) if is_not_found(&err) => Ok(None),
            Err(err) => Err(StoreError::new(format!(
                "failed to get_object: {}, {}",
                key, err
            ))),
            Ok(obj) => Ok(Some(to_metadata(obj))),
        }
    }

    fn fs_list_objects(
        &self,
        bucket: &str,
        prefix: &str,
        delimiter: &str,
        max_keys: i32,
        continuation: Option<String>,
    ) -> Result<ListingPage, StoreError> {
        let req = ListObjectsRequest {
            bucket: bucket.to_string(),
            prefix: Some(prefix.to_string()),
            delimiter: if delimiter.is_empty() {
                None
            } else {
                Some(delimiter.to_string())
            },
            max_results: Some(max_keys),
            page_token: continuation,
            ..Default::default()
        };

        let lo = util::poll::poll_until_ready(self.list_objects(&req)).map_err(|err| {
            StoreError::new(format!("failed to list_objects at: {}, {}", prefix, err))
        })?;

        let truncated = lo.next_page_token.is_some();

        Ok(ListingPage {
            object_names: lo
                .items
                .unwrap_or_default()
                .into_iter()
                .map(|obj| obj.name)
                .collect(),
            common_prefixes: lo.prefixes.unwrap_or_default(),
            continuation: lo.next_page_token,
            truncated,
        })
    }

    fn fs_put_object(
        &self,
        bucket: &str,
        key: &str,
        body: Vec<u8>,
        options: &PutOptions,
    ) -> Result<(), StoreError> {
        let req = UploadObjectRequest {
            bucket: bucket.to_string(),
            ..Default::default()
        };

        let upload_type = upload_type(bucket, key, body.len(), options);
        util::poll::poll_until_ready(self.upload_object(&req, body, &upload_type))
            .map_err(|err| {
                StoreError::new(format!("failed to put_object at: {}, {}", key, err))
            })?;

        Ok(())
    }

    fn fs_delete_object(&self, bucket: &str, key: &str) -> Result<(), StoreError> {
        let req = DeleteObjectRequest {
            bucket: bucket.to_string(),
            object: key.to_string(),
            ..Default::default()
        };

        util::poll::poll_until_ready(self.delete_object(&req)).map_err(|err| {
            StoreError::new(format!("failed to delete_object at: {}, {}", key, err))
        })
    }

    fn fs_copy_object(
        &self,
        bucket: &str,
        src: &str,
        dst: &str,
        encrypt: bool,
    ) -> Result<(), StoreError> {
        if encrypt {
            // GCS encrypts every object at rest, there is nothing to request.
            debug!(src = src, dst = dst, "server side encryption is implicit on gcs");
        }

        let req = CopyObjectRequest {
            source_bucket: bucket.to_string(),
            source_object: src.to_string(),
            destination_bucket: bucket.to_string(),
            destination_object: dst.to_string(),
            ..Default::default()
        };

        util::poll::poll_until_ready(self.copy_object(&req)).map_err(|err| {
            StoreError::new(format!(
                "failed to copy_object from: {} to: {}, {}",
                src, dst, err
            ))
        })?;

        Ok(())
    }

    fn fs_get_object(
        &self,
        bucket: &str,
        key: &str,
        offset: u64,
    ) -> Result<Box<dyn Read + Send>, StoreError> {
        let req = GetObjectRequest {
            bucket: bucket.to_string(),
            object: key.to_string(),
            ..Default::default()
        };

        let range = if offset > 0 {
            Range(Some(offset), None)
        } else {
            Range::default()
        };

        let chunks =
            util::poll::poll_until_ready(self.download_streamed_object(&req, &range)).map_err(
                |err| StoreError::new(format!("failed to download_object: {}, {}", key, err)),
            )?;

        Ok(Box::new(util::reader::ChunkReader::new(chunks.boxed())))
    }

    fn fs_get_bucket_acl(&self, bucket: &str) -> Result<BucketAcl, StoreError> {
        let grants = bucket_access_controls(self, bucket)?
            .iter()
            .map(to_grant)
            .collect();

        Ok(BucketAcl { grants })
    }

    fn fs_get_account_owner(&self, bucket: &str) -> Result<AccountOwner, StoreError> {
        bucket_access_controls(self, bucket)?
            .into_iter()
            .find(|acl| matches!(acl.role, BucketACLRole::OWNER))
            .map(|acl| AccountOwner {
                id: acl.entity,
                display_name: acl.email,
            })
            .ok_or_else(|| StoreError::new(format!("no owner entity on bucket: {}", bucket)))
    }
}
