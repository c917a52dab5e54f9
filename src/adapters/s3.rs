use std::{
    io::Read,
    time::{Duration, SystemTime},
};

use aws_sdk_s3::{
    error::DisplayErrorContext,
    primitives::{ByteStream, DateTime},
    types::{Permission, ServerSideEncryption, Type},
};
use futures::StreamExt;

use crate::{
    adapters,
    config::Config,
    credentials,
    model::object::{
        AccountOwner, AclGrant, AclPermission, BucketAcl, Grantee, ListingPage, ObjectMetadata,
        PutOptions, StoreError,
    },
    util,
};

const ALL_USERS_URI: &str = "http://acs.amazonaws.com/groups/global/AllUsers";
const AUTHENTICATED_USERS_URI: &str = "http://acs.amazonaws.com/groups/global/AuthenticatedUsers";

fn to_system_time(dt: Option<&DateTime>) -> SystemTime {
    let secs = dt.map(|dt| dt.secs()).unwrap_or(0);
    let nanos = dt.map(|dt| dt.subsec_nanos()).unwrap_or(0);

    SystemTime::UNIX_EPOCH + Duration::new(secs.max(0) as u64, nanos)
}

/// `bucket/key` with the key URL-encoded, separators kept.
fn copy_source(bucket: &str, key: &str) -> String {
    format!("{}/{}", bucket, urlencoding::encode(key).replace("%2F", "/"))
}

pub async fn new_client(config: &Config) -> aws_sdk_s3::Client {
    let mut loader = aws_config::defaults(aws_config::BehaviorVersion::latest())
        .credentials_provider(credentials::provider_chain(config));

    if let Some(region) = &config.region {
        loader = loader.region(aws_sdk_s3::config::Region::new(region.clone()));
    }
    if let Some(endpoint) = &config.endpoint {
        loader = loader.endpoint_url(endpoint);
    }

    let sdk_config = loader.load().await;
    let s3_config = aws_sdk_s3::config::Builder::from(&sdk_config)
        .force_path_style(config.path_style)
        .build();

    aws_sdk_s3::Client::from_conf(s3_config)
}

impl adapters::ObjectStore for aws_sdk_s3::Client {
    fn fs_head_object(
        &self,
        bucket: &str,
        key: &str,
    ) -> Result<Option<ObjectMetadata>, StoreError> {
        let req = self.head_object().bucket(bucket).key(key);

        let ho = match util::poll::poll_until_ready(req.send()) {
            Err(err) => {
                if let Some(svc_err) = err.as_service_error() {
                    if svc_err.is_not_found() {
                        return Ok(None);
                    }
                }

                return Err(StoreError::new(format!(
                    "failed to head_object: {}, {}",
                    key,
                    DisplayErrorContext(&err)
                )));
            }
            Ok(ho) => ho,
        };

        Ok(Some(ObjectMetadata {
            key: key.to_string(),
            size: ho.content_length().unwrap_or(0).max(0) as u64,
            modified_time: to_system_time(ho.last_modified()),
            content_hash: ho.e_tag().map(|tag| tag.trim_matches('"').to_string()),
        }))
    }

    fn fs_list_objects(
        &self,
        bucket: &str,
        prefix: &str,
        delimiter: &str,
        max_keys: i32,
        continuation: Option<String>,
    ) -> Result<ListingPage, StoreError> {
        let delimiter = if delimiter.is_empty() {
            None
        } else {
            Some(delimiter.to_string())
        };

        let req = self
            .list_objects_v2()
            .bucket(bucket)
            .prefix(prefix)
            .set_delimiter(delimiter)
            .max_keys(max_keys)
            .set_continuation_token(continuation);

        let lo = util::poll::poll_until_ready(req.send()).map_err(|err| {
            StoreError::new(format!(
                "failed to list_objects at: {}, {}",
                prefix,
                DisplayErrorContext(&err)
            ))
        })?;

        Ok(ListingPage {
            object_names: lo
                .contents()
                .iter()
                .filter_map(|o| o.key().map(|key| key.to_string()))
                .collect(),
            common_prefixes: lo
                .common_prefixes()
                .iter()
                .filter_map(|cp| cp.prefix().map(|p| p.to_string()))
                .collect(),
            continuation: lo.next_continuation_token().map(|tok| tok.to_string()),
            truncated: lo.is_truncated().unwrap_or(false),
        })
    }

    fn fs_put_object(
        &self,
        bucket: &str,
        key: &str,
        body: Vec<u8>,
        options: &PutOptions,
    ) -> Result<(), StoreError> {
        let req = self
            .put_object()
            .bucket(bucket)
            .key(key)
            .content_length(body.len() as i64)
            .set_content_md5(options.content_md5.clone())
            .set_content_type(options.content_type.clone())
            .body(ByteStream::from(body));

        util::poll::poll_until_ready(req.send()).map_err(|err| {
            StoreError::new(format!(
                "failed to put_object at: {}, {}",
                key,
                DisplayErrorContext(&err)
            ))
        })?;

        Ok(())
    }

    fn fs_delete_object(&self, bucket: &str, key: &str) -> Result<(), StoreError> {
        let req = self.delete_object().bucket(bucket).key(key);

        util::poll::poll_until_ready(req.send()).map_err(|err| {
            StoreError::new(format!(
                "failed to delete_object at: {}, {}",
                key,
                DisplayErrorContext(&err)
            ))
        })?;

        Ok(())
    }

    fn fs_copy_object(
        &self,
        bucket: &str,
        src: &str,
        dst: &str,
        encrypt: bool,
    ) -> Result<(), StoreError> {
        let mut req = self
            .copy_object()
            .copy_source(copy_source(bucket, src))
            .bucket(bucket)
            .key(dst);

        if encrypt {
            req = req.server_side_encryption(ServerSideEncryption::Aes256);
        }

        util::poll::poll_until_ready(req.send()).map_err(|err| {
            StoreError::new(format!(
                "failed to copy_object from: {} to: {}, {}",
                src,
                dst,
                DisplayErrorContext(&err)
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
        let mut req = self.get_object().bucket(bucket).key(key);

        if offset > 0 {
            req = req.range(format!("bytes={}-", offset));
        }

        let o = util::poll::poll_until_ready(req.send()).map_err(|err| {
            StoreError::new(format!(
                "failed to get_object: {}, {}",
                key,
                DisplayErrorContext(&err)
            ))
        })?;

        let chunks = futures::stream::unfold(o.body, |mut body| async move {
            body.next().await.map(|chunk| (chunk, body))
        })
        .boxed();

        Ok(Box::new(util::reader::ChunkReader::new(chunks)))
    }

    fn fs_get_bucket_acl(&self, bucket: &str) -> Result<BucketAcl, StoreError> {
        let req = self.get_bucket_acl().bucket(bucket);

        let acl = util::poll::poll_until_ready(req.send()).map_err(|err| {
            StoreError::new(format!(
                "failed to get_bucket_acl of: {}, {}",
                bucket,
                DisplayErrorContext(&err)
            ))
        })?;

        let mut grants = Vec::new();
        for grant in acl.grants() {
            let grantee = match grant.grantee() {
                None => continue,
                Some(g) => match g.r#type() {
                    Type::CanonicalUser => Grantee::User(g.id().unwrap_or("").to_string()),
                    Type::Group => match g.uri() {
                        Some(ALL_USERS_URI) => Grantee::AllUsers,
                        Some(AUTHENTICATED_USERS_URI) => Grantee::AuthenticatedUsers,
                        uri => Grantee::Other(uri.unwrap_or("").to_string()),
                    },
                    other => Grantee::Other(other.as_str().to_string()),
                },
            };

            let permission = match grant.permission() {
                Some(Permission::Read) => AclPermission::Read,
                Some(Permission::Write) => AclPermission::Write,
                Some(Permission::FullControl) => AclPermission::FullControl,
                _ => AclPermission::Other,
            };

            grants.push(AclGrant {
                grantee,
                permission,
            });
        }

        Ok(BucketAcl { grants })
    }

    fn fs_get_account_owner(&self, _bucket: &str) -> Result<AccountOwner, StoreError> {
        let lb = util::poll::poll_until_ready(self.list_buckets().send()).map_err(|err| {
            StoreError::new(format!(
                "failed to get account owner, {}",
                DisplayErrorContext(&err)
            ))
        })?;

        let owner = lb
            .owner()
            .ok_or_else(|| StoreError::new("no account owner returned by list_buckets"))?;

        Ok(AccountOwner {
            id: owner.id().unwrap_or("").to_string(),
            display_name: owner.display_name().map(|name| name.to_string()),
        })
    }
}
