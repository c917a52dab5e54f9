use std::time::SystemTime;

/// Failure reported by an object store client. Never crosses the `ufs` boundary.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{message}")]
pub struct StoreError {
    pub message: String,
}

impl StoreError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Metadata of a single object, resolved per call.
#[derive(Clone, Debug, PartialEq)]
pub struct ObjectMetadata {
    pub key: String,
    pub size: u64,
    pub modified_time: SystemTime,
    pub content_hash: Option<String>,
}

/// One batch of a prefix listing.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ListingPage {
    pub object_names: Vec<String>,
    pub common_prefixes: Vec<String>,
    pub continuation: Option<String>,
    pub truncated: bool,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct PutOptions {
    /// Base64 MD5 of the body, checked by the store when set.
    pub content_md5: Option<String>,
    pub content_type: Option<String>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct AccountOwner {
    pub id: String,
    pub display_name: Option<String>,
}

#[derive(Clone, Debug, PartialEq)]
pub enum Grantee {
    User(String),
    AllUsers,
    AuthenticatedUsers,
    Other(String),
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum AclPermission {
    Read,
    Write,
    FullControl,
    Other,
}

#[derive(Clone, Debug, PartialEq)]
pub struct AclGrant {
    pub grantee: Grantee,
    pub permission: AclPermission,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct BucketAcl {
    pub grants: Vec<AclGrant>,
}

impl Grantee {
    /// Whether a grant to this grantee applies to the account `id`.
    pub fn includes(&self, id: &str) -> bool {
        match self {
            Grantee::User(user) => user == id,
            Grantee::AllUsers | Grantee::AuthenticatedUsers => true,
            Grantee::Other(_) => false,
        }
    }
}
