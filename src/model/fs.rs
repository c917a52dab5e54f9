use std::time::SystemTime;

#[derive(Debug, thiserror::Error)]
pub enum FSError {
    #[error("no file or folder found at: {0}")]
    NotFound(String),
    #[error("operation failed: {0}")]
    OperationFailed(String),
}

/// Bucket-wide identity computed once at mount time.
#[derive(Clone, Debug, PartialEq)]
pub struct MountIdentity {
    pub root_key: String,
    pub owner: String,
    pub mode: u16,
    pub mounted_at: SystemTime,
}

/// Inode table entry. Only the path is kept, attributes are resolved per call.
#[derive(Clone, Debug)]
pub struct FSNode {
    pub ino: u64,
    pub key: String,
    pub parent: u64,
}
