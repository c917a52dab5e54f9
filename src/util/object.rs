use crate::model::fs::FSError;

pub const SEPARATOR: char = '/';

/// Suffix of the zero-length object that marks a folder.
pub const FOLDER_SUFFIX: &str = "_$folder$";

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Provider {
    AWS,
    GCS,
}

impl Provider {
    pub fn scheme(&self) -> &'static str {
        match self {
            Provider::AWS => "s3://",
            Provider::GCS => "gs://",
        }
    }
}

pub fn parse_provider_from_uri(bucket_uri: &str) -> Result<Provider, FSError> {
    if bucket_uri.starts_with(Provider::AWS.scheme()) {
        Ok(Provider::AWS)
    } else if bucket_uri.starts_with(Provider::GCS.scheme()) {
        Ok(Provider::GCS)
    } else {
        Err(FSError::OperationFailed(format!(
            "failed to parse provider of: {}",
            bucket_uri
        )))
    }
}

pub fn parse_bucket_from_uri(bucket_uri: &str) -> &str {
    bucket_uri
        .split_once("://")
        .map(|(_, rest)| rest.trim_end_matches(SEPARATOR))
        .unwrap_or("")
}

pub fn root_key(provider: Provider, bucket: &str) -> String {
    format!("{}{}", provider.scheme(), bucket)
}

/// Strips the mount root and any leading separators. Idempotent.
pub fn to_key(root_key: &str, path: &str) -> String {
    let path = match path.strip_prefix(root_key) {
        Some(rest) if rest.is_empty() || rest.starts_with(SEPARATOR) => rest,
        _ => path,
    };
    path.trim_start_matches(SEPARATOR).to_string()
}

pub fn to_folder_key(key: &str) -> String {
    format!("{}{}{}", key.trim_end_matches(SEPARATOR), SEPARATOR, FOLDER_SUFFIX)
}

/// Listing prefix selecting everything below `key`. Empty for the root.
pub fn to_dir_prefix(key: &str) -> String {
    let key = key.trim_end_matches(SEPARATOR);
    if key.is_empty() {
        String::new()
    } else {
        format!("{}{}", key, SEPARATOR)
    }
}

pub fn is_folder_marker(name: &str) -> bool {
    name == FOLDER_SUFFIX || name.ends_with(&format!("{}{}", SEPARATOR, FOLDER_SUFFIX))
}

pub fn parent_key(key: &str) -> Option<String> {
    let key = key.trim_end_matches(SEPARATOR);

    match key.rfind(SEPARATOR) {
        Some(pos) if pos > 0 => Some(key[..pos].to_string()),
        _ => None,
    }
}

/// Single path component of a listing entry relative to `prefix`.
pub fn child_name(prefix: &str, entry: &str) -> Option<String> {
    let name = entry
        .strip_prefix(prefix)?
        .trim_end_matches(SEPARATOR);

    if name.is_empty() || name.contains(SEPARATOR) {
        return None;
    }

    Some(name.to_string())
}

/// Parses `id1=name1;id2=name2` into a lookup table.
pub fn parse_static_mapping(mapping: &str) -> Vec<(String, String)> {
    mapping
        .split(';')
        .filter_map(|entry| entry.split_once('='))
        .map(|(id, name)| (id.trim().to_string(), name.trim().to_string()))
        .filter(|(id, name)| !id.is_empty() && !name.is_empty())
        .collect()
}
