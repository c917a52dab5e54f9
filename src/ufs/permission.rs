use std::time::SystemTime;

use tracing::info;

use crate::{
    adapters::ObjectStore,
    config::Config,
    model::{
        fs::{FSError, MountIdentity},
        object::{AccountOwner, AclPermission, BucketAcl},
    },
};

/// Mode used when ownership is not inherited from the bucket ACL.
pub const DEFAULT_MODE: u16 = 0o700;

/// Owner mode bits granted to `account_id` by the bucket ACL.
pub fn translate_bucket_acl(acl: &BucketAcl, account_id: &str) -> u16 {
    acl.grants
        .iter()
        .filter(|grant| grant.grantee.includes(account_id))
        .fold(0, |mode, grant| match grant.permission {
            AclPermission::Read => mode | 0o500,
            AclPermission::Write => mode | 0o200,
            AclPermission::FullControl => mode | 0o700,
            AclPermission::Other => mode,
        })
}

/// Mapping table first, then the display name, then the raw id.
pub fn resolve_owner_name(mapping: &[(String, String)], owner: &AccountOwner) -> String {
    if let Some((_, name)) = mapping.iter().find(|(id, _)| *id == owner.id) {
        return name.clone();
    }

    match &owner.display_name {
        Some(name) if !name.is_empty() => name.clone(),
        _ => owner.id.clone(),
    }
}

pub fn synthesize_identity(
    client: &dyn ObjectStore,
    config: &Config,
) -> Result<MountIdentity, FSError> {
    let mut identity = MountIdentity {
        root_key: config.root_key(),
        owner: String::new(),
        mode: DEFAULT_MODE,
        mounted_at: SystemTime::now(),
    };

    if !config.inherit_acl {
        return Ok(identity);
    }

    let owner = client
        .fs_get_account_owner(&config.bucket)
        .map_err(|err| FSError::OperationFailed(err.to_string()))?;
    let acl = client
        .fs_get_bucket_acl(&config.bucket)
        .map_err(|err| FSError::OperationFailed(err.to_string()))?;

    identity.owner = resolve_owner_name(&config.owner_mapping, &owner);
    identity.mode = translate_bucket_acl(&acl, &owner.id);

    info!(owner = %identity.owner, mode = identity.mode, "inherited bucket acl");

    Ok(identity)
}
