use clap::ArgMatches;

use crate::{
    model::fs::FSError,
    util::object::{self, Provider},
};

/// Keys per listing request.
pub const LISTING_LENGTH: i32 = 1000;

/// Everything needed to mount a bucket, resolved once at startup.
#[derive(Clone, Debug)]
pub struct Config {
    pub provider: Provider,
    pub bucket: String,
    /// Inherit owner and mode from the bucket ACL.
    pub inherit_acl: bool,
    /// Canonical account id to user name overrides.
    pub owner_mapping: Vec<(String, String)>,
    pub server_side_encryption: bool,
    pub listing_length: i32,
    pub endpoint: Option<String>,
    pub region: Option<String>,
    pub path_style: bool,
    pub access_key: Option<String>,
    pub secret_key: Option<String>,
    pub profile: Option<String>,
}

impl Config {
    pub fn new(bucket_uri: &str) -> Result<Self, FSError> {
        let provider = object::parse_provider_from_uri(bucket_uri)?;
        let bucket = object::parse_bucket_from_uri(bucket_uri);

        if bucket.is_empty() {
            return Err(FSError::OperationFailed(format!(
                "no bucket name in: {}",
                bucket_uri
            )));
        }

        Ok(Self {
            provider,
            bucket: bucket.to_string(),
            inherit_acl: false,
            owner_mapping: Vec::new(),
            server_side_encryption: false,
            listing_length: LISTING_LENGTH,
            endpoint: None,
            region: None,
            path_style: false,
            access_key: None,
            secret_key: None,
            profile: None,
        })
    }

    pub fn command() -> clap::Command {
        clap::Command::new("objectfs")
            .version(clap::crate_version!())
            .arg(clap::Arg::new("BUCKET").required(true).index(1))
            .arg(clap::Arg::new("MOUNT_POINT").required(true).index(2))
            .arg(
                clap::Arg::new("inherit-acl")
                    .long("inherit-acl")
                    .action(clap::ArgAction::SetTrue)
                    .help("derive owner and mode from the bucket ACL"),
            )
            .arg(
                clap::Arg::new("owner-mapping")
                    .long("owner-mapping")
                    .help("account id to user name overrides, as id1=name1;id2=name2"),
            )
            .arg(
                clap::Arg::new("server-side-encryption")
                    .long("server-side-encryption")
                    .action(clap::ArgAction::SetTrue),
            )
            .arg(
                clap::Arg::new("listing-length")
                    .long("listing-length")
                    .value_parser(clap::value_parser!(i32).range(1..=1000))
                    .default_value("1000"),
            )
            .arg(clap::Arg::new("endpoint").long("endpoint"))
            .arg(clap::Arg::new("region").long("region"))
            .arg(
                clap::Arg::new("path-style")
                    .long("path-style")
                    .action(clap::ArgAction::SetTrue),
            )
            .arg(clap::Arg::new("access-key").long("access-key"))
            .arg(clap::Arg::new("secret-key").long("secret-key"))
            .arg(clap::Arg::new("profile").long("profile"))
    }

    pub fn from_matches(matches: &ArgMatches) -> Result<Self, FSError> {
        let bucket_uri = matches
            .get_one::<String>("BUCKET")
            .ok_or_else(|| FSError::OperationFailed("missing bucket".to_string()))?;

        let mut config = Self::new(bucket_uri)?;
        config.inherit_acl = matches.get_flag("inherit-acl");
        config.owner_mapping = matches
            .get_one::<String>("owner-mapping")
            .map(|mapping| object::parse_static_mapping(mapping))
            .unwrap_or_default();
        config.server_side_encryption = matches.get_flag("server-side-encryption");
        config.listing_length = matches
            .get_one::<i32>("listing-length")
            .copied()
            .unwrap_or(LISTING_LENGTH);
        config.endpoint = matches.get_one::<String>("endpoint").cloned();
        config.region = matches.get_one::<String>("region").cloned();
        config.path_style = matches.get_flag("path-style");
        config.access_key = matches.get_one::<String>("access-key").cloned();
        config.secret_key = matches.get_one::<String>("secret-key").cloned();
        config.profile = matches.get_one::<String>("profile").cloned();

        Ok(config)
    }

    pub fn root_key(&self) -> String {
        object::root_key(self.provider, &self.bucket)
    }
}
