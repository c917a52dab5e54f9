use aws_config::{
    environment::EnvironmentVariableCredentialsProvider,
    imds::credentials::ImdsCredentialsProvider, meta::credentials::CredentialsProviderChain,
    profile::ProfileFileCredentialsProvider,
};
use aws_sdk_s3::config::Credentials;
use tracing::info;

use crate::config::Config;

const CONFIG_PROVIDER: &str = "objectfs-config";

/// Keys given explicitly on the command line, if both halves are present.
pub fn static_credentials(config: &Config) -> Option<Credentials> {
    match (&config.access_key, &config.secret_key) {
        (Some(access_key), Some(secret_key)) => Some(Credentials::new(
            access_key,
            secret_key,
            None,
            None,
            CONFIG_PROVIDER,
        )),
        _ => None,
    }
}

/// Environment, then explicit keys, then the profile file, then instance identity.
pub fn provider_chain(config: &Config) -> CredentialsProviderChain {
    let mut chain = CredentialsProviderChain::first_try(
        "Environment",
        EnvironmentVariableCredentialsProvider::new(),
    );

    if let Some(credentials) = static_credentials(config) {
        info!(provider = CONFIG_PROVIDER, "explicit credentials configured");
        chain = chain.or_else("Config", credentials);
    }

    let mut profile = ProfileFileCredentialsProvider::builder();
    if let Some(name) = &config.profile {
        info!(profile = name, "using credentials profile");
        profile = profile.profile_name(name);
    }

    chain
        .or_else("Profile", profile.build())
        .or_else("InstanceIdentity", ImdsCredentialsProvider::builder().build())
}
