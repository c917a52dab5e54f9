use std::{process, sync::Arc};

use tracing::{error, info, span, Level};
use tracing_subscriber::EnvFilter;

use crate::{adapters::ObjectStore, config::Config, util::object::Provider};

mod adapters;
mod config;
mod credentials;
mod fs;
mod fuse;
mod model;
mod ufs;
mod util;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .json()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let span = span!(Level::INFO, "main", context = "main");
    let _e = span.enter();
    info!("called");

    let matches = Config::command().get_matches();

    let config = match Config::from_matches(&matches) {
        Err(err) => {
            error!(error_message=%err, error_group="config");
            process::exit(2);
        }
        Ok(c) => c,
    };

    let Some(mountpoint) = matches.get_one::<String>("MOUNT_POINT") else {
        error!(error_message = "missing mount point", error_group = "config");
        process::exit(2);
    };
    info!(bucket=%config.bucket, mountpoint=%mountpoint, provider=?config.provider, "args");

    let client: Arc<dyn ObjectStore> = match config.provider {
        Provider::AWS => Arc::new(adapters::s3::new_client(&config).await),
        Provider::GCS => match adapters::gcs::new_client(&config).await {
            Err(err) => {
                error!(error_message=%err, error_group="gcs_client");
                process::exit(1);
            }
            Ok(c) => Arc::new(c),
        },
    };

    let ufs = match ufs::UnderFS::new(client, &config) {
        Err(err) => {
            error!(error_message=%err, error_group="mount_identity");
            process::exit(1);
        }
        Ok(u) => u,
    };

    let options = vec![
        fuser::MountOption::FSName("objectfs".to_string()),
        fuser::MountOption::AutoUnmount,
        fuser::MountOption::AllowRoot,
    ];

    let fs = fs::ObjectFS::new(ufs);
    if let Err(err) = fuser::mount2(fs, mountpoint, &options) {
        error!(error_message=%err, error_group="mount");
        process::exit(1);
    }
}
