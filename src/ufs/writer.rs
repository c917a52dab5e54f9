use std::{io, mem, sync::Arc};

use tracing::{error, warn};

use crate::{
    adapters::ObjectStore,
    model::object::{PutOptions, StoreError},
};

const CONTENT_TYPE: &str = "application/octet-stream";

/// Buffers writes and uploads them to `key` when finished.
///
/// Dropping an unfinished writer still uploads, logging any failure.
pub struct ObjectWriter {
    client: Arc<dyn ObjectStore>,
    bucket: String,
    key: String,
    buf: Vec<u8>,
    finished: bool,
}

impl ObjectWriter {
    pub fn new(client: Arc<dyn ObjectStore>, bucket: &str, key: &str) -> Self {
        Self {
            client,
            bucket: bucket.to_string(),
            key: key.to_string(),
            buf: Vec::new(),
            finished: false,
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    fn upload(&mut self) -> Result<(), StoreError> {
        self.finished = true;

        let options = PutOptions {
            content_md5: None,
            content_type: Some(CONTENT_TYPE.to_string()),
        };

        self.client
            .fs_put_object(&self.bucket, &self.key, mem::take(&mut self.buf), &options)
    }

    pub fn finish(mut self) -> bool {
        match self.upload() {
            Err(err) => {
                error!(error_message=%err, error_group="put_object", key=%self.key);
                false
            }
            Ok(_) => true,
        }
    }
}

impl io::Write for ObjectWriter {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        if self.finished {
            return Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                format!("writer for {} already finished", self.key),
            ));
        }

        self.buf.extend_from_slice(data);
        Ok(data.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Drop for ObjectWriter {
    fn drop(&mut self) {
        if self.finished {
            return;
        }

        warn!(key=%self.key, "writer dropped without finish, uploading");
        if let Err(err) = self.upload() {
            error!(error_message=%err, error_group="put_object", key=%self.key);
        }
    }
}
