use std::iter::FusedIterator;

use tracing::error;

use crate::{adapters::ObjectStore, model::object::ListingPage, util::object::SEPARATOR};

/// Single-use cursor over one prefix listing.
///
/// Pages come back in the store's key order. A failed request ends the listing,
/// and once the last page has been returned every further call yields `None`.
pub struct ObjectListing<'a> {
    client: &'a dyn ObjectStore,
    bucket: &'a str,
    prefix: String,
    delimiter: String,
    max_keys: i32,
    continuation: Option<String>,
    done: bool,
}

impl<'a> ObjectListing<'a> {
    pub fn new(
        client: &'a dyn ObjectStore,
        bucket: &'a str,
        prefix: String,
        recursive: bool,
        max_keys: i32,
    ) -> Self {
        let delimiter = if recursive {
            String::new()
        } else {
            SEPARATOR.to_string()
        };

        Self {
            client,
            bucket,
            prefix,
            delimiter,
            max_keys,
            continuation: None,
            done: false,
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn next_page(&mut self) -> Option<ListingPage> {
        if self.done {
            return None;
        }

        let res = self.client.fs_list_objects(
            self.bucket,
            &self.prefix,
            &self.delimiter,
            self.max_keys,
            self.continuation.take(),
        );

        match res {
            Err(err) => {
                error!(error_message=%err, error_group="list_objects", prefix=%self.prefix);
                self.done = true;
                None
            }
            Ok(page) => {
                self.continuation = page.continuation.clone();
                if !page.truncated || self.continuation.is_none() {
                    self.done = true;
                }
                Some(page)
            }
        }
    }
}

impl Iterator for ObjectListing<'_> {
    type Item = ListingPage;

    fn next(&mut self) -> Option<ListingPage> {
        self.next_page()
    }
}

impl FusedIterator for ObjectListing<'_> {}
