use std::{
    ffi::OsStr,
    io::{Read, Write},
    time::{Duration, SystemTime},
};

use fuser::{
    FileAttr, FileType, Filesystem, ReplyAttr, ReplyData, ReplyDirectory, ReplyEmpty, ReplyEntry,
    ReplyWrite, Request, TimeOrNow,
};
use libc::{EEXIST, EIO, ENOENT, ENOTEMPTY};
use tracing::{error, info, span, Level};

use crate::{
    fs,
    model::fs::{FSError, FSNode},
    util::object,
};

const TTL: Duration = Duration::new(0, 0);

fn errno(err: &FSError) -> libc::c_int {
    match err {
        FSError::NotFound(_) => ENOENT,
        FSError::OperationFailed(_) => EIO,
    }
}

impl fs::ObjectFS {
    fn parent_node(&self, parent: u64) -> Result<FSNode, libc::c_int> {
        self.node(parent).ok_or_else(|| {
            error!(
                error_message = "failed to find parent ino",
                error_group = "not_found",
                parent_ino = parent
            );
            ENOENT
        })
    }

    fn ino_node(&self, ino: u64) -> Result<FSNode, libc::c_int> {
        self.node(ino).ok_or_else(|| {
            error!(
                error_message = "failed to find ino",
                error_group = "not_found",
                ino = ino
            );
            ENOENT
        })
    }

    fn read_all(&self, key: &str) -> Result<Vec<u8>, libc::c_int> {
        let mut reader = self.ufs.open(key).ok_or(EIO)?;

        let mut bytes = Vec::new();
        reader.read_to_end(&mut bytes).map_err(|err| {
            error!(error_message=%err, error_group="read_object", key=key);
            EIO
        })?;

        Ok(bytes)
    }

    fn write_all(&self, key: &str, bytes: &[u8]) -> Result<(), libc::c_int> {
        let mut sink = self.ufs.create_write_sink(key);

        if let Err(err) = sink.write_all(bytes) {
            error!(error_message=%err, error_group="write_object", key=%sink.key());
            return Err(EIO);
        }

        if sink.finish() {
            Ok(())
        } else {
            Err(EIO)
        }
    }

    /// Folder markers are never entries of their folder.
    fn child_attr(&self, key: &str) -> Result<FileAttr, libc::c_int> {
        if object::is_folder_marker(key) {
            return Err(ENOENT);
        }

        self.attr(0, key).map_err(|err| errno(&err))
    }

    fn make_dir(&self, key: &str) -> Result<(), libc::c_int> {
        if self.ufs.exists(key) {
            return Err(EEXIST);
        }

        if self.ufs.mkdirs(key, false) {
            Ok(())
        } else {
            Err(EIO)
        }
    }

    fn remove_dir(&self, key: &str) -> Result<(), libc::c_int> {
        if !self.ufs.is_directory(key) {
            return Err(ENOENT);
        }

        if self.ufs.has_children(key) {
            return Err(ENOTEMPTY);
        }

        if !self.ufs.delete_directory(key, false) {
            return Err(EIO);
        }

        self.forget_key(key);
        Ok(())
    }
}

impl Filesystem for fs::ObjectFS {
    fn init(
        &mut self,
        _req: &Request<'_>,
        _config: &mut fuser::KernelConfig,
    ) -> Result<(), libc::c_int> {
        let span = span!(Level::INFO, "init", context = "init");
        let _e = span.enter();
        info!(root_key=%self.ufs.root_key(), uid=self.uid, gid=self.gid, "called");

        Ok(())
    }

    fn destroy(&mut self) {
        let span = span!(Level::INFO, "destroy", context = "destroy");
        let _e = span.enter();
        info!("called");

        self.clear();
    }

    fn lookup(&mut self, _req: &Request, parent: u64, name: &OsStr, reply: ReplyEntry) {
        let span = span!(Level::INFO, "lookup", context = "lookup");
        let _e = span.enter();
        info!(parent_ino=parent, filename=%name.to_string_lossy(), "called");

        let parent_node = match self.parent_node(parent) {
            Err(code) => {
                reply.error(code);
                return;
            }
            Ok(pn) => pn,
        };

        let key = self.child_key(&parent_node, &name.to_string_lossy());

        // Missing names never get an inode.
        let mut attr = match self.child_attr(&key) {
            Err(code) => {
                reply.error(code);
                return;
            }
            Ok(a) => a,
        };

        attr.ino = self.index_key(&key, parent).ino;
        reply.entry(&TTL, &attr, 0);
    }

    fn forget(&mut self, _req: &Request<'_>, ino: u64, nlookup: u64) {
        let span = span!(Level::INFO, "forget", context = "forget");
        let _e = span.enter();
        info!(ino = ino, nlookup = nlookup, "called");
    }

    fn getattr(&mut self, _req: &Request, ino: u64, fh: Option<u64>, reply: ReplyAttr) {
        let span = span!(Level::INFO, "getattr", context = "getattr");
        let _e = span.enter();
        info!(ino = ino, fh = fh, "called");

        let node = match self.ino_node(ino) {
            Err(code) => {
                reply.error(code);
                return;
            }
            Ok(n) => n,
        };

        match self.attr(ino, &node.key) {
            Err(err) => {
                error!(error_message=%err, error_group="getattr", key=%node.key);
                reply.error(errno(&err));
            }
            Ok(attr) => reply.attr(&TTL, &attr),
        }
    }

    fn setattr(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        mode: Option<u32>,
        uid: Option<u32>,
        gid: Option<u32>,
        size: Option<u64>,
        _atime: Option<TimeOrNow>,
        _mtime: Option<TimeOrNow>,
        _ctime: Option<SystemTime>,
        fh: Option<u64>,
        _crtime: Option<SystemTime>,
        _chgtime: Option<SystemTime>,
        _bkuptime: Option<SystemTime>,
        _flags: Option<u32>,
        reply: ReplyAttr,
    ) {
        let span = span!(Level::INFO, "setattr", context = "setattr");
        let _e = span.enter();
        info!(ino = ino, fh = fh, mode = mode, uid = uid, gid = gid, size = size, "called");

        let node = match self.ino_node(ino) {
            Err(code) => {
                reply.error(code);
                return;
            }
            Ok(n) => n,
        };

        if let Some(mode) = mode {
            self.ufs.set_mode(&node.key, (mode & 0o7777) as u16);
        }

        if uid.is_some() || gid.is_some() {
            let user = uid.map(|uid| uid.to_string()).unwrap_or_default();
            let group = gid.map(|gid| gid.to_string()).unwrap_or_default();
            self.ufs.set_owner(&node.key, &user, &group);
        }

        if let Some(size) = size {
            let bytes = if size == 0 {
                Vec::new()
            } else {
                match self.read_all(&node.key) {
                    Err(code) => {
                        reply.error(code);
                        return;
                    }
                    Ok(mut bytes) => {
                        bytes.resize(size as usize, 0);
                        bytes
                    }
                }
            };

            if let Err(code) = self.write_all(&node.key, &bytes) {
                reply.error(code);
                return;
            }
        }

        match self.attr(ino, &node.key) {
            Err(err) => reply.error(errno(&err)),
            Ok(attr) => reply.attr(&TTL, &attr),
        }
    }

    fn mknod(
        &mut self,
        _req: &Request,
        parent: u64,
        name: &OsStr,
        mode: u32,
        _umask: u32,
        _rdev: u32,
        reply: ReplyEntry,
    ) {
        let span = span!(Level::INFO, "mknod", context = "mknod");
        let _e = span.enter();
        info!(parent_ino=parent, filename=%name.to_string_lossy(), mode=mode, "called");

        if (mode & libc::S_IFMT) != libc::S_IFREG {
            reply.error(libc::EOPNOTSUPP);
            return;
        }

        let parent_node = match self.parent_node(parent) {
            Err(code) => {
                reply.error(code);
                return;
            }
            Ok(pn) => pn,
        };

        let key = self.child_key(&parent_node, &name.to_string_lossy());

        if let Err(code) = self.write_all(&key, &[]) {
            reply.error(code);
            return;
        }

        let node = self.index_key(&key, parent);
        match self.attr(node.ino, &key) {
            Err(err) => reply.error(errno(&err)),
            Ok(attr) => reply.entry(&TTL, &attr, 0),
        }
    }

    fn mkdir(
        &mut self,
        _req: &Request<'_>,
        parent: u64,
        name: &OsStr,
        mode: u32,
        umask: u32,
        reply: ReplyEntry,
    ) {
        let span = span!(Level::INFO, "mkdir", context = "mkdir");
        let _e = span.enter();
        info!(parent_ino=parent, filename=%name.to_string_lossy(), mode=mode, umask=umask, "called");

        let parent_node = match self.parent_node(parent) {
            Err(code) => {
                reply.error(code);
                return;
            }
            Ok(pn) => pn,
        };

        let key = self.child_key(&parent_node, &name.to_string_lossy());

        if let Err(code) = self.make_dir(&key) {
            reply.error(code);
            return;
        }

        let node = self.index_key(&key, parent);
        match self.attr(node.ino, &key) {
            Err(err) => reply.error(errno(&err)),
            Ok(attr) => reply.entry(&TTL, &attr, 0),
        }
    }

    fn unlink(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEmpty) {
        let span = span!(Level::INFO, "unlink", context = "unlink");
        let _e = span.enter();
        info!(parent_ino=parent, filename=%name.to_string_lossy(), "called");

        let parent_node = match self.parent_node(parent) {
            Err(code) => {
                reply.error(code);
                return;
            }
            Ok(pn) => pn,
        };

        let key = self.child_key(&parent_node, &name.to_string_lossy());

        if !self.ufs.is_file(&key) {
            reply.error(ENOENT);
            return;
        }

        if !self.ufs.delete(&key) {
            reply.error(EIO);
            return;
        }

        self.forget_key(&key);
        reply.ok();
    }

    fn rmdir(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEmpty) {
        let span = span!(Level::INFO, "rmdir", context = "rmdir");
        let _e = span.enter();
        info!(parent_ino=parent, filename=%name.to_string_lossy(), "called");

        let parent_node = match self.parent_node(parent) {
            Err(code) => {
                reply.error(code);
                return;
            }
            Ok(pn) => pn,
        };

        let key = self.child_key(&parent_node, &name.to_string_lossy());

        match self.remove_dir(&key) {
            Err(code) => reply.error(code),
            Ok(_) => reply.ok(),
        }
    }

    fn rename(
        &mut self,
        _req: &Request<'_>,
        parent: u64,
        name: &OsStr,
        newparent: u64,
        newname: &OsStr,
        flags: u32,
        reply: ReplyEmpty,
    ) {
        let span = span!(Level::INFO, "rename", context = "rename");
        let _e = span.enter();
        info!(
            parent_ino=parent,
            filename=%name.to_string_lossy(),
            new_parent_ino=newparent,
            new_filename=%newname.to_string_lossy(),
            flags=flags,
            "called"
        );

        let (parent_node, new_parent_node) =
            match (self.parent_node(parent), self.parent_node(newparent)) {
                (Ok(pn), Ok(npn)) => (pn, npn),
                (Err(code), _) | (_, Err(code)) => {
                    reply.error(code);
                    return;
                }
            };

        let src = self.child_key(&parent_node, &name.to_string_lossy());
        let dst = self.child_key(&new_parent_node, &newname.to_string_lossy());

        let renamed = if self.ufs.is_file(&src) {
            self.ufs.rename_file(&src, &dst)
        } else if self.ufs.is_directory(&src) {
            self.ufs.rename_directory(&src, &dst)
        } else {
            reply.error(ENOENT);
            return;
        };

        if !renamed {
            reply.error(EIO);
            return;
        }

        self.forget_key(&dst);
        self.rename_keys(&src, &dst, newparent);
        reply.ok();
    }

    fn read(
        &mut self,
        _req: &Request,
        ino: u64,
        fh: u64,
        offset: i64,
        size: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyData,
    ) {
        let span = span!(Level::INFO, "read", context = "read");
        let _e = span.enter();
        info!(ino = ino, fh = fh, offset = offset, size = size, "called");

        let node = match self.ino_node(ino) {
            Err(code) => {
                reply.error(code);
                return;
            }
            Ok(n) => n,
        };

        let offset = offset.max(0) as u64;
        let object_size = match self.ufs.get_size(&node.key) {
            Err(err) => {
                error!(error_message=%err, error_group="get_size", key=%node.key);
                reply.error(errno(&err));
                return;
            }
            Ok(s) => s,
        };

        if offset >= object_size {
            reply.data(&[]);
            return;
        }

        let reader = match self.ufs.open_at(&node.key, offset) {
            None => {
                reply.error(EIO);
                return;
            }
            Some(r) => r,
        };

        let mut bytes = Vec::with_capacity(size as usize);
        if let Err(err) = reader.take(size as u64).read_to_end(&mut bytes) {
            error!(error_message=%err, error_group="read_object", key=%node.key);
            reply.error(EIO);
            return;
        }

        reply.data(&bytes)
    }

    fn write(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        fh: u64,
        offset: i64,
        data: &[u8],
        _write_flags: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyWrite,
    ) {
        let span = span!(Level::INFO, "write", context = "write");
        let _e = span.enter();
        info!(
            ino = ino,
            fh = fh,
            offset = offset,
            size = data.len(),
            "called"
        );

        let node = match self.ino_node(ino) {
            Err(code) => {
                reply.error(code);
                return;
            }
            Ok(n) => n,
        };

        let mut bytes = match self.read_all(&node.key) {
            Err(code) => {
                reply.error(code);
                return;
            }
            Ok(b) => b,
        };

        let offset = offset.max(0) as usize;
        let end_offset = offset + data.len();
        if end_offset > bytes.len() {
            bytes.resize(end_offset, 0);
        }
        bytes[offset..end_offset].copy_from_slice(data);

        if let Err(code) = self.write_all(&node.key, &bytes) {
            reply.error(code);
            return;
        }

        reply.written(data.len() as u32);
    }

    fn readdir(
        &mut self,
        _req: &Request,
        ino: u64,
        fh: u64,
        offset: i64,
        mut reply: ReplyDirectory,
    ) {
        let span = span!(Level::INFO, "readdir", context = "readdir");
        let _e = span.enter();
        info!(ino = ino, fh = fh, offset = offset, "called");

        let node = match self.ino_node(ino) {
            Err(code) => {
                reply.error(code);
                return;
            }
            Ok(n) => n,
        };

        let mut entries = vec![
            (node.ino, FileType::Directory, ".".to_string()),
            (node.parent, FileType::Directory, "..".to_string()),
        ];

        let mut listing = self.ufs.list(&node.key, false);
        let prefix = listing.prefix().to_string();
        let mut children = Vec::new();
        while let Some(page) = listing.next_page() {
            for common_prefix in page.common_prefixes {
                if let Some(name) = object::child_name(&prefix, &common_prefix) {
                    children.push((name, FileType::Directory));
                }
            }

            for object_name in page.object_names {
                if object::is_folder_marker(&object_name) {
                    continue;
                }
                if let Some(name) = object::child_name(&prefix, &object_name) {
                    children.push((name, FileType::RegularFile));
                }
            }
        }

        for (name, kind) in children {
            let key = self.child_key(&node, &name);
            let child = self.index_key(&key, node.ino);
            entries.push((child.ino, kind, name));
        }

        for (i, entry) in entries.into_iter().enumerate().skip(offset as usize) {
            let next_offset = (i + 1) as i64;
            if reply.add(entry.0, next_offset, entry.1, entry.2) {
                break;
            }
        }

        reply.ok();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::{adapters::mock::MockClient, config::Config, ufs::UnderFS};

    #[test]
    fn test_errno() {
        let cases = vec![
            (FSError::NotFound("file".to_string()), ENOENT),
            (FSError::OperationFailed("copy".to_string()), EIO),
        ];

        for (err, expected) in cases {
            assert_eq!(errno(&err), expected, "failed for case: {}", err);
        }
    }

    fn new_fs(keys: &[&str]) -> (Arc<MockClient>, fs::ObjectFS) {
        let client = Arc::new(MockClient::with_objects(keys));
        let config = Config::new("s3://bucket").unwrap();
        let ufs = UnderFS::new(client.clone(), &config).unwrap();

        (client, fs::ObjectFS::new(ufs))
    }

    #[test]
    fn test_child_attr() {
        let (_, fs) = new_fs(&["dir/_$folder$", "dir/file"]);

        let cases = vec![
            ("dir", Ok(FileType::Directory)),
            ("dir/file", Ok(FileType::RegularFile)),
            ("dir/_$folder$", Err(ENOENT)),
            ("dir/missing", Err(ENOENT)),
        ];

        for (key, expected) in cases {
            let result = fs.child_attr(key).map(|attr| attr.kind);
            assert_eq!(result, expected, "failed for case: {}", key);
        }
    }

    #[test]
    fn test_make_dir() {
        let (client, fs) = new_fs(&["dir/_$folder$", "file"]);

        let cases = vec![
            ("dir", Err(EEXIST)),
            ("file", Err(EEXIST)),
            ("dir/sub", Ok(())),
            ("missing/sub", Err(EIO)),
        ];

        for (key, expected) in cases {
            assert_eq!(fs.make_dir(key), expected, "failed for case: {}", key);
        }

        assert!(client.contains("dir/sub/_$folder$"));
        assert!(!client.contains("missing/sub/_$folder$"));
    }

    #[test]
    fn test_remove_dir() {
        let (client, fs) = new_fs(&["full/_$folder$", "full/file", "empty/_$folder$", "file"]);

        let cases = vec![
            ("full", Err(ENOTEMPTY)),
            ("missing", Err(ENOENT)),
            ("file", Err(ENOENT)),
            ("empty", Ok(())),
        ];

        for (key, expected) in cases {
            assert_eq!(fs.remove_dir(key), expected, "failed for case: {}", key);
        }
        assert!(!client.contains("empty/_$folder$"));

        client.insert("broken/_$folder$", b"");
        client.fail_deletes(true);
        assert_eq!(fs.remove_dir("broken"), Err(EIO));
        assert!(client.contains("broken/_$folder$"));
    }
}
