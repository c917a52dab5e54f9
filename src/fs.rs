use std::{
    collections::HashMap,
    sync::{Mutex, MutexGuard},
    time::SystemTime,
};

use fuser::{FileAttr, FileType};
use nix::unistd::{self, Group, User};

use crate::{
    model::fs::{FSError, FSNode},
    ufs::UnderFS,
    util::object::{self, SEPARATOR},
};

pub const ROOT_INO: u64 = 1;

const BLOCK_SIZE: u32 = 512;

#[derive(Default)]
pub struct Inodes {
    current_ino: u64,
    ino_to_node: HashMap<u64, FSNode>,
    key_to_ino: HashMap<String, u64>,
}

/// FUSE view of a bucket. Only inode numbers are remembered, attributes come
/// from the store on every call.
pub struct ObjectFS {
    pub ufs: UnderFS,
    pub uid: u32,
    pub gid: u32,
    inodes: Mutex<Inodes>,
}

/// Local ids of the bucket owner, or of this process when the owner is unknown here.
fn resolve_ids(owner: &str, group: &str) -> (u32, u32) {
    let user = if owner.is_empty() {
        None
    } else {
        User::from_name(owner).ok().flatten()
    };
    let group = if group.is_empty() {
        None
    } else {
        Group::from_name(group).ok().flatten()
    };

    let uid = user.as_ref().map(|u| u.uid).unwrap_or_else(unistd::getuid);
    let gid = group
        .map(|g| g.gid)
        .or_else(|| user.map(|u| u.gid))
        .unwrap_or_else(unistd::getgid);

    (uid.as_raw(), gid.as_raw())
}

impl ObjectFS {
    pub fn new(ufs: UnderFS) -> Self {
        let (uid, gid) = resolve_ids(ufs.get_owner(""), ufs.get_group(""));

        let mut inodes = Inodes {
            current_ino: ROOT_INO,
            ..Default::default()
        };
        inodes.ino_to_node.insert(
            ROOT_INO,
            FSNode {
                ino: ROOT_INO,
                key: String::new(),
                parent: ROOT_INO,
            },
        );
        inodes.key_to_ino.insert(String::new(), ROOT_INO);

        Self {
            ufs,
            uid,
            gid,
            inodes: Mutex::new(inodes),
        }
    }

    fn inodes(&self) -> MutexGuard<'_, Inodes> {
        self.inodes
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn node(&self, ino: u64) -> Option<FSNode> {
        self.inodes().ino_to_node.get(&ino).cloned()
    }

    /// Returns the node of `key`, assigning a new inode on first sight.
    pub fn index_key(&self, key: &str, parent: u64) -> FSNode {
        let mut inodes = self.inodes();

        if let Some(node) = inodes
            .key_to_ino
            .get(key)
            .and_then(|ino| inodes.ino_to_node.get(ino))
        {
            return node.clone();
        }

        inodes.current_ino += 1;
        let node = FSNode {
            ino: inodes.current_ino,
            key: key.to_string(),
            parent,
        };

        inodes.ino_to_node.insert(node.ino, node.clone());
        inodes.key_to_ino.insert(node.key.clone(), node.ino);

        node
    }

    pub fn forget_key(&self, key: &str) {
        let mut inodes = self.inodes();

        if let Some(ino) = inodes.key_to_ino.remove(key) {
            inodes.ino_to_node.remove(&ino);
        }
    }

    /// Moves `src` and everything below it to `dst`, keeping inode numbers.
    pub fn rename_keys(&self, src: &str, dst: &str, new_parent: u64) {
        let mut inodes = self.inodes();
        let src_prefix = object::to_dir_prefix(src);

        let moved: Vec<u64> = inodes
            .ino_to_node
            .values()
            .filter(|node| node.key == src || node.key.starts_with(&src_prefix))
            .map(|node| node.ino)
            .collect();

        for ino in moved {
            let Some(node) = inodes.ino_to_node.get_mut(&ino) else {
                continue;
            };

            let old_key = node.key.clone();
            node.key = format!("{}{}", dst, &old_key[src.len()..]);
            if old_key == src {
                node.parent = new_parent;
            }
            let new_key = node.key.clone();

            inodes.key_to_ino.remove(&old_key);
            inodes.key_to_ino.insert(new_key, ino);
        }
    }

    pub fn clear(&self) {
        let mut inodes = self.inodes();
        inodes.ino_to_node.retain(|ino, _| *ino == ROOT_INO);
        inodes.key_to_ino.retain(|key, _| key.is_empty());
    }

    pub fn child_key(&self, parent: &FSNode, name: &str) -> String {
        if parent.key.is_empty() {
            name.to_string()
        } else {
            format!("{}{}{}", parent.key, SEPARATOR, name)
        }
    }

    fn build_attr(&self, ino: u64, kind: FileType, size: u64, mtime: SystemTime) -> FileAttr {
        FileAttr {
            ino,
            size,
            blocks: size.div_ceil(BLOCK_SIZE as u64),
            atime: mtime,
            mtime,
            ctime: mtime,
            crtime: mtime,
            kind,
            perm: self.ufs.get_mode(""),
            nlink: if kind == FileType::Directory { 2 } else { 1 },
            uid: self.uid,
            gid: self.gid,
            rdev: 0,
            blksize: BLOCK_SIZE,
            flags: 0,
        }
    }

    /// Attributes of `key`, resolved against the store.
    pub fn attr(&self, ino: u64, key: &str) -> Result<FileAttr, FSError> {
        let kind = if self.ufs.is_root(key) || !self.ufs.is_file(key) {
            if !self.ufs.is_directory(key) {
                return Err(FSError::NotFound(key.to_string()));
            }
            FileType::Directory
        } else {
            FileType::RegularFile
        };

        let size = if kind == FileType::Directory {
            0
        } else {
            self.ufs.get_size(key)?
        };
        let mtime = self.ufs.get_modified_time(key)?;

        Ok(self.build_attr(ino, kind, size, mtime))
    }
}
