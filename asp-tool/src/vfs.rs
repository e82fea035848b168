// SPDX-License-Identifier: MIT

//! The in-memory virtual filesystem model (spec §4.1): a path -> FilePolicy
//! map plus a path -> MountPoint map, with the small set of mutating
//! operations the init boot simulator and label resolver need.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

use crate::context::SELinuxContext;

const S_IFMT: u32 = 0o170000;
const S_IFDIR: u32 = 0o040000;
const S_IFREG: u32 = 0o100000;

/// A file capability tag applied by the trust pass (§4.8 "Trust pass").
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum FileTag {
    Usb,
    Bluetooth,
    Nfc,
    Modem,
}

/// One VFS entry. Immutable after creation except for the fields the boot
/// simulator and trust pass are explicitly allowed to mutate (uid/gid/mode
/// via `chown`/`chmod`, `selinux` during label resolution, `tags` during the
/// trust pass).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilePolicy {
    /// Host-side source path; `None` for files lazily created by init
    /// commands that have no backing host file (pseudo `/dev`, `/sys`
    /// nodes).
    pub original_path: Option<String>,
    pub uid: u32,
    pub gid: u32,
    /// POSIX mode bits, including the file-type bits (`S_IFDIR` etc).
    pub mode: u32,
    pub size: u64,
    pub symlink_target: Option<String>,
    pub selinux: Option<SELinuxContext>,
    pub capabilities: Option<u64>,
    pub tags: BTreeSet<FileTag>,
}

impl FilePolicy {
    pub fn new(mode: u32, uid: u32, gid: u32) -> Self {
        Self {
            original_path: None,
            uid,
            gid,
            mode,
            size: 0,
            symlink_target: None,
            selinux: None,
            capabilities: None,
            tags: BTreeSet::new(),
        }
    }

    pub fn is_dir(&self) -> bool {
        self.mode & S_IFMT == S_IFDIR
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MountPoint {
    pub fstype: String,
    pub device: String,
    pub options: Vec<String>,
}

#[derive(Debug, Error)]
pub enum VfsError {
    #[error("duplicate path: {0}")]
    DuplicatePath(String),
    #[error("malformed path: {0}")]
    MalformedPath(String),
    #[error("missing path: {0}")]
    MissingPath(String),
    #[error("duplicate mount point: {0}")]
    DuplicateMount(String),
}

/// Canonicalize a path: strip a trailing slash unless it's the root.
pub fn canonicalize(path: &str) -> String {
    if path == "/" {
        return "/".to_string();
    }
    path.trim_end_matches('/').to_string()
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Vfs {
    pub files: BTreeMap<String, FilePolicy>,
    pub mount_points: BTreeMap<String, MountPoint>,
}

impl Vfs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, path: &str, fp: FilePolicy) -> Result<(), VfsError> {
        let path = canonicalize(path);
        if self.files.contains_key(&path) {
            return Err(VfsError::DuplicatePath(path));
        }
        self.files.insert(path, fp);
        Ok(())
    }

    pub fn add_or_update(&mut self, path: &str, fp: FilePolicy) {
        let path = canonicalize(path);
        self.files.insert(path, fp);
    }

    /// Create a directory at `path` with the given ownership, OR-ing in
    /// `S_IFDIR`. Idempotent: re-creating an existing directory is a no-op
    /// (matching init's `mkdir` semantics, which tolerates an already
    /// existing directory).
    pub fn mkdir(&mut self, path: &str, uid: u32, gid: u32, mode: u32) {
        let path = canonicalize(path);
        self.files
            .entry(path)
            .or_insert_with(|| FilePolicy::new(mode | S_IFDIR, uid, gid));
    }

    /// `chown`. Lazily creates a regular pseudo-file (mode 0644) if the
    /// path doesn't exist yet, matching init's lazy uevent-node creation
    /// policy (spec §4.2, scenario S5) rather than failing.
    pub fn chown(&mut self, path: &str, uid: u32, gid: u32) {
        let path = canonicalize(path);
        let fp = self
            .files
            .entry(path)
            .or_insert_with(|| FilePolicy::new(0o644 | S_IFREG, 0, 0));
        fp.uid = uid;
        fp.gid = gid;
    }

    /// `chmod`. Replaces the low 12 mode bits, preserving the file-type
    /// bits. Lazily creates the path the same way `chown` does.
    pub fn chmod(&mut self, path: &str, mode: u32) {
        let path = canonicalize(path);
        let fp = self
            .files
            .entry(path)
            .or_insert_with(|| FilePolicy::new(0o644 | S_IFREG, 0, 0));
        fp.mode = (fp.mode & S_IFMT) | (mode & 0o7777);
    }

    pub fn get(&self, path: &str) -> Option<&FilePolicy> {
        self.files.get(&canonicalize(path))
    }

    pub fn get_mut(&mut self, path: &str) -> Option<&mut FilePolicy> {
        let path = canonicalize(path);
        self.files.get_mut(&path)
    }

    /// Glob-like matching supporting a single leading/trailing/embedded
    /// `*` wildcard, the only pattern shape `.rc`/`find` callers use (e.g.
    /// `*/fstab.*`, `*<domain>`).
    pub fn find(&self, glob: &str) -> Vec<String> {
        self.files
            .keys()
            .filter(|path| glob_match(glob, path))
            .cloned()
            .collect()
    }

    pub fn add_mount_point(
        &mut self,
        path: &str,
        fstype: &str,
        device: &str,
        options: Vec<String>,
    ) -> Result<(), VfsError> {
        let path = canonicalize(path);
        if self.mount_points.contains_key(&path) {
            return Err(VfsError::DuplicateMount(path));
        }
        self.mount_points.insert(
            path,
            MountPoint {
                fstype: fstype.to_string(),
                device: device.to_string(),
                options,
            },
        );
        Ok(())
    }

    /// Graft `other`'s entire tree under `at`, prefixing every path.
    /// FilePolicies move by value (the original preserves them "by
    /// reference"; here that's simply a move since nothing else still
    /// holds `other` afterwards).
    pub fn mount(&mut self, other: Vfs, at: &str) -> Result<(), VfsError> {
        let at = canonicalize(at);

        for (path, fp) in other.files {
            let grafted = if path == "/" {
                at.clone()
            } else {
                format!("{at}{path}")
            };
            if self.files.contains_key(&grafted) {
                return Err(VfsError::DuplicatePath(grafted));
            }
            self.files.insert(grafted, fp);
        }

        for (path, mp) in other.mount_points {
            let grafted = if path == "/" {
                at.clone()
            } else {
                format!("{at}{path}")
            };
            self.mount_points.insert(grafted, mp);
        }

        Ok(())
    }

    /// Drop every file whose path is in `paths`, warning with a count the
    /// way `apply_file_contexts` does (`Dropped %d files with no file
    /// context`).
    pub fn drop_files(&mut self, paths: &[String]) {
        for path in paths {
            self.files.remove(path);
        }
        if !paths.is_empty() {
            warn!("Dropped {} files with no file context", paths.len());
        }
    }
}

/// Simple shell-style glob supporting any number of `*` wildcards (each
/// matching zero or more characters, never crossing is not a special case
/// here since paths have no newlines). Good enough for the patterns this
/// codebase actually uses: `*/fstab.*`, `*/ueventd.*.rc`, `*<domain>`.
fn glob_match(glob: &str, path: &str) -> bool {
    let segments: Vec<&str> = glob.split('*').collect();
    if segments.len() == 1 {
        return glob == path;
    }

    let mut rest = path;

    if let Some(first) = segments.first() {
        if !rest.starts_with(first) {
            return false;
        }
        rest = &rest[first.len()..];
    }

    let last_idx = segments.len() - 1;
    for (i, seg) in segments.iter().enumerate().skip(1) {
        if seg.is_empty() {
            continue;
        }
        if i == last_idx {
            if !rest.ends_with(seg) {
                return false;
            }
        } else {
            match rest.find(seg) {
                Some(pos) => rest = &rest[pos + seg.len()..],
                None => return false,
            }
        }
    }

    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mkdir_is_idempotent() {
        let mut vfs = Vfs::new();
        vfs.mkdir("/data", 0, 0, 0o755);
        vfs.mkdir("/data", 9999, 9999, 0o700);
        let fp = vfs.get("/data").unwrap();
        // First call wins; second is a no-op per spec's idempotence note.
        assert_eq!(fp.uid, 0);
    }

    #[test]
    fn chown_lazily_creates_pseudo_file() {
        let mut vfs = Vfs::new();
        vfs.chown("/sys/class/net/wlan0/address", 1001, 1001);
        let fp = vfs.get("/sys/class/net/wlan0/address").unwrap();
        assert_eq!(fp.uid, 1001);
        assert_eq!(fp.gid, 1001);
        assert_eq!(fp.mode & S_IFMT, S_IFREG);
        assert_eq!(fp.mode & 0o7777, 0o644);
    }

    #[test]
    fn chmod_preserves_file_type_bits() {
        let mut vfs = Vfs::new();
        vfs.mkdir("/data", 0, 0, 0o755);
        vfs.chmod("/data", 0o700);
        let fp = vfs.get("/data").unwrap();
        assert!(fp.is_dir());
        assert_eq!(fp.mode & 0o7777, 0o700);
    }

    #[test]
    fn mount_grafts_paths_with_prefix() {
        let mut root = Vfs::new();
        let mut system = Vfs::new();
        system.add("/bin/sh", FilePolicy::new(S_IFREG | 0o755, 0, 0)).unwrap();
        root.mount(system, "/system").unwrap();
        assert!(root.get("/system/bin/sh").is_some());
    }

    #[test]
    fn find_matches_simple_glob() {
        let mut vfs = Vfs::new();
        vfs.add("/vendor/etc/fstab.qcom", FilePolicy::new(S_IFREG, 0, 0)).unwrap();
        vfs.add("/vendor/etc/other", FilePolicy::new(S_IFREG, 0, 0)).unwrap();
        let hits = vfs.find("*/fstab.*");
        assert_eq!(hits, vec!["/vendor/etc/fstab.qcom".to_string()]);
    }

    #[test]
    fn canonicalize_strips_trailing_slash_except_root() {
        assert_eq!(canonicalize("/vendor/"), "/vendor");
        assert_eq!(canonicalize("/"), "/");
    }
}
