// SPDX-License-Identifier: MIT

//! Label Resolver (spec §4.3): reconciles xattr labels, `file_contexts`
//! regexes, `genfscon`, and `fs_use` into one authoritative SELinux context
//! per VFS path.

use std::str::FromStr;

use tracing::warn;

use crate::context::SELinuxContext;
use crate::filecontext::{self, FileContextRule};
use crate::policy::SePolicy;
use crate::vfs::Vfs;

#[derive(Debug, Default)]
pub struct LabelReport {
    pub recovered: usize,
    pub dropped: Vec<String>,
    pub conflicts: Vec<String>,
}

/// Search every mount point whose path prefixes `path`, and within each,
/// find the most specific genfscon/fs_use match for that mount's fstype.
/// Returns the winning context string alongside the mount path it came
/// from, so a caller can reason about it if needed.
fn genfs_match(policy: &SePolicy, vfs: &Vfs, path: &str) -> Option<String> {
    let mut best: Option<(usize, String)> = None;

    for (mount_path, mp) in &vfs.mount_points {
        if !path.starts_with(mount_path.as_str()) {
            continue;
        }
        let relative = &path[mount_path.len()..];
        let relative = if relative.is_empty() { "/" } else { relative };

        if let Some(entries) = policy.genfscons.get(&mp.fstype) {
            for genfscon in entries {
                if relative.starts_with(genfscon.partial_path.as_str()) {
                    let len = genfscon.partial_path.len();
                    if best.as_ref().map(|(l, _)| len > *l).unwrap_or(true) {
                        best = Some((len, genfscon.context.clone()));
                    }
                }
            }
        } else if let Some(fs_use) = policy.fs_uses.get(&mp.fstype) {
            // Only tmpfs is handled for fs_use, per spec §4.3 point 2.
            if mp.fstype == "tmpfs" {
                let len = 0;
                if best.as_ref().map(|(l, _)| len >= *l).unwrap_or(true) {
                    best = Some((len, fs_use.context.clone()));
                }
            }
        }
    }

    best.map(|(_, ctx)| ctx)
}

/// Resolve labels for every path in the VFS, mutating `selinux` in place
/// and removing files that end up with no context (spec invariant 1).
/// Returns a report of recovered/dropped/conflicting paths.
pub fn resolve(vfs: &mut Vfs, policy: &SePolicy, fc_rules: &[FileContextRule]) -> LabelReport {
    let mut report = LabelReport::default();
    let mut to_drop = Vec::new();
    let mut updates: Vec<(String, SELinuxContext)> = Vec::new();

    let paths: Vec<String> = vfs.files.keys().cloned().collect();

    for path in paths {
        let fc_match = filecontext::best_match(fc_rules, &path);
        let is_mount_root = vfs.mount_points.contains_key(&path);

        let (candidate, from_fc): (Option<SELinuxContext>, bool) = if fc_match.is_some() && !is_mount_root
        {
            (fc_match.map(|m| m.context.clone()), true)
        } else if let Some(ctx_str) = genfs_match(policy, vfs, &path) {
            (SELinuxContext::from_str(&ctx_str).ok(), false)
        } else {
            // A mount-point root with no genfscon/fs_use match never falls
            // back to its file_contexts match (spec §4.3 point 2); it keeps
            // its existing xattr label or is dropped, matching
            // `apply_file_contexts`'s mount-root carve-out.
            (None, false)
        };

        let existing = vfs.files.get(&path).and_then(|fp| fp.selinux.clone());

        match (candidate, existing) {
            (Some(candidate), None) => {
                updates.push((path, candidate));
                report.recovered += 1;
            }
            (Some(candidate), Some(existing)) if candidate != existing => {
                if from_fc {
                    // xattr is the source of truth; fc-match loses silently.
                    warn!(
                        "File context {} does not match file system context {} for {}",
                        candidate, existing, path
                    );
                    report.conflicts.push(path);
                } else {
                    // genfs-match is treated as recovery and wins.
                    updates.push((path, candidate));
                    report.recovered += 1;
                }
            }
            (Some(_), Some(_)) => {
                // Matches existing; nothing to do.
            }
            (None, Some(_)) => {
                // Keep the existing xattr label.
            }
            (None, None) => {
                warn!("No file context for {}", path);
                to_drop.push(path);
            }
        }
    }

    for (path, ctx) in updates {
        if let Some(fp) = vfs.files.get_mut(&path) {
            fp.selinux = Some(ctx);
        }
    }

    report.dropped = to_drop.clone();
    vfs.drop_files(&to_drop);

    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::{FsUse, Genfscon};
    use crate::vfs::FilePolicy;

    fn basic_vfs() -> Vfs {
        let mut vfs = Vfs::new();
        vfs.add("/odm/etc/permissions/foo.xml", FilePolicy::new(0o100644, 0, 0))
            .unwrap();
        vfs
    }

    #[test]
    fn file_context_match_wins_when_present() {
        let mut vfs = basic_vfs();
        let policy = SePolicy::new();
        let rules = filecontext::parse(
            "/odm/etc/permissions(/.*)? u:object_r:odm_xml_file:s0\n",
        );
        let report = resolve(&mut vfs, &policy, &rules);
        assert_eq!(report.recovered, 1);
        assert_eq!(
            vfs.get("/odm/etc/permissions/foo.xml").unwrap().selinux.as_ref().unwrap().ty,
            "odm_xml_file"
        );
    }

    #[test]
    fn genfs_match_used_for_proc_mount() {
        let mut vfs = Vfs::new();
        vfs.add_mount_point("/proc", "proc", "proc", vec![]).unwrap();
        vfs.add("/proc/kmsg", FilePolicy::new(0o100644, 0, 0)).unwrap();

        let mut policy = SePolicy::new();
        policy.genfscons.insert(
            "proc".to_string(),
            vec![
                Genfscon {
                    fstype: "proc".to_string(),
                    partial_path: "/".to_string(),
                    context: "u:object_r:proc_t:s0".to_string(),
                },
                Genfscon {
                    fstype: "proc".to_string(),
                    partial_path: "/kmsg".to_string(),
                    context: "u:object_r:proc_kmsg_t:s0".to_string(),
                },
            ],
        );

        let report = resolve(&mut vfs, &policy, &[]);
        assert_eq!(report.recovered, 1);
        assert_eq!(
            vfs.get("/proc/kmsg").unwrap().selinux.as_ref().unwrap().ty,
            "proc_kmsg_t"
        );
    }

    #[test]
    fn tmpfs_uses_fs_use() {
        let mut vfs = Vfs::new();
        vfs.add_mount_point("/dev", "tmpfs", "tmpfs", vec![]).unwrap();
        vfs.add("/dev/socket", FilePolicy::new(0o100644, 0, 0)).unwrap();

        let mut policy = SePolicy::new();
        policy.fs_uses.insert(
            "tmpfs".to_string(),
            FsUse {
                fstype: "tmpfs".to_string(),
                context: "u:object_r:tmpfs:s0".to_string(),
            },
        );

        let report = resolve(&mut vfs, &policy, &[]);
        assert_eq!(report.recovered, 1);
    }

    #[test]
    fn no_match_drops_file() {
        let mut vfs = basic_vfs();
        let policy = SePolicy::new();
        let report = resolve(&mut vfs, &policy, &[]);
        assert_eq!(report.dropped.len(), 1);
        assert!(vfs.get("/odm/etc/permissions/foo.xml").is_none());
    }

    #[test]
    fn existing_xattr_is_retained_when_no_match() {
        let mut vfs = Vfs::new();
        let mut fp = FilePolicy::new(0o100644, 0, 0);
        fp.selinux = Some(SELinuxContext::for_type("existing_t"));
        vfs.add("/foo", fp).unwrap();

        let policy = SePolicy::new();
        let report = resolve(&mut vfs, &policy, &[]);
        assert_eq!(report.dropped.len(), 0);
        assert_eq!(vfs.get("/foo").unwrap().selinux.as_ref().unwrap().ty, "existing_t");
    }

    #[test]
    fn mount_point_root_prefers_genfs_over_fc() {
        let mut vfs = Vfs::new();
        vfs.add_mount_point("/proc", "proc", "proc", vec![]).unwrap();
        vfs.add("/proc", FilePolicy::new(0o040755, 0, 0)).unwrap();

        let mut policy = SePolicy::new();
        policy.genfscons.insert(
            "proc".to_string(),
            vec![Genfscon {
                fstype: "proc".to_string(),
                partial_path: "/".to_string(),
                context: "u:object_r:proc_t:s0".to_string(),
            }],
        );
        let rules = filecontext::parse("/proc u:object_r:wrong_file:s0\n");

        let report = resolve(&mut vfs, &policy, &rules);
        assert_eq!(report.recovered, 1);
        assert_eq!(vfs.get("/proc").unwrap().selinux.as_ref().unwrap().ty, "proc_t");
    }
}
