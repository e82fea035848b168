// SPDX-License-Identifier: MIT

//! Process Tree Builder (spec §4.7): a depth-first expansion of the
//! subject hierarchy into per-executable process instances, each with a
//! freshly assigned PID.

use std::collections::{BTreeMap, BTreeSet};

use crate::error::AspError;
use crate::subject::Inflated;
use crate::vfs::FilePolicy;
use crate::Result;

/// One instantiated process: a single subject executing a single backing
/// executable. `exe` always holds exactly one entry (spec §8 invariant
/// "every ProcessNode p satisfies |p.exe| == 1").
#[derive(Debug, Clone)]
pub struct ProcessNode {
    pub pid: u32,
    pub subject: String,
    pub exe: BTreeMap<String, FilePolicy>,
    pub parent: Option<u32>,
    pub children: Vec<u32>,
}

#[derive(Debug, Default)]
pub struct ProcessTree {
    pub processes: BTreeMap<u32, ProcessNode>,
    pub kernel_pid: u32,
}

impl ProcessTree {
    pub fn get(&self, pid: u32) -> Option<&ProcessNode> {
        self.processes.get(&pid)
    }
}

/// True for `zygote` and every per-ABI variant (`zygote_secondary`, ...).
/// AOSP devices commonly run two zygote services sharing one SELinux
/// subject's exec path but registered under distinct types in some policy
/// layouts; both the crash_dump re-visit exception here and the credential
/// simulator's zygote/system_server special case key off this name rule.
pub fn is_zygote_subject(ty: &str) -> bool {
    ty == "zygote" || ty.starts_with("zygote_")
}

/// Build the process tree by DFS from a synthetic `kernel` root (pid 0)
/// through `init` (pid 1) and down the subject hierarchy's `children` sets.
///
/// A subject is visited once; the sole exception is `crash_dump` under a
/// `zygote` parent, which the spec requires to re-appear under every
/// zygote fork class. When a subject has more than one backing file it
/// yields one ProcessNode per file (canonical path order); the
/// alphabetically-last of those instances is the anchor that the
/// subject's children are attached under, a deliberate simplification
/// since the source hierarchy carries no information about which physical
/// instance actually forked which child.
pub fn build(subjects: &Inflated) -> Result<ProcessTree> {
    if !subjects.subjects.contains_key("init") {
        return Err(AspError::HierarchyInconsistent(
            "no init subject to root the process tree".to_string(),
        ));
    }

    let mut processes = BTreeMap::new();
    let mut next_pid = 0u32;
    let mut visited: BTreeSet<String> = BTreeSet::new();

    let mut alloc = |processes: &mut BTreeMap<u32, ProcessNode>, subject: &str, exe_path: &str, fp: &FilePolicy, parent: Option<u32>| -> u32 {
        let pid = next_pid;
        next_pid += 1;
        let mut exe = BTreeMap::new();
        exe.insert(exe_path.to_string(), fp.clone());
        processes.insert(
            pid,
            ProcessNode {
                pid,
                subject: subject.to_string(),
                exe,
                parent,
                children: Vec::new(),
            },
        );
        if let Some(parent_pid) = parent {
            if let Some(parent_node) = processes.get_mut(&parent_pid) {
                parent_node.children.push(pid);
            }
        }
        pid
    };

    let kernel_pid = alloc(
        &mut processes,
        "kernel",
        "[kernel]",
        &FilePolicy::new(0, 0, 0),
        None,
    );

    // (subject type, parent subject type, anchor pid to attach under)
    let mut stack: Vec<(String, String, u32)> = vec![("init".to_string(), "kernel".to_string(), kernel_pid)];

    while let Some((ty, parent_ty, parent_pid)) = stack.pop() {
        let revisit_exception = ty == "crash_dump" && is_zygote_subject(&parent_ty);

        if visited.contains(&ty) && !revisit_exception {
            continue;
        }
        if !revisit_exception {
            visited.insert(ty.clone());
        }

        let Some(subject) = subjects.subjects.get(&ty) else {
            continue;
        };

        let mut anchor = parent_pid;
        for (path, fp) in &subject.backing_files {
            anchor = alloc(&mut processes, &ty, path, fp, Some(parent_pid));
        }

        let mut children: Vec<String> = subject.children.iter().cloned().collect();
        children.sort();
        for child_ty in children.into_iter().rev() {
            stack.push((child_ty, ty.clone(), anchor));
        }
    }

    Ok(ProcessTree {
        processes,
        kernel_pid,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::SELinuxContext;
    use crate::cred::Cred;
    use crate::subject::Subject;

    fn subject(ty: &str) -> Subject {
        let mut cred = Cred::new();
        cred.sid = Some(SELinuxContext::for_type(ty));
        Subject {
            ty: ty.to_string(),
            cred,
            parents: BTreeSet::new(),
            children: BTreeSet::new(),
            backing_files: BTreeMap::new(),
            trusted: false,
        }
    }

    #[test]
    fn kernel_is_pid_zero_and_init_is_pid_one() {
        let mut subjects = Inflated::default();
        let mut init = subject("init");
        init.backing_files.insert("/init".to_string(), FilePolicy::new(0o100755, 0, 0));
        subjects.subjects.insert("init".to_string(), init);

        let tree = build(&subjects).unwrap();
        assert_eq!(tree.kernel_pid, 0);
        assert!(tree.get(0).unwrap().parent.is_none());
        let init_node = tree.get(1).unwrap();
        assert_eq!(init_node.subject, "init");
        assert_eq!(init_node.parent, Some(0));
    }

    #[test]
    fn pids_are_contiguous_and_unique() {
        let mut subjects = Inflated::default();
        let mut init = subject("init");
        init.backing_files.insert("/init".to_string(), FilePolicy::new(0o100755, 0, 0));
        init.children.insert("zygote".to_string());
        subjects.subjects.insert("init".to_string(), init);
        let mut zygote = subject("zygote");
        zygote.backing_files.insert("/system/bin/app_process".to_string(), FilePolicy::new(0o100755, 0, 0));
        subjects.subjects.insert("zygote".to_string(), zygote);

        let tree = build(&subjects).unwrap();
        let mut pids: Vec<u32> = tree.processes.keys().copied().collect();
        pids.sort();
        assert_eq!(pids, (0..pids.len() as u32).collect::<Vec<_>>());
    }

    #[test]
    fn subject_is_visited_only_once() {
        let mut subjects = Inflated::default();
        let mut init = subject("init");
        init.backing_files.insert("/init".to_string(), FilePolicy::new(0o100755, 0, 0));
        init.children.insert("vold".to_string());
        subjects.subjects.insert("init".to_string(), init);
        let mut vold = subject("vold");
        vold.backing_files.insert("/system/bin/vold".to_string(), FilePolicy::new(0o100755, 0, 0));
        vold.children.insert("vold".to_string()); // pathological self-reference
        subjects.subjects.insert("vold".to_string(), vold);

        let tree = build(&subjects).unwrap();
        let vold_instances = tree.processes.values().filter(|p| p.subject == "vold").count();
        assert_eq!(vold_instances, 1);
    }

    #[test]
    fn crash_dump_is_revisited_under_every_zygote_parent() {
        let mut subjects = Inflated::default();
        let mut init = subject("init");
        init.backing_files.insert("/init".to_string(), FilePolicy::new(0o100755, 0, 0));
        init.children.insert("zygote".to_string());
        init.children.insert("shell".to_string());
        subjects.subjects.insert("init".to_string(), init);

        let mut zygote = subject("zygote");
        zygote.backing_files.insert("/system/bin/app_process".to_string(), FilePolicy::new(0o100755, 0, 0));
        zygote.children.insert("crash_dump".to_string());
        subjects.subjects.insert("zygote".to_string(), zygote);

        let mut shell = subject("shell");
        shell.backing_files.insert("/system/bin/sh".to_string(), FilePolicy::new(0o100755, 0, 0));
        shell.children.insert("crash_dump".to_string());
        subjects.subjects.insert("shell".to_string(), shell);

        let mut crash_dump = subject("crash_dump");
        crash_dump.backing_files.insert("/system/bin/crash_dump".to_string(), FilePolicy::new(0o100755, 0, 0));
        subjects.subjects.insert("crash_dump".to_string(), crash_dump);

        let tree = build(&subjects).unwrap();
        let crash_dump_instances = tree.processes.values().filter(|p| p.subject == "crash_dump").count();
        // Once under shell (first visit) and once more under zygote (the
        // explicit exception) -- never a third time under some other parent.
        assert_eq!(crash_dump_instances, 2);
    }

    #[test]
    fn subject_with_no_backing_files_does_not_create_a_process_node() {
        let mut subjects = Inflated::default();
        let mut init = subject("init");
        init.backing_files.insert("/init".to_string(), FilePolicy::new(0o100755, 0, 0));
        init.children.insert("shell".to_string());
        subjects.subjects.insert("init".to_string(), init);
        subjects.subjects.insert("shell".to_string(), subject("shell"));

        let tree = build(&subjects).unwrap();
        assert!(!tree.processes.values().any(|p| p.subject == "shell"));
    }

    #[test]
    fn missing_init_subject_is_fatal() {
        let subjects = Inflated::default();
        let err = build(&subjects).unwrap_err();
        assert!(matches!(err, AspError::HierarchyInconsistent(_)));
    }
}
