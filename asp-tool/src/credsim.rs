// SPDX-License-Identifier: MIT

//! Credential Simulator and trust pass (spec §4.8): walks the process tree
//! exactly once, deriving each process's `Cred` from `kernel`'s all-granted
//! starting point down through `execve` transitions, init service matching,
//! and the zygote/system_server/untrusted_app special cases. The trust pass
//! that follows marks TCB membership and `/dev` device-class tags.

use std::collections::BTreeMap;

use tracing::warn;

use crate::aid;
use crate::cap::{CapSet, Capabilities};
use crate::cred::Cred;
use crate::dataflow::Inflated as Dataflow;
use crate::error::AspError;
use crate::init::parser::ServiceStmt;
use crate::proctree::{is_zygote_subject, ProcessNode, ProcessTree};
use crate::subject::Inflated as Subjects;
use crate::vfs::{self, FileTag, Vfs};
use crate::Result;

const SYSTEM_SERVER_CAPS: &[&str] = &[
    "IPC_LOCK",
    "KILL",
    "NET_ADMIN",
    "NET_BIND_SERVICE",
    "NET_BROADCAST",
    "NET_RAW",
    "SYS_MODULE",
    "SYS_NICE",
    "SYS_PTRACE",
    "SYS_TIME",
    "SYS_TTY_CONFIG",
    "WAKE_ALARM",
];

const TCB_SUBJECTS: &[&str] = &["init", "vold", "ueventd", "kernel", "system_server"];

fn system_server_groups() -> Vec<u32> {
    let mut groups: Vec<u32> = (1001..=1010).collect();
    groups.extend([1018, 1021, 1023, 1032]);
    groups.extend(3001..=3003);
    groups.extend([3006, 3007, 3009, 3010]);
    groups
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessState {
    Running,
    Stopped,
}

#[derive(Debug, Clone)]
pub struct ProcessCred {
    pub state: ProcessState,
    pub cred: Cred,
}

#[derive(Debug, Default)]
pub struct CredSimResult {
    pub creds: BTreeMap<u32, ProcessCred>,
}

fn single_exe(node: &ProcessNode) -> String {
    node.exe.keys().next().cloned().unwrap_or_default()
}

fn remove_subtree(tree: &mut ProcessTree, pid: u32) {
    let children = tree.processes.get(&pid).map(|n| n.children.clone()).unwrap_or_default();
    for child in children {
        remove_subtree(tree, child);
    }
    tree.processes.remove(&pid);
}

fn detach_child(tree: &mut ProcessTree, parent_pid: u32, child_pid: u32) {
    if let Some(parent) = tree.processes.get_mut(&parent_pid) {
        parent.children.retain(|&c| c != child_pid);
    }
}

fn attach_child(tree: &mut ProcessTree, parent_pid: u32, child_pid: u32) {
    if let Some(parent) = tree.processes.get_mut(&parent_pid) {
        parent.children.push(child_pid);
    }
    if let Some(child) = tree.processes.get_mut(&child_pid) {
        child.parent = Some(parent_pid);
    }
}

fn next_free_pid(tree: &ProcessTree) -> u32 {
    tree.processes.keys().next_back().map(|&p| p + 1).unwrap_or(0)
}

/// Run the full credential simulation plus trust pass over an already-built
/// process tree (spec §4.8). `tree` is mutated: the zygote special case
/// prunes anomalous children and synthesizes the `system_server` node that
/// the process tree builder never produces on its own (`system_server` has
/// no backing file; hierarchy recovery clears it deliberately, §9).
pub fn simulate(
    subjects: &mut Subjects,
    dataflow: &mut Dataflow,
    vfs: &mut Vfs,
    tree: &mut ProcessTree,
    services: &BTreeMap<String, ServiceStmt>,
    android_major: u32,
) -> Result<CredSimResult> {
    let mut creds: BTreeMap<u32, ProcessCred> = BTreeMap::new();

    let mut kernel_cred = Cred::new();
    kernel_cred.cap = Capabilities::grant_all();
    creds.insert(
        tree.kernel_pid,
        ProcessCred { state: ProcessState::Running, cred: kernel_cred },
    );

    let init_pid = tree
        .processes
        .values()
        .find(|p| p.subject == "init")
        .map(|p| p.pid)
        .ok_or_else(|| AspError::SimulationFailed("no init process in process tree".to_string()))?;
    let init_subject = subjects
        .subjects
        .get("init")
        .ok_or_else(|| AspError::SimulationFailed("no init subject".to_string()))?;

    let mut init_cred = Cred::new();
    init_cred.sid = Some(init_subject.sid().clone());
    init_cred.cap = Capabilities::grant_all();
    if android_major >= 7 {
        init_cred.add_group("readproc");
    }
    creds.insert(init_pid, ProcessCred { state: ProcessState::Running, cred: init_cred.clone() });

    let mut init_children: Vec<u32> = tree.get(init_pid).map(|p| p.children.clone()).unwrap_or_default();
    init_children.sort_unstable();

    let mut matched_service: BTreeMap<u32, String> = BTreeMap::new();

    for &child_pid in &init_children {
        let Some(child) = tree.get(child_pid) else { continue };
        let Some(child_subject) = subjects.subjects.get(&child.subject) else { continue };

        let mut cred = init_cred.execve(Some(child_subject.sid().clone()));
        cred.clear_groups();

        let exe_path = single_exe(child);
        let service = services
            .values()
            .find(|s| !s.oneshot && s.args.first().map(|a| vfs::canonicalize(a) == exe_path).unwrap_or(false));

        let state = if let Some(svc) = service {
            matched_service.insert(child_pid, svc.name.clone());

            if let Some(user) = &svc.user {
                let uid = aid::resolve_or_nobody(user);
                cred.uid = uid;
                cred.gid = uid;
            }
            if let Some((first, rest)) = svc.groups.split_first() {
                cred.gid = aid::resolve_or_nobody(first);
                for g in rest {
                    cred.add_group(g);
                }
            }

            if cred.uid != 0 {
                cred.cap.drop_all();
                if !svc.capabilities.is_empty() {
                    cred.cap.set_all_equal(svc.capabilities.iter().map(String::as_str));
                }
            }

            ProcessState::Running
        } else {
            ProcessState::Stopped
        };

        creds.insert(child_pid, ProcessCred { state, cred });
    }

    let zygote_children: Vec<u32> = init_children
        .iter()
        .copied()
        .filter(|&pid| tree.get(pid).map(|p| is_zygote_subject(&p.subject)).unwrap_or(false))
        .collect();

    if zygote_children.is_empty() {
        return Err(AspError::SimulationFailed("no zygote found".to_string()));
    }

    let elected_pid = zygote_children
        .iter()
        .copied()
        .find(|pid| {
            matched_service
                .get(pid)
                .and_then(|name| services.get(name))
                .map(|svc| svc.args.iter().any(|a| a == "--start-system-server"))
                .unwrap_or(false)
        })
        .ok_or_else(|| AspError::SimulationFailed("no --start-system-server zygote found".to_string()))?;

    // system_server has no real backing file (hierarchy recovery clears it
    // deliberately), so proctree never materializes it; credsim owns its
    // instantiation entirely and discards whatever stray node, if any, a
    // prior propagation step left behind under a non-elected zygote.
    let stale_system_server: Vec<u32> = tree
        .processes
        .values()
        .filter(|p| p.subject == "system_server")
        .map(|p| p.pid)
        .collect();
    for pid in stale_system_server {
        if let Some(parent) = tree.processes.get(&pid).and_then(|n| n.parent) {
            detach_child(tree, parent, pid);
        }
        remove_subtree(tree, pid);
        creds.remove(&pid);
    }

    for &zp_pid in &zygote_children {
        let zp_exe = tree.get(zp_pid).map(single_exe).unwrap_or_default();
        let children: Vec<u32> = tree.get(zp_pid).map(|p| p.children.clone()).unwrap_or_default();
        for child_pid in children {
            let Some(child) = tree.get(child_pid) else { continue };
            let child_exe = single_exe(child);
            let is_crash = child.subject.contains("crash") || child_exe.contains("crash");
            if child_exe != zp_exe && !is_crash {
                warn!(
                    "zygote pid {} child {:?} execs {:?}, diverging from the zygote's own executable {:?}; dropping as a zygote-abuse path",
                    zp_pid, child.subject, child_exe, zp_exe
                );
                detach_child(tree, zp_pid, child_pid);
                remove_subtree(tree, child_pid);
                creds.remove(&child_pid);
            }
        }
    }

    let elected_exe = tree.get(elected_pid).map(|p| p.exe.clone()).unwrap_or_default();
    if elected_exe.is_empty() {
        return Err(AspError::HierarchyInconsistent(
            "elected zygote has no backing executable".to_string(),
        ));
    }

    if let Some(system_server_subject) = subjects.subjects.get("system_server") {
        {
            let exe = elected_exe;
            let pid = next_free_pid(tree);
            tree.processes.insert(
                pid,
                ProcessNode {
                    pid,
                    subject: "system_server".to_string(),
                    exe,
                    parent: Some(elected_pid),
                    children: Vec::new(),
                },
            );
            attach_child(tree, elected_pid, pid);

            let mut cred = creds
                .get(&elected_pid)
                .map(|pc| pc.cred.clone())
                .unwrap_or_else(Cred::new)
                .execve(Some(system_server_subject.sid().clone()));
            cred.clear_groups();
            cred.uid = 1000;
            cred.gid = 1000;
            cred.cap.set_bounding_empty();
            cred.cap.add_to(
                &[CapSet::Permitted, CapSet::Effective, CapSet::Inheritable],
                SYSTEM_SERVER_CAPS.iter().copied(),
            );
            for gid in system_server_groups() {
                cred.groups.insert(gid);
            }

            creds.insert(pid, ProcessCred { state: ProcessState::Running, cred });
        }
    }

    let mut app_candidates: Vec<(u8, String, u32)> = tree
        .get(elected_pid)
        .map(|p| p.children.clone())
        .unwrap_or_default()
        .into_iter()
        .filter_map(|pid| tree.get(pid).map(|p| (p.subject.clone(), pid)))
        .filter_map(|(ty, pid)| {
            if ty.starts_with("untrusted_app") {
                Some((0u8, ty, pid))
            } else if ty.starts_with("crash_dump") {
                Some((1u8, ty, pid))
            } else {
                None
            }
        })
        .collect();
    app_candidates.sort();

    for (app_id, (_, ty, pid)) in app_candidates.into_iter().enumerate() {
        let Some(subject) = subjects.subjects.get(&ty) else { continue };
        let mut cred = creds
            .get(&elected_pid)
            .map(|pc| pc.cred.clone())
            .unwrap_or_else(Cred::new)
            .execve(Some(subject.sid().clone()));
        cred.clear_groups();
        cred.cap.drop_all();

        let uid = 10000 + app_id as u32;
        cred.uid = uid;
        cred.gid = uid;
        cred.add_group("inet");
        cred.add_group("everybody");
        cred.groups.insert(50000 + app_id as u32);

        creds.insert(pid, ProcessCred { state: ProcessState::Running, cred });
    }

    reparent_stopped(tree, &mut creds, init_pid, &init_children);

    trust_pass(subjects, dataflow, vfs);

    Ok(CredSimResult { creds })
}

/// Any STOPPED non-zygote child of init is reparented under a RUNNING
/// sibling of the same subject (hence same SID); its cred is re-derived via
/// `execve` from that sibling rather than staying a dead leaf (spec §4.8
/// point 7).
fn reparent_stopped(tree: &mut ProcessTree, creds: &mut BTreeMap<u32, ProcessCred>, init_pid: u32, init_children: &[u32]) {
    let mut by_subject: BTreeMap<String, Vec<u32>> = BTreeMap::new();
    for &pid in init_children {
        if let Some(node) = tree.get(pid) {
            by_subject.entry(node.subject.clone()).or_default().push(pid);
        }
    }

    for &pid in init_children {
        let Some(node) = tree.get(pid) else { continue };
        if is_zygote_subject(&node.subject) {
            continue;
        }
        let is_stopped = matches!(creds.get(&pid).map(|pc| pc.state), Some(ProcessState::Stopped));
        if !is_stopped {
            continue;
        }

        let siblings = by_subject.get(&node.subject).cloned().unwrap_or_default();
        let running_sibling = siblings.into_iter().find(|&sibling_pid| {
            sibling_pid != pid && matches!(creds.get(&sibling_pid).map(|pc| pc.state), Some(ProcessState::Running))
        });

        if let Some(sibling_pid) = running_sibling {
            let new_cred = creds.get(&sibling_pid).unwrap().cred.execve(None);
            detach_child(tree, init_pid, pid);
            attach_child(tree, sibling_pid, pid);
            creds.insert(pid, ProcessCred { state: ProcessState::Running, cred: new_cred });
        }
    }
}

fn device_tag(path: &str) -> Option<FileTag> {
    if ["usb", "GS", "serial"].iter().any(|pat| path.contains(pat)) {
        return Some(FileTag::Usb);
    }
    if ["bt_", "bluetooth", "hci"].iter().any(|pat| path.contains(pat)) {
        return Some(FileTag::Bluetooth);
    }
    if path.contains("nfc") {
        return Some(FileTag::Nfc);
    }
    if ["at_", "atd", "modem", "mdm", "smd"].iter().any(|pat| path.contains(pat)) {
        return Some(FileTag::Modem);
    }
    None
}

/// Trust pass (spec §4.8 "Trust pass"): separate from credential
/// simulation, applied once it's done. Marks TCB subjects, trusted
/// file/IPC nodes, and `/dev` device-class tags.
pub fn trust_pass(subjects: &mut Subjects, dataflow: &mut Dataflow, vfs: &mut Vfs) {
    for ty in TCB_SUBJECTS {
        if let Some(subject) = subjects.subjects.get_mut(*ty) {
            subject.trusted = true;
        }
    }

    for file in dataflow.files.values_mut() {
        file.trusted = file
            .backing_files
            .keys()
            .any(|path| path.starts_with("/sys/") || path.starts_with("/dev/"));
    }
    for ipc in dataflow.ipcs.values_mut() {
        // IPCNode has no backing_files of its own; trust is derived from
        // its owning subject's backing files, the closest analogue spec
        // §4.8 gives for a non-file object.
        ipc.trusted = ipc
            .owner
            .as_ref()
            .and_then(|owner| subjects.subjects.get(owner))
            .map(|s| s.backing_files.keys().any(|p| p.starts_with("/sys/") || p.starts_with("/dev/")))
            .unwrap_or(false);
    }

    for (path, fp) in vfs.files.iter_mut() {
        if !path.starts_with("/dev/") {
            continue;
        }
        if let Some(tag) = device_tag(path) {
            fp.tags.insert(tag);
        }
    }
}
