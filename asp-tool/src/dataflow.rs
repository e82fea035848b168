// SPDX-License-Identifier: MIT

//! Dataflow Inflater (spec §4.6): turns each `G_allow` edge into a
//! materialized object node (file / IPC / capability-self) and wires
//! `G_dataflow` between subjects and objects.

use std::collections::BTreeMap;

use petgraph::visit::EdgeRef;
use tracing::debug;

use crate::context::SELinuxContext;
use crate::graph::{AllowGraph, DataflowEdgeKind, DataflowGraph, NodeKind};
use crate::policy::SePolicy;
use crate::subject::Inflated as Subjects;
use crate::vfs::FilePolicy;

/// Named classes that become an `IPCNode(teclass)` (spec §4.6 point 1).
/// `process` maps to the synthetic ipc_type `process_op` so it never
/// collides with the `ProcessNode` variant built later by `proctree`.
const NAMED_IPC_CLASSES: &[&str] = &[
    "drmservice",
    "debuggerd",
    "property_service",
    "service_manager",
    "hwservice_manager",
    "binder",
    "key",
    "msg",
    "system",
    "security",
    "keystore_key",
    "zygote",
    "kernel_service",
    "process",
];

const SOCKET_LIKE_CLASSES: &[&str] = &["netif", "peer", "node"];

/// Classes that never produce a dataflow edge: subject self-edges (spec
/// §4.6 point 1, last bullet).
const SKIPPED_CLASSES: &[&str] = &["fd", "bpf", "capability", "capability2", "cap_userns", "cap2_userns"];

const READ_PERMS: &[&str] = &[
    "read", "ioctl", "unix_read", "search", "recv", "receive", "recv_msg", "recvfrom", "rawip_recv",
    "tcp_recv", "dccp_recv", "udp_recv", "nlmsg_read", "nlmsg_readpriv", "call", "list", "find",
];

const WRITE_PERMS: &[&str] = &[
    "write", "append", "add_name", "unix_write", "enqueue", "send", "send_msg", "sendto", "rawip_send",
    "tcp_send", "dccp_send", "udp_send", "connectto", "nlmsg_write", "call", "set", "add", "find",
    "ptrace", "transition",
];

const MANAGE_PERMS: &[&str] = &["create", "open"];

#[derive(Debug, Clone)]
pub struct FileNode {
    pub ty: String,
    pub sid: SELinuxContext,
    pub backing_files: BTreeMap<String, FilePolicy>,
    pub trusted: bool,
}

#[derive(Debug, Clone)]
pub struct IpcNode {
    pub ty: String,
    pub ipc_type: String,
    pub sid: SELinuxContext,
    pub owner: Option<String>,
    pub trusted: bool,
}

/// Result of a dataflow inflation pass: the wired graph plus the two
/// materialized object maps, keyed by their graph node name.
#[derive(Debug, Default)]
pub struct Inflated {
    pub graph: DataflowGraph,
    pub files: BTreeMap<String, FileNode>,
    pub ipcs: BTreeMap<String, IpcNode>,
}

enum ObjectKind<'a> {
    File,
    Ipc(&'a str),
    SelfCapability,
    Skip,
}

fn classify_class<'a>(policy: &SePolicy, class: &'a str) -> ObjectKind<'a> {
    if policy.class_inherits(class, "file") {
        return ObjectKind::File;
    }
    if policy.class_inherits(class, "socket") {
        return ObjectKind::Ipc("socket");
    }
    if policy.class_inherits(class, "ipc") {
        return ObjectKind::Ipc(class);
    }
    if policy.class_inherits(class, "cap") || policy.class_inherits(class, "cap2") {
        return ObjectKind::SelfCapability;
    }
    if class == "process" {
        return ObjectKind::Ipc("process_op");
    }
    if NAMED_IPC_CLASSES.contains(&class) {
        return ObjectKind::Ipc(class);
    }
    if SOCKET_LIKE_CLASSES.contains(&class) {
        return ObjectKind::Ipc("socket");
    }
    if class == "filesystem" {
        return ObjectKind::File;
    }
    if SKIPPED_CLASSES.contains(&class) {
        return ObjectKind::Skip;
    }
    debug!("unclassified teclass {:?}, skipping as dataflow", class);
    ObjectKind::Skip
}

fn has_any(perms: &[String], set: &[&str]) -> bool {
    perms.iter().any(|p| set.contains(&p.as_str()))
}

/// Resolve the publisher of an IPC object (spec §4.6 point 4). Returns
/// `None` when no publisher can be established, which discards the object.
fn discover_owner(
    policy: &SePolicy,
    allow: &AllowGraph,
    subjects: &Subjects,
    ipc_type: &str,
    concrete_ty: &str,
) -> Option<String> {
    if subjects.subjects.contains_key(concrete_ty) {
        return Some(concrete_ty.to_string());
    }

    if ipc_type.ends_with("service_manager") {
        let mut actualized = vec![concrete_ty.to_string()];
        if let Some(attrs) = policy.type_attributes.get(concrete_ty) {
            actualized.extend(attrs.iter().cloned());
        }

        for name in actualized {
            let mut sources: Vec<&str> = allow
                .edges_to(&name)
                .into_iter()
                .filter(|(_, edge)| edge.perms.iter().any(|p| p == "add"))
                .map(|(src, _)| src)
                .collect();
            sources.sort_unstable();
            sources.dedup();

            if let Some(&source) = sources.first() {
                let members = policy.expand(source);
                if let Some(&first) = members.first() {
                    return Some(first.to_string());
                }
            }
        }
        return None;
    }

    if ipc_type == "property_service" {
        return Some("init".to_string());
    }

    None
}

/// Run the dataflow inflater over every `G_allow` edge (spec §4.6).
///
/// `skip_fileless` is the "skip-fileless" policy knob referenced in point 4:
/// when on, an IPC object whose owner subject has no backing file is
/// discarded rather than kept as an orphan-looking node. Self-capability
/// edges (§4.6 point 1, `cap`/`cap2` classes) mutate the owning subject's
/// `selinux` capability overlay directly, so `subjects` is borrowed mutably.
pub fn inflate(
    policy: &SePolicy,
    allow: &AllowGraph,
    subjects: &mut Subjects,
    skip_fileless: bool,
) -> Inflated {
    let mut result = Inflated::default();

    for edge in allow.graph.edge_references() {
        let source = allow.graph[edge.source()].clone();
        let weight = edge.weight().clone();
        let target = allow.graph[edge.target()].clone();

        let kind = classify_class(policy, &weight.teclass);

        let has_read = has_any(&weight.perms, READ_PERMS);
        let has_write = has_any(&weight.perms, WRITE_PERMS) || has_any(&weight.perms, MANAGE_PERMS);

        match kind {
            ObjectKind::Skip => continue,
            ObjectKind::SelfCapability => {
                for concrete in policy.expand(&source) {
                    if let Some(subject) = subjects.subjects.get_mut(concrete) {
                        for perm in &weight.perms {
                            subject.cred.cap.add_selinux_self(perm);
                        }
                    }
                }
                continue;
            }
            ObjectKind::File => {
                for concrete in policy.expand(&target) {
                    let node_name = crate::graph::file_node_name(concrete);
                    result.files.entry(node_name.clone()).or_insert_with(|| FileNode {
                        ty: concrete.to_string(),
                        sid: SELinuxContext::for_object(concrete),
                        backing_files: BTreeMap::new(),
                        trusted: false,
                    });
                    wire(&mut result, &source, NodeKind::Subject, &node_name, NodeKind::File, has_read, has_write);
                }
            }
            ObjectKind::Ipc(ipc_type) => {
                for concrete in policy.expand(&target) {
                    let Some(owner) = discover_owner(policy, allow, subjects, ipc_type, concrete) else {
                        continue;
                    };
                    if skip_fileless {
                        let owner_has_files = subjects
                            .subjects
                            .get(&owner)
                            .map(|s| !s.backing_files.is_empty())
                            .unwrap_or(false);
                        if !owner_has_files {
                            continue;
                        }
                    }

                    let node_name = crate::graph::ipc_node_name(ipc_type, concrete);
                    result.ipcs.entry(node_name.clone()).or_insert_with(|| IpcNode {
                        ty: concrete.to_string(),
                        ipc_type: ipc_type.to_string(),
                        sid: SELinuxContext::for_object(concrete),
                        owner: Some(owner.clone()),
                        trusted: false,
                    });
                    wire(&mut result, &source, NodeKind::Subject, &node_name, NodeKind::Ipc, has_read, has_write);
                }
            }
        }
    }

    for group in subjects.groups.values() {
        let group_name = crate::graph::subject_group_node_name(&group.attribute);
        for member in &group.members {
            let member_name = crate::graph::subject_node_name(member);
            result.graph.add_edge_dedup(
                &member_name,
                NodeKind::Subject,
                &group_name,
                NodeKind::SubjectGroup,
                DataflowEdgeKind::Write,
            );
        }
    }

    result
}

fn wire(
    result: &mut Inflated,
    source: &str,
    source_kind: NodeKind,
    object_name: &str,
    object_kind: NodeKind,
    has_read: bool,
    has_write: bool,
) {
    let subject_name = crate::graph::subject_node_name(source);
    if has_read {
        result.graph.add_edge_dedup(
            object_name,
            object_kind,
            &subject_name,
            source_kind,
            DataflowEdgeKind::Read,
        );
    }
    if has_write {
        result.graph.add_edge_dedup(
            &subject_name,
            source_kind,
            object_name,
            object_kind,
            DataflowEdgeKind::Write,
        );
    }
}
