// SPDX-License-Identifier: MIT

//! Hierarchy Recoverer (spec §4.5): back-propagates `type_transition` rules
//! to associate executables with subjects, overlays dyntransition allows,
//! and applies the canonical special cases for `init`, `system_server`,
//! `zygote`, and `appdomain`.

use std::collections::{BTreeMap, BTreeSet};

use petgraph::visit::EdgeRef;
use tracing::warn;

use crate::error::AspError;
use crate::graph::{AllowGraph, TransitionGraph};
use crate::policy::SePolicy;
use crate::subject::Inflated;
use crate::vfs::{FilePolicy, Vfs};
use crate::Result;

const TRANSITION_PERMS: &[&str] = &["transition", "dyntransition"];

#[derive(Debug, Default)]
pub struct HierarchyReport {
    /// Domains where the last-ditch filename heuristic (§4.5 point 4) found
    /// more than one candidate and therefore associated none, per the
    /// conservative-ambiguity behavior spec.md explicitly asks to preserve.
    pub last_ditch_ambiguous: Vec<String>,
}

/// `type -> {path -> FilePolicy}` built from the labelled, alias-dereferenced
/// VFS (spec §4.5 preamble).
fn build_file_index(vfs: &Vfs, policy: &SePolicy) -> BTreeMap<String, BTreeMap<String, FilePolicy>> {
    let mut index: BTreeMap<String, BTreeMap<String, FilePolicy>> = BTreeMap::new();
    for (path, fp) in &vfs.files {
        if let Some(ctx) = &fp.selinux {
            let ty = policy.canonical(&ctx.ty);
            index
                .entry(ty.to_string())
                .or_default()
                .insert(path.clone(), fp.clone());
        }
    }
    index
}

pub fn recover(
    policy: &SePolicy,
    vfs: &Vfs,
    allow: &AllowGraph,
    transition: &TransitionGraph,
    inflated: &mut Inflated,
) -> Result<HierarchyReport> {
    let file_index = build_file_index(vfs, policy);
    let mut referenced: BTreeSet<String> = BTreeSet::new();

    // 1. type_transition back-propagation (process class only).
    for edge in transition.graph.edge_references() {
        let weight = edge.weight();
        if weight.teclass != "process" {
            continue;
        }
        let source = transition.graph[edge.source()].clone();
        let default = transition.graph[edge.target()].clone();

        referenced.insert(default.clone());

        if !inflated.subjects.contains_key(&source) || !inflated.subjects.contains_key(&default) {
            continue;
        }

        inflated.subjects.get_mut(&source).unwrap().children.insert(default.clone());
        inflated.subjects.get_mut(&default).unwrap().parents.insert(source.clone());

        if let Some(files) = file_index.get(&weight.through) {
            inflated
                .subjects
                .get_mut(&default)
                .unwrap()
                .backing_files
                .extend(files.iter().map(|(p, f)| (p.clone(), f.clone())));
        }
    }

    // 2. dyntransition overlay: allow edges granting transition/dyntransition
    // on the process class, source != (expanded) child.
    for edge in allow.graph.edge_references() {
        let weight = edge.weight();
        if weight.teclass != "process" {
            continue;
        }
        if !weight.perms.iter().any(|p| TRANSITION_PERMS.contains(&p.as_str())) {
            continue;
        }

        let source = allow.graph[edge.source()].clone();
        let target = allow.graph[edge.target()].clone();

        for child in policy.expand(&target) {
            if child == source {
                continue;
            }
            if !inflated.subjects.contains_key(&source) || !inflated.subjects.contains_key(child) {
                continue;
            }
            inflated.subjects.get_mut(&source).unwrap().children.insert(child.to_string());
            inflated
                .subjects
                .get_mut(child)
                .unwrap()
                .parents
                .insert(source.clone());
        }
    }

    // 3a. init: associate /init if it has no backing file yet.
    if let Some(init) = inflated.subjects.get_mut("init") {
        if init.backing_files.is_empty() {
            if let Some(fp) = vfs.get("/init") {
                init.backing_files.insert("/init".to_string(), fp.clone());
            }
        }
    }

    // 3b. system_server: drop backing files, it runs in-process from zygote.
    if let Some(system_server) = inflated.subjects.get_mut("system_server") {
        system_server.backing_files.clear();
    }

    // 3c. zygote: must have a backing file; propagate it to childless children.
    let zygote_backing = match inflated.subjects.get("zygote") {
        Some(zygote) if zygote.backing_files.is_empty() => {
            return Err(AspError::HierarchyInconsistent(
                "zygote subject has no backing executable".to_string(),
            ));
        }
        Some(zygote) => Some((zygote.backing_files.clone(), zygote.children.clone())),
        None => None,
    };
    if let Some((backing, children)) = zygote_backing {
        for child in children {
            if let Some(subject) = inflated.subjects.get_mut(&child) {
                if subject.backing_files.is_empty() {
                    subject.backing_files = backing.clone();
                }
            }
        }
    }

    // 3d. appdomain exclusion, then the last-ditch filename heuristic.
    let appdomain_members: BTreeSet<String> = policy
        .expand("appdomain")
        .into_iter()
        .map(str::to_string)
        .collect();

    let mut report = HierarchyReport::default();
    let candidates: Vec<String> = inflated
        .subjects
        .iter()
        .filter(|(ty, s)| {
            s.backing_files.is_empty() && !referenced.contains(*ty) && !appdomain_members.contains(*ty)
        })
        .map(|(ty, _)| ty.clone())
        .collect();

    for ty in candidates {
        let matches = vfs.find(&format!("*{ty}"));
        match matches.len() {
            0 => {}
            1 => {
                let path = &matches[0];
                if let Some(fp) = vfs.get(path) {
                    inflated
                        .subjects
                        .get_mut(&ty)
                        .unwrap()
                        .backing_files
                        .insert(path.clone(), fp.clone());
                }
            }
            _ => {
                warn!(
                    "last-ditch heuristic: {} candidate executables for domain {:?}, associating none",
                    matches.len(),
                    ty
                );
                report.last_ditch_ambiguous.push(ty);
            }
        }
    }

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::build_allow_graph;
    use crate::policy::{AvRule, TypeTransitionRule};
    use crate::vfs::FilePolicy;

    fn setup() -> (SePolicy, Vfs, Inflated) {
        let mut policy = SePolicy::new();
        policy.attributes.insert(
            "domain".to_string(),
            vec!["init".to_string(), "zygote".to_string(), "shell".to_string()],
        );
        for ty in ["init", "zygote", "shell"] {
            policy
                .type_attributes
                .insert(ty.to_string(), vec!["domain".to_string()]);
        }
        let mut vfs = Vfs::new();
        let mut init_fp = FilePolicy::new(0o100755, 0, 0);
        init_fp.selinux = Some(crate::context::SELinuxContext::for_type("init_exec"));
        vfs.add("/init", init_fp).unwrap();

        let mut zygote_fp = FilePolicy::new(0o100755, 0, 0);
        zygote_fp.selinux = Some(crate::context::SELinuxContext::for_type("zygote_exec"));
        vfs.add("/system/bin/app_process", zygote_fp).unwrap();

        let allow = build_allow_graph(&policy);
        let inflated = crate::subject::inflate(&policy, &allow).unwrap();
        (policy, vfs, inflated)
    }

    #[test]
    fn type_transition_associates_backing_executable() {
        let (mut policy, vfs, mut inflated) = setup();
        policy.type_transitions.push(TypeTransitionRule {
            source: "init".to_string(),
            target: "zygote_exec".to_string(),
            class: "process".to_string(),
            default: "zygote".to_string(),
            filename: None,
        });
        let allow = build_allow_graph(&policy);
        let transition = crate::graph::build_transition_graph(&policy);
        recover(&policy, &vfs, &allow, &transition, &mut inflated).unwrap();

        assert!(inflated.subjects["init"].children.contains("zygote"));
        assert!(inflated.subjects["zygote"]
            .backing_files
            .contains_key("/system/bin/app_process"));
    }

    #[test]
    fn init_falls_back_to_slash_init_when_unbacked() {
        let (policy, vfs, mut inflated) = setup();
        let allow = build_allow_graph(&policy);
        let transition = crate::graph::build_transition_graph(&policy);
        recover(&policy, &vfs, &allow, &transition, &mut inflated).unwrap();
        assert!(inflated.subjects["init"].backing_files.contains_key("/init"));
    }

    #[test]
    fn zygote_without_backing_file_is_fatal() {
        let (policy, mut vfs, mut inflated) = setup();
        vfs.files.remove("/system/bin/app_process");
        let allow = build_allow_graph(&policy);
        let transition = crate::graph::build_transition_graph(&policy);
        let err = recover(&policy, &vfs, &allow, &transition, &mut inflated).unwrap_err();
        assert!(matches!(err, AspError::HierarchyInconsistent(_)));
    }

    #[test]
    fn dyntransition_adds_child_without_backing_files() {
        let (mut policy, vfs, mut inflated) = setup();
        policy.type_transitions.push(TypeTransitionRule {
            source: "init".to_string(),
            target: "zygote_exec".to_string(),
            class: "process".to_string(),
            default: "zygote".to_string(),
            filename: None,
        });
        policy.av_rules.push(AvRule {
            source: "zygote".to_string(),
            target: "shell".to_string(),
            class: "process".to_string(),
            perms: vec!["dyntransition".to_string()],
        });
        let allow = build_allow_graph(&policy);
        let transition = crate::graph::build_transition_graph(&policy);
        recover(&policy, &vfs, &allow, &transition, &mut inflated).unwrap();

        assert!(inflated.subjects["zygote"].children.contains("shell"));
        assert!(inflated.subjects["shell"].backing_files.is_empty());
    }

    #[test]
    fn system_server_backing_files_are_cleared() {
        let (mut policy, vfs, mut inflated) = setup();
        policy.attributes.get_mut("domain").unwrap().push("system_server".to_string());
        policy
            .type_attributes
            .insert("system_server".to_string(), vec!["domain".to_string()]);
        let allow = build_allow_graph(&policy);
        let mut inflated = crate::subject::inflate(&policy, &allow).unwrap();
        inflated
            .subjects
            .get_mut("system_server")
            .unwrap()
            .backing_files
            .insert("/system/bin/x".to_string(), FilePolicy::new(0o100755, 0, 0));
        let transition = crate::graph::build_transition_graph(&policy);
        recover(&policy, &vfs, &allow, &transition, &mut inflated).unwrap();
        assert!(inflated.subjects["system_server"].backing_files.is_empty());
    }

    #[test]
    fn last_ditch_heuristic_associates_unique_match() {
        let (mut policy, mut vfs, _inflated) = setup();
        policy.attributes.get_mut("domain").unwrap().push("vold".to_string());
        policy
            .type_attributes
            .insert("vold".to_string(), vec!["domain".to_string()]);
        vfs.add("/system/bin/vold", FilePolicy::new(0o100755, 0, 0)).unwrap();

        let allow = build_allow_graph(&policy);
        let mut inflated = crate::subject::inflate(&policy, &allow).unwrap();
        let transition = crate::graph::build_transition_graph(&policy);
        recover(&policy, &vfs, &allow, &transition, &mut inflated).unwrap();

        assert!(inflated.subjects["vold"].backing_files.contains_key("/system/bin/vold"));
    }

    #[test]
    fn last_ditch_heuristic_leaves_ambiguous_matches_unresolved() {
        let (mut policy, mut vfs, _inflated) = setup();
        policy.attributes.get_mut("domain").unwrap().push("vold".to_string());
        policy
            .type_attributes
            .insert("vold".to_string(), vec!["domain".to_string()]);
        vfs.add("/system/bin/vold", FilePolicy::new(0o100755, 0, 0)).unwrap();
        vfs.add("/vendor/bin/vold", FilePolicy::new(0o100755, 0, 0)).unwrap();

        let allow = build_allow_graph(&policy);
        let mut inflated = crate::subject::inflate(&policy, &allow).unwrap();
        let transition = crate::graph::build_transition_graph(&policy);
        let report = recover(&policy, &vfs, &allow, &transition, &mut inflated).unwrap();

        assert!(inflated.subjects["vold"].backing_files.is_empty());
        assert_eq!(report.last_ditch_ambiguous, vec!["vold".to_string()]);
    }
}
