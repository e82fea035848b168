// SPDX-License-Identifier: MIT

//! Subject Inflater (spec §4.4): one [`Subject`] per type in the `domain`
//! attribute, plus a [`SubjectGroup`] for every attribute whose members are
//! all subjects and which appears as a source in `G_allow`.

use std::collections::{BTreeMap, BTreeSet};

use crate::context::SELinuxContext;
use crate::cred::Cred;
use crate::error::AspError;
use crate::graph::AllowGraph;
use crate::policy::SePolicy;
use crate::vfs::FilePolicy;
use crate::Result;

/// One SELinux domain as a first-class process-capable entity, before pid
/// instantiation (spec §3 "SubjectNode").
#[derive(Debug, Clone)]
pub struct Subject {
    pub ty: String,
    pub cred: Cred,
    pub parents: BTreeSet<String>,
    pub children: BTreeSet<String>,
    /// Executables on disk whose `type_transition` yields this subject's
    /// SID on exec (spec §3, invariant 3 keys this by the labelled VFS path).
    pub backing_files: BTreeMap<String, FilePolicy>,
    pub trusted: bool,
}

impl Subject {
    fn new(ty: &str) -> Self {
        let mut cred = Cred::new();
        cred.sid = Some(SELinuxContext::for_type(ty));
        Self {
            ty: ty.to_string(),
            cred,
            parents: BTreeSet::new(),
            children: BTreeSet::new(),
            backing_files: BTreeMap::new(),
            trusted: false,
        }
    }

    pub fn sid(&self) -> &SELinuxContext {
        self.cred
            .sid
            .as_ref()
            .expect("subject is always constructed with a sid")
    }
}

/// An attribute whose member types are all subjects, treated as a
/// polymorphic subject for aggregate dataflow edges (spec §3
/// "SubjectGroup", invariant 4).
#[derive(Debug, Clone)]
pub struct SubjectGroup {
    pub attribute: String,
    pub sid: SELinuxContext,
    pub members: BTreeSet<String>,
}

#[derive(Debug, Default)]
pub struct Inflated {
    pub subjects: BTreeMap<String, Subject>,
    pub groups: BTreeMap<String, SubjectGroup>,
}

/// Materialize every `domain`-attribute type as a Subject, then retain
/// attributes whose full membership is covered by those subjects and which
/// source at least one `G_allow` edge (spec §4.4).
pub fn inflate(policy: &SePolicy, allow: &AllowGraph) -> Result<Inflated> {
    let mut subjects = BTreeMap::new();
    let mut attribute_membership: BTreeSet<String> = BTreeSet::new();

    let domain_types = policy
        .attributes
        .get("domain")
        .cloned()
        .unwrap_or_default();

    for raw in &domain_types {
        // Aliases never appear as graph nodes (invariant 2); the `domain`
        // attribute's member list comes straight from the policy's type
        // table so this is defensive, not load-bearing.
        let ty = policy.canonical(raw);

        if subjects.contains_key(ty) {
            return Err(AspError::HierarchyInconsistent(format!(
                "duplicate subject creation for type {ty}"
            )));
        }
        subjects.insert(ty.to_string(), Subject::new(ty));

        if let Some(attrs) = policy.type_attributes.get(ty) {
            attribute_membership.extend(attrs.iter().cloned());
        }
    }

    let mut groups = BTreeMap::new();
    for attr in attribute_membership {
        let members = policy.expand(&attr);
        let all_are_subjects = !members.is_empty() && members.iter().all(|m| subjects.contains_key(*m));
        let sources_allow = !allow.edges_from(&attr).is_empty();

        if all_are_subjects && sources_allow {
            groups.insert(
                attr.clone(),
                SubjectGroup {
                    attribute: attr.clone(),
                    sid: SELinuxContext::for_type(attr),
                    members: members.into_iter().map(str::to_string).collect(),
                },
            );
        }
    }

    Ok(Inflated { subjects, groups })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::build_allow_graph;
    use crate::policy::AvRule;

    fn sample_policy() -> SePolicy {
        let mut policy = SePolicy::new();
        policy.attributes.insert(
            "domain".to_string(),
            vec!["init".to_string(), "zygote".to_string(), "shell".to_string()],
        );
        policy
            .attributes
            .insert("mlstrustedsubject".to_string(), vec!["init".to_string()]);
        policy
            .type_attributes
            .insert("init".to_string(), vec!["domain".to_string(), "mlstrustedsubject".to_string()]);
        policy
            .type_attributes
            .insert("zygote".to_string(), vec!["domain".to_string()]);
        policy
            .type_attributes
            .insert("shell".to_string(), vec!["domain".to_string()]);
        policy.av_rules.push(AvRule {
            source: "mlstrustedsubject".to_string(),
            target: "self".to_string(),
            class: "process".to_string(),
            perms: vec!["fork".to_string()],
        });
        policy
    }

    #[test]
    fn creates_one_subject_per_domain_type() {
        let policy = sample_policy();
        let allow = build_allow_graph(&policy);
        let inflated = inflate(&policy, &allow).unwrap();
        assert_eq!(inflated.subjects.len(), 3);
        assert!(inflated.subjects.contains_key("init"));
    }

    #[test]
    fn attribute_sourcing_allow_with_all_subject_members_becomes_group() {
        let policy = sample_policy();
        let allow = build_allow_graph(&policy);
        let inflated = inflate(&policy, &allow).unwrap();
        assert!(inflated.groups.contains_key("mlstrustedsubject"));
        assert!(inflated.groups["mlstrustedsubject"].members.contains("init"));
    }

    #[test]
    fn attribute_not_sourcing_allow_is_dropped() {
        let policy = sample_policy();
        // "domain" itself never sources an edge in this fixture.
        let allow = build_allow_graph(&policy);
        let inflated = inflate(&policy, &allow).unwrap();
        assert!(!inflated.groups.contains_key("domain"));
    }

    #[test]
    fn attribute_with_non_subject_member_is_dropped() {
        let mut policy = sample_policy();
        policy
            .attributes
            .insert("mixed".to_string(), vec!["init".to_string(), "not_a_domain".to_string()]);
        policy.av_rules.push(AvRule {
            source: "mixed".to_string(),
            target: "self".to_string(),
            class: "process".to_string(),
            perms: vec!["fork".to_string()],
        });
        policy
            .type_attributes
            .get_mut("init")
            .unwrap()
            .push("mixed".to_string());

        let allow = build_allow_graph(&policy);
        let inflated = inflate(&policy, &allow).unwrap();
        assert!(!inflated.groups.contains_key("mixed"));
    }
}
