// SPDX-License-Identifier: MIT

//! Orchestrates the full leaves-first instantiation pipeline (spec §2):
//! label resolution, subject inflation, hierarchy recovery, dataflow
//! inflation, process-tree building, and credential simulation, in that
//! order. This is the one entry point both the CLI binary and any other
//! library caller go through (`SPEC_FULL.md` §A).

use std::collections::BTreeMap;

use tracing::info_span;

use crate::credsim::{self, CredSimResult};
use crate::dataflow;
use crate::error::AspError;
use crate::filecontext::FileContextRule;
use crate::hierarchy::{self, HierarchyReport};
use crate::init::parser::ServiceStmt;
use crate::label::{self, LabelReport};
use crate::policy::SePolicy;
use crate::property::PropertyStore;
use crate::proctree::{self, ProcessTree};
use crate::subject::{self, Inflated as Subjects};
use crate::vfs::Vfs;
use crate::Result;

/// Lowest Android major version this engine can instantiate. Below this,
/// the init/SELinux conventions the later passes assume (§4.8's `readproc`
/// supplementary group, zygote/system_server wiring) no longer hold.
pub const MINIMUM_ANDROID_MAJOR: u32 = 9;

/// Everything the pipeline needs that isn't produced by an earlier stage:
/// the already-booted VFS and Property Store (boot simulation is the
/// caller's job, since it also owns the `.rc` entry-point resolution that
/// spec §6 treats as part of firmware extraction), the consumed SELinux
/// policy facts, compiled file-context rules, the init services map (for
/// the credential simulator's service-matching pass), and the firmware's
/// declared Android major version.
pub struct PipelineInput {
    pub firmware_name: String,
    pub vfs: Vfs,
    pub props: PropertyStore,
    pub policy: SePolicy,
    pub fc_rules: Vec<FileContextRule>,
    pub services: BTreeMap<String, ServiceStmt>,
    pub android_major: u32,
}

/// The fully-instantiated analysis artifact: the labelled VFS, the
/// materialized subject/object graphs, the process tree, and the
/// simulated credentials, plus the non-fatal reports each stage produces.
pub struct Instantiation {
    pub vfs: Vfs,
    pub props: PropertyStore,
    pub label_report: LabelReport,
    pub subjects: Subjects,
    pub hierarchy_report: HierarchyReport,
    pub dataflow: dataflow::Inflated,
    pub process_tree: ProcessTree,
    pub creds: CredSimResult,
}

/// Run the full pipeline (spec §2, steps 4-9; VFS/property population and
/// boot simulation, steps 1-3, are the caller's responsibility).
pub fn run(input: PipelineInput) -> Result<Instantiation> {
    let PipelineInput {
        firmware_name,
        mut vfs,
        props,
        policy,
        fc_rules,
        services,
        android_major,
    } = input;

    let _span = info_span!("firmware", name = %firmware_name).entered();

    if android_major < MINIMUM_ANDROID_MAJOR {
        return Err(AspError::UnsupportedVersion {
            found: android_major,
            minimum: MINIMUM_ANDROID_MAJOR,
        });
    }

    let label_report = label::resolve(&mut vfs, &policy, &fc_rules);

    let allow = crate::graph::build_allow_graph(&policy);
    let transition = crate::graph::build_transition_graph(&policy);

    let mut subjects = subject::inflate(&policy, &allow)?;

    let hierarchy_report = hierarchy::recover(&policy, &vfs, &allow, &transition, &mut subjects)?;

    let skip_fileless = true;
    let mut dataflow = dataflow::inflate(&policy, &allow, &mut subjects, skip_fileless);

    let mut process_tree = proctree::build(&subjects)?;

    let creds = credsim::simulate(
        &mut subjects,
        &mut dataflow,
        &mut vfs,
        &mut process_tree,
        &services,
        android_major,
    )?;

    Ok(Instantiation {
        vfs,
        props,
        label_report,
        subjects,
        hierarchy_report,
        dataflow,
        process_tree,
        creds,
    })
}
