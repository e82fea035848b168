// SPDX-License-Identifier: MIT

use std::fmt;
use std::io::{self, IsTerminal};
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use tracing::{error, Level};

use asp::init::{self, Boot, Fstab};
use asp::pipeline::{self, PipelineInput};
use asp::policy::SePolicy;
use asp::property::PropertyStore;
use asp::report;
use asp::vfs::Vfs;

const HEADING: &str = "Global options";

#[derive(Debug, Subcommand)]
enum Command {
    /// Run the full instantiation pipeline over an already-extracted
    /// firmware and write its analysis artifacts (spec §6).
    Instantiate(InstantiateCli),
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum LogTarget {
    Stderr,
    #[cfg(target_os = "android")]
    Logcat,
}

impl Default for LogTarget {
    fn default() -> Self {
        Self::Stderr
    }
}

impl fmt::Display for LogTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.to_possible_value().ok_or(fmt::Error)?.get_name())
    }
}

#[derive(Debug, Parser)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Where to output log messages.
    #[arg(long, global = true, value_name = "TARGET", default_value_t, help_heading = HEADING)]
    pub log_target: LogTarget,

    /// Lowest log message severity to output.
    #[arg(long, global = true, value_name = "LEVEL", default_value_t = Level::INFO, help_heading = HEADING)]
    pub log_level: Level,
}

/// Inputs consumed from the out-of-scope collaborators (spec §6): already
/// extracted partitions (as a pre-walked VFS snapshot), `.rc` entry points,
/// property files, `file_contexts` files, fstab files, and an
/// already-parsed SELinux policy. Parsing a live binary `sepolicy` or
/// unpacking a firmware image itself is explicitly out of scope, so the
/// policy argument takes the bincode-encoded fact dump the binary-policy
/// parser collaborator is assumed to hand over.
#[derive(Debug, Parser)]
struct InstantiateCli {
    /// Name this firmware is keyed by in the output `eval/<name>/` tree.
    #[arg(long)]
    firmware_name: String,

    /// Directory persisted artifacts are written under.
    #[arg(long, default_value = "eval-out")]
    out_dir: PathBuf,

    /// Bincode-encoded VFS snapshot produced by the walker collaborator
    /// (extracted partitions, already merged into one tree via mount
    /// grafting).
    #[arg(long)]
    vfs: PathBuf,

    /// Bincode-encoded `SePolicy` fact dump produced by the binary-policy
    /// parser collaborator.
    #[arg(long)]
    policy: PathBuf,

    /// `.rc` files to parse and load into the boot simulator, in the order
    /// they should be processed.
    #[arg(long = "rc")]
    rc_files: Vec<PathBuf>,

    /// `key = value` property files to merge before boot simulation.
    #[arg(long = "property-file")]
    property_files: Vec<PathBuf>,

    /// `file_contexts`-format files, concatenated and parsed in order.
    #[arg(long = "file-contexts")]
    file_contexts: Vec<PathBuf>,

    /// `<fstab path in VFS>=<host fstab file>` pairs registered with the
    /// boot simulator before it runs, so `mount_all` commands can resolve.
    #[arg(long = "fstab", value_parser = parse_fstab_arg)]
    fstabs: Vec<(String, PathBuf)>,

    /// The firmware's declared Android major version.
    #[arg(long)]
    android_major: u32,
}

fn parse_fstab_arg(s: &str) -> std::result::Result<(String, PathBuf), String> {
    let (vfs_path, host_path) = s
        .split_once('=')
        .ok_or_else(|| format!("expected <vfs-path>=<host-path>, got {s:?}"))?;
    Ok((vfs_path.to_string(), PathBuf::from(host_path)))
}

fn init_logging(target: LogTarget, level: Level) {
    match target {
        LogTarget::Stderr => {
            tracing_subscriber::fmt()
                .with_writer(io::stderr)
                .with_ansi(io::stderr().is_terminal())
                .with_max_level(level)
                .init();
        }
        #[cfg(target_os = "android")]
        LogTarget::Logcat => {
            use tracing_logcat::{LogcatMakeWriter, LogcatTag};
            use tracing_subscriber::fmt::format::Format;

            let tag = LogcatTag::Fixed(env!("CARGO_PKG_NAME").to_owned());
            let writer = LogcatMakeWriter::new(tag).expect("Failed to initialize logcat writer");

            tracing_subscriber::fmt()
                .event_format(Format::default().with_level(false).without_time())
                .with_writer(writer)
                .with_ansi(false)
                .with_max_level(level)
                .init();
        }
    }
}

fn subcommand_instantiate(cli: &InstantiateCli) -> Result<()> {
    let vfs_bytes = std::fs::read(&cli.vfs)
        .with_context(|| format!("reading VFS snapshot {:?}", cli.vfs))?;
    let vfs: Vfs = bincode::deserialize(&vfs_bytes)
        .with_context(|| format!("decoding VFS snapshot {:?}", cli.vfs))?;

    let policy_bytes = std::fs::read(&cli.policy)
        .with_context(|| format!("reading policy fact dump {:?}", cli.policy))?;
    let policy: SePolicy = bincode::deserialize(&policy_bytes)
        .with_context(|| format!("decoding policy fact dump {:?}", cli.policy))?;

    let mut props = PropertyStore::new();
    for path in &cli.property_files {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading property file {path:?}"))?;
        props.merge_text(&text);
    }

    let mut boot = Boot::new(vfs, props);

    for path in &cli.rc_files {
        let text = std::fs::read_to_string(path).with_context(|| format!("reading {path:?}"))?;
        let rc = init::parser::parse(path, &text)
            .with_context(|| format!("parsing init script {path:?}"))?;
        boot.load_rc(rc);
    }

    for (vfs_path, host_path) in &cli.fstabs {
        let text =
            std::fs::read_to_string(host_path).with_context(|| format!("reading {host_path:?}"))?;
        boot.register_fstab(vfs_path, Fstab::parse(&text));
    }

    boot.run();

    let services = boot.services.clone();
    let Boot { vfs, props, .. } = boot;

    let mut fc_text = String::new();
    for path in &cli.file_contexts {
        fc_text.push_str(
            &std::fs::read_to_string(path)
                .with_context(|| format!("reading file_contexts {path:?}"))?,
        );
        fc_text.push('\n');
    }
    let fc_rules = asp::filecontext::parse(&fc_text);

    let instantiation = pipeline::run(PipelineInput {
        firmware_name: cli.firmware_name.clone(),
        vfs,
        props,
        policy,
        fc_rules,
        services,
        android_major: cli.android_major,
    })
    .context("running instantiation pipeline")?;

    report::write_all(
        &cli.out_dir,
        &cli.firmware_name,
        &instantiation.vfs,
        &instantiation.props,
        &instantiation.label_report,
    )
    .context("writing persisted artifacts")?;

    tracing::info!(
        subjects = instantiation.subjects.subjects.len(),
        processes = instantiation.process_tree.processes.len(),
        dropped_files = instantiation.label_report.dropped.len(),
        "instantiation complete for {}",
        cli.firmware_name
    );

    Ok(())
}

fn dispatch(command: &Command) -> Result<()> {
    match command {
        Command::Instantiate(c) => subcommand_instantiate(c),
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    init_logging(cli.log_target, cli.log_level);

    match dispatch(&cli.command) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e:?}");
            ExitCode::FAILURE
        }
    }
}
