// SPDX-License-Identifier: MIT

//! The staged boot event loop (spec §4.2): drives `early-init` → `init` →
//! `late-init`, draining the action queue after each stage and re-entering
//! it whenever an executed command issues `trigger <stage>`. Mutates the
//! VFS and Property Store; nothing here touches the SELinux policy.

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use regex::Regex;
use tracing::warn;

use crate::aid;
use crate::init::parser::{ActionStmt, Command, RcFile, ServiceStmt, Trigger};
use crate::property::PropertyStore;
use crate::vfs::Vfs;

/// One parsed `fstab` entry: `<device> <path> <fstype> <csv-opts>
/// [<csv-mgr-opts>]` (spec §4.2).
#[derive(Debug, Clone, Default)]
pub struct FstabEntry {
    pub device: String,
    pub path: String,
    pub fstype: String,
    pub opts: Vec<String>,
    pub mgr_opts: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct Fstab {
    pub entries: Vec<FstabEntry>,
}

impl Fstab {
    /// Parse fstab text, skipping comments/blank lines and malformed rows
    /// (logged, not fatal, per spec §7's recoverable-parsing policy).
    pub fn parse(text: &str) -> Fstab {
        let mut entries = Vec::new();

        for line in text.lines() {
            let trimmed = line.trim();
            if trimmed.is_empty() || trimmed.starts_with('#') {
                continue;
            }

            let fields: Vec<&str> = trimmed.split_whitespace().collect();
            if fields.len() < 4 {
                warn!("fstab: malformed entry {:?}", trimmed);
                continue;
            }

            entries.push(FstabEntry {
                device: fields[0].to_string(),
                path: fields[1].to_string(),
                fstype: fields[2].to_string(),
                opts: fields[3].split(',').map(str::to_string).collect(),
                mgr_opts: fields
                    .get(4)
                    .map(|csv| csv.split(',').map(str::to_string).collect())
                    .unwrap_or_default(),
            });
        }

        Fstab { entries }
    }

    /// Entries selected by `mount_all --late` (mgr-opts contains
    /// `latemount`) vs. bare `mount_all` (mgr-opts does not).
    pub fn select(&self, late: bool) -> impl Iterator<Item = &FstabEntry> {
        self.entries
            .iter()
            .filter(move |e| e.mgr_opts.iter().any(|o| o == "latemount") == late)
    }
}

/// `(glob pattern, capture regex)` pairs searched in this fixed order when
/// `ro.hardware` is unset (spec §4.2, SPEC_FULL §C.4 / §D). The original
/// BiggerMAC source searches only `/system` and only the uevent pattern
/// first; the two sibling code paths disagreed on which root to search, so
/// this is the declared union: uevent before fstab, `/system` before
/// `/vendor`, both globs applied under both roots.
const HARDWARE_SEARCH: &[(&str, &str)] = &[
    ("/system", r"ueventd\.([-_a-zA-Z0-9]+)\.rc$"),
    ("/vendor", r"ueventd\.([-_a-zA-Z0-9]+)\.rc$"),
    ("/system", r"fstab\.([-_a-zA-Z0-9]+)$"),
    ("/vendor", r"fstab\.([-_a-zA-Z0-9]+)$"),
];

fn resolve_aid(name: Option<&str>) -> u32 {
    name.map(aid::resolve_or_nobody).unwrap_or(0)
}

/// Owns the VFS and Property Store exclusively for the duration of boot
/// simulation (spec §5 "Shared-resource discipline").
pub struct Boot {
    pub vfs: Vfs,
    pub props: PropertyStore,
    pub services: BTreeMap<String, ServiceStmt>,
    actions: Vec<ActionStmt>,
    fstabs: BTreeMap<String, Fstab>,
    queue: VecDeque<usize>,
    queued: BTreeSet<usize>,
    current_stage: String,
}

impl Boot {
    pub fn new(vfs: Vfs, props: PropertyStore) -> Self {
        Self {
            vfs,
            props,
            services: BTreeMap::new(),
            actions: Vec::new(),
            fstabs: BTreeMap::new(),
            queue: VecDeque::new(),
            queued: BTreeSet::new(),
            current_stage: String::new(),
        }
    }

    /// Merge in one parsed `.rc` file's services and actions. Services are
    /// first-wins on name collision (`_add_service`'s `if name in
    /// self.services: return`); actions simply accumulate.
    pub fn load_rc(&mut self, rc: RcFile) {
        for svc in rc.services {
            self.services.entry(svc.name.clone()).or_insert(svc);
        }
        self.actions.extend(rc.actions);
    }

    /// Register fstab contents at `path` so a later `mount_all <path>`
    /// command can resolve it. The fstab file itself is read by the caller
    /// (the firmware-extraction collaborator owns host I/O); this just
    /// stores the already-read, already-parsed table.
    pub fn register_fstab(&mut self, path: &str, fstab: Fstab) {
        self.fstabs.insert(path.to_string(), fstab);
    }

    /// Drive the full boot sequence (spec §4.2 "Boot state machine").
    pub fn run(&mut self) {
        self.determine_hardware();
        self.trigger("early-init");
        self.drain();
        self.trigger("init");
        self.drain();
        self.trigger("late-init");
        self.drain();
    }

    /// Issue a stage (or re-enter one via the `trigger` command):
    /// enqueue every action whose condition now fires, in declared order.
    pub fn trigger(&mut self, stage: &str) {
        self.current_stage = stage.to_string();
        for idx in 0..self.actions.len() {
            if Self::fires(&self.actions[idx], stage, &self.props) && self.queued.insert(idx) {
                self.queue.push_back(idx);
            }
        }
    }

    fn fires(action: &ActionStmt, stage: &str, props: &PropertyStore) -> bool {
        let stage_trigger = action.triggers.iter().find_map(|t| match t {
            Trigger::Stage(s) => Some(s.as_str()),
            Trigger::Property(..) => None,
        });

        let stage_matches = match stage_trigger {
            Some(s) => s == stage,
            None => stage == "boot",
        };
        if !stage_matches {
            return false;
        }

        action.triggers.iter().all(|t| match t {
            Trigger::Stage(_) => true,
            Trigger::Property(key, value) => {
                value == "*" || props.get(key).unwrap_or("") == value
            }
        })
    }

    fn drain(&mut self) {
        while let Some(idx) = self.queue.pop_front() {
            self.queued.remove(&idx);
            let commands = self.actions[idx].commands.clone();
            for cmd in commands {
                self.execute(cmd);
            }
        }
    }

    fn execute(&mut self, cmd: Command) {
        match cmd {
            Command::Trigger(stage) => self.trigger(&stage),
            Command::Mkdir {
                path,
                mode,
                user,
                group,
            } => {
                let uid = resolve_aid(user.as_deref());
                let gid = resolve_aid(group.as_deref());
                self.vfs.mkdir(&path, uid, gid, mode);
            }
            Command::Chown { user, group, path } => {
                self.vfs
                    .chown(&path, aid::resolve_or_nobody(&user), aid::resolve_or_nobody(&group));
            }
            Command::Chmod { mode, path } => self.vfs.chmod(&path, mode),
            Command::Mount {
                fstype,
                device,
                path,
                opts,
            } => {
                if let Err(e) = self.vfs.add_mount_point(&path, &fstype, &device, opts) {
                    warn!("mount {}: {}", path, e);
                }
            }
            Command::MountAll { fstab, late } => self.mount_all(&fstab, late),
            Command::Enable(name) => {
                if let Some(svc) = self.services.get_mut(&name) {
                    svc.disabled = false;
                } else {
                    warn!("enable: unknown service {:?}", name);
                }
            }
            Command::Setprop(key, value) => {
                let expanded = self.props.expand(&value);
                self.props.set(key, expanded);
            }
            Command::NoOp => {}
        }
    }

    fn mount_all(&mut self, fstab_path: &str, late: bool) {
        let Some(fstab) = self.fstabs.get(fstab_path) else {
            warn!("mount_all: no fstab registered at {:?}", fstab_path);
            return;
        };

        let selected: Vec<FstabEntry> = fstab.select(late).cloned().collect();
        for entry in selected {
            if let Err(e) = self
                .vfs
                .add_mount_point(&entry.path, &entry.fstype, &entry.device, entry.opts.clone())
            {
                warn!("mount_all {}: {}", entry.path, e);
            }
        }
    }

    /// §4.2 "Property-based hardware discovery". No-op if `ro.hardware` is
    /// already set.
    fn determine_hardware(&mut self) {
        if self.props.get("ro.hardware").is_some() {
            return;
        }

        for &(root, pattern) in HARDWARE_SEARCH {
            let re = Regex::new(pattern).expect("static hardware-discovery regex");
            let mut matches: Vec<String> = self
                .vfs
                .files
                .keys()
                .filter(|p| p.starts_with(root) && re.is_match(p))
                .cloned()
                .collect();
            matches.sort();

            if let Some(path) = matches.first() {
                if let Some(caps) = re.captures(path) {
                    let guess = caps[1].to_string();
                    self.props.set("ro.hardware", guess);
                    return;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::init::parser;
    use crate::vfs::FilePolicy;

    fn boot_with(rc_text: &str) -> Boot {
        let rc = parser::parse_str("init.rc", rc_text).unwrap();
        let mut boot = Boot::new(Vfs::new(), PropertyStore::new());
        boot.load_rc(rc);
        boot
    }

    #[test]
    fn mkdir_command_creates_directory() {
        let mut boot = boot_with("on early-init\n    mkdir /data/local 0771 system system\n");
        boot.run();
        let fp = boot.vfs.get("/data/local").unwrap();
        assert!(fp.is_dir());
        assert_eq!(fp.uid, 1000);
    }

    #[test]
    fn trigger_command_fires_later_action_once() {
        let mut boot = boot_with(
            "on late-init\n    trigger boot\non boot\n    mkdir /ranonce 0755\n",
        );
        boot.run();
        assert!(boot.vfs.get("/ranonce").is_some());
    }

    #[test]
    fn property_trigger_requires_matching_value() {
        let mut boot = boot_with(
            "on boot && property:ro.debuggable=1\n    mkdir /debugonly 0755\n",
        );
        boot.props.set("ro.debuggable", "0");
        boot.trigger("late-init");
        boot.trigger("boot");
        assert!(boot.vfs.get("/debugonly").is_none());
    }

    #[test]
    fn wildcard_property_trigger_matches_any_value() {
        let mut boot = boot_with("on boot && property:sys.any=*\n    mkdir /any 0755\n");
        boot.props.set("sys.any", "whatever");
        boot.trigger("boot");
        assert!(boot.vfs.get("/any").is_some());
    }

    #[test]
    fn mount_all_late_selects_latemount_entries() {
        let mut boot = boot_with("on late-init\n    mount_all /vendor/etc/fstab.qcom --late\n");
        boot.register_fstab(
            "/vendor/etc/fstab.qcom",
            Fstab::parse(
                "/dev/block/vda /vendor ext4 ro wait\n\
                 /dev/block/vdb /data f2fs noatime wait,latemount\n",
            ),
        );
        boot.run();
        assert!(boot.vfs.mount_points.contains_key("/data"));
        assert!(!boot.vfs.mount_points.contains_key("/vendor"));
    }

    #[test]
    fn bare_mount_all_selects_non_latemount_entries() {
        let mut boot = boot_with("on early-init\n    mount_all /fstab.qcom\n");
        boot.register_fstab(
            "/fstab.qcom",
            Fstab::parse(
                "/dev/block/vda /vendor ext4 ro wait\n\
                 /dev/block/vdb /data f2fs noatime wait,latemount\n",
            ),
        );
        boot.run();
        assert!(boot.vfs.mount_points.contains_key("/vendor"));
        assert!(!boot.vfs.mount_points.contains_key("/data"));
    }

    #[test]
    fn determine_hardware_picks_up_fstab_suffix() {
        let mut boot = boot_with("on early-init\n    mkdir /marker 0755\n");
        boot.vfs
            .add("/vendor/etc/fstab.qcom", FilePolicy::new(0o100644, 0, 0))
            .unwrap();
        boot.run();
        assert_eq!(boot.props.get("ro.hardware"), Some("qcom"));
    }

    #[test]
    fn enable_clears_disabled_flag() {
        let mut boot = boot_with(
            "service foo /system/bin/foo\n    disabled\non late-init\n    enable foo\n",
        );
        boot.run();
        assert!(!boot.services["foo"].disabled);
    }
}
