// SPDX-License-Identifier: MIT

//! Linux capability sets, modeled as an offline policy object rather than a
//! live-kernel syscall wrapper (unlike `rustix::thread::CapabilitySets`,
//! which this crate has no use for since nothing here runs on the device
//! being analyzed).

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

/// The full Linux capability name list, the same spelling convention
/// `rustix::thread::CapabilityFlags` uses (`CAP_<NAME>`), stored here
/// without the `CAP_` prefix since every name in this module already lives
/// under `asp::cap`.
pub const ALL_CAPABILITIES: &[&str] = &[
    "CHOWN",
    "DAC_OVERRIDE",
    "DAC_READ_SEARCH",
    "FOWNER",
    "FSETID",
    "KILL",
    "SETGID",
    "SETUID",
    "SETPCAP",
    "LINUX_IMMUTABLE",
    "NET_BIND_SERVICE",
    "NET_BROADCAST",
    "NET_ADMIN",
    "NET_RAW",
    "IPC_LOCK",
    "IPC_OWNER",
    "SYS_MODULE",
    "SYS_RAWIO",
    "SYS_CHROOT",
    "SYS_PTRACE",
    "SYS_PACCT",
    "SYS_ADMIN",
    "SYS_BOOT",
    "SYS_NICE",
    "SYS_RESOURCE",
    "SYS_TIME",
    "SYS_TTY_CONFIG",
    "MKNOD",
    "LEASE",
    "AUDIT_WRITE",
    "AUDIT_CONTROL",
    "SETFCAP",
    "MAC_OVERRIDE",
    "MAC_ADMIN",
    "SYSLOG",
    "WAKE_ALARM",
    "BLOCK_SUSPEND",
    "AUDIT_READ",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum CapSet {
    Permitted,
    Effective,
    Inheritable,
    Bounding,
    Ambient,
}

/// The five named subsets plus a "selinux-granted" overlay, which tracks
/// capabilities the SELinux `capability`/`capability2` classes allow on
/// `self` (§4.6 point 1) without those showing up as DAC-visible
/// capabilities.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capabilities {
    permitted: BTreeSet<String>,
    effective: BTreeSet<String>,
    inheritable: BTreeSet<String>,
    bounding: BTreeSet<String>,
    ambient: BTreeSet<String>,
    selinux: BTreeSet<String>,
}

impl Capabilities {
    pub fn new() -> Self {
        Self::default()
    }

    /// All five subsets populated with every known capability, bounding
    /// included; used for `kernel` and `init` at the start of the
    /// credential simulation (§4.8 points 1-2).
    pub fn grant_all() -> Self {
        let mut caps = Self::new();
        for set in [
            CapSet::Permitted,
            CapSet::Effective,
            CapSet::Inheritable,
            CapSet::Bounding,
            CapSet::Ambient,
        ] {
            for &name in ALL_CAPABILITIES {
                caps.add(set, name);
            }
        }
        caps
    }

    fn set_mut(&mut self, set: CapSet) -> &mut BTreeSet<String> {
        match set {
            CapSet::Permitted => &mut self.permitted,
            CapSet::Effective => &mut self.effective,
            CapSet::Inheritable => &mut self.inheritable,
            CapSet::Bounding => &mut self.bounding,
            CapSet::Ambient => &mut self.ambient,
        }
    }

    pub fn set(&self, set: CapSet) -> &BTreeSet<String> {
        match set {
            CapSet::Permitted => &self.permitted,
            CapSet::Effective => &self.effective,
            CapSet::Inheritable => &self.inheritable,
            CapSet::Bounding => &self.bounding,
            CapSet::Ambient => &self.ambient,
        }
    }

    pub fn add(&mut self, set: CapSet, name: &str) {
        self.set_mut(set).insert(name.to_ascii_uppercase());
    }

    pub fn drop_cap(&mut self, set: CapSet, name: &str) {
        self.set_mut(set).remove(&name.to_ascii_uppercase());
    }

    pub fn has(&self, set: CapSet, name: &str) -> bool {
        self.set(set).contains(&name.to_ascii_uppercase())
    }

    /// Drop every capability from every subset.
    pub fn drop_all(&mut self) {
        for set in [
            CapSet::Permitted,
            CapSet::Effective,
            CapSet::Inheritable,
            CapSet::Bounding,
            CapSet::Ambient,
        ] {
            self.set_mut(set).clear();
        }
    }

    pub fn set_bounding_empty(&mut self) {
        self.bounding.clear();
    }

    /// Set permitted/effective/inheritable/bounding/ambient all equal to
    /// the given set of names, as used by the init service "ambient
    /// capabilities" rule (§4.8 point 3d) and `system_server`'s final fixed
    /// set (§4.8 point 6).
    pub fn set_all_equal<'a>(&mut self, names: impl IntoIterator<Item = &'a str>) {
        self.drop_all();
        let names: Vec<String> = names.into_iter().map(str::to_ascii_uppercase).collect();
        for set in [
            CapSet::Permitted,
            CapSet::Effective,
            CapSet::Inheritable,
            CapSet::Bounding,
            CapSet::Ambient,
        ] {
            *self.set_mut(set) = names.iter().cloned().collect();
        }
    }

    /// Add to only the given subsets (e.g. {permitted, effective,
    /// inherited} for `system_server`'s final fixed capability set).
    pub fn add_to<'a>(&mut self, sets: &[CapSet], names: impl IntoIterator<Item = &'a str>) {
        let names: Vec<String> = names.into_iter().map(str::to_ascii_uppercase).collect();
        for &set in sets {
            self.set_mut(set).extend(names.iter().cloned());
        }
    }

    pub fn add_selinux_self(&mut self, name: &str) {
        self.selinux.insert(name.to_ascii_uppercase());
    }

    pub fn selinux_granted(&self) -> &BTreeSet<String> {
        &self.selinux
    }

    pub fn is_empty_dac(&self) -> bool {
        self.permitted.is_empty()
            && self.effective.is_empty()
            && self.inheritable.is_empty()
            && self.bounding.is_empty()
            && self.ambient.is_empty()
    }
}
