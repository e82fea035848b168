// SPDX-License-Identifier: MIT

//! Process credentials and the `execve` transition model (spec §3, §4.8).

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::aid;
use crate::cap::Capabilities;
use crate::context::SELinuxContext;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Cred {
    pub uid: u32,
    pub gid: u32,
    pub groups: BTreeSet<u32>,
    pub sid: Option<SELinuxContext>,
    pub cap: Capabilities,
}

impl Default for Cred {
    /// Default uid/gid is root, matching `AndroidInitService.__init__`'s
    /// `self.cred.uid = 0; self.cred.gid = 0`.
    fn default() -> Self {
        Self {
            uid: 0,
            gid: 0,
            groups: BTreeSet::new(),
            sid: None,
            cap: Capabilities::new(),
        }
    }
}

impl Cred {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clear_groups(&mut self) {
        self.groups.clear();
    }

    pub fn add_group(&mut self, name: &str) {
        if let Some(gid) = aid::resolve(name) {
            self.groups.insert(gid);
        }
        // Unknown group names are silently skipped, matching the
        // original's `except KeyError: log.debug(...)` path.
    }

    /// Credential resulting from `execve`-ing into `new_sid` (or retaining
    /// the current sid if `None`, for a dyntransition rather than an exec).
    ///
    /// Copies uid/gid/groups verbatim; capabilities are preserved only when
    /// the *resulting* uid is 0 (non-root execve drops privileges by
    /// default, consistent with the original's `if new.uid == 0`).
    pub fn execve(&self, new_sid: Option<SELinuxContext>) -> Cred {
        let mut new = Cred {
            uid: self.uid,
            gid: self.gid,
            groups: self.groups.clone(),
            sid: new_sid.or_else(|| self.sid.clone()),
            cap: Capabilities::new(),
        };

        if new.uid == 0 {
            new.cap = self.cap.clone();
        }

        new
    }
}

impl fmt::Display for Cred {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut parts = vec![
            format!("u={}", aid::display(self.uid)),
            format!("g={}", aid::display(self.gid)),
        ];

        if let Some(sid) = &self.sid {
            parts.push(format!("sid={sid}"));
        }

        if !self.groups.is_empty() {
            let names: Vec<String> = self.groups.iter().map(|&g| aid::display(g)).collect();
            parts.push(format!("groups={}", names.join(",")));
        }

        let effective = self.cap.set(crate::cap::CapSet::Effective);
        if !effective.is_empty() {
            if effective.len() == crate::cap::ALL_CAPABILITIES.len() {
                parts.push("cap=EVERYTHING".to_string());
            } else {
                parts.push(format!(
                    "cap={}",
                    effective.iter().cloned().collect::<Vec<_>>().join(",")
                ));
            }
        }

        write!(f, "<Cred {}>", parts.join(" "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_cred_is_root() {
        let cred = Cred::new();
        assert_eq!(cred.uid, 0);
        assert_eq!(cred.gid, 0);
    }

    #[test]
    fn execve_as_root_preserves_capabilities() {
        let mut cred = Cred::new();
        cred.cap = Capabilities::grant_all();
        let next = cred.execve(Some(SELinuxContext::for_type("init")));
        assert_eq!(next.uid, 0);
        assert!(!next.cap.is_empty_dac());
        assert_eq!(next.sid.unwrap().ty, "init");
    }

    #[test]
    fn execve_as_nonroot_drops_capabilities() {
        let mut cred = Cred::new();
        cred.uid = 1000;
        cred.cap = Capabilities::grant_all();
        let next = cred.execve(None);
        assert_eq!(next.uid, 1000);
        assert!(next.cap.is_empty_dac());
    }

    #[test]
    fn execve_without_new_sid_preserves_current_sid() {
        let mut cred = Cred::new();
        cred.sid = Some(SELinuxContext::for_type("zygote"));
        let next = cred.execve(None);
        assert_eq!(next.sid.unwrap().ty, "zygote");
    }

    #[test]
    fn display_collapses_full_capability_set() {
        let mut cred = Cred::new();
        cred.cap = Capabilities::grant_all();
        assert!(cred.to_string().contains("cap=EVERYTHING"));
    }
}
