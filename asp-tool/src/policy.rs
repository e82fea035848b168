// SPDX-License-Identifier: MIT

//! The data shape handed over by the (out-of-scope, §1/§6) SELinux
//! binary-policy parser: classes, commons, types, attributes, aliases, AV
//! and type-transition rules, `genfscon`, and `fs_use`. Nothing in this
//! module parses a binary `sepolicy` blob; it's the plain-data contract the
//! rest of the engine is built against.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Class {
    pub name: String,
    pub common: Option<String>,
    pub perms: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Common {
    pub name: String,
    pub perms: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AvRule {
    pub source: String,
    pub target: String,
    pub class: String,
    pub perms: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TypeTransitionRule {
    pub source: String,
    pub target: String,
    pub class: String,
    pub default: String,
    /// Present only for filename type_transition rules.
    pub filename: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Genfscon {
    pub fstype: String,
    pub partial_path: String,
    pub context: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FsUse {
    pub fstype: String,
    pub context: String,
}

/// The fully-loaded policy facts consumed from the external collaborator.
///
/// `types`/`attributes`/`aliases` mirror the original's three parallel
/// maps: `types[name]` is the list of attributes a concrete type carries
/// (or, for an alias, is instead looked up through `aliases`); `attributes
/// [name]` is the list of concrete member types of an attribute.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SePolicy {
    pub classes: BTreeMap<String, Class>,
    pub commons: BTreeMap<String, Common>,
    /// attribute name -> member type names
    pub attributes: BTreeMap<String, Vec<String>>,
    /// concrete type name -> attribute names it carries
    pub type_attributes: BTreeMap<String, Vec<String>>,
    /// alias name -> canonical type name
    pub aliases: BTreeMap<String, String>,
    pub av_rules: Vec<AvRule>,
    pub type_transitions: Vec<TypeTransitionRule>,
    pub genfscons: BTreeMap<String, Vec<Genfscon>>,
    pub fs_uses: BTreeMap<String, FsUse>,
}

impl SePolicy {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_attribute(&self, name: &str) -> bool {
        self.attributes.contains_key(name)
    }

    pub fn is_alias(&self, name: &str) -> bool {
        self.aliases.contains_key(name)
    }

    /// Resolve an alias to its canonical type, leaving non-aliases
    /// untouched (spec invariant 2: aliases never appear as graph nodes).
    pub fn canonical<'a>(&'a self, name: &'a str) -> &'a str {
        self.aliases.get(name).map(String::as_str).unwrap_or(name)
    }

    /// `expand(t)` returns `[t]` for a concrete type and the member list
    /// for an attribute (spec §9 "Attribute expansion").
    pub fn expand<'a>(&'a self, name: &'a str) -> Vec<&'a str> {
        let name = self.canonical(name);
        match self.attributes.get(name) {
            Some(members) => members.iter().map(String::as_str).collect(),
            None => vec![name],
        }
    }

    pub fn class_inherits(&self, class: &str, common: &str) -> bool {
        self.classes
            .get(class)
            .and_then(|c| c.common.as_deref())
            .map(|c| c == common)
            .unwrap_or(false)
    }
}
