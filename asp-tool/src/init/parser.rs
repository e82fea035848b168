// SPDX-License-Identifier: MIT

//! `.rc` grammar parsing (spec §4.2): imports, service sections, action
//! sections, and their options/commands. Produces plain data; nothing here
//! touches the VFS or Property Store — that's `init::boot`'s job.

use std::path::{Path, PathBuf};

use crate::error::AspError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Trigger {
    Stage(String),
    Property(String, String),
}

#[derive(Debug, Clone)]
pub enum Command {
    Trigger(String),
    Mkdir {
        path: String,
        mode: u32,
        user: Option<String>,
        group: Option<String>,
    },
    Chown {
        user: String,
        group: String,
        path: String,
    },
    Chmod {
        mode: u32,
        path: String,
    },
    Mount {
        fstype: String,
        device: String,
        path: String,
        opts: Vec<String>,
    },
    MountAll {
        fstab: String,
        late: bool,
    },
    Enable(String),
    Setprop(String, String),
    /// `write`, `copy`, `rm`, `rmdir` — declared no-ops (spec §4.2).
    NoOp,
}

#[derive(Debug, Clone, Default)]
pub struct ServiceStmt {
    pub name: String,
    pub args: Vec<String>,
    pub user: Option<String>,
    pub groups: Vec<String>,
    pub capabilities: Vec<String>,
    pub seclabel: Option<String>,
    pub classes: Vec<String>,
    pub disabled: bool,
    pub oneshot: bool,
    /// Options not in the recognized set, retained verbatim but never
    /// interpreted, matching spec §4.2.
    pub unknown_options: Vec<(String, Vec<String>)>,
}

#[derive(Debug, Clone)]
pub struct ActionStmt {
    pub triggers: Vec<Trigger>,
    pub commands: Vec<Command>,
}

#[derive(Debug, Clone, Default)]
pub struct RcFile {
    pub imports: Vec<String>,
    pub services: Vec<ServiceStmt>,
    pub actions: Vec<ActionStmt>,
}

enum Section<'a> {
    None,
    Service(&'a mut ServiceStmt),
    Action(&'a mut ActionStmt),
}

/// Join trailing-backslash continuations and collapse internal whitespace
/// runs, matching spec §4.2's lexical rules. Comments and blank lines
/// become empty strings (filtered by the caller) rather than disappearing
/// from line numbering, so error messages stay aligned with the source.
fn logical_lines(text: &str) -> Vec<(usize, String)> {
    let mut out = Vec::new();
    let mut pending = String::new();
    let mut start_line = 0;

    for (idx, raw) in text.lines().enumerate() {
        let line = raw.trim_end();
        if pending.is_empty() {
            start_line = idx + 1;
        }

        if let Some(stripped) = line.strip_suffix('\\') {
            pending.push_str(stripped.trim_end());
            pending.push(' ');
            continue;
        }

        pending.push_str(line);
        out.push((start_line, std::mem::take(&mut pending)));
    }

    if !pending.is_empty() {
        out.push((start_line, pending));
    }

    out
}

fn collapse_whitespace(line: &str) -> String {
    line.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn is_indented(raw: &str) -> bool {
    raw.starts_with(' ') || raw.starts_with('\t')
}

fn parse_trigger_list(s: &str) -> Vec<Trigger> {
    s.split("&&")
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(|t| match t.strip_prefix("property:") {
            Some(rest) => match rest.split_once('=') {
                Some((k, v)) => Trigger::Property(k.trim().to_string(), v.trim().to_string()),
                None => Trigger::Stage(t.to_string()),
            },
            None => Trigger::Stage(t.to_string()),
        })
        .collect()
}

fn apply_service_option(svc: &mut ServiceStmt, ident: &str, args: &[&str]) {
    match ident {
        "user" => svc.user = args.first().map(|s| s.to_string()),
        "group" => svc.groups = args.iter().map(|s| s.to_string()).collect(),
        "capabilities" => svc.capabilities = args.iter().map(|s| s.to_string()).collect(),
        "seclabel" => svc.seclabel = args.first().map(|s| s.to_string()),
        "class" => svc.classes = args.iter().map(|s| s.to_string()).collect(),
        "disabled" => svc.disabled = true,
        "oneshot" => svc.oneshot = true,
        other => svc
            .unknown_options
            .push((other.to_string(), args.iter().map(|s| s.to_string()).collect())),
    }
}

fn parse_command(path: &Path, line_no: usize, ident: &str, args: &[&str]) -> Result<Command, AspError> {
    let err = |reason: String| AspError::MalformedConfig {
        path: path.to_path_buf(),
        line: line_no,
        reason,
    };

    match ident {
        "trigger" => {
            let stage = args.first().ok_or_else(|| err("trigger needs a stage".into()))?;
            Ok(Command::Trigger(stage.to_string()))
        }
        "mkdir" => {
            let path_arg = args.first().ok_or_else(|| err("mkdir needs a path".into()))?;
            let mode = args
                .get(1)
                .map(|m| u32::from_str_radix(m, 8).unwrap_or(0o755))
                .unwrap_or(0o755);
            Ok(Command::Mkdir {
                path: path_arg.to_string(),
                mode,
                user: args.get(2).map(|s| s.to_string()),
                group: args.get(3).map(|s| s.to_string()),
            })
        }
        "chown" => {
            if args.len() < 3 {
                return Err(err("chown needs user, group, path".into()));
            }
            Ok(Command::Chown {
                user: args[0].to_string(),
                group: args[1].to_string(),
                path: args[2].to_string(),
            })
        }
        "chmod" => {
            if args.len() < 2 {
                return Err(err("chmod needs mode, path".into()));
            }
            let mode = u32::from_str_radix(args[0], 8)
                .map_err(|_| err(format!("bad octal mode {:?}", args[0])))?;
            Ok(Command::Chmod {
                mode,
                path: args[1].to_string(),
            })
        }
        "mount" => {
            if args.len() < 3 {
                return Err(err("mount needs fstype, device, path".into()));
            }
            let opts = args
                .get(3)
                .map(|csv| csv.split(',').map(str::to_string).collect())
                .unwrap_or_default();
            Ok(Command::Mount {
                fstype: args[0].to_string(),
                device: args[1].to_string(),
                path: args[2].to_string(),
                opts,
            })
        }
        "mount_all" => {
            let fstab = args.first().ok_or_else(|| err("mount_all needs a fstab path".into()))?;
            let late = args.iter().any(|a| *a == "--late");
            Ok(Command::MountAll {
                fstab: fstab.to_string(),
                late,
            })
        }
        "enable" => {
            let name = args.first().ok_or_else(|| err("enable needs a service name".into()))?;
            Ok(Command::Enable(name.to_string()))
        }
        "setprop" => {
            if args.len() < 2 {
                return Err(err("setprop needs key, value".into()));
            }
            Ok(Command::Setprop(args[0].to_string(), args[1].to_string()))
        }
        "write" | "copy" | "rm" | "rmdir" => Ok(Command::NoOp),
        other => Err(err(format!("unknown command {other:?}"))),
    }
}

/// Parse one `.rc` file's text into its sections. `path` is used only to
/// attribute line numbers in error messages.
pub fn parse(path: &Path, text: &str) -> Result<RcFile, AspError> {
    let mut file = RcFile::default();
    let mut current: Section = Section::None;

    for (raw_line_no, raw_joined) in logical_lines(text) {
        let indented = is_indented(&raw_joined);
        let collapsed = collapse_whitespace(&raw_joined);
        if collapsed.is_empty() || collapsed.starts_with('#') {
            continue;
        }

        let components: Vec<&str> = collapsed.split(' ').collect();
        let head = components[0];
        let rest = &components[1..];

        if !indented && head == "import" {
            current = Section::None;
            let target = rest.first().ok_or_else(|| AspError::MalformedConfig {
                path: path.to_path_buf(),
                line: raw_line_no,
                reason: "import needs a path".into(),
            })?;
            file.imports.push(target.to_string());
            continue;
        }

        if !indented && head == "service" {
            let name = rest.first().ok_or_else(|| AspError::MalformedConfig {
                path: path.to_path_buf(),
                line: raw_line_no,
                reason: "service needs a name".into(),
            })?;
            let svc = ServiceStmt {
                name: name.to_string(),
                args: rest[1..].iter().map(|s| s.to_string()).collect(),
                ..Default::default()
            };
            file.services.push(svc);
            let idx = file.services.len() - 1;
            current = Section::Service(&mut file.services[idx]);
            continue;
        }

        if !indented && head == "on" {
            let trigger_text = rest.join(" ");
            let stmt = ActionStmt {
                triggers: parse_trigger_list(&trigger_text),
                commands: Vec::new(),
            };
            file.actions.push(stmt);
            let idx = file.actions.len() - 1;
            current = Section::Action(&mut file.actions[idx]);
            continue;
        }

        match &mut current {
            Section::Service(svc) => apply_service_option(svc, head, rest),
            Section::Action(action) => {
                let cmd = parse_command(path, raw_line_no, head, rest)?;
                action.commands.push(cmd);
            }
            Section::None => {
                return Err(AspError::MalformedConfig {
                    path: path.to_path_buf(),
                    line: raw_line_no,
                    reason: format!("{head:?} outside any section"),
                });
            }
        }
    }

    Ok(file)
}

/// Convenience wrapper for callers that already have the text and only
/// want a path for diagnostics (e.g. a pseudo-path like `<init.rc>`).
pub fn parse_str(display_path: &str, text: &str) -> Result<RcFile, AspError> {
    parse(&PathBuf::from(display_path), text)
}
