// SPDX-License-Identifier: MIT

//! Persisted artifacts (spec §6 "Persisted artifacts", `SPEC_FULL.md` §C.6):
//! a pickle-like binary VFS snapshot, the merged property file, and the
//! missing-file-context report, all written under a caller-supplied
//! `eval/<firmware>/` directory the way `original_source/se/policyfiles.py`
//! (`PolicyFiles`) lays its per-firmware output out.

use std::io::{self, Read, Write};
use std::path::Path;

use cap_std::{ambient_authority, fs::Dir};
use tracing::info;

use crate::label::LabelReport;
use crate::property::PropertyStore;
use crate::vfs::Vfs;

const DB_SUBDIR: &str = "db";
const COMBINED_FS_FILENAME: &str = "combined_fs.bin";
const PROPERTIES_FILENAME: &str = "all_properties.prop";
const MISSING_FC_REPORT_FILENAME: &str = "missing-fc-report.txt";

fn io_err(e: impl std::error::Error + Send + Sync + 'static) -> io::Error {
    io::Error::new(io::ErrorKind::Other, e)
}

/// Open (creating if necessary) `<base_dir>/eval/<firmware_name>/`, the
/// per-firmware output root every artifact below is written under.
fn open_firmware_dir(base_dir: &Path, firmware_name: &str) -> io::Result<Dir> {
    let root = Dir::open_ambient_dir(base_dir, ambient_authority())
        .or_else(|_| {
            std::fs::create_dir_all(base_dir)?;
            Dir::open_ambient_dir(base_dir, ambient_authority())
        })?;
    root.create_dir_all("eval")?;
    let eval = root.open_dir("eval")?;
    eval.create_dir_all(firmware_name)?;
    eval.open_dir(firmware_name)
}

/// Write the VFS as a bincode-serialized snapshot at
/// `eval/<firmware>/db/combined_fs.bin` (spec §6's "pickle-like binary
/// snapshot of the VFS keyed by firmware name").
pub fn write_combined_fs(base_dir: &Path, firmware_name: &str, vfs: &Vfs) -> io::Result<()> {
    let dir = open_firmware_dir(base_dir, firmware_name)?;
    dir.create_dir_all(DB_SUBDIR)?;
    let db = dir.open_dir(DB_SUBDIR)?;

    let bytes = bincode::serialize(vfs).map_err(io_err)?;
    let mut file = db.create(COMBINED_FS_FILENAME)?;
    file.write_all(&bytes)?;

    info!(
        bytes = bytes.len(),
        "wrote combined_fs.bin for {firmware_name}"
    );
    Ok(())
}

/// Load a previously-written `combined_fs.bin` snapshot back into a [`Vfs`].
pub fn read_combined_fs(base_dir: &Path, firmware_name: &str) -> io::Result<Vfs> {
    let dir = open_firmware_dir(base_dir, firmware_name)?;
    let db = dir.open_dir(DB_SUBDIR)?;
    let mut file = db.open(COMBINED_FS_FILENAME)?;
    let mut bytes = Vec::new();
    file.read_to_end(&mut bytes)?;
    bincode::deserialize(&bytes).map_err(io_err)
}

/// Write the merged property store as `KEY=VALUE` lines to
/// `eval/<firmware>/all_properties.prop`.
pub fn write_properties(base_dir: &Path, firmware_name: &str, props: &PropertyStore) -> io::Result<()> {
    let dir = open_firmware_dir(base_dir, firmware_name)?;
    let mut file = dir.create(PROPERTIES_FILENAME)?;
    file.write_all(props.to_text().as_bytes())?;
    Ok(())
}

/// Write the plain-text report of file-context regexes that matched
/// nothing and paths dropped for want of a label, to
/// `eval/<firmware>/missing-fc-report.txt`.
pub fn write_missing_fc_report(
    base_dir: &Path,
    firmware_name: &str,
    label_report: &LabelReport,
) -> io::Result<()> {
    let dir = open_firmware_dir(base_dir, firmware_name)?;
    let mut file = dir.create(MISSING_FC_REPORT_FILENAME)?;

    writeln!(
        file,
        "# {} path(s) dropped, {} recovered by genfscon/xattr fallback",
        label_report.dropped.len(),
        label_report.recovered
    )?;
    for path in &label_report.dropped {
        writeln!(file, "dropped\t{path}")?;
    }
    for conflict in &label_report.conflicts {
        writeln!(file, "conflict\t{conflict}")?;
    }

    Ok(())
}

/// Copy a policy input file into `eval/<firmware>/`, preserving its
/// basename (spec §6 "Copied-out policy files ... preserving basenames").
pub fn copy_policy_file(base_dir: &Path, firmware_name: &str, source: &Path) -> io::Result<()> {
    let dir = open_firmware_dir(base_dir, firmware_name)?;
    let Some(basename) = source.file_name() else {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("policy file {source:?} has no basename"),
        ));
    };

    let contents = std::fs::read(source)?;
    let mut file = dir.create(basename)?;
    file.write_all(&contents)?;
    Ok(())
}

/// Write every artifact spec §6 names for one firmware's analysis run.
pub fn write_all(
    base_dir: &Path,
    firmware_name: &str,
    vfs: &Vfs,
    props: &PropertyStore,
    label_report: &LabelReport,
) -> io::Result<()> {
    write_combined_fs(base_dir, firmware_name, vfs)?;
    write_properties(base_dir, firmware_name, props)?;
    write_missing_fc_report(base_dir, firmware_name, label_report)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;
    use crate::vfs::FilePolicy;

    #[test]
    fn round_trips_combined_fs_through_a_temp_dir() {
        let dir = TempDir::new().unwrap();
        let mut vfs = Vfs::new();
        vfs.add("/init", FilePolicy::new(0o100755, 0, 0)).unwrap();

        write_combined_fs(dir.path(), "walleye", &vfs).unwrap();
        let loaded = read_combined_fs(dir.path(), "walleye").unwrap();

        assert!(loaded.get("/init").is_some());
    }

    #[test]
    fn writes_properties_as_key_value_lines() {
        let dir = TempDir::new().unwrap();
        let mut props = PropertyStore::new();
        props.set("ro.hardware", "qcom");

        write_properties(dir.path(), "walleye", &props).unwrap();

        let path = dir
            .path()
            .join("eval")
            .join("walleye")
            .join(PROPERTIES_FILENAME);
        let text = std::fs::read_to_string(path).unwrap();
        assert!(text.contains("ro.hardware=qcom"));
    }

    #[test]
    fn missing_fc_report_lists_dropped_paths() {
        let dir = TempDir::new().unwrap();
        let report = LabelReport {
            recovered: 2,
            dropped: vec!["/oddball".to_string()],
            conflicts: Vec::new(),
        };

        write_missing_fc_report(dir.path(), "walleye", &report).unwrap();

        let path = dir
            .path()
            .join("eval")
            .join("walleye")
            .join(MISSING_FC_REPORT_FILENAME);
        let text = std::fs::read_to_string(path).unwrap();
        assert!(text.contains("dropped\t/oddball"));
    }

}
