// src/solver/virtual_packages.rs

//! Virtual packages
//!
//! Solvers see system properties (`__glibc`, `__cuda`, `__osx`, ...) as
//! packages. Checks must not depend on the machine they run on, so every
//! plausible version is offered and recipes may pin whatever they need.
//! `__glibc` and `__cuda` are platform independent and live in `noarch`;
//! the rest are specific to a subdir.

use crate::error::{Error, Result};
use crate::solver::index::{PackageRecord, RepoData};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use tempfile::TempDir;
use tracing::debug;
use url::Url;

/// Subdirs written to the on-disk virtual channel
pub const VIRTUAL_SUBDIRS: &[&str] = &[
    "linux-64",
    "linux-aarch64",
    "linux-ppc64le",
    "osx-64",
    "osx-arm64",
    "win-64",
    "noarch",
];

/// Channel name the in-process solver reports for virtual records
pub const VIRTUAL_CHANNEL_NAME: &str = "@virtual";

const CUDA_LEGACY: &[&str] = &[
    "9.2", "10.0", "10.1", "10.2", "11.0", "11.1", "11.2", "11.3", "11.4", "11.5", "11.6", "11.7", "11.8",
];

fn virtual_record(name: &str, version: &str, timestamp: u64) -> PackageRecord {
    PackageRecord {
        name: name.to_string(),
        version: version.to_string(),
        build: "0".to_string(),
        build_number: 0,
        depends: Vec::new(),
        constrains: Vec::new(),
        timestamp: Some(timestamp),
        subdir: None,
        filename: String::new(),
        run_exports: Default::default(),
    }
}

/// `major.minor` for every major in `majors` and minor in `0..20`
fn modern_versions(majors: std::ops::RangeInclusive<u32>) -> impl Iterator<Item = String> {
    majors.flat_map(|major| (0..20).map(move |minor| format!("{}.{}", major, minor)))
}

fn timestamp_now() -> u64 {
    u64::try_from(chrono::Utc::now().timestamp_millis()).unwrap_or(0)
}

/// Platform independent records: `__glibc` and `__cuda`
pub fn noarch_records(max_glibc_minor: u32) -> Vec<PackageRecord> {
    let ts = timestamp_now();
    let mut records: Vec<PackageRecord> = (12..=max_glibc_minor.max(12))
        .map(|minor| virtual_record("__glibc", &format!("2.{}", minor), ts))
        .collect();
    records.extend(CUDA_LEGACY.iter().map(|v| virtual_record("__cuda", v, ts)));
    records.extend(modern_versions(12..=19).map(|v| virtual_record("__cuda", &v, ts)));
    records
}

/// Records specific to one subdir
///
/// Unknown subdirs get nothing.
pub fn records_for_subdir(subdir: &str) -> Vec<PackageRecord> {
    let ts = timestamp_now();
    let platform = subdir.split('-').next().unwrap_or_default();
    match platform {
        "linux" => vec![virtual_record("__linux", "0", ts), virtual_record("__unix", "0", ts)],
        "osx" => {
            let mut records = vec![virtual_record("__unix", "0", ts)];
            records.extend((9..=16).map(|minor| virtual_record("__osx", &format!("10.{}", minor), ts)));
            records.extend(modern_versions(11..=19).map(|v| virtual_record("__osx", &v, ts)));
            records
        }
        "win" => vec![virtual_record("__win", "0", ts)],
        _ => Vec::new(),
    }
}

/// Records visible to a solve for `subdir`: its own plus `noarch`
pub fn records_for_target(subdir: &str, max_glibc_minor: u32) -> Vec<PackageRecord> {
    let mut records = records_for_subdir(subdir);
    records.extend(noarch_records(max_glibc_minor));
    records
}

/// A local channel holding the virtual packages, for external solvers
///
/// Written once; the directory is removed when the value is dropped.
pub struct VirtualChannel {
    dir: TempDir,
    url: Url,
}

impl VirtualChannel {
    pub fn create(max_glibc_minor: u32) -> Result<Self> {
        let dir = tempfile::Builder::new()
            .prefix("solvcheck-virtual-")
            .tempdir()
            .map_err(|e| Error::IoError(format!("Failed to create virtual channel: {}", e)))?;

        for subdir in VIRTUAL_SUBDIRS {
            let records = if *subdir == "noarch" {
                noarch_records(max_glibc_minor)
            } else {
                records_for_subdir(subdir)
            };
            write_subdir(dir.path(), subdir, records)?;
        }

        let url = Url::from_directory_path(dir.path())
            .map_err(|_| Error::IoError(format!("Invalid channel path {}", dir.path().display())))?;
        debug!("Wrote virtual package channel to {}", dir.path().display());
        Ok(Self { dir, url })
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }
}

fn write_subdir(root: &Path, subdir: &str, records: Vec<PackageRecord>) -> Result<()> {
    let packages: BTreeMap<String, PackageRecord> = records
        .into_iter()
        .map(|mut record| {
            record.subdir = Some(subdir.to_string());
            let filename = format!("{}-{}-{}.tar.bz2", record.name, record.version, record.build);
            (filename, record)
        })
        .collect();
    let repodata = RepoData {
        info: Some(crate::solver::index::RepoDataInfo {
            subdir: Some(subdir.to_string()),
        }),
        packages,
        conda_packages: BTreeMap::new(),
        repodata_version: Some(1),
    };

    let dir = root.join(subdir);
    fs::create_dir_all(&dir)?;
    let json = serde_json::to_string(&repodata)
        .map_err(|e| Error::IndexError(format!("Failed to serialize virtual repodata: {}", e)))?;
    fs::write(dir.join("repodata.json"), json)?;
    Ok(())
}
