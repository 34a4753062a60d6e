// src/solver/index.rs

//! Channel index loading and caching
//!
//! `repodata.json` files are fetched per (channel, subdir) from local
//! directories, `file://` URLs or HTTP(S), turned into solver candidates once
//! and kept for the lifetime of the loader. Each key is fetched by a single
//! thread: concurrent solves asking for the same index wait for that fetch
//! and share its result. Failed fetches are not cached.
//!
//! Run exports come from the record itself when the index carries them,
//! otherwise from the subdir's `run_exports.json.zst` (or plain
//! `run_exports.json`) keyed by artifact file name.

use crate::error::{Error, Result};
use crate::solver::channel::{channel_url, repodata_url, subdir_file_url};
use crate::solver::resolver::Candidate;
use crate::package_spec::PackageSpec;
use crate::solver::{BackendFailure, ResolvedPackage, RunExports};
use reqwest::StatusCode;
use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, OnceLock, PoisonError};
use std::time::Duration;
use tracing::{debug, info, trace, warn};
use url::Url;

/// HTTP timeout for repodata downloads
const HTTP_TIMEOUT: Duration = Duration::from_secs(300);

/// Artifact extensions, newest format first
const ARTIFACT_EXTENSIONS: &[&str] = &[".conda", ".tar.bz2"];

/// One package entry of `repodata.json`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageRecord {
    pub name: String,
    pub version: String,
    pub build: String,
    #[serde(default)]
    pub build_number: u64,
    #[serde(default)]
    pub depends: Vec<String>,
    #[serde(default)]
    pub constrains: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subdir: Option<String>,
    /// Artifact file name; the key of the record in `repodata.json`
    #[serde(default, rename = "fn", skip_serializing_if = "String::is_empty")]
    pub filename: String,
    #[serde(default, skip_serializing_if = "RunExports::is_empty")]
    pub run_exports: RunExports,
}

/// The parts of `repodata.json` the solver reads
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RepoData {
    #[serde(default)]
    pub info: Option<RepoDataInfo>,
    #[serde(default)]
    pub packages: BTreeMap<String, PackageRecord>,
    #[serde(default, rename = "packages.conda")]
    pub conda_packages: BTreeMap<String, PackageRecord>,
    #[serde(default)]
    pub repodata_version: Option<u32>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RepoDataInfo {
    #[serde(default)]
    pub subdir: Option<String>,
}

impl RepoData {
    pub fn from_json(content: &str) -> Result<Self> {
        serde_json::from_str(content).map_err(|e| Error::IndexError(format!("Invalid repodata: {}", e)))
    }

    /// All records, `.conda` entries winning over `.tar.bz2` duplicates
    pub fn into_records(self) -> Vec<PackageRecord> {
        let mut seen = HashSet::new();
        let mut records = Vec::new();
        for (filename, mut record) in self.conda_packages.into_iter().chain(self.packages) {
            let key = (record.name.clone(), record.version.clone(), record.build.clone());
            if seen.insert(key) {
                record.filename = filename;
                records.push(record);
            }
        }
        records
    }
}

/// Run exports of every artifact in one channel subdir
#[derive(Debug, Clone, Default)]
pub struct RunExportsTable {
    by_file: HashMap<String, RunExports>,
}

#[derive(Debug, Default, Deserialize)]
struct RunExportsDocument {
    #[serde(default)]
    packages: BTreeMap<String, RunExportsEntry>,
    #[serde(default, rename = "packages.conda")]
    conda_packages: BTreeMap<String, RunExportsEntry>,
}

#[derive(Debug, Default, Deserialize)]
struct RunExportsEntry {
    #[serde(default)]
    run_exports: RunExports,
}

impl RunExportsTable {
    pub fn from_json(content: &str) -> Result<Self> {
        let doc: RunExportsDocument = serde_json::from_str(content)
            .map_err(|e| Error::IndexError(format!("Invalid run_exports.json: {}", e)))?;
        let by_file = doc
            .conda_packages
            .into_iter()
            .chain(doc.packages)
            .filter(|(_, entry)| !entry.run_exports.is_empty())
            .map(|(file, entry)| (file, entry.run_exports))
            .collect();
        Ok(Self { by_file })
    }

    /// Exports of `filename`; a name without extension matches either format
    pub fn get(&self, filename: &str) -> Option<&RunExports> {
        if let Some(exports) = self.by_file.get(filename) {
            return Some(exports);
        }
        ARTIFACT_EXTENSIONS
            .iter()
            .find_map(|ext| self.by_file.get(&format!("{}{}", filename, ext)))
    }

    pub fn len(&self) -> usize {
        self.by_file.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_file.is_empty()
    }
}

/// Parsed index of one channel subdir
#[derive(Debug)]
pub struct SubdirIndex {
    pub channel: String,
    pub subdir: String,
    /// Whether the channel has this subdir at all
    pub found: bool,
    pub candidates: Vec<Arc<Candidate>>,
}

impl SubdirIndex {
    pub fn from_records(channel: &str, subdir: &str, records: Vec<PackageRecord>) -> Self {
        let total = records.len();
        let candidates: Vec<Arc<Candidate>> = records
            .into_iter()
            .filter_map(|mut r| {
                r.subdir.get_or_insert_with(|| subdir.to_string());
                Candidate::from_record(r, channel)
            })
            .map(Arc::new)
            .collect();
        if candidates.len() != total {
            debug!(
                channel,
                subdir,
                skipped = total - candidates.len(),
                "Skipped records with unparseable versions"
            );
        }
        Self {
            channel: channel.to_string(),
            subdir: subdir.to_string(),
            found: true,
            candidates,
        }
    }

    fn missing(channel: &str, subdir: &str) -> Self {
        Self {
            channel: channel.to_string(),
            subdir: subdir.to_string(),
            found: false,
            candidates: Vec::new(),
        }
    }
}

type FetchResult<V> = std::result::Result<Arc<V>, BackendFailure>;

/// Per-key cache where only the first caller fetches
struct FetchCache<V> {
    slots: Mutex<HashMap<(String, String), Arc<OnceLock<FetchResult<V>>>>>,
}

impl<V> FetchCache<V> {
    fn new() -> Self {
        Self {
            slots: Mutex::new(HashMap::new()),
        }
    }

    fn get_or_fetch(
        &self,
        key: (String, String),
        fetch: impl FnOnce() -> std::result::Result<V, BackendFailure>,
    ) -> FetchResult<V> {
        let slot = {
            let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
            Arc::clone(slots.entry(key.clone()).or_default())
        };

        let result = slot.get_or_init(|| fetch().map(Arc::new)).clone();
        if result.is_err() {
            let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
            if slots.get(&key).is_some_and(|current| Arc::ptr_eq(current, &slot)) {
                slots.remove(&key);
            }
        }
        result
    }
}

/// Fetches and caches channel indices
pub struct IndexLoader {
    client: Client,
    indices: FetchCache<SubdirIndex>,
    run_exports: FetchCache<RunExportsTable>,
    repodata_fetches: AtomicUsize,
}

impl IndexLoader {
    pub fn new() -> Result<Self> {
        let client = Client::builder()
            .timeout(HTTP_TIMEOUT)
            .build()
            .map_err(|e| Error::IndexError(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            indices: FetchCache::new(),
            run_exports: FetchCache::new(),
            repodata_fetches: AtomicUsize::new(0),
        })
    }

    /// Number of `repodata.json` documents actually fetched
    pub fn repodata_fetches(&self) -> usize {
        self.repodata_fetches.load(Ordering::Relaxed)
    }

    /// Index of `subdir` in `channel`, from cache when possible
    ///
    /// A channel without the subdir yields an empty index with
    /// `found == false` rather than an error.
    pub fn load(&self, channel: &str, subdir: &str) -> FetchResult<SubdirIndex> {
        let key = (channel.to_string(), subdir.to_string());
        self.indices.get_or_fetch(key, || self.fetch_index(channel, subdir))
    }

    /// Run exports published for `subdir` in `channel`
    ///
    /// Missing or unreadable files give an empty table.
    pub fn run_exports(&self, channel: &str, subdir: &str) -> FetchResult<RunExportsTable> {
        let key = (channel.to_string(), subdir.to_string());
        self.run_exports
            .get_or_fetch(key, || Ok(self.fetch_run_exports(channel, subdir)))
    }

    /// Fill in run exports of the `requested` packages from their channels
    ///
    /// Used for solutions reported by external solvers, which name the
    /// artifact but do not carry its exports.
    pub fn attach_run_exports(&self, packages: &mut [ResolvedPackage], requested: &[PackageSpec]) {
        for package in packages.iter_mut() {
            if !package.run_exports.is_empty()
                || package.channel.is_empty()
                || package.subdir.is_empty()
                || package.filename.is_empty()
                || !requested.iter().any(|s| s.name == package.name)
            {
                continue;
            }
            let Ok(table) = self.run_exports(&package.channel, &package.subdir) else {
                continue;
            };
            if let Some(exports) = table.get(&package.filename) {
                trace!("Run exports of {} from {}/{}", package.name, package.channel, package.subdir);
                package.run_exports = exports.clone();
            }
        }
    }

    fn fetch_index(&self, channel: &str, subdir: &str) -> std::result::Result<SubdirIndex, BackendFailure> {
        let base = channel_url(channel).map_err(|e| BackendFailure::index(e.to_string()))?;
        let url = repodata_url(&base, subdir).map_err(|e| BackendFailure::index(e.to_string()))?;

        self.repodata_fetches.fetch_add(1, Ordering::Relaxed);
        let Some(content) = self.fetch(&url)? else {
            debug!(channel, subdir, "Channel has no such subdir");
            return Ok(SubdirIndex::missing(channel, subdir));
        };

        let content = String::from_utf8(content)
            .map_err(|e| BackendFailure::index(format!("{}: not UTF-8: {}", url, e)))?;
        let repodata = RepoData::from_json(&content).map_err(|e| BackendFailure::index(format!("{}: {}", url, e)))?;

        let mut records = repodata.into_records();
        let exports = self.run_exports(channel, subdir)?;
        if !exports.is_empty() {
            for record in records.iter_mut().filter(|r| r.run_exports.is_empty()) {
                if let Some(found) = exports.get(&record.filename) {
                    record.run_exports = found.clone();
                }
            }
        }

        let index = SubdirIndex::from_records(channel, subdir, records);
        info!(channel, subdir, records = index.candidates.len(), "Loaded channel index");
        Ok(index)
    }

    fn fetch_run_exports(&self, channel: &str, subdir: &str) -> RunExportsTable {
        let base = match channel_url(channel) {
            Ok(base) => base,
            Err(e) => {
                debug!(channel, "No run exports: {}", e);
                return RunExportsTable::default();
            }
        };

        for (file, compressed) in [("run_exports.json.zst", true), ("run_exports.json", false)] {
            let Ok(url) = subdir_file_url(&base, subdir, file) else {
                continue;
            };
            let bytes = match self.fetch(&url) {
                Ok(Some(bytes)) => bytes,
                Ok(None) => continue,
                Err(e) => {
                    warn!(channel, subdir, "Failed to fetch {}: {}", file, e);
                    continue;
                }
            };
            let bytes = if compressed {
                match zstd::decode_all(bytes.as_slice()) {
                    Ok(bytes) => bytes,
                    Err(e) => {
                        warn!(channel, subdir, "Failed to decompress {}: {}", file, e);
                        continue;
                    }
                }
            } else {
                bytes
            };
            match String::from_utf8(bytes)
                .map_err(|e| Error::IndexError(e.to_string()))
                .and_then(|text| RunExportsTable::from_json(&text))
            {
                Ok(table) => {
                    debug!(channel, subdir, artifacts = table.len(), "Loaded run exports");
                    return table;
                }
                Err(e) => warn!(channel, subdir, "Ignoring {}: {}", file, e),
            }
        }
        trace!(channel, subdir, "No run exports published");
        RunExportsTable::default()
    }

    /// Raw file content, or `None` when it does not exist
    fn fetch(&self, url: &Url) -> std::result::Result<Option<Vec<u8>>, BackendFailure> {
        match url.scheme() {
            "file" => {
                let path = url
                    .to_file_path()
                    .map_err(|_| BackendFailure::index(format!("invalid file URL {}", url)))?;
                match std::fs::read(&path) {
                    Ok(content) => Ok(Some(content)),
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
                    Err(e) => Err(BackendFailure::index(format!("failed to read {}: {}", path.display(), e))),
                }
            }
            "http" | "https" => {
                debug!("Fetching {}", url);
                let response = self
                    .client
                    .get(url.clone())
                    .send()
                    .map_err(|e| BackendFailure::index(format!("failed to fetch {}: {}", url, e)))?;
                if response.status() == StatusCode::NOT_FOUND {
                    return Ok(None);
                }
                if !response.status().is_success() {
                    return Err(BackendFailure::index(format!("HTTP {} from {}", response.status(), url)));
                }
                response
                    .bytes()
                    .map(|b| Some(b.to_vec()))
                    .map_err(|e| BackendFailure::index(format!("failed to read body of {}: {}", url, e)))
            }
            other => Err(BackendFailure::index(format!("unsupported channel scheme '{}'", other))),
        }
    }
}
