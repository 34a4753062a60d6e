// src/solver/sat.rs

//! In-process solver backend
//!
//! Loads `repodata.json` for the target subdir and `noarch` of every
//! channel, builds a candidate pool with strict channel priority and hands
//! it to [`resolver::solve`].

use crate::config::CheckerConfig;
use crate::conflict::{RawFailure, interpret};
use crate::matrix::Target;
use crate::solver::channel::expand_aliases;
use crate::solver::index::{IndexLoader, SubdirIndex};
use crate::solver::resolver::{self, Candidate, MatchSpec, Pool, Resolution, SearchAbort, SearchLimits};
use crate::solver::virtual_packages::{VIRTUAL_CHANNEL_NAME, records_for_target};
use crate::solver::{BackendFailure, BackendVariant, ResolvedPackage, SolveRequest, SolveResult, SolverBackend};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};

pub struct SatBackend {
    loader: IndexLoader,
    virtual_packages: bool,
    max_glibc_minor: u32,
}

impl SatBackend {
    pub fn new(config: &CheckerConfig) -> crate::error::Result<Self> {
        Ok(Self {
            loader: IndexLoader::new()?,
            virtual_packages: config.virtual_packages.enabled,
            max_glibc_minor: config.virtual_packages.max_glibc_minor,
        })
    }

    fn virtual_candidates(&self, target: &Target) -> Vec<Arc<Candidate>> {
        if !self.virtual_packages {
            return Vec::new();
        }
        records_for_target(&target.subdir(), self.max_glibc_minor)
            .into_iter()
            .filter_map(|r| Candidate::from_record(r, VIRTUAL_CHANNEL_NAME))
            .map(Arc::new)
            .collect()
    }

    /// Indices for every channel, in priority order
    fn load_indices(
        &self,
        channels: &[String],
        subdir: &str,
        request: &SolveRequest,
    ) -> Result<Vec<(Arc<SubdirIndex>, Arc<SubdirIndex>)>, BackendFailure> {
        let mut indices = Vec::with_capacity(channels.len());
        for channel in channels {
            if request.cancel.is_cancelled() {
                return Err(BackendFailure::Cancelled);
            }
            let platform = self.loader.load(channel, subdir)?;
            let noarch = self.loader.load(channel, "noarch")?;
            indices.push((platform, noarch));
        }
        Ok(indices)
    }
}

impl SolverBackend for SatBackend {
    fn variant(&self) -> BackendVariant {
        BackendVariant::Sat
    }

    fn describe_unsupported(&self, _target: &Target) -> Option<String> {
        None
    }

    fn solve(&self, request: &SolveRequest) -> SolveResult {
        let started = Instant::now();
        let subdir = request.target.subdir();
        let channels = expand_aliases(&request.channels, &request.target);

        let indices = match self.load_indices(&channels, &subdir, request) {
            Ok(indices) => indices,
            Err(failure) => return SolveResult::BackendError(failure),
        };
        if !indices.iter().any(|(platform, _)| platform.found) {
            return SolveResult::Unsupported(format!(
                "none of the channels [{}] provide packages for {}",
                channels.join(", "),
                subdir
            ));
        }

        let specs = match request.specs.iter().map(MatchSpec::from_spec).collect::<Result<Vec<_>, _>>() {
            Ok(specs) => specs,
            Err(e) => return SolveResult::Unsupported(format!("cannot interpret request: {}", e)),
        };
        let constraints = match request
            .constraints
            .iter()
            .map(MatchSpec::from_spec)
            .collect::<Result<Vec<_>, _>>()
        {
            Ok(constraints) => constraints,
            Err(e) => return SolveResult::Unsupported(format!("cannot interpret constraint: {}", e)),
        };

        let mut pool = Pool::new();
        pool.add_channel(&self.virtual_candidates(&request.target));
        for (platform, noarch) in &indices {
            pool.add_channel(platform.candidates.iter().chain(noarch.candidates.iter()));
        }
        debug!(subdir = %subdir, candidates = pool.len(), "Built candidate pool");

        let limits = SearchLimits {
            deadline: request.timeout.map(|t| started + t),
            cancel: request.cancel.clone(),
        };

        let result = match resolver::solve(&pool, &specs, &constraints, limits) {
            Ok(Resolution::Solved(chosen)) => SolveResult::Resolved(
                chosen
                    .iter()
                    .filter(|c| c.channel != VIRTUAL_CHANNEL_NAME)
                    .map(|c| ResolvedPackage {
                        name: c.name.clone(),
                        version: c.version.to_string(),
                        build: c.build.clone(),
                        build_number: c.build_number,
                        channel: c.channel.clone(),
                        subdir: c.subdir.clone(),
                        filename: c.filename.clone(),
                        run_exports: c.run_exports.clone(),
                    })
                    .collect(),
            ),
            Ok(Resolution::Conflict(tree)) => {
                debug!("Resolver problems:\n{}", tree);
                SolveResult::Unresolvable(interpret(&RawFailure::Structured(tree), &request.specs))
            }
            Err(SearchAbort::Timeout) => SolveResult::BackendError(BackendFailure::Timeout {
                seconds: request.timeout.map(|t| t.as_secs()).unwrap_or(0),
            }),
            Err(SearchAbort::Cancelled) => SolveResult::BackendError(BackendFailure::Cancelled),
        };

        info!(
            subdir = %subdir,
            specs = request.specs.len(),
            result = result.kind(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "In-process solve finished"
        );
        result
    }
}
