//! Transitive resolution engine.
//!
//! Resolution alternates two phases until nothing is left to do:
//!
//! 1. **Drain**: every queued coordinate is either dropped (its id is already
//!    resolved at an equal or newer version) or planned for a metadata fetch.
//!    Planned fetches run concurrently and are applied once all succeed.
//! 2. **Expand**: each newly fetched POM contributes its compile and runtime
//!    dependencies to the queue, subject to accumulated exclusions.
//!
//! The highest version seen for an artifact always wins, regardless of depth.

mod state;

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use indexmap::IndexMap;
use thiserror::Error;
use tokio::task::{JoinError, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::coordinates::{ArtifactId, Coordinate, CoordinateError};
use crate::gateway::{FetchGateway, GatewayError};
use crate::pom::{self, DecodeError, Pom};

use state::ResolutionState;

pub const DEFAULT_MAX_CONCURRENT_FETCHES: usize = 8;

/// Resolved artifacts keyed by id, in first-resolution order.
pub type ResourceMap = IndexMap<ArtifactId, Pom>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResolveMode {
    #[default]
    MetadataOnly,
    /// Also store every resolved artifact's binary in the local cache.
    WithDownload,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolveOptions {
    pub max_concurrent_fetches: usize,
    pub include_optional: bool,
}

impl Default for ResolveOptions {
    fn default() -> Self {
        Self {
            max_concurrent_fetches: DEFAULT_MAX_CONCURRENT_FETCHES,
            include_optional: true,
        }
    }
}

/// Stage of a run in which an error occurred.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolvePhase {
    Setup,
    MetadataFetch,
    Decode,
    Expansion,
    ArtifactDownload,
}

impl fmt::Display for ResolvePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ResolvePhase::Setup => "setup",
            ResolvePhase::MetadataFetch => "metadata fetch",
            ResolvePhase::Decode => "metadata decode",
            ResolvePhase::Expansion => "dependency expansion",
            ResolvePhase::ArtifactDownload => "artifact download",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Error)]
pub enum ResolveError {
    #[error(transparent)]
    InputFormat(#[from] CoordinateError),
    #[error("failed to decode metadata of {coordinate}: {source}")]
    Decode {
        coordinate: Coordinate,
        #[source]
        source: DecodeError,
    },
    #[error("{phase} failed for {coordinate}: {source}")]
    Fetch {
        phase: ResolvePhase,
        coordinate: Coordinate,
        #[source]
        source: GatewayError,
    },
    #[error(
        "{declared_by} declares {dependency} with version range '{range}'; only exact versions are supported"
    )]
    UnsupportedVersionRange {
        declared_by: Coordinate,
        dependency: ArtifactId,
        range: String,
    },
    #[error("resolution cancelled during {phase}")]
    Cancelled { phase: ResolvePhase },
    #[error("{phase} task failed: {source}")]
    Task {
        phase: ResolvePhase,
        #[source]
        source: JoinError,
    },
    #[error("failed to start async runtime: {0}")]
    Runtime(#[source] std::io::Error),
    #[error("blocking resolution requested from inside an async runtime")]
    NestedRuntime,
}

impl ResolveError {
    pub fn phase(&self) -> ResolvePhase {
        match self {
            ResolveError::InputFormat(_)
            | ResolveError::Runtime(_)
            | ResolveError::NestedRuntime => ResolvePhase::Setup,
            ResolveError::Decode { .. } => ResolvePhase::Decode,
            ResolveError::Fetch { phase, .. }
            | ResolveError::Cancelled { phase }
            | ResolveError::Task { phase, .. } => *phase,
            ResolveError::UnsupportedVersionRange { .. } => ResolvePhase::Expansion,
        }
    }
}

/// Resolves dependency graphs through a [`FetchGateway`]. Each call owns a
/// fresh resolution state, so one resolver can serve concurrent calls.
pub struct Resolver {
    gateway: Arc<FetchGateway>,
    options: ResolveOptions,
}

impl Resolver {
    pub fn new(gateway: Arc<FetchGateway>) -> Self {
        Self::with_options(gateway, ResolveOptions::default())
    }

    pub fn with_options(gateway: Arc<FetchGateway>, mut options: ResolveOptions) -> Self {
        options.max_concurrent_fetches = options.max_concurrent_fetches.max(1);
        Self { gateway, options }
    }

    pub fn gateway(&self) -> &Arc<FetchGateway> {
        &self.gateway
    }

    pub fn options(&self) -> &ResolveOptions {
        &self.options
    }

    /// Resolves `groupId:artifactId:version` seeds.
    pub async fn resolve<S: AsRef<str>>(
        &self,
        seeds: &[S],
        mode: ResolveMode,
    ) -> Result<ResourceMap, ResolveError> {
        self.resolve_with_cancellation(seeds, mode, CancellationToken::new())
            .await
    }

    pub async fn resolve_with_cancellation<S: AsRef<str>>(
        &self,
        seeds: &[S],
        mode: ResolveMode,
        cancel: CancellationToken,
    ) -> Result<ResourceMap, ResolveError> {
        let seeds = seeds
            .iter()
            .map(|seed| Coordinate::parse(seed.as_ref()))
            .collect::<Result<Vec<_>, _>>()?;
        self.resolve_coordinates(seeds, mode, cancel).await
    }

    pub async fn resolve_coordinates(
        &self,
        seeds: Vec<Coordinate>,
        mode: ResolveMode,
        cancel: CancellationToken,
    ) -> Result<ResourceMap, ResolveError> {
        let started = Instant::now();
        let mut state = ResolutionState::new(self.options.include_optional);
        for seed in seeds {
            state.enqueue(seed);
        }

        let mut rounds = 0usize;
        loop {
            if cancel.is_cancelled() {
                return Err(ResolveError::Cancelled {
                    phase: ResolvePhase::MetadataFetch,
                });
            }
            rounds += 1;

            let plan = state.plan_fetches();
            debug!(round = rounds, fetches = plan.len(), "draining queue");
            for (coordinate, pom) in self.fetch_metadata(plan, &cancel).await? {
                state.apply(coordinate, pom);
            }

            state.expand()?;
            if state.is_settled() {
                break;
            }
        }

        if mode == ResolveMode::WithDownload {
            self.download_artifacts(state.artifact_paths(), &cancel)
                .await?;
        }

        let stats = self.gateway.cache().stats();
        info!(
            artifacts = state.len(),
            rounds,
            cache_hits = stats.hits,
            cache_misses = stats.misses,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "resolution finished"
        );
        Ok(state.into_resource_map())
    }

    /// Runs [`Resolver::resolve`] on a dedicated runtime. Fails with
    /// [`ResolveError::NestedRuntime`] when called from within an async context.
    pub fn resolve_blocking<S: AsRef<str>>(
        &self,
        seeds: &[S],
        mode: ResolveMode,
    ) -> Result<ResourceMap, ResolveError> {
        if tokio::runtime::Handle::try_current().is_ok() {
            return Err(ResolveError::NestedRuntime);
        }
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .build()
            .map_err(ResolveError::Runtime)?;
        runtime.block_on(self.resolve(seeds, mode))
    }

    async fn fetch_metadata(
        &self,
        plan: Vec<Coordinate>,
        cancel: &CancellationToken,
    ) -> Result<Vec<(Coordinate, Pom)>, ResolveError> {
        let gateway = Arc::clone(&self.gateway);
        run_bounded(
            plan,
            self.options.max_concurrent_fetches,
            cancel,
            ResolvePhase::MetadataFetch,
            move |coordinate: Coordinate| {
                let gateway = Arc::clone(&gateway);
                async move {
                    let bytes = gateway
                        .fetch(&coordinate.pom_path())
                        .await
                        .map_err(|source| ResolveError::Fetch {
                            phase: ResolvePhase::MetadataFetch,
                            coordinate: coordinate.clone(),
                            source,
                        })?;
                    let pom = pom::decode(&bytes).map_err(|source| ResolveError::Decode {
                        coordinate: coordinate.clone(),
                        source,
                    })?;
                    Ok((coordinate, pom))
                }
            },
        )
        .await
    }

    async fn download_artifacts(
        &self,
        artifacts: Vec<(Coordinate, String)>,
        cancel: &CancellationToken,
    ) -> Result<(), ResolveError> {
        let gateway = Arc::clone(&self.gateway);
        let stored = run_bounded(
            artifacts,
            self.options.max_concurrent_fetches,
            cancel,
            ResolvePhase::ArtifactDownload,
            move |(coordinate, path): (Coordinate, String)| {
                let gateway = Arc::clone(&gateway);
                async move {
                    let local = gateway.ensure(&path).await.map_err(|source| {
                        ResolveError::Fetch {
                            phase: ResolvePhase::ArtifactDownload,
                            coordinate: coordinate.clone(),
                            source,
                        }
                    })?;
                    debug!(artifact = %coordinate, path = %local.display(), "artifact available");
                    Ok(local)
                }
            },
        )
        .await?;
        info!(artifacts = stored.len(), "artifacts stored in local cache");
        Ok(())
    }
}

/// Runs `task` over `items` with at most `limit` in flight. Results keep the
/// input order. The first failure or a cancellation aborts the remaining tasks.
async fn run_bounded<I, T, F, Fut>(
    items: Vec<I>,
    limit: usize,
    cancel: &CancellationToken,
    phase: ResolvePhase,
    task: F,
) -> Result<Vec<T>, ResolveError>
where
    F: Fn(I) -> Fut,
    Fut: Future<Output = Result<T, ResolveError>> + Send + 'static,
    T: Send + 'static,
{
    let mut results: Vec<Option<T>> = std::iter::repeat_with(|| None).take(items.len()).collect();
    let mut join_set: JoinSet<(usize, Result<T, ResolveError>)> = JoinSet::new();
    let mut pending = items.into_iter().enumerate();
    let limit = limit.max(1);

    loop {
        while join_set.len() < limit {
            let Some((index, item)) = pending.next() else {
                break;
            };
            let future = task(item);
            join_set.spawn(async move { (index, future.await) });
        }

        let joined = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                join_set.abort_all();
                return Err(ResolveError::Cancelled { phase });
            }
            joined = join_set.join_next() => joined,
        };

        match joined {
            None => break,
            Some(Ok((index, Ok(value)))) => results[index] = Some(value),
            Some(Ok((_, Err(error)))) => {
                join_set.abort_all();
                return Err(error);
            }
            Some(Err(source)) => {
                join_set.abort_all();
                return Err(ResolveError::Task { phase, source });
            }
        }
    }

    Ok(results.into_iter().flatten().collect())
}
