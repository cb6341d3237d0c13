use std::cmp::Ordering;
use std::collections::VecDeque;

use indexmap::{IndexMap, IndexSet};
use tracing::{debug, trace, warn};

use super::{ResolveError, ResourceMap};
use crate::coordinates::{ArtifactId, Coordinate};
use crate::pom::{Exclusion, Pom};
use crate::version::{VersionCache, VersionRequirement};

#[derive(Debug)]
pub(crate) struct ResourceEntry {
    /// Version that was requested and fetched for this id.
    pub(crate) version: String,
    pub(crate) pom: Pom,
    pub(crate) scanned: bool,
}

/// Mutable state of one resolution run.
#[derive(Debug)]
pub(crate) struct ResolutionState {
    queue: VecDeque<Coordinate>,
    entries: IndexMap<ArtifactId, ResourceEntry>,
    exclusions: IndexSet<Exclusion>,
    versions: VersionCache,
    include_optional: bool,
}

impl ResolutionState {
    pub(crate) fn new(include_optional: bool) -> Self {
        Self {
            queue: VecDeque::new(),
            entries: IndexMap::new(),
            exclusions: IndexSet::new(),
            versions: VersionCache::new(),
            include_optional,
        }
    }

    pub(crate) fn enqueue(&mut self, coordinate: Coordinate) {
        self.queue.push_back(coordinate);
    }

    pub(crate) fn is_settled(&self) -> bool {
        self.queue.is_empty()
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    /// Drains the queue into the list of metadata fetches for this round.
    /// Coordinates already satisfied by an equal or newer entry are dropped
    /// and each id is fetched at most once, at the highest version queued.
    pub(crate) fn plan_fetches(&mut self) -> Vec<Coordinate> {
        let mut plan: IndexMap<ArtifactId, String> = IndexMap::new();
        while let Some(coordinate) = self.queue.pop_front() {
            let id = coordinate.id();
            if let Some(entry) = self.entries.get(&id) {
                if self.versions.compare(&entry.version, &coordinate.version) != Ordering::Less {
                    trace!(artifact = %coordinate, current = %entry.version, "already satisfied");
                    continue;
                }
            }

            match plan.get_mut(&id) {
                Some(planned) => {
                    if self.versions.compare(planned, &coordinate.version) == Ordering::Less {
                        *planned = coordinate.version;
                    }
                }
                None => {
                    plan.insert(id, coordinate.version);
                }
            }
        }

        plan.into_iter()
            .map(|(id, version)| id.with_version(version))
            .collect()
    }

    /// Records fetched metadata, replacing any older entry for the same id.
    pub(crate) fn apply(&mut self, coordinate: Coordinate, pom: Pom) {
        let id = coordinate.id();
        if let Some(previous) = self.entries.get(&id) {
            debug!(artifact = %id, from = %previous.version, to = %coordinate.version, "upgrading");
        }
        self.entries.insert(
            id,
            ResourceEntry {
                version: coordinate.version,
                pom,
                scanned: false,
            },
        );
    }

    /// Queues the transitive dependencies of every entry not yet scanned.
    pub(crate) fn expand(&mut self) -> Result<(), ResolveError> {
        let Self {
            queue,
            entries,
            exclusions,
            include_optional,
            ..
        } = self;

        for (id, entry) in entries.iter_mut().filter(|(_, entry)| !entry.scanned) {
            for dependency in &entry.pom.dependencies {
                if !dependency.scope.is_transitive() {
                    trace!(artifact = %id, dependency = %dependency.id(), scope = %dependency.scope, "scope not followed");
                    continue;
                }
                if dependency.optional && !*include_optional {
                    trace!(artifact = %id, dependency = %dependency.id(), "optional dependency skipped");
                    continue;
                }
                if exclusions
                    .iter()
                    .any(|exclusion| exclusion.matches(&dependency.group_id, &dependency.artifact_id))
                {
                    debug!(artifact = %id, dependency = %dependency.id(), "excluded");
                    continue;
                }
                exclusions.extend(dependency.exclusions.iter().cloned());

                let Some(token) = dependency.version.as_deref() else {
                    warn!(artifact = %id, dependency = %dependency.id(), "dependency has no version, skipping");
                    continue;
                };
                let version = match VersionRequirement::parse(token) {
                    VersionRequirement::Range(range) => {
                        return Err(ResolveError::UnsupportedVersionRange {
                            declared_by: id.with_version(entry.version.as_str()),
                            dependency: dependency.id(),
                            range: range.to_string(),
                        });
                    }
                    VersionRequirement::Soft(version) | VersionRequirement::Exact(version) => version,
                };
                if version.contains("${") {
                    warn!(artifact = %id, dependency = %dependency.id(), version, "unresolved property in version, skipping");
                    continue;
                }

                queue.push_back(Coordinate::new(
                    dependency.group_id.as_str(),
                    dependency.artifact_id.as_str(),
                    version,
                ));
            }
            entry.scanned = true;
        }

        Ok(())
    }

    /// Coordinates and binary paths of every resolved entry.
    pub(crate) fn artifact_paths(&self) -> Vec<(Coordinate, String)> {
        self.entries
            .iter()
            .map(|(id, entry)| {
                let coordinate = id.with_version(entry.version.as_str());
                let path = coordinate.artifact_path(&entry.pom.packaging);
                (coordinate, path)
            })
            .collect()
    }

    /// Final map. Each record carries the resolved version, which may differ
    /// from what the document declares for itself.
    pub(crate) fn into_resource_map(self) -> ResourceMap {
        self.entries
            .into_iter()
            .map(|(id, entry)| {
                let mut pom = entry.pom;
                pom.version = entry.version;
                (id, pom)
            })
            .collect()
    }
}
