// jv_resolve - Maven dependency resolution
//
// Seeds are resolved breadth-first against a list of repositories, with a
// local cache in front. The highest version of each artifact wins.

pub mod cache;
pub mod config;
pub mod coordinates;
pub mod gateway;
pub mod pom;
pub mod registry;
pub mod resolver;
pub mod version;

pub use cache::{CacheError, CacheStatsSnapshot, LocalCache};
pub use config::{ConfigError, RepositoryConfig, ResolverConfig};
pub use coordinates::{ArtifactId, Coordinate, CoordinateError};
pub use gateway::{FetchGateway, GatewayError};
pub use pom::{decode, DecodeError, Dependency, Exclusion, Pom, PomValue, Scope, XmlElement};
pub use registry::{FetchOutcome, FileRepository, HttpRepository, RegistryError, Repository};
pub use resolver::{
    ResolveError, ResolveMode, ResolveOptions, ResolvePhase, Resolver, ResourceMap,
};
pub use version::{compare_versions, sort_versions, MavenVersion, VersionCache, VersionRequirement};
