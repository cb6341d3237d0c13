use std::fmt;

use serde::{Serialize, Serializer};
use thiserror::Error;

/// A seed string that does not have the `groupId:artifactId:version` shape.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("invalid coordinate '{input}': expected groupId:artifactId:version")]
pub struct CoordinateError {
    pub input: String,
}

/// Identity of an artifact across versions: groupId + artifactId.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ArtifactId {
    pub group_id: String,
    pub artifact_id: String,
}

impl ArtifactId {
    pub fn new(group_id: impl Into<String>, artifact_id: impl Into<String>) -> Self {
        Self {
            group_id: group_id.into(),
            artifact_id: artifact_id.into(),
        }
    }

    /// Parses `groupId:artifactId`.
    pub fn parse(input: &str) -> Result<Self, CoordinateError> {
        let mut parts = input.trim().split(':');
        match (parts.next(), parts.next(), parts.next()) {
            (Some(group), Some(artifact), None) if !group.is_empty() && !artifact.is_empty() => {
                Ok(Self::new(group, artifact))
            }
            _ => Err(CoordinateError {
                input: input.to_string(),
            }),
        }
    }

    pub fn group_path(&self) -> String {
        self.group_id.replace('.', "/")
    }

    /// Directory holding every version of this artifact, relative to a repository root.
    pub fn path(&self) -> String {
        format!("{}/{}", self.group_path(), self.artifact_id)
    }

    pub fn with_version(&self, version: impl Into<String>) -> Coordinate {
        Coordinate {
            group_id: self.group_id.clone(),
            artifact_id: self.artifact_id.clone(),
            version: version.into(),
        }
    }
}

impl fmt::Display for ArtifactId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.group_id, self.artifact_id)
    }
}

// Serialized as "group:artifact" so the id can key a JSON object.
impl Serialize for ArtifactId {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.collect_str(self)
    }
}

/// A dependency request: artifact identity plus the requested version.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Coordinate {
    pub group_id: String,
    pub artifact_id: String,
    pub version: String,
}

impl Coordinate {
    pub fn new(
        group_id: impl Into<String>,
        artifact_id: impl Into<String>,
        version: impl Into<String>,
    ) -> Self {
        Self {
            group_id: group_id.into(),
            artifact_id: artifact_id.into(),
            version: version.into(),
        }
    }

    /// Parses `groupId:artifactId:version`. Exactly two colons and three
    /// non-empty fields are accepted.
    pub fn parse(input: &str) -> Result<Self, CoordinateError> {
        let fields: Vec<&str> = input.trim().split(':').collect();
        match fields.as_slice() {
            [group, artifact, version]
                if !group.is_empty() && !artifact.is_empty() && !version.is_empty() =>
            {
                Ok(Self::new(*group, *artifact, *version))
            }
            _ => Err(CoordinateError {
                input: input.to_string(),
            }),
        }
    }

    pub fn id(&self) -> ArtifactId {
        ArtifactId::new(self.group_id.clone(), self.artifact_id.clone())
    }

    fn version_path(&self) -> String {
        format!(
            "{}/{}/{}",
            self.group_id.replace('.', "/"),
            self.artifact_id,
            self.version
        )
    }

    /// Relative path of a file of this coordinate with the given extension,
    /// e.g. `org/example/demo/1.0/demo-1.0.jar`.
    pub fn file_path(&self, extension: &str) -> String {
        format!(
            "{}/{}-{}.{}",
            self.version_path(),
            self.artifact_id,
            self.version,
            extension
        )
    }

    pub fn pom_path(&self) -> String {
        self.file_path("pom")
    }

    /// Relative path of the binary payload. The extension is the POM packaging.
    pub fn artifact_path(&self, packaging: &str) -> String {
        self.file_path(packaging)
    }
}

impl fmt::Display for Coordinate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.group_id, self.artifact_id, self.version)
    }
}

impl From<&Coordinate> for ArtifactId {
    fn from(value: &Coordinate) -> Self {
        value.id()
    }
}
