//! POM decoding.
//!
//! Raw bytes are parsed with `roxmltree` into an [`XmlElement`] tree, which is
//! then projected into a typed [`Pom`]. The whole document is kept alongside
//! as a [`PomValue`] so callers can reach fields the projection ignores.

mod tree;

use std::collections::HashMap;
use std::fmt;

use roxmltree::{Document, ParsingOptions};
use serde::{Serialize, Serializer};
use thiserror::Error;

use crate::coordinates::{ArtifactId, Coordinate};

pub use tree::{PomValue, XmlElement};

const UTF8_BOM: &[u8] = &[0xEF, 0xBB, 0xBF];
const MAX_INTERPOLATION_DEPTH: usize = 8;
const DEFAULT_PACKAGING: &str = "jar";

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("metadata is not valid UTF-8: {0}")]
    Encoding(#[from] std::str::Utf8Error),
    #[error("metadata is not well-formed XML: {0}")]
    Xml(#[from] roxmltree::Error),
    #[error("root element is <{found}>, expected <project>")]
    InvalidRoot { found: String },
    #[error("<project> declares no {field}")]
    MissingField { field: &'static str },
    #[error("dependency #{index} declares no {field}")]
    InvalidDependency { index: usize, field: &'static str },
}

/// Dependency scope. Unknown values are preserved and never transitive.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Scope {
    Compile,
    Runtime,
    Test,
    Provided,
    System,
    Import,
    Other(String),
}

impl Scope {
    /// Absent scope means `compile`.
    pub fn parse(raw: Option<&str>) -> Self {
        match raw.map(str::trim) {
            None | Some("") | Some("compile") => Scope::Compile,
            Some("runtime") => Scope::Runtime,
            Some("test") => Scope::Test,
            Some("provided") => Scope::Provided,
            Some("system") => Scope::System,
            Some("import") => Scope::Import,
            Some(other) => Scope::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Scope::Compile => "compile",
            Scope::Runtime => "runtime",
            Scope::Test => "test",
            Scope::Provided => "provided",
            Scope::System => "system",
            Scope::Import => "import",
            Scope::Other(other) => other,
        }
    }

    /// Only compile and runtime dependencies are followed transitively.
    pub fn is_transitive(&self) -> bool {
        matches!(self, Scope::Compile | Scope::Runtime)
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for Scope {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(self.as_str())
    }
}

/// Exclusion pattern. Each part matches as a suffix of the declared id, and
/// `*` matches anything.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct Exclusion {
    pub group_id: String,
    pub artifact_id: String,
}

impl Exclusion {
    pub fn new(group_id: impl Into<String>, artifact_id: impl Into<String>) -> Self {
        Self {
            group_id: group_id.into(),
            artifact_id: artifact_id.into(),
        }
    }

    pub fn matches(&self, group_id: &str, artifact_id: &str) -> bool {
        fn part_matches(pattern: &str, value: &str) -> bool {
            pattern == "*" || value.ends_with(pattern)
        }
        part_matches(&self.group_id, group_id) && part_matches(&self.artifact_id, artifact_id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Dependency {
    pub group_id: String,
    pub artifact_id: String,
    /// Raw version token after interpolation and management lookup.
    pub version: Option<String>,
    pub scope: Scope,
    pub optional: bool,
    pub exclusions: Vec<Exclusion>,
}

impl Dependency {
    pub fn id(&self) -> ArtifactId {
        ArtifactId::new(self.group_id.clone(), self.artifact_id.clone())
    }
}

/// Decoded project metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Pom {
    pub group_id: String,
    pub artifact_id: String,
    pub version: String,
    pub packaging: String,
    pub dependencies: Vec<Dependency>,
    /// Every field of the document, including those not projected above.
    pub document: PomValue,
}

impl Pom {
    pub fn id(&self) -> ArtifactId {
        ArtifactId::new(self.group_id.clone(), self.artifact_id.clone())
    }

    pub fn coordinate(&self) -> Coordinate {
        Coordinate::new(
            self.group_id.clone(),
            self.artifact_id.clone(),
            self.version.clone(),
        )
    }
}

/// Decodes raw POM bytes.
pub fn decode(bytes: &[u8]) -> Result<Pom, DecodeError> {
    let bytes = bytes.strip_prefix(UTF8_BOM).unwrap_or(bytes);
    let text = std::str::from_utf8(bytes)?;
    let normalized = tree::normalize_xml_entities(text);
    let options = ParsingOptions {
        allow_dtd: true,
        ..ParsingOptions::default()
    };
    let document = Document::parse_with_options(normalized.as_ref(), options)?;

    let root = document.root_element();
    let root_name = root.tag_name().name();
    if root_name != "project" {
        return Err(DecodeError::InvalidRoot {
            found: root_name.to_string(),
        });
    }

    project(XmlElement::from_node(root))
}

fn project(root: XmlElement) -> Result<Pom, DecodeError> {
    let parent = root.child("parent");
    let parent_text = |field: &str| parent.and_then(|parent| parent.child_text(field));

    let artifact_id = root
        .child_text("artifactId")
        .ok_or(DecodeError::MissingField {
            field: "artifactId",
        })?
        .to_string();
    let group_id = root
        .child_text("groupId")
        .or_else(|| parent_text("groupId"))
        .ok_or(DecodeError::MissingField { field: "groupId" })?
        .to_string();
    let version = root
        .child_text("version")
        .or_else(|| parent_text("version"))
        .ok_or(DecodeError::MissingField { field: "version" })?
        .to_string();

    let mut properties: HashMap<String, String> = root
        .child("properties")
        .map(|props| {
            props
                .children
                .iter()
                .filter_map(|prop| Some((prop.name.clone(), prop.text.clone()?)))
                .collect()
        })
        .unwrap_or_default();
    properties.insert("project.groupId".to_string(), group_id.clone());
    properties.insert("project.artifactId".to_string(), artifact_id.clone());
    properties.insert("project.version".to_string(), version.clone());
    for field in ["groupId", "artifactId", "version"] {
        if let Some(value) = parent_text(field) {
            properties.insert(format!("project.parent.{field}"), value.to_string());
        }
    }

    let group_id = interpolate(&group_id, &properties);
    let version = interpolate(&version, &properties);
    let packaging = root
        .child_text("packaging")
        .map(|value| interpolate(value, &properties))
        .unwrap_or_else(|| DEFAULT_PACKAGING.to_string());

    let managed = managed_versions(&root, &properties);
    let dependencies = root
        .child("dependencies")
        .map(|deps| {
            deps.children_named("dependency")
                .enumerate()
                .map(|(index, element)| dependency(index, element, &properties, &managed))
                .collect::<Result<Vec<_>, _>>()
        })
        .transpose()?
        .unwrap_or_default();

    let document = root.to_value().unwrap_or(PomValue::Map(Vec::new()));

    Ok(Pom {
        group_id,
        artifact_id,
        version,
        packaging,
        dependencies,
        document,
    })
}

fn dependency(
    index: usize,
    element: &XmlElement,
    properties: &HashMap<String, String>,
    managed: &HashMap<(String, String), String>,
) -> Result<Dependency, DecodeError> {
    let field = |name: &str| {
        element
            .child_text(name)
            .map(|value| interpolate(value, properties))
    };

    let group_id = field("groupId").ok_or(DecodeError::InvalidDependency {
        index,
        field: "groupId",
    })?;
    let artifact_id = field("artifactId").ok_or(DecodeError::InvalidDependency {
        index,
        field: "artifactId",
    })?;
    let version = field("version")
        .or_else(|| managed.get(&(group_id.clone(), artifact_id.clone())).cloned());
    let scope = Scope::parse(field("scope").as_deref());
    let optional = field("optional")
        .map(|value| value.eq_ignore_ascii_case("true"))
        .unwrap_or(false);

    let exclusions = element
        .child("exclusions")
        .map(|exclusions| {
            exclusions
                .children_named("exclusion")
                .filter_map(|exclusion| {
                    let group = exclusion.child_text("groupId")?;
                    let artifact = exclusion.child_text("artifactId")?;
                    Some(Exclusion::new(
                        interpolate(group, properties),
                        interpolate(artifact, properties),
                    ))
                })
                .collect()
        })
        .unwrap_or_default();

    Ok(Dependency {
        group_id,
        artifact_id,
        version,
        scope,
        optional,
        exclusions,
    })
}

fn managed_versions(
    root: &XmlElement,
    properties: &HashMap<String, String>,
) -> HashMap<(String, String), String> {
    let Some(deps) = root
        .child("dependencyManagement")
        .and_then(|management| management.child("dependencies"))
    else {
        return HashMap::new();
    };

    deps.children_named("dependency")
        .filter_map(|entry| {
            let group = interpolate(entry.child_text("groupId")?, properties);
            let artifact = interpolate(entry.child_text("artifactId")?, properties);
            let version = interpolate(entry.child_text("version")?, properties);
            Some(((group, artifact), version))
        })
        .collect()
}

/// Expands `${name}` references. Unknown names are left as written.
fn interpolate(raw: &str, properties: &HashMap<String, String>) -> String {
    let mut current = raw.trim().to_string();
    for _ in 0..MAX_INTERPOLATION_DEPTH {
        if !current.contains("${") {
            break;
        }
        let next = substitute_placeholders(&current, properties);
        if next == current {
            break;
        }
        current = next;
    }
    current
}

fn substitute_placeholders(raw: &str, properties: &HashMap<String, String>) -> String {
    let mut result = String::with_capacity(raw.len());
    let mut rest = raw;
    while let Some(start) = rest.find("${") {
        result.push_str(&rest[..start]);
        let suffix = &rest[start + 2..];
        let Some(end) = suffix.find('}') else {
            result.push_str(&rest[start..]);
            return result;
        };
        let key = &suffix[..end];
        match properties.get(key) {
            Some(replacement) => result.push_str(replacement),
            None => {
                result.push_str("${");
                result.push_str(key);
                result.push('}');
            }
        }
        rest = &suffix[end + 1..];
    }
    result.push_str(rest);
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    const LIBRARY_POM: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<project xmlns="http://maven.apache.org/POM/4.0.0">
  <modelVersion>4.0.0</modelVersion>
  <groupId>org.example</groupId>
  <artifactId>library</artifactId>
  <version>1.2.0</version>
  <packaging>bundle</packaging>
  <description>Uses &nbsp; entities</description>
  <properties>
    <slf4j.version>2.0.9</slf4j.version>
  </properties>
  <dependencyManagement>
    <dependencies>
      <dependency>
        <groupId>org.example</groupId>
        <artifactId>managed</artifactId>
        <version>3.1</version>
      </dependency>
    </dependencies>
  </dependencyManagement>
  <dependencies>
    <dependency>
      <groupId>org.slf4j</groupId>
      <artifactId>slf4j-api</artifactId>
      <version>${slf4j.version}</version>
      <exclusions>
        <exclusion>
          <groupId>org.legacy</groupId>
          <artifactId>*</artifactId>
        </exclusion>
      </exclusions>
    </dependency>
    <dependency>
      <groupId>org.example</groupId>
      <artifactId>managed</artifactId>
    </dependency>
    <dependency>
      <groupId>${project.groupId}</groupId>
      <artifactId>library-test</artifactId>
      <version>${project.version}</version>
      <scope>test</scope>
      <optional>true</optional>
    </dependency>
  </dependencies>
</project>
"#;

    #[test]
    fn decodes_known_fields() {
        let pom = decode(LIBRARY_POM.as_bytes()).expect("decode pom");
        assert_eq!(pom.coordinate().to_string(), "org.example:library:1.2.0");
        assert_eq!(pom.packaging, "bundle");
        assert_eq!(pom.dependencies.len(), 3);

        let slf4j = &pom.dependencies[0];
        assert_eq!(slf4j.version.as_deref(), Some("2.0.9"));
        assert_eq!(slf4j.scope, Scope::Compile);
        assert_eq!(slf4j.exclusions, vec![Exclusion::new("org.legacy", "*")]);

        let managed = &pom.dependencies[1];
        assert_eq!(managed.version.as_deref(), Some("3.1"));

        let test_dep = &pom.dependencies[2];
        assert_eq!(test_dep.group_id, "org.example");
        assert_eq!(test_dep.version.as_deref(), Some("1.2.0"));
        assert_eq!(test_dep.scope, Scope::Test);
        assert!(test_dep.optional);
        assert!(!test_dep.scope.is_transitive());
    }

    #[test]
    fn minimal_document_has_the_expected_shape() {
        let xml = "<project>\
                   <groupId>g</groupId><artifactId>a</artifactId><version>1.0</version>\
                   <dependencies><dependency>\
                   <groupId>g</groupId><artifactId>b</artifactId><version>[2.0]</version>\
                   </dependency></dependencies></project>";
        let pom = decode(xml.as_bytes()).expect("decode pom");

        assert_eq!(
            serde_json::to_value(&pom.document).expect("serialize"),
            serde_json::json!({
                "groupId": "g",
                "artifactId": "a",
                "version": "1.0",
                "dependencies": {
                    "dependency": {
                        "groupId": "g",
                        "artifactId": "b",
                        "version": "[2.0]"
                    }
                }
            })
        );
    }

    #[test]
    fn document_keeps_repeated_tags_in_order() {
        let pom = decode(LIBRARY_POM.as_bytes()).expect("decode pom");
        let dependencies = pom
            .document
            .get("dependencies")
            .expect("dependencies field");
        let artifacts: Vec<_> = dependencies
            .get_all("dependency")
            .filter_map(|dep| dep.get("artifactId").and_then(PomValue::as_text))
            .collect();
        assert_eq!(artifacts, vec!["slf4j-api", "managed", "library-test"]);

        let json = serde_json::to_value(&pom.document).expect("serialize");
        assert_eq!(json["dependencies"]["dependency"].as_array().map(Vec::len), Some(3));
        assert_eq!(json["modelVersion"], "4.0.0");
    }

    #[test]
    fn empty_elements_are_dropped_and_packaging_defaults_to_jar() {
        let xml = "<project><groupId>g</groupId><artifactId>a</artifactId>\
                   <version>1.0</version><name/><url>  </url></project>";
        let pom = decode(xml.as_bytes()).expect("decode pom");
        assert_eq!(pom.packaging, "jar");
        assert!(pom.document.get("name").is_none());
        assert!(pom.document.get("url").is_none());
        assert!(pom.dependencies.is_empty());
    }

    #[test]
    fn parent_supplies_group_and_version() {
        let xml = "\u{feff}<project><parent><groupId>org.parent</groupId>\
                   <artifactId>parent</artifactId><version>7</version></parent>\
                   <artifactId>child</artifactId>\
                   <dependencies><dependency><groupId>${project.parent.groupId}</groupId>\
                   <artifactId>sibling</artifactId><version>${project.version}</version>\
                   </dependency></dependencies></project>";
        let pom = decode(xml.as_bytes()).expect("decode pom");
        assert_eq!(pom.coordinate().to_string(), "org.parent:child:7");
        assert_eq!(pom.dependencies[0].group_id, "org.parent");
        assert_eq!(pom.dependencies[0].version.as_deref(), Some("7"));
    }

    #[test]
    fn unknown_placeholders_are_left_verbatim() {
        let xml = "<project><groupId>g</groupId><artifactId>a</artifactId><version>1</version>\
                   <dependencies><dependency><groupId>g</groupId><artifactId>b</artifactId>\
                   <version>${missing.version}</version></dependency></dependencies></project>";
        let pom = decode(xml.as_bytes()).expect("decode pom");
        assert_eq!(
            pom.dependencies[0].version.as_deref(),
            Some("${missing.version}")
        );
    }

    #[test]
    fn rejects_wrong_root_and_malformed_input() {
        let error = decode(b"<settings><groupId>g</groupId></settings>").expect_err("wrong root");
        assert!(matches!(error, DecodeError::InvalidRoot { ref found } if found == "settings"));

        assert!(matches!(
            decode(b"<project><groupId>g</project>"),
            Err(DecodeError::Xml(_))
        ));
        assert!(matches!(decode(&[0xff, 0xfe, 0x00]), Err(DecodeError::Encoding(_))));
        assert!(matches!(
            decode(b"<project><groupId>g</groupId><version>1</version></project>"),
            Err(DecodeError::MissingField { field: "artifactId" })
        ));
        assert!(matches!(
            decode(
                b"<project><groupId>g</groupId><artifactId>a</artifactId><version>1</version>\
                  <dependencies><dependency><artifactId>x</artifactId></dependency></dependencies>\
                  </project>"
            ),
            Err(DecodeError::InvalidDependency { index: 0, field: "groupId" })
        ));
    }

    #[test]
    fn exclusion_matching_uses_suffixes_and_wildcards() {
        let exclusion = Exclusion::new("legacy", "logging");
        assert!(exclusion.matches("org.legacy", "commons-logging"));
        assert!(!exclusion.matches("org.legacy", "logging-api"));
        assert!(Exclusion::new("*", "*").matches("any.group", "anything"));
        assert!(Exclusion::new("org.legacy", "*").matches("org.legacy", "x"));
    }

    #[test]
    fn unknown_scopes_are_kept_and_not_transitive() {
        let scope = Scope::parse(Some("weird"));
        assert_eq!(scope, Scope::Other("weird".to_string()));
        assert_eq!(scope.to_string(), "weird");
        assert!(!scope.is_transitive());
        assert!(Scope::parse(None).is_transitive());
        assert!(Scope::parse(Some("runtime")).is_transitive());
    }
}
