use std::error::Error as _;
use std::fmt;
use std::future::Future;
use std::path::{Component, Path, PathBuf};
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use reqwest::{Client, StatusCode};
use thiserror::Error;
use tracing::{debug, warn};
use url::{ParseError, Url};

use crate::config::RepositoryConfig;

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// 1つのリポジトリに1つのパスを問い合わせた結果。
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome {
    Found(Bytes),
    /// リポジトリにそのパスが存在しない (HTTP 404/410)。
    Missing,
    /// 通信失敗または想定外のレスポンス。
    Failed(String),
}

impl fmt::Display for FetchOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FetchOutcome::Found(bytes) => write!(f, "found ({} bytes)", bytes.len()),
            FetchOutcome::Missing => f.write_str("missing"),
            FetchOutcome::Failed(reason) => write!(f, "failed: {reason}"),
        }
    }
}

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("リポジトリURL '{url}' が不正です: {source}")]
    InvalidUrl { url: String, source: ParseError },
    #[error("リポジトリURL '{url}' はローカルディレクトリを指していません")]
    NotLocalPath { url: String },
    #[error("リポジトリURL '{url}' のスキーム '{scheme}' はサポートされていません")]
    UnsupportedScheme { url: String, scheme: String },
    #[error("HTTPクライアントの初期化に失敗しました: {source}")]
    ClientBuild { source: reqwest::Error },
}

pub type FetchFuture<'a> = Pin<Box<dyn Future<Output = FetchOutcome> + Send + 'a>>;

/// Mavenレイアウトのリモートまたはローカルリポジトリ。
pub trait Repository: Send + Sync {
    fn name(&self) -> &str;

    /// `org/example/demo/1.0/demo-1.0.pom` のような `/` 区切りの相対パスを取得する。
    fn fetch<'a>(&'a self, relative: &'a str) -> FetchFuture<'a>;
}

/// Maven Central などのHTTP(S)リポジトリ。
pub struct HttpRepository {
    name: String,
    client: Client,
    base_url: Url,
}

impl HttpRepository {
    pub fn new(
        name: impl Into<String>,
        base_url: impl AsRef<str>,
        timeout: Duration,
    ) -> Result<Self, RegistryError> {
        let client = Client::builder()
            .timeout(timeout)
            // Some mirrors misbehave on HTTP/2; stick to HTTP/1.1.
            .http1_only()
            .user_agent(format!("jvres/{}", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|source| RegistryError::ClientBuild { source })?;
        Self::with_client(name, base_url, client)
    }

    pub fn with_client(
        name: impl Into<String>,
        base_url: impl AsRef<str>,
        client: Client,
    ) -> Result<Self, RegistryError> {
        let mut base_url =
            Url::parse(base_url.as_ref()).map_err(|source| RegistryError::InvalidUrl {
                url: base_url.as_ref().to_string(),
                source,
            })?;
        ensure_trailing_slash(&mut base_url);

        Ok(Self {
            name: name.into(),
            client,
            base_url,
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    async fn request(&self, relative: &str) -> FetchOutcome {
        let url = match self.base_url.join(relative) {
            Ok(url) => url,
            Err(error) => return FetchOutcome::Failed(format!("invalid path '{relative}': {error}")),
        };
        debug!(repository = %self.name, url = %url, "sending request");

        let response = match self.client.get(url.clone()).send().await {
            Ok(response) => response,
            Err(error) => {
                let mut chain = error.to_string();
                let mut current = error.source();
                while let Some(source) = current {
                    chain.push_str(&format!(" | caused by: {source}"));
                    current = source.source();
                }
                return FetchOutcome::Failed(chain);
            }
        };

        let status = response.status();
        if status.is_success() {
            return match response.bytes().await {
                Ok(bytes) => FetchOutcome::Found(bytes),
                Err(error) => FetchOutcome::Failed(format!("reading body of {url}: {error}")),
            };
        }
        if status == StatusCode::NOT_FOUND || status == StatusCode::GONE {
            debug!(repository = %self.name, url = %url, %status, "not present");
            return FetchOutcome::Missing;
        }
        FetchOutcome::Failed(format!("HTTP {status} from {url}"))
    }
}

impl Repository for HttpRepository {
    fn name(&self) -> &str {
        &self.name
    }

    fn fetch<'a>(&'a self, relative: &'a str) -> FetchFuture<'a> {
        Box::pin(self.request(relative))
    }
}

/// `file://` URLまたは通常のパスで指定するMavenレイアウトのディレクトリ。
pub struct FileRepository {
    name: String,
    root: PathBuf,
}

impl FileRepository {
    pub fn new(name: impl Into<String>, root: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            root: root.into(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    async fn read(&self, relative: &str) -> FetchOutcome {
        let mut path = self.root.clone();
        for component in Path::new(relative).components() {
            match component {
                Component::Normal(segment) => path.push(segment),
                _ => return FetchOutcome::Failed(format!("invalid path '{relative}'")),
            }
        }

        match tokio::fs::read(&path).await {
            Ok(bytes) => FetchOutcome::Found(Bytes::from(bytes)),
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => FetchOutcome::Missing,
            Err(error) => FetchOutcome::Failed(format!("{}: {error}", path.display())),
        }
    }
}

impl Repository for FileRepository {
    fn name(&self) -> &str {
        &self.name
    }

    fn fetch<'a>(&'a self, relative: &'a str) -> FetchFuture<'a> {
        Box::pin(self.read(relative))
    }
}

/// URLスキームに応じたリポジトリ実装を生成する。
pub fn repository_from_config(
    config: &RepositoryConfig,
    timeout: Duration,
) -> Result<Arc<dyn Repository>, RegistryError> {
    let url = Url::parse(&config.url).map_err(|source| RegistryError::InvalidUrl {
        url: config.url.clone(),
        source,
    })?;

    match url.scheme() {
        "http" | "https" => Ok(Arc::new(HttpRepository::new(
            config.name.clone(),
            &config.url,
            timeout,
        )?)),
        "file" => {
            let root = url
                .to_file_path()
                .map_err(|()| RegistryError::NotLocalPath {
                    url: config.url.clone(),
                })?;
            Ok(Arc::new(FileRepository::new(config.name.clone(), root)))
        }
        other => {
            warn!(repository = %config.name, scheme = other, "unsupported repository scheme");
            Err(RegistryError::UnsupportedScheme {
                url: config.url.clone(),
                scheme: other.to_string(),
            })
        }
    }
}

fn ensure_trailing_slash(url: &mut Url) {
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Server;
    use tempfile::tempdir;

    const POM_PATH: &str = "org/example/demo/1.0/demo-1.0.pom";

    #[tokio::test]
    async fn http_repository_maps_statuses() {
        let mut server = Server::new_async().await;
        let found = server
            .mock("GET", "/maven2/org/example/demo/1.0/demo-1.0.pom")
            .with_status(200)
            .with_body("<project/>")
            .create_async()
            .await;
        let _missing = server
            .mock("GET", "/maven2/org/example/gone/1.0/gone-1.0.pom")
            .with_status(404)
            .create_async()
            .await;
        let _broken = server
            .mock("GET", "/maven2/org/example/broken/1.0/broken-1.0.pom")
            .with_status(503)
            .create_async()
            .await;

        let repository = HttpRepository::new(
            "mock",
            format!("{}/maven2", server.url()),
            Duration::from_secs(5),
        )
        .expect("repository");
        assert!(repository.base_url().path().ends_with('/'));

        assert_eq!(
            repository.fetch(POM_PATH).await,
            FetchOutcome::Found(Bytes::from_static(b"<project/>"))
        );
        assert_eq!(
            repository
                .fetch("org/example/gone/1.0/gone-1.0.pom")
                .await,
            FetchOutcome::Missing
        );
        assert!(matches!(
            repository
                .fetch("org/example/broken/1.0/broken-1.0.pom")
                .await,
            FetchOutcome::Failed(reason) if reason.contains("503")
        ));
        found.assert_async().await;
    }

    #[tokio::test]
    async fn http_repository_reports_transport_failures() {
        let repository =
            HttpRepository::new("closed", "http://127.0.0.1:9/", Duration::from_secs(2))
                .expect("repository");
        assert!(matches!(
            repository.fetch(POM_PATH).await,
            FetchOutcome::Failed(_)
        ));
    }

    #[tokio::test]
    async fn file_repository_reads_maven_layout() {
        let temp = tempdir().expect("tempdir");
        let path = temp.path().join(POM_PATH);
        std::fs::create_dir_all(path.parent().expect("parent")).expect("dirs");
        std::fs::write(&path, b"<project/>").expect("write pom");

        let repository = FileRepository::new("local", temp.path());
        assert_eq!(
            repository.fetch(POM_PATH).await,
            FetchOutcome::Found(Bytes::from_static(b"<project/>"))
        );
        assert_eq!(
            repository.fetch("org/example/none/1.0/none-1.0.pom").await,
            FetchOutcome::Missing
        );
        assert!(matches!(
            repository.fetch("../escape.pom").await,
            FetchOutcome::Failed(_)
        ));
    }

    #[test]
    fn picks_implementation_from_scheme() {
        let temp = tempdir().expect("tempdir");
        let file_url = Url::from_directory_path(temp.path()).expect("file url");
        let local = RepositoryConfig::new("local", file_url.as_str());
        let repository = repository_from_config(&local, DEFAULT_TIMEOUT).expect("file repository");
        assert_eq!(repository.name(), "local");

        let central = RepositoryConfig::new("central", "https://repo1.maven.org/maven2");
        assert!(repository_from_config(&central, DEFAULT_TIMEOUT).is_ok());

        let ftp = RepositoryConfig::new("ftp", "ftp://example.com/repo");
        assert!(matches!(
            repository_from_config(&ftp, DEFAULT_TIMEOUT),
            Err(RegistryError::UnsupportedScheme { .. })
        ));
        assert!(matches!(
            repository_from_config(&RepositoryConfig::new("bad", "not a url"), DEFAULT_TIMEOUT),
            Err(RegistryError::InvalidUrl { .. })
        ));
    }
}
