use std::path::PathBuf;
use std::sync::Arc;

use bytes::Bytes;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::cache::{CacheError, LocalCache};
use crate::registry::{FetchOutcome, Repository};

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("'{path}' は {attempted} 件のリポジトリのいずれにも見つかりませんでした")]
    NotFound { path: String, attempted: usize },
    #[error("'{path}' を {repository} から取得しましたがキャッシュへの保存に失敗しました: {source}")]
    CacheWrite {
        path: String,
        repository: String,
        #[source]
        source: CacheError,
    },
    #[error("'{path}' のキャッシュ参照に失敗しました: {source}")]
    Cache {
        path: String,
        #[source]
        source: CacheError,
    },
}

impl GatewayError {
    pub fn path(&self) -> &str {
        match self {
            GatewayError::NotFound { path, .. }
            | GatewayError::CacheWrite { path, .. }
            | GatewayError::Cache { path, .. } => path,
        }
    }
}

/// キャッシュ優先でリポジトリのファイルを取得する。リポジトリは指定順に問い合わせ、
/// 取得できた内容は返す前にキャッシュへ保存する。
pub struct FetchGateway {
    cache: Arc<LocalCache>,
    repositories: Vec<Arc<dyn Repository>>,
}

impl FetchGateway {
    pub fn new(cache: Arc<LocalCache>, repositories: Vec<Arc<dyn Repository>>) -> Self {
        Self {
            cache,
            repositories,
        }
    }

    pub fn cache(&self) -> &Arc<LocalCache> {
        &self.cache
    }

    pub fn repositories(&self) -> &[Arc<dyn Repository>] {
        &self.repositories
    }

    /// `relative` の内容を返す。キャッシュにない場合はダウンロードする。
    pub async fn fetch(&self, relative: &str) -> Result<Bytes, GatewayError> {
        let cached = self
            .cache
            .read(relative)
            .map_err(|source| GatewayError::Cache {
                path: relative.to_string(),
                source,
            })?;
        if let Some(bytes) = cached {
            debug!(path = relative, "served from cache");
            return Ok(bytes);
        }

        self.download(relative).await.map(|(bytes, _)| bytes)
    }

    /// `relative` がキャッシュに存在することを保証し、そのローカルパスを返す。
    pub async fn ensure(&self, relative: &str) -> Result<PathBuf, GatewayError> {
        let local = self
            .cache
            .path_for(relative)
            .map_err(|source| GatewayError::Cache {
                path: relative.to_string(),
                source,
            })?;
        if local.is_file() {
            debug!(path = relative, "already cached");
            return Ok(local);
        }

        self.download(relative).await.map(|(_, path)| path)
    }

    async fn download(&self, relative: &str) -> Result<(Bytes, PathBuf), GatewayError> {
        for repository in &self.repositories {
            match repository.fetch(relative).await {
                FetchOutcome::Found(bytes) => {
                    let path = self.cache.write(relative, &bytes).map_err(|source| {
                        GatewayError::CacheWrite {
                            path: relative.to_string(),
                            repository: repository.name().to_string(),
                            source,
                        }
                    })?;
                    info!(
                        path = relative,
                        repository = repository.name(),
                        size = bytes.len(),
                        "downloaded"
                    );
                    return Ok((bytes, path));
                }
                FetchOutcome::Missing => {
                    debug!(path = relative, repository = repository.name(), "missing");
                }
                FetchOutcome::Failed(reason) => {
                    warn!(
                        path = relative,
                        repository = repository.name(),
                        %reason,
                        "repository request failed, trying next"
                    );
                }
            }
        }

        Err(GatewayError::NotFound {
            path: relative.to_string(),
            attempted: self.repositories.len(),
        })
    }
}
