use crate::coordinates::ArtifactId;
use crate::version::sort_versions;
use bytes::Bytes;
use std::fs;
use std::io::Write;
use std::path::{Component, Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use tempfile::NamedTempFile;
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("ホームディレクトリを特定できませんでした")]
    HomeDirNotFound,
    #[error("'{path}' はリポジトリ内の相対パスではありません")]
    InvalidPath { path: String },
    #[error("キャッシュパス {path:?} の親ディレクトリを解決できませんでした")]
    MissingParent { path: PathBuf },
    #[error("IOエラー ({path:?}): {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStatsSnapshot {
    pub hits: u64,
    pub misses: u64,
    pub writes: u64,
}

#[derive(Debug, Default)]
struct CacheStats {
    hits: AtomicU64,
    misses: AtomicU64,
    writes: AtomicU64,
}

impl CacheStats {
    fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    fn record_write(&self) {
        self.writes.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> CacheStatsSnapshot {
        CacheStatsSnapshot {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            writes: self.writes.load(Ordering::Relaxed),
        }
    }
}

/// Mavenレイアウトのローカルリポジトリ。キーはルートからの `/` 区切りの
/// 相対パス (例: `org/example/demo/1.0/demo-1.0.pom`)。
#[derive(Debug)]
pub struct LocalCache {
    root: PathBuf,
    stats: CacheStats,
}

/// `~/.jv/repository`
pub fn default_root() -> Result<PathBuf, CacheError> {
    let home = dirs::home_dir().ok_or(CacheError::HomeDirNotFound)?;
    Ok(home.join(".jv").join("repository"))
}

impl LocalCache {
    pub fn new(root: impl Into<PathBuf>) -> Result<Self, CacheError> {
        let root = root.into();
        ensure_directory(&root)?;
        Ok(Self {
            root,
            stats: CacheStats::default(),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// 相対パスをキャッシュルート配下の絶対パスへ変換する。絶対パスと `..` は拒否する。
    pub fn path_for(&self, relative: &str) -> Result<PathBuf, CacheError> {
        let invalid = || CacheError::InvalidPath {
            path: relative.to_string(),
        };
        if relative.is_empty() || relative.starts_with('/') || relative.contains('\\') {
            return Err(invalid());
        }

        let mut path = self.root.clone();
        for component in Path::new(relative).components() {
            match component {
                Component::Normal(segment) => path.push(segment),
                Component::CurDir => {}
                _ => return Err(invalid()),
            }
        }
        Ok(path)
    }

    pub fn contains(&self, relative: &str) -> bool {
        self.path_for(relative)
            .map(|path| path.is_file())
            .unwrap_or(false)
    }

    /// キャッシュ済みのバイト列を読み込む。読み込めないファイルはミス扱い。
    pub fn read(&self, relative: &str) -> Result<Option<Bytes>, CacheError> {
        let path = self.path_for(relative)?;
        if !path.is_file() {
            debug!(path = relative, "cache miss");
            self.stats.record_miss();
            return Ok(None);
        }

        match fs::read(&path) {
            Ok(bytes) => {
                self.stats.record_hit();
                Ok(Some(Bytes::from(bytes)))
            }
            Err(error) => {
                warn!(path = %path.display(), %error, "cached file unreadable, treating as missing");
                self.stats.record_miss();
                Ok(None)
            }
        }
    }

    /// バイト列を保存し、既存ファイルを置き換える。一時ファイルからのリネームで
    /// 差し替えるため、読み手が書きかけの内容を見ることはない。
    pub fn write(&self, relative: &str, bytes: &[u8]) -> Result<PathBuf, CacheError> {
        let path = self.path_for(relative)?;
        write_bytes(&path, bytes)?;
        self.stats.record_write();
        debug!(path = relative, size = bytes.len(), "stored in cache");
        Ok(path)
    }

    /// キャッシュ済みファイルを削除し、削除したかどうかを返す。
    pub fn remove(&self, relative: &str) -> Result<bool, CacheError> {
        let path = self.path_for(relative)?;
        match fs::remove_file(&path) {
            Ok(()) => Ok(true),
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(source) => Err(CacheError::Io { path, source }),
        }
    }

    /// POMがキャッシュされている `id` のバージョンを昇順で返す。
    pub fn cached_versions(&self, id: &ArtifactId) -> Result<Vec<String>, CacheError> {
        let dir = self.path_for(&id.path())?;
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => return Err(CacheError::Io { path: dir, source }),
        };

        let mut versions = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|source| CacheError::Io {
                path: dir.clone(),
                source,
            })?;
            let Some(version) = entry.file_name().to_str().map(str::to_string) else {
                continue;
            };
            if self.contains(&id.with_version(version.as_str()).pom_path()) {
                versions.push(version);
            }
        }
        sort_versions(&mut versions);
        Ok(versions)
    }

    pub fn stats(&self) -> CacheStatsSnapshot {
        self.stats.snapshot()
    }
}

fn io_error(path: &Path) -> impl FnOnce(std::io::Error) -> CacheError + '_ {
    move |source| CacheError::Io {
        path: path.to_path_buf(),
        source,
    }
}

fn write_bytes(path: &Path, bytes: &[u8]) -> Result<(), CacheError> {
    let parent = path.parent().ok_or_else(|| CacheError::MissingParent {
        path: path.to_path_buf(),
    })?;
    ensure_directory(parent)?;

    // 同一ファイルシステム上でリネームするため、保存先と同じディレクトリに作る。
    let mut staged = NamedTempFile::new_in(parent).map_err(io_error(parent))?;
    staged.write_all(bytes).map_err(io_error(staged.path()))?;
    staged.as_file().sync_all().map_err(io_error(staged.path()))?;
    set_file_permissions(staged.path())?;
    staged.persist(path).map_err(|error| CacheError::Io {
        path: path.to_path_buf(),
        source: error.error,
    })?;
    Ok(())
}

fn ensure_directory(path: &Path) -> Result<(), CacheError> {
    fs::create_dir_all(path).map_err(io_error(path))?;
    set_dir_permissions(path)?;
    Ok(())
}

#[cfg(unix)]
fn set_dir_permissions(path: &Path) -> Result<(), CacheError> {
    use std::os::unix::fs::PermissionsExt;

    let permissions = fs::Permissions::from_mode(0o755);
    fs::set_permissions(path, permissions).map_err(io_error(path))
}

#[cfg(unix)]
fn set_file_permissions(path: &Path) -> Result<(), CacheError> {
    use std::os::unix::fs::PermissionsExt;

    let permissions = fs::Permissions::from_mode(0o644);
    fs::set_permissions(path, permissions).map_err(io_error(path))
}

#[cfg(not(unix))]
fn set_dir_permissions(_path: &Path) -> Result<(), CacheError> {
    Ok(())
}

#[cfg(not(unix))]
fn set_file_permissions(_path: &Path) -> Result<(), CacheError> {
    Ok(())
}
