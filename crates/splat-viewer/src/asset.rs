use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};
use std::rc::Rc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures_lite::{future, stream, FutureExt, StreamExt};
use serde::{Deserialize, Serialize};
use splat_render::{PointCloud, PointCloudBuilder, Splat};
use tracing::{debug, info, info_span, Instrument};

use crate::splat_import::{PlyDecoder, RawSplatDecoder};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AssetError {
    #[error("asset not found: {0}")]
    NotFound(String),
    #[error("malformed asset: {0}")]
    Malformed(String),
    #[error("asset {what} of {found} exceeds the limit of {limit}")]
    DecodeTooLarge {
        what: &'static str,
        found: u64,
        limit: u64,
    },
    #[error("load was cancelled")]
    Cancelled,
}

impl AssetError {
    pub(crate) fn malformed(err: impl std::fmt::Display) -> Self {
        Self::Malformed(err.to_string())
    }
}

/// Liveness flag shared between a load and its owner. Once cancelled the load
/// finishes with [`AssetError::Cancelled`] at its next suspension point.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    pub fn check(&self) -> Result<(), AssetError> {
        if self.is_cancelled() {
            Err(AssetError::Cancelled)
        } else {
            Ok(())
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DecodeLimits {
    pub max_bytes: u64,
    pub max_points: usize,
    /// Points decoded between two yields to the frame driver.
    pub chunk_size: usize,
}

impl Default for DecodeLimits {
    fn default() -> Self {
        Self {
            max_bytes: 256 * 1024 * 1024,
            max_points: 4 * 1024 * 1024,
            chunk_size: 50_000,
        }
    }
}

impl DecodeLimits {
    pub fn with_max_bytes(mut self, max_bytes: u64) -> Self {
        self.max_bytes = max_bytes;
        self
    }

    pub fn with_max_points(mut self, max_points: usize) -> Self {
        self.max_points = max_points;
        self
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size;
        self
    }
}

/// Resolves an asset locator to its raw bytes.
pub trait AssetSource {
    fn fetch(&self, url: &str, max_bytes: u64) -> future::BoxedLocal<Result<Vec<u8>, AssetError>>;
}

/// Serves assets from a directory, like a static web root.
#[derive(Debug, Clone)]
pub struct FileSource {
    root: PathBuf,
}

impl FileSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn resolve(&self, url: &str) -> Option<PathBuf> {
        let relative = Path::new(url.trim_start_matches('/'));
        if relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir))
        {
            return None;
        }
        Some(self.root.join(relative))
    }
}

impl AssetSource for FileSource {
    fn fetch(&self, url: &str, max_bytes: u64) -> future::BoxedLocal<Result<Vec<u8>, AssetError>> {
        let path = self.resolve(url);
        let url = url.to_owned();

        async move {
            let path = path.ok_or_else(|| AssetError::NotFound(url.clone()))?;

            let meta = std::fs::metadata(&path).map_err(|_| AssetError::NotFound(url.clone()))?;
            if !meta.is_file() {
                return Err(AssetError::NotFound(url));
            }
            if meta.len() > max_bytes {
                return Err(AssetError::DecodeTooLarge {
                    what: "size in bytes",
                    found: meta.len(),
                    limit: max_bytes,
                });
            }

            std::fs::read(&path).map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound => AssetError::NotFound(url),
                _ => AssetError::malformed(e),
            })
        }
        .boxed_local()
    }
}

/// In-memory asset table. A locator with no entry behaves like a 404.
#[derive(Debug, Clone, Default)]
pub struct MemorySource {
    assets: HashMap<String, Rc<[u8]>>,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_asset(mut self, url: impl Into<String>, data: impl Into<Rc<[u8]>>) -> Self {
        self.insert(url, data);
        self
    }

    pub fn insert(&mut self, url: impl Into<String>, data: impl Into<Rc<[u8]>>) {
        self.assets.insert(url.into(), data.into());
    }
}

impl AssetSource for MemorySource {
    fn fetch(&self, url: &str, max_bytes: u64) -> future::BoxedLocal<Result<Vec<u8>, AssetError>> {
        let result = match self.assets.get(url) {
            None => Err(AssetError::NotFound(url.to_owned())),
            Some(data) if data.len() as u64 > max_bytes => Err(AssetError::DecodeTooLarge {
                what: "size in bytes",
                found: data.len() as u64,
                limit: max_bytes,
            }),
            Some(data) => Ok(data.to_vec()),
        };
        future::ready(result).boxed_local()
    }
}

/// A point cloud file format.
pub trait PointCloudDecoder {
    fn name(&self) -> &'static str;

    /// Whether this decoder claims the asset, judged from its locator and leading bytes.
    fn accepts(&self, url: &str, data: &[u8]) -> bool;

    /// Number of points the asset declares. Fails on a malformed header.
    fn point_count(&self, data: &[u8]) -> Result<usize, AssetError>;

    /// Decode the asset into chunks of at most `chunk_size` splats.
    fn decode(
        &self,
        data: Vec<u8>,
        chunk_size: usize,
    ) -> stream::BoxedLocal<Result<Vec<Splat>, AssetError>>;
}

/// Strips query and fragment, then returns the lowercase file extension.
pub(crate) fn url_extension(url: &str) -> Option<String> {
    let path = url.split(['?', '#']).next().unwrap_or(url);
    let file = path.rsplit('/').next().unwrap_or(path);
    let (_, ext) = file.rsplit_once('.')?;
    Some(ext.to_ascii_lowercase())
}

/// Fetches and decodes point cloud assets.
#[derive(Clone)]
pub struct AssetLoader {
    source: Rc<dyn AssetSource>,
    decoders: Vec<Rc<dyn PointCloudDecoder>>,
    limits: DecodeLimits,
}

impl AssetLoader {
    pub fn new(source: Rc<dyn AssetSource>) -> Self {
        Self {
            source,
            decoders: vec![Rc::new(PlyDecoder), Rc::new(RawSplatDecoder)],
            limits: DecodeLimits::default(),
        }
    }

    pub fn with_limits(mut self, limits: DecodeLimits) -> Self {
        self.limits = limits;
        self
    }

    /// Register an extra format. It is tried before the built-in ones.
    pub fn with_decoder(mut self, decoder: Rc<dyn PointCloudDecoder>) -> Self {
        self.decoders.insert(0, decoder);
        self
    }

    pub fn limits(&self) -> &DecodeLimits {
        &self.limits
    }

    /// Load the asset at `url`.
    ///
    /// The returned future suspends between fetched bytes and every decoded
    /// chunk, checking `token` each time it resumes. It never yields a partially
    /// populated cloud.
    pub fn load(
        &self,
        url: &str,
        token: CancelToken,
    ) -> future::BoxedLocal<Result<PointCloud, AssetError>> {
        let source = self.source.clone();
        let decoders = self.decoders.clone();
        let limits = self.limits;
        let url = url.to_owned();
        let span = info_span!("Load asset", url = %url);

        async move {
            token.check()?;
            let data = source.fetch(&url, limits.max_bytes).await?;
            token.check()?;

            if data.len() as u64 > limits.max_bytes {
                return Err(AssetError::DecodeTooLarge {
                    what: "size in bytes",
                    found: data.len() as u64,
                    limit: limits.max_bytes,
                });
            }

            let decoder = decoders
                .iter()
                .find(|d| d.accepts(&url, &data))
                .ok_or_else(|| AssetError::Malformed(format!("unrecognized format for {url}")))?;

            let total = decoder.point_count(&data)?;
            if total > limits.max_points {
                return Err(AssetError::DecodeTooLarge {
                    what: "point count",
                    found: total as u64,
                    limit: limits.max_points as u64,
                });
            }
            info!(format = decoder.name(), points = total, "Decoding asset");

            let mut builder = PointCloudBuilder::with_capacity(total);
            let mut chunks = decoder.decode(data, limits.chunk_size);

            while let Some(chunk) = chunks.next().await {
                builder.extend(chunk?);
                if builder.len() > total {
                    return Err(AssetError::Malformed(format!(
                        "decoded more points than the {total} declared"
                    )));
                }
                debug!(loaded = builder.len(), total, "Decoded chunk");

                // Give the frame driver a turn.
                future::yield_now().await;
                token.check()?;
            }

            if builder.is_empty() {
                return Err(AssetError::Malformed("asset contains no points".to_owned()));
            }

            builder.finish().map_err(AssetError::malformed)
        }
        .instrument(span)
        .boxed_local()
    }
}
