//! Tile, thumbnail and metadata production
//!
//! Every artifact is looked up in the tiered cache before any filesystem or
//! decoder work happens, so a warm cache serves requests without touching
//! the slide at all. On a miss the producer resolves the slide path, takes a
//! decode permit and runs the read on the blocking pool.

use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use metrics::{counter, histogram};
use tracing::{debug, warn};

use crate::cache::{CacheBackend, TieredCache, cache_key};
use crate::catalog::PathResolver;
use crate::config::Config;

use super::dzi::{
    self, dzi_levels, read_associated_jpeg, read_thumbnail_jpeg, read_tile_jpeg, tile_geometry,
};
use super::gate::DecodeGate;
use super::handle_cache::SlideHandleCache;
use super::types::{SlideError, SlideMetadata, TileRequest};

/// Requested thumbnail sizes are clamped to this range
const THUMB_PX_MIN: u32 = 16;
const THUMB_PX_MAX: u32 = 2048;

/// Upper bound on sidecar directory entries counted toward slide size
const SIDECAR_WALK_LIMIT: usize = 10_000;

pub struct TileProducer {
    cache: Arc<TieredCache>,
    resolver: Arc<PathResolver>,
    handles: SlideHandleCache,
    gate: DecodeGate,
    tile_size: u32,
    jpeg_quality: u8,
    thumb_max_px: u32,
    thumb_prefer_associated: bool,
    ttl_meta: Duration,
    ttl_thumb: Duration,
    ttl_tile: Duration,
}

impl TileProducer {
    pub fn new(cache: Arc<TieredCache>, resolver: Arc<PathResolver>, config: &Config) -> Self {
        Self {
            cache,
            resolver,
            handles: SlideHandleCache::new(config.slide.max_cached_slides),
            gate: DecodeGate::new(config.slide.decode_capacity, config.slide.decode_queue_depth),
            tile_size: config.slide.tile_size,
            jpeg_quality: config.slide.jpeg_quality,
            thumb_max_px: config.slide.thumb_max_px,
            thumb_prefer_associated: config.slide.thumb_prefer_associated,
            ttl_meta: config.cache.ttl.meta,
            ttl_thumb: config.cache.ttl.thumb,
            ttl_tile: config.cache.ttl.tile,
        }
    }

    /// Requests currently waiting for a decode permit
    pub fn decode_queue_len(&self) -> usize {
        self.gate.queued()
    }

    /// Slide metadata, from the handle pool, the tiered cache, or a fresh
    /// open in that order.
    pub async fn metadata(&self, id: &str) -> Result<Arc<SlideMetadata>, SlideError> {
        if let Some(meta) = self.handles.get_metadata(id) {
            return Ok(meta);
        }

        let key = cache_key(&["meta", id]);
        if let Some(raw) = self.cache.get(&key).await
            && let Ok(meta) = serde_json::from_slice::<SlideMetadata>(&raw)
        {
            let meta = Arc::new(meta);
            self.handles.set_metadata(id, Arc::clone(&meta));
            return Ok(meta);
        }

        let path = self.resolver.resolve(id).await?;
        let _permit = self.gate.acquire().await?;
        let handle = self.handles.get_or_open(id, &path).await?;

        let meta = {
            let handle = Arc::clone(&handle);
            let id = id.to_string();
            let path = path.clone();
            let tile_size = self.tile_size;
            tokio::task::spawn_blocking(move || extract_metadata(&handle, &id, &path, tile_size))
                .await
                .map_err(|e| SlideError::OpenError(format!("metadata task failed: {}", e)))??
        };

        let meta = Arc::new(meta);
        self.handles.set_metadata(id, Arc::clone(&meta));
        match serde_json::to_vec(meta.as_ref()) {
            Ok(json) => {
                self.cache
                    .set(&key, Bytes::from(json), Some(self.ttl_meta))
                    .await
            }
            Err(e) => warn!("Failed to serialize metadata for {}: {}", id, e),
        }
        Ok(meta)
    }

    /// The DZI XML descriptor for a slide
    pub async fn dzi(&self, id: &str) -> Result<String, SlideError> {
        let meta = self.metadata(id).await?;
        Ok(dzi::dzi_xml(&meta))
    }

    /// One deep-zoom tile as encoded JPEG bytes
    pub async fn tile(&self, req: &TileRequest) -> Result<Bytes, SlideError> {
        counter!("wsibrowse_tile_requests_total").increment(1);
        let started = Instant::now();

        let key = cache_key(&[
            "tile",
            &req.slide_id,
            &req.level.to_string(),
            &req.x.to_string(),
            &req.y.to_string(),
        ]);
        if let Some(cached) = self.cache.get(&key).await {
            histogram!("wsibrowse_tile_duration_seconds", "outcome" => "cached")
                .record(started.elapsed());
            return Ok(cached);
        }

        let result = self.produce_tile(req, &key).await;
        match &result {
            Ok(_) => {
                histogram!("wsibrowse_tile_duration_seconds", "outcome" => "decoded")
                    .record(started.elapsed());
            }
            Err(e) => {
                counter!("wsibrowse_tile_errors_total").increment(1);
                debug!(
                    "Tile {}:{}/{}_{} failed: {}",
                    req.slide_id, req.level, req.x, req.y, e
                );
            }
        }
        result
    }

    async fn produce_tile(&self, req: &TileRequest, key: &str) -> Result<Bytes, SlideError> {
        let meta = self.metadata(&req.slide_id).await?;
        // Reject bad coordinates before spending a decode permit
        tile_geometry(&meta, req.level, req.x, req.y)?;

        let path = self.resolver.resolve(&req.slide_id).await?;
        let _permit = self.gate.acquire().await?;
        let handle = self.handles.get_or_open(&req.slide_id, &path).await?;

        let jpeg = {
            let handle = Arc::clone(&handle);
            let meta = Arc::clone(&meta);
            let (level, x, y) = (req.level, req.x, req.y);
            let quality = self.jpeg_quality;
            tokio::task::spawn_blocking(move || {
                read_tile_jpeg(&handle, &meta, level, x, y, quality)
            })
            .await
            .map_err(|e| SlideError::TileError(format!("decode task failed: {}", e)))??
        };

        let bytes = Bytes::from(jpeg);
        self.cache
            .set(key, bytes.clone(), Some(self.ttl_tile))
            .await;
        Ok(bytes)
    }

    /// A JPEG thumbnail fitting within a `max_px` bounding box
    pub async fn thumbnail(&self, id: &str, max_px: Option<u32>) -> Result<Bytes, SlideError> {
        let px = max_px
            .unwrap_or(self.thumb_max_px)
            .clamp(THUMB_PX_MIN, THUMB_PX_MAX);

        let key = cache_key(&["thumb", id, &px.to_string()]);
        if let Some(cached) = self.cache.get(&key).await {
            return Ok(cached);
        }

        let path = self.resolver.resolve(id).await?;
        let _permit = self.gate.acquire().await?;
        let handle = self.handles.get_or_open(id, &path).await?;

        let jpeg = {
            let handle = Arc::clone(&handle);
            let quality = self.jpeg_quality;
            let prefer_associated = self.thumb_prefer_associated;
            tokio::task::spawn_blocking(move || {
                read_thumbnail_jpeg(&handle, px, quality, prefer_associated)
            })
            .await
            .map_err(|e| SlideError::TileError(format!("thumbnail task failed: {}", e)))??
        };

        let bytes = Bytes::from(jpeg);
        self.cache
            .set(&key, bytes.clone(), Some(self.ttl_thumb))
            .await;
        Ok(bytes)
    }

    /// Names of the embedded associated images a slide carries
    pub async fn associated_names(&self, id: &str) -> Result<Vec<String>, SlideError> {
        Ok(self.metadata(id).await?.associated_images.clone())
    }

    /// One embedded associated image (label, macro, ...) as JPEG bytes
    pub async fn associated_image(&self, id: &str, name: &str) -> Result<Bytes, SlideError> {
        let key = cache_key(&["assoc", id, name]);
        if let Some(cached) = self.cache.get(&key).await {
            return Ok(cached);
        }

        // The name list in metadata guards against opening the slide for a
        // name it does not carry
        let meta = self.metadata(id).await?;
        if !meta.associated_images.iter().any(|n| n == name) {
            return Err(SlideError::NotFound(format!(
                "associated image {} of slide {}",
                name, id
            )));
        }

        let path = self.resolver.resolve(id).await?;
        let _permit = self.gate.acquire().await?;
        let handle = self.handles.get_or_open(id, &path).await?;

        let jpeg = {
            let handle = Arc::clone(&handle);
            let name = name.to_string();
            let quality = self.jpeg_quality;
            tokio::task::spawn_blocking(move || read_associated_jpeg(&handle, &name, quality))
                .await
                .map_err(|e| {
                    SlideError::TileError(format!("associated image task failed: {}", e))
                })??
        };

        let bytes = Bytes::from(jpeg);
        self.cache
            .set(&key, bytes.clone(), Some(self.ttl_thumb))
            .await;
        Ok(bytes)
    }
}

/// Read slide properties into a metadata record. Runs on the blocking pool.
fn extract_metadata(
    slide: &openslide_rs::OpenSlide,
    id: &str,
    path: &Path,
    tile_size: u32,
) -> Result<SlideMetadata, SlideError> {
    let dims = slide
        .get_level_dimensions(0)
        .map_err(|e| SlideError::OpenError(format!("failed to read dimensions: {}", e)))?;
    let width = dims.w as u64;
    let height = dims.h as u64;
    let level_count = slide.get_level_count().unwrap_or(1);

    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| id.to_string());
    let format = path
        .extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .unwrap_or_default();

    let (file_size, mtime) = match std::fs::metadata(path) {
        Ok(fs_meta) => {
            let mtime = fs_meta
                .modified()
                .ok()
                .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
                .map(|d| d.as_secs() as i64)
                .unwrap_or(0);
            (Some(slide_size_on_disk(path, fs_meta.len())), mtime)
        }
        Err(_) => (None, 0),
    };

    Ok(SlideMetadata {
        id: id.to_string(),
        name,
        path: path.to_string_lossy().into_owned(),
        width,
        height,
        tile_size,
        num_levels: dzi_levels(width, height),
        level_count,
        format,
        associated_images: slide.get_associated_image_names().unwrap_or_default(),
        vendor: slide.get_property_value("openslide.vendor").ok(),
        objective_power: slide.get_property_value("openslide.objective-power").ok(),
        mpp_x: slide
            .get_property_value("openslide.mpp-x")
            .ok()
            .and_then(|v| v.parse().ok()),
        mpp_y: slide
            .get_property_value("openslide.mpp-y")
            .ok()
            .and_then(|v| v.parse().ok()),
        file_size,
        mtime,
    })
}

/// Size on disk including the sidecar directory of multi-file formats
/// (an `.mrxs` file is a small pointer next to a directory of its stem).
fn slide_size_on_disk(path: &Path, file_len: u64) -> u64 {
    let mut total = file_len;

    let sidecar = path.with_extension("");
    if sidecar.is_dir() {
        let mut seen = 0usize;
        let mut todo = vec![sidecar];
        while let Some(dir) = todo.pop() {
            let Ok(entries) = std::fs::read_dir(&dir) else {
                continue;
            };
            for entry in entries.flatten() {
                seen += 1;
                if seen > SIDECAR_WALK_LIMIT {
                    return total;
                }
                let Ok(meta) = entry.metadata() else {
                    continue;
                };
                if meta.is_dir() {
                    todo.push(entry.path());
                } else {
                    total += meta.len();
                }
            }
        }
    }

    total
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::LocalBackend;

    fn producer_with(cache: Arc<TieredCache>) -> TileProducer {
        let resolver = Arc::new(PathResolver::new(
            Arc::clone(&cache),
            Vec::new(),
            vec!["svs".to_string()],
            Vec::new(),
        ));
        TileProducer::new(cache, resolver, &Config::default())
    }

    fn seeded_metadata(id: &str) -> SlideMetadata {
        SlideMetadata {
            id: id.to_string(),
            name: "seed.svs".to_string(),
            path: "/data/seed.svs".to_string(),
            width: 1024,
            height: 1024,
            tile_size: 256,
            num_levels: dzi_levels(1024, 1024),
            level_count: 3,
            format: "svs".to_string(),
            vendor: Some("aperio".to_string()),
            objective_power: None,
            mpp_x: Some(0.25),
            mpp_y: Some(0.25),
            associated_images: vec!["thumbnail".to_string(), "macro".to_string()],
            file_size: Some(123),
            mtime: 1_700_000_000,
        }
    }

    #[tokio::test]
    async fn test_cached_tile_served_without_resolution() {
        let cache = Arc::new(TieredCache::local_only(Arc::new(LocalBackend::new(64))));
        let key = cache_key(&["tile", "abc", "10", "0", "0"]);
        cache.set(&key, Bytes::from_static(b"jpegbytes"), None).await;

        let producer = producer_with(cache);
        let req = TileRequest {
            slide_id: "abc".to_string(),
            level: 10,
            x: 0,
            y: 0,
        };
        let first = producer.tile(&req).await.unwrap();
        let second = producer.tile(&req).await.unwrap();
        assert_eq!(first, Bytes::from_static(b"jpegbytes"));
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_unknown_slide_is_not_found() {
        let cache = Arc::new(TieredCache::local_only(Arc::new(LocalBackend::new(64))));
        let producer = producer_with(cache);
        match producer.metadata("nosuchslide").await {
            Err(SlideError::NotFound(_)) => {}
            other => panic!("expected NotFound, got {:?}", other.map(|_| ())),
        }
    }

    #[tokio::test]
    async fn test_metadata_served_from_cache() {
        let cache = Arc::new(TieredCache::local_only(Arc::new(LocalBackend::new(64))));
        let meta = seeded_metadata("abc");
        let json = serde_json::to_vec(&meta).unwrap();
        cache
            .set(&cache_key(&["meta", "abc"]), Bytes::from(json), None)
            .await;

        let producer = producer_with(cache);
        let loaded = producer.metadata("abc").await.unwrap();
        assert_eq!(loaded.width, 1024);
        assert_eq!(loaded.vendor.as_deref(), Some("aperio"));

        let xml = producer.dzi("abc").await.unwrap();
        assert!(xml.contains(r#"Width="1024""#));
    }

    #[tokio::test]
    async fn test_out_of_range_tile_rejected_from_cached_metadata() {
        let cache = Arc::new(TieredCache::local_only(Arc::new(LocalBackend::new(64))));
        let meta = seeded_metadata("abc");
        let json = serde_json::to_vec(&meta).unwrap();
        cache
            .set(&cache_key(&["meta", "abc"]), Bytes::from(json), None)
            .await;

        let producer = producer_with(cache);
        let req = TileRequest {
            slide_id: "abc".to_string(),
            level: meta.num_levels + 5,
            x: 0,
            y: 0,
        };
        match producer.tile(&req).await {
            Err(SlideError::InvalidLevel(_)) => {}
            other => panic!("expected InvalidLevel, got {:?}", other.map(|_| ())),
        }
    }

    #[tokio::test]
    async fn test_associated_names_come_from_metadata() {
        let cache = Arc::new(TieredCache::local_only(Arc::new(LocalBackend::new(64))));
        let json = serde_json::to_vec(&seeded_metadata("abc")).unwrap();
        cache
            .set(&cache_key(&["meta", "abc"]), Bytes::from(json), None)
            .await;

        let producer = producer_with(cache);
        let names = producer.associated_names("abc").await.unwrap();
        assert_eq!(names, vec!["thumbnail", "macro"]);
    }

    #[tokio::test]
    async fn test_unknown_associated_name_is_not_found() {
        let cache = Arc::new(TieredCache::local_only(Arc::new(LocalBackend::new(64))));
        let json = serde_json::to_vec(&seeded_metadata("abc")).unwrap();
        cache
            .set(&cache_key(&["meta", "abc"]), Bytes::from(json), None)
            .await;

        let producer = producer_with(cache);
        match producer.associated_image("abc", "label").await {
            Err(SlideError::NotFound(_)) => {}
            other => panic!("expected NotFound, got {:?}", other.map(|_| ())),
        }
    }

    #[tokio::test]
    async fn test_cached_associated_image_served_without_decode() {
        let cache = Arc::new(TieredCache::local_only(Arc::new(LocalBackend::new(64))));
        cache
            .set(
                &cache_key(&["assoc", "abc", "macro"]),
                Bytes::from_static(b"macrobytes"),
                None,
            )
            .await;

        let producer = producer_with(cache);
        let out = producer.associated_image("abc", "macro").await.unwrap();
        assert_eq!(out, Bytes::from_static(b"macrobytes"));
    }

    #[tokio::test]
    async fn test_cached_thumbnail_served_and_size_clamped() {
        let cache = Arc::new(TieredCache::local_only(Arc::new(LocalBackend::new(64))));
        // A requested 1_000_000 px thumbnail clamps to the maximum
        let key = cache_key(&["thumb", "abc", &THUMB_PX_MAX.to_string()]);
        cache.set(&key, Bytes::from_static(b"thumbbytes"), None).await;

        let producer = producer_with(cache);
        let out = producer.thumbnail("abc", Some(1_000_000)).await.unwrap();
        assert_eq!(out, Bytes::from_static(b"thumbbytes"));
    }
}
