//! Server configuration
//!
//! Configuration is loaded from environment variables. Roots are given as
//! `WSI_ROOTS="label=/path;other=/other/path"`; a bare path gets its final
//! component as the label.

use std::env;
use std::path::PathBuf;
use std::time::Duration;

/// Slide file extensions recognized by default (lowercase, no dot)
pub const DEFAULT_EXTENSIONS: &[&str] = &[
    "svs", "tif", "tiff", "ndpi", "scn", "mrxs", "bif", "vms", "vmu", "svslide",
];

/// Main server configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Server bind address
    pub host: String,
    /// Server port
    pub port: u16,

    /// Slide root directories
    pub roots: Vec<RootConfig>,
    /// Extension allowlist (lowercase, no leading dot)
    pub extensions: Vec<String>,
    /// Exclude patterns (glob when the pattern contains `*?[`, substring otherwise)
    pub exclude: Vec<String>,

    /// Cache configuration
    pub cache: CacheConfig,

    /// Slide reading configuration
    pub slide: SlideConfig,
}

/// A labelled slide root directory
#[derive(Debug, Clone)]
pub struct RootConfig {
    pub label: String,
    pub path: PathBuf,
}

/// Cache tier configuration
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Whether the shared Redis tier is enabled
    pub shared_enabled: bool,
    /// Redis connection URL for the shared tier
    pub redis_url: String,
    /// Mirror shared-tier writes into the local tier
    pub write_through: bool,
    /// Timeout for shared-tier round-trips
    pub shared_timeout: Duration,
    /// Maximum number of entries in the local tier
    pub local_capacity: usize,
    /// Snapshot file for the local tier (best-effort persistence)
    pub snapshot_path: PathBuf,
    /// How often the local tier is flushed to disk
    pub snapshot_interval: Duration,
    /// Per-artifact-class TTLs
    pub ttl: TtlConfig,
}

/// TTLs per cached artifact class
#[derive(Debug, Clone)]
pub struct TtlConfig {
    pub tree: Duration,
    pub dir: Duration,
    pub meta: Duration,
    pub thumb: Duration,
    pub tile: Duration,
}

/// Slide reading configuration
#[derive(Debug, Clone)]
pub struct SlideConfig {
    /// Tile edge length in pixels
    pub tile_size: u32,
    /// JPEG encode quality (1-100)
    pub jpeg_quality: u8,
    /// Maximum number of cached open slide handles
    pub max_cached_slides: usize,
    /// Default thumbnail bounding-box edge in pixels
    pub thumb_max_px: u32,
    /// Prefer an embedded associated image over pyramid downsampling
    pub thumb_prefer_associated: bool,
    /// Concurrent decode operations allowed at once
    pub decode_capacity: usize,
    /// Decode requests allowed to queue beyond capacity
    pub decode_queue_depth: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            roots: Vec::new(),
            extensions: DEFAULT_EXTENSIONS.iter().map(|s| s.to_string()).collect(),
            exclude: Vec::new(),
            cache: CacheConfig::default(),
            slide: SlideConfig::default(),
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            shared_enabled: false,
            redis_url: "redis://127.0.0.1:6379".to_string(),
            write_through: true,
            shared_timeout: Duration::from_secs(2),
            local_capacity: 10_000,
            snapshot_path: PathBuf::from("/tmp/wsibrowse_cache.json"),
            snapshot_interval: Duration::from_secs(300),
            ttl: TtlConfig::default(),
        }
    }
}

impl Default for TtlConfig {
    fn default() -> Self {
        Self {
            tree: Duration::from_secs(60),
            dir: Duration::from_secs(60),
            meta: Duration::from_secs(300),
            thumb: Duration::from_secs(86_400),
            tile: Duration::from_secs(3_600),
        }
    }
}

impl Default for SlideConfig {
    fn default() -> Self {
        Self {
            tile_size: 256,
            jpeg_quality: 85,
            max_cached_slides: 16,
            thumb_max_px: 512,
            thumb_prefer_associated: true,
            decode_capacity: 8,
            decode_queue_depth: 32,
        }
    }
}

/// Read an environment variable holding a whole number of seconds
fn env_secs(var: &str) -> Option<Duration> {
    env::var(var).ok()?.parse::<u64>().ok().map(Duration::from_secs)
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(host) = env::var("HOST") {
            config.host = host;
        }
        if let Ok(port) = env::var("PORT")
            && let Ok(p) = port.parse()
        {
            config.port = p;
        }

        if let Ok(val) = env::var("WSI_ROOTS") {
            config.roots = parse_roots(&val);
        }
        if let Ok(val) = env::var("WSI_EXTENSIONS") {
            config.extensions = val
                .split(',')
                .map(|e| e.trim().trim_start_matches('.').to_lowercase())
                .filter(|e| !e.is_empty())
                .collect();
        }
        if let Ok(val) = env::var("WSI_EXCLUDE") {
            config.exclude = val
                .split(',')
                .map(|e| e.trim().to_string())
                .filter(|e| !e.is_empty())
                .collect();
        }

        // Cache config
        if let Ok(val) = env::var("CACHE_SHARED_ENABLED") {
            config.cache.shared_enabled = val.to_lowercase() == "true" || val == "1";
        }
        if let Ok(url) = env::var("REDIS_URL")
            && !url.is_empty()
        {
            config.cache.redis_url = url;
        }
        if let Ok(val) = env::var("CACHE_WRITE_THROUGH") {
            config.cache.write_through = val.to_lowercase() != "false" && val != "0";
        }
        if let Ok(val) = env::var("CACHE_SHARED_TIMEOUT_MS")
            && let Ok(ms) = val.parse::<u64>()
        {
            config.cache.shared_timeout = Duration::from_millis(ms);
        }
        if let Ok(val) = env::var("CACHE_LOCAL_CAPACITY")
            && let Ok(v) = val.parse()
        {
            config.cache.local_capacity = v;
        }
        if let Ok(path) = env::var("CACHE_SNAPSHOT_PATH") {
            config.cache.snapshot_path = PathBuf::from(path);
        }
        if let Some(d) = env_secs("CACHE_SNAPSHOT_INTERVAL_SECS") {
            config.cache.snapshot_interval = d;
        }
        if let Some(d) = env_secs("TTL_TREE_SECS") {
            config.cache.ttl.tree = d;
        }
        if let Some(d) = env_secs("TTL_DIR_SECS") {
            config.cache.ttl.dir = d;
        }
        if let Some(d) = env_secs("TTL_META_SECS") {
            config.cache.ttl.meta = d;
        }
        if let Some(d) = env_secs("TTL_THUMB_SECS") {
            config.cache.ttl.thumb = d;
        }
        if let Some(d) = env_secs("TTL_TILE_SECS") {
            config.cache.ttl.tile = d;
        }

        // Slide config
        if let Ok(val) = env::var("TILE_SIZE")
            && let Ok(size) = val.parse()
        {
            config.slide.tile_size = size;
        }
        if let Ok(val) = env::var("JPEG_QUALITY")
            && let Ok(q) = val.parse()
        {
            config.slide.jpeg_quality = q;
        }
        if let Ok(val) = env::var("MAX_CACHED_SLIDES")
            && let Ok(v) = val.parse()
        {
            config.slide.max_cached_slides = v;
        }
        if let Ok(val) = env::var("THUMB_MAX_PX")
            && let Ok(v) = val.parse()
        {
            config.slide.thumb_max_px = v;
        }
        if let Ok(val) = env::var("THUMB_PREFER_ASSOCIATED") {
            config.slide.thumb_prefer_associated = val != "0" && !val.eq_ignore_ascii_case("false");
        }
        if let Ok(val) = env::var("DECODE_CAPACITY")
            && let Ok(v) = val.parse()
        {
            config.slide.decode_capacity = v;
        }
        if let Ok(val) = env::var("DECODE_QUEUE_DEPTH")
            && let Ok(v) = val.parse()
        {
            config.slide.decode_queue_depth = v;
        }

        config
    }
}

/// Parse `label=/path;label2=/path2` (a bare path uses its final component as label)
fn parse_roots(raw: &str) -> Vec<RootConfig> {
    raw.split(';')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|entry| match entry.split_once('=') {
            Some((label, path)) => RootConfig {
                label: label.trim().to_string(),
                path: PathBuf::from(path.trim()),
            },
            None => {
                let path = PathBuf::from(entry);
                let label = path
                    .file_name()
                    .and_then(|n| n.to_str())
                    .unwrap_or(entry)
                    .to_string();
                RootConfig { label, path }
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.port, 8080);
        assert_eq!(config.slide.tile_size, 256);
        assert!(!config.cache.shared_enabled);
        assert!(config.cache.write_through);
        assert_eq!(config.cache.ttl.tree, Duration::from_secs(60));
    }

    #[test]
    fn test_parse_roots_labelled() {
        let roots = parse_roots("archive=/mnt/archive;scans=/data/scans");
        assert_eq!(roots.len(), 2);
        assert_eq!(roots[0].label, "archive");
        assert_eq!(roots[0].path, PathBuf::from("/mnt/archive"));
        assert_eq!(roots[1].label, "scans");
    }

    #[test]
    fn test_parse_roots_bare_path() {
        let roots = parse_roots("/data/slides");
        assert_eq!(roots.len(), 1);
        assert_eq!(roots[0].label, "slides");
        assert_eq!(roots[0].path, PathBuf::from("/data/slides"));
    }

    #[test]
    fn test_default_extensions() {
        let config = Config::default();
        assert!(config.extensions.iter().any(|e| e == "svs"));
        assert!(config.extensions.iter().any(|e| e == "mrxs"));
    }
}
