//! Directory index service
//!
//! Serves the navigable tree and per-folder slide listings, caching results
//! with short TTLs keyed by path so subtrees expire independently.

use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use serde::Serialize;
use serde_json::from_slice;
use tracing::{info, warn};

use crate::cache::{CacheBackend, TieredCache, cache_key};
use crate::config::{Config, RootConfig};

use super::resolver::PathResolver;
use super::scan::{list_slides_in, scan_shallow, stable_slide_id};
use super::types::{CatalogError, DirectoryNode, NodeKind, SlideSummary};

pub struct CatalogService {
    cache: Arc<TieredCache>,
    resolver: Arc<PathResolver>,
    roots: Vec<RootConfig>,
    extensions: Vec<String>,
    exclude: Vec<String>,
    ttl_tree: Duration,
    ttl_dir: Duration,
}

impl CatalogService {
    pub fn new(cache: Arc<TieredCache>, resolver: Arc<PathResolver>, config: &Config) -> Self {
        Self {
            cache,
            resolver,
            roots: config.roots.clone(),
            extensions: config.extensions.clone(),
            exclude: config.exclude.clone(),
            ttl_tree: config.cache.ttl.tree,
            ttl_dir: config.cache.ttl.dir,
        }
    }

    /// Validate that a requested path sits inside a configured root.
    ///
    /// Traversal (`..` anywhere in the request) and paths outside every root
    /// are rejected up front, before touching the filesystem, so the answer
    /// does not depend on what exists on disk. Confinement is then
    /// re-checked on the canonicalized path, closing the symlink escape the
    /// textual check cannot see.
    fn authorize(&self, raw: &str) -> Result<PathBuf, CatalogError> {
        let path = PathBuf::from(raw);
        if path
            .components()
            .any(|c| matches!(c, Component::ParentDir))
        {
            return Err(CatalogError::PermissionDenied(raw.to_string()));
        }
        if !self.roots.iter().any(|root| path.starts_with(&root.path)) {
            return Err(CatalogError::PermissionDenied(raw.to_string()));
        }

        let canonical = std::fs::canonicalize(&path)
            .map_err(|_| CatalogError::NotFound(raw.to_string()))?;
        let inside = self.roots.iter().any(|root| {
            let root_canonical = std::fs::canonicalize(&root.path)
                .unwrap_or_else(|_| root.path.clone());
            canonical.starts_with(&root_canonical)
        });
        if !inside {
            return Err(CatalogError::PermissionDenied(raw.to_string()));
        }
        if !canonical.is_dir() {
            return Err(CatalogError::NotFound(raw.to_string()));
        }
        Ok(canonical)
    }

    /// Shallow nodes for every configured root
    pub async fn tree(&self) -> Result<Vec<DirectoryNode>, CatalogError> {
        let mut nodes = Vec::with_capacity(self.roots.len());
        for root in &self.roots {
            let root_str = root.path.to_string_lossy().into_owned();
            let key = cache_key(&["tree", &root_str]);

            if let Some(raw) = self.cache.get(&key).await
                && let Ok(node) = from_slice::<DirectoryNode>(&raw)
            {
                nodes.push(node);
                continue;
            }

            if !root.path.is_dir() {
                warn!("Configured root is missing or not a directory: {:?}", root.path);
                nodes.push(DirectoryNode {
                    id: stable_slide_id(&root.path),
                    name: root.label.clone(),
                    path: root_str,
                    kind: NodeKind::Folder,
                    children: None,
                    slide_count: 0,
                    has_children: false,
                });
                continue;
            }

            info!("Building shallow tree for {:?}", root.path);
            let (children, slide_count) = self.scan(root.path.clone()).await?;
            self.learn_from_nodes(&children).await;

            let node = DirectoryNode {
                id: stable_slide_id(&root.path),
                name: root.label.clone(),
                path: root_str,
                kind: NodeKind::Folder,
                has_children: !children.is_empty(),
                children: (!children.is_empty()).then_some(children),
                slide_count,
            };
            self.store(&key, &node, self.ttl_tree).await;
            nodes.push(node);
        }
        Ok(nodes)
    }

    /// Immediate children of a directory
    pub async fn expand(&self, raw_path: &str) -> Result<Vec<DirectoryNode>, CatalogError> {
        let path = self.authorize(raw_path)?;
        let key = cache_key(&["tree", raw_path]);

        if let Some(raw) = self.cache.get(&key).await
            && let Ok(children) = from_slice::<Vec<DirectoryNode>>(&raw)
        {
            return Ok(children);
        }

        let (children, _) = self.scan(path).await?;
        self.learn_from_nodes(&children).await;
        self.store(&key, &children, self.ttl_tree).await;
        Ok(children)
    }

    /// Recognized slide files directly within a directory
    pub async fn list_slides(&self, raw_path: &str) -> Result<Vec<SlideSummary>, CatalogError> {
        let path = self.authorize(raw_path)?;
        let key = cache_key(&["dir", raw_path]);

        if let Some(raw) = self.cache.get(&key).await
            && let Ok(slides) = from_slice::<Vec<SlideSummary>>(&raw)
        {
            return Ok(slides);
        }

        let extensions = self.extensions.clone();
        let exclude = self.exclude.clone();
        let slides = tokio::task::spawn_blocking(move || list_slides_in(&path, &extensions, &exclude))
            .await
            .map_err(|e| CatalogError::IoError(std::io::Error::other(e)))??;

        // A listing already paid for the scan; teach the path cache for free
        for slide in &slides {
            self.resolver.record(&slide.id, Path::new(&slide.path)).await;
        }
        self.store(&key, &slides, self.ttl_dir).await;
        Ok(slides)
    }

    async fn scan(&self, path: PathBuf) -> Result<(Vec<DirectoryNode>, usize), CatalogError> {
        let extensions = self.extensions.clone();
        let exclude = self.exclude.clone();
        let result = tokio::task::spawn_blocking(move || scan_shallow(&path, &extensions, &exclude))
            .await
            .map_err(|e| CatalogError::IoError(std::io::Error::other(e)))??;
        Ok(result)
    }

    /// Record path mappings for any slide nodes produced by a scan
    async fn learn_from_nodes(&self, nodes: &[DirectoryNode]) {
        for node in nodes {
            if node.kind == NodeKind::Slide {
                self.resolver.record(&node.id, Path::new(&node.path)).await;
            }
        }
    }

    async fn store<T: Serialize>(&self, key: &str, value: &T, ttl: Duration) {
        match serde_json::to_vec(value) {
            Ok(raw) => self.cache.set(key, Bytes::from(raw), Some(ttl)).await,
            Err(e) => warn!("Failed to serialize catalog cache entry {}: {}", key, e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::LocalBackend;

    fn service_for(root: &Path) -> CatalogService {
        let cache = Arc::new(TieredCache::local_only(Arc::new(LocalBackend::new(64))));
        let mut config = Config::default();
        config.roots = vec![RootConfig {
            label: "data".to_string(),
            path: root.to_path_buf(),
        }];
        let resolver = Arc::new(PathResolver::new(
            cache.clone(),
            vec![root.to_path_buf()],
            config.extensions.clone(),
            config.exclude.clone(),
        ));
        CatalogService::new(cache, resolver, &config)
    }

    #[tokio::test]
    async fn test_tree_and_expand_scenario() {
        let root = tempfile::tempdir().unwrap();
        std::fs::write(root.path().join("slideA.svs"), b"x").unwrap();
        std::fs::create_dir(root.path().join("batch1")).unwrap();
        std::fs::write(root.path().join("batch1/slideB.ndpi"), b"x").unwrap();

        let service = service_for(root.path());

        let tree = service.tree().await.unwrap();
        assert_eq!(tree.len(), 1);
        assert_eq!(tree[0].name, "data");
        let children = tree[0].children.as_ref().unwrap();
        assert_eq!(children.len(), 2);
        assert!(children
            .iter()
            .any(|n| n.kind == NodeKind::Slide && n.name == "slideA.svs"));
        assert!(children
            .iter()
            .any(|n| n.kind == NodeKind::Folder && n.name == "batch1"));

        let batch = root.path().join("batch1");
        let inner = service
            .expand(batch.to_str().unwrap())
            .await
            .unwrap();
        assert_eq!(inner.len(), 1);
        assert_eq!(inner[0].kind, NodeKind::Slide);
        assert_eq!(inner[0].name, "slideB.ndpi");
    }

    #[tokio::test]
    async fn test_traversal_is_rejected_regardless_of_existence() {
        let root = tempfile::tempdir().unwrap();
        let service = service_for(root.path());

        let sneaky = format!("{}/../../etc", root.path().display());
        assert!(matches!(
            service.expand(&sneaky).await,
            Err(CatalogError::PermissionDenied(_))
        ));
        assert!(matches!(
            service.list_slides(&sneaky).await,
            Err(CatalogError::PermissionDenied(_))
        ));
    }

    #[tokio::test]
    async fn test_path_outside_roots_is_rejected() {
        let root = tempfile::tempdir().unwrap();
        let service = service_for(root.path());
        assert!(matches!(
            service.expand("/etc").await,
            Err(CatalogError::PermissionDenied(_))
        ));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_symlink_escaping_root_is_rejected() {
        let root = tempfile::tempdir().unwrap();
        let outside = tempfile::tempdir().unwrap();
        let link = root.path().join("shortcut");
        std::os::unix::fs::symlink(outside.path(), &link).unwrap();

        let service = service_for(root.path());
        assert!(matches!(
            service.expand(link.to_str().unwrap()).await,
            Err(CatalogError::PermissionDenied(_))
        ));
        assert!(matches!(
            service.list_slides(link.to_str().unwrap()).await,
            Err(CatalogError::PermissionDenied(_))
        ));
    }

    #[tokio::test]
    async fn test_missing_directory_is_not_found() {
        let root = tempfile::tempdir().unwrap();
        let service = service_for(root.path());
        let missing = root.path().join("absent");
        assert!(matches!(
            service.expand(missing.to_str().unwrap()).await,
            Err(CatalogError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_expand_served_from_cache_until_ttl() {
        let root = tempfile::tempdir().unwrap();
        std::fs::write(root.path().join("a.svs"), b"x").unwrap();
        let service = service_for(root.path());

        let path = root.path().to_str().unwrap().to_string();
        let first = service.expand(&path).await.unwrap();
        assert_eq!(first.len(), 1);

        // New file appears, but the cached listing is still served
        std::fs::write(root.path().join("b.svs"), b"x").unwrap();
        let second = service.expand(&path).await.unwrap();
        assert_eq!(second.len(), 1);
    }

    #[tokio::test]
    async fn test_listing_teaches_path_cache() {
        let root = tempfile::tempdir().unwrap();
        let slide = root.path().join("a.svs");
        std::fs::write(&slide, b"x").unwrap();

        let cache = Arc::new(TieredCache::local_only(Arc::new(LocalBackend::new(64))));
        let mut config = Config::default();
        config.roots = vec![RootConfig {
            label: "data".to_string(),
            path: root.path().to_path_buf(),
        }];
        let resolver = Arc::new(PathResolver::new(
            cache.clone(),
            vec![root.path().to_path_buf()],
            config.extensions.clone(),
            config.exclude.clone(),
        ));
        let service = CatalogService::new(cache.clone(), resolver, &config);

        let slides = service
            .list_slides(root.path().to_str().unwrap())
            .await
            .unwrap();
        assert_eq!(slides.len(), 1);

        let key = cache_key(&["path", &slides[0].id]);
        assert!(cache.exists(&key).await);
    }
}
