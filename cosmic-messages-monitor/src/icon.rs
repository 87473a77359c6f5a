//! Conversation Icons
//!
//! Rasterizing avatars is not the monitor's job. It discovers an icon source
//! for a row, hands it to an [`IconRenderer`] and caches the returned handle on
//! the row itself as two attributes, one per read state, so repeated rebuilds
//! never render the same avatar twice.
//!
//! ## Discovery Order
//!
//! 1. `src` of the row's profile picture
//! 2. `href` of the page favicon link
//! 3. the configured default favicon URL
//!
//! ## Failure Handling
//!
//! A failed render yields [`IconHandle::empty`], a valid zero-size icon. Empty
//! handles are never cached, so the next rebuild retries the render.

use crate::config::IconConfig;
use crate::error::{MonitorError, Result};
use crate::queries::StructuralQueries;
use crate::tree::DocumentTree;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};

/// Row attribute caching the icon of a read conversation
pub const READ_ICON_ATTRIBUTE: &str = "read";

/// Row attribute caching the icon of an unread conversation
pub const UNREAD_ICON_ATTRIBUTE: &str = "unread";

/// Opaque reference to a rendered icon
///
/// The empty handle stands for a zero-size icon.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IconHandle(String);

impl IconHandle {
    pub fn new(handle: impl Into<String>) -> Self {
        Self(handle.into())
    }

    /// The zero-size icon
    pub fn empty() -> Self {
        Self(String::new())
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for IconHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Icon rendering capability
#[async_trait]
pub trait IconRenderer: Send + Sync + fmt::Debug {
    /// Render the image at `source_url` into a `size` x `size` icon
    ///
    /// # Errors
    ///
    /// Returns an error if the image cannot be loaded or decoded.
    async fn render(&self, source_url: &str, size: u32) -> Result<IconHandle>;

    /// Produce the unread variant of an already rendered icon
    async fn mark_unread(&self, icon: &IconHandle) -> Result<IconHandle>;
}

/// Renderer that uses the source URL itself as the handle
///
/// The unread variant carries a `#unread` fragment. Used by the replay tool
/// and in tests.
#[derive(Debug, Clone, Copy, Default)]
pub struct PassthroughRenderer;

#[async_trait]
impl IconRenderer for PassthroughRenderer {
    async fn render(&self, source_url: &str, _size: u32) -> Result<IconHandle> {
        if source_url.trim().is_empty() {
            return Err(MonitorError::icon_render("empty icon source"));
        }
        Ok(IconHandle::new(source_url))
    }

    async fn mark_unread(&self, icon: &IconHandle) -> Result<IconHandle> {
        Ok(IconHandle::new(format!("{}#unread", icon.as_str())))
    }
}

/// Discovers, renders and caches row icons
#[derive(Debug, Clone)]
pub struct IconResolver {
    renderer: Arc<dyn IconRenderer>,
    queries: Arc<StructuralQueries>,
    config: IconConfig,
}

impl IconResolver {
    pub fn new(
        renderer: Arc<dyn IconRenderer>,
        queries: Arc<StructuralQueries>,
        config: IconConfig,
    ) -> Self {
        Self {
            renderer,
            queries,
            config,
        }
    }

    /// Cache attribute for the given read state
    pub fn attribute_name(unread: bool) -> &'static str {
        if unread {
            UNREAD_ICON_ATTRIBUTE
        } else {
            READ_ICON_ATTRIBUTE
        }
    }

    /// Cached icon of a row, if any
    pub fn cached<T: DocumentTree>(tree: &T, row: &T::Node, unread: bool) -> Option<IconHandle> {
        tree.attribute(row, Self::attribute_name(unread))
            .filter(|handle| !handle.is_empty())
            .map(IconHandle::new)
    }

    /// Find the image source for a row
    pub fn discover_source<T: DocumentTree>(&self, tree: &T, row: &T::Node) -> String {
        let profile = self
            .queries
            .profile_image
            .query_first(tree, row)
            .and_then(|image| tree.attribute(&image, "src"))
            .filter(|src| !src.trim().is_empty());
        if let Some(src) = profile {
            return src;
        }

        let favicon = self
            .queries
            .favicon_link
            .query_first(tree, &tree.document())
            .and_then(|link| tree.attribute(&link, "href"))
            .filter(|href| !href.trim().is_empty());
        if let Some(href) = favicon {
            debug!("No profile picture in row, using page favicon");
            return href;
        }

        debug!("No profile picture or favicon, using default icon source");
        self.config.default_favicon_url.clone()
    }

    /// Icon of a row in the requested read state
    ///
    /// Renders and caches on first request. Never fails: render errors give
    /// the empty icon.
    pub async fn resolve<T: DocumentTree>(
        &self,
        tree: &T,
        row: &T::Node,
        unread: bool,
    ) -> IconHandle {
        if let Some(handle) = Self::cached(tree, row, unread) {
            return handle;
        }

        let read = match Self::cached(tree, row, false) {
            Some(handle) => handle,
            None => {
                let source = self.discover_source(tree, row);
                match self.renderer.render(&source, self.config.size).await {
                    Ok(handle) if !handle.is_empty() => {
                        tree.set_attribute(row, READ_ICON_ATTRIBUTE, handle.as_str());
                        handle
                    }
                    Ok(_) => return IconHandle::empty(),
                    Err(e) => {
                        warn!("Failed to render icon from {}: {}", source, e);
                        return IconHandle::empty();
                    }
                }
            }
        };

        if !unread {
            return read;
        }

        match self.renderer.mark_unread(&read).await {
            Ok(handle) if !handle.is_empty() => {
                tree.set_attribute(row, UNREAD_ICON_ATTRIBUTE, handle.as_str());
                handle
            }
            Ok(_) => IconHandle::empty(),
            Err(e) => {
                warn!("Failed to render unread icon variant: {}", e);
                IconHandle::empty()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queries::SelectorTable;
    use crate::tree::{MemoryTree, NodeSpec};
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Debug, Default)]
    struct CountingRenderer {
        renders: AtomicUsize,
        fail: bool,
    }

    #[async_trait]
    impl IconRenderer for CountingRenderer {
        async fn render(&self, source_url: &str, size: u32) -> Result<IconHandle> {
            self.renders.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(MonitorError::icon_render("decode failed"));
            }
            Ok(IconHandle::new(format!("{}@{}", source_url, size)))
        }

        async fn mark_unread(&self, icon: &IconHandle) -> Result<IconHandle> {
            Ok(IconHandle::new(format!("{}+dot", icon)))
        }
    }

    fn resolver(renderer: Arc<dyn IconRenderer>) -> IconResolver {
        let queries = Arc::new(SelectorTable::default().compile().unwrap());
        IconResolver::new(renderer, queries, IconConfig::default())
    }

    fn row_with_image() -> (MemoryTree, crate::tree::NodeId) {
        let tree = MemoryTree::from_spec(
            &NodeSpec::element("div")
                .attr("role", "row")
                .child(NodeSpec::element("img").attr("src", "https://cdn.example/alice.jpg")),
        );
        let row = tree.children(&tree.document())[0];
        (tree, row)
    }

    #[tokio::test]
    async fn test_render_once_then_cached() {
        let renderer = Arc::new(CountingRenderer::default());
        let resolver = resolver(renderer.clone());
        let (tree, row) = row_with_image();

        let first = resolver.resolve(&tree, &row, false).await;
        let second = resolver.resolve(&tree, &row, false).await;

        assert_eq!(first.as_str(), "https://cdn.example/alice.jpg@32");
        assert_eq!(first, second);
        assert_eq!(renderer.renders.load(Ordering::SeqCst), 1);
        assert_eq!(
            tree.attribute(&row, READ_ICON_ATTRIBUTE).as_deref(),
            Some("https://cdn.example/alice.jpg@32")
        );
    }

    #[tokio::test]
    async fn test_unread_variant_reuses_read_icon() {
        let renderer = Arc::new(CountingRenderer::default());
        let resolver = resolver(renderer.clone());
        let (tree, row) = row_with_image();

        let unread = resolver.resolve(&tree, &row, true).await;
        assert_eq!(unread.as_str(), "https://cdn.example/alice.jpg@32+dot");
        assert!(IconResolver::cached(&tree, &row, false).is_some());
        assert!(IconResolver::cached(&tree, &row, true).is_some());

        resolver.resolve(&tree, &row, false).await;
        assert_eq!(renderer.renders.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failed_render_is_empty_and_not_cached() {
        let renderer = Arc::new(CountingRenderer {
            fail: true,
            ..Default::default()
        });
        let resolver = resolver(renderer.clone());
        let (tree, row) = row_with_image();

        assert!(resolver.resolve(&tree, &row, true).await.is_empty());
        assert!(resolver.resolve(&tree, &row, true).await.is_empty());
        assert_eq!(tree.attribute(&row, READ_ICON_ATTRIBUTE), None);
        assert_eq!(renderer.renders.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_discovery_falls_back_to_favicon_then_default() {
        let resolver = resolver(Arc::new(PassthroughRenderer));
        let tree = MemoryTree::new();
        let row = tree.build(&NodeSpec::element("div").attr("role", "row"));
        tree.append_child(&tree.document(), &row);

        assert_eq!(
            resolver.discover_source(&tree, &row),
            IconConfig::default().default_favicon_url
        );

        let link = tree.build(
            &NodeSpec::element("link")
                .attr("rel", "shortcut icon")
                .attr("href", "https://static.example/favicon.png"),
        );
        tree.append_child(&tree.document(), &link);
        assert_eq!(
            resolver.discover_source(&tree, &row),
            "https://static.example/favicon.png"
        );
    }

    #[tokio::test]
    async fn test_passthrough_renderer() {
        let renderer = PassthroughRenderer;
        let handle = renderer.render("https://cdn.example/a.jpg", 32).await.unwrap();
        assert_eq!(handle.as_str(), "https://cdn.example/a.jpg");
        assert_eq!(
            renderer.mark_unread(&handle).await.unwrap().as_str(),
            "https://cdn.example/a.jpg#unread"
        );
        assert!(renderer.render(" ", 32).await.unwrap_err().is_recoverable());
    }
}
