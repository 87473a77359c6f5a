//! Structural Query Table
//!
//! Every assumption about the host page's markup lives here: where the sidebar
//! is, what a conversation row looks like, which hidden text marks a row as
//! unread, and where the title and message preview are rendered. The host page
//! changes its markup without notice, so the table is plain configuration,
//! versioned and validated at load time, and swappable without touching the
//! monitor logic.
//!
//! [`SelectorTable`] is the serialized form (a `[selectors]` section in the
//! TOML configuration). [`StructuralQueries`] is the compiled form and carries
//! the row predicates shared by the extractor, the deduplicator and the badge
//! stabilizer.

use crate::error::{MonitorError, Result};
use crate::selector::Selector;
use crate::tree::DocumentTree;
use serde::{Deserialize, Serialize};

/// Layout version of the selector table understood by this build
pub const SELECTOR_TABLE_VERSION: u32 = 1;

/// Serialized structural query table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectorTable {
    /// Table layout version
    #[serde(default = "default_version")]
    pub version: u32,

    /// Sidebar root, located once through a deferred lookup
    #[serde(default = "default_sidebar_root")]
    pub sidebar_root: String,

    /// Container (relative to the sidebar root) whose children are the rows
    #[serde(default = "default_conversation_list")]
    pub conversation_list: String,

    /// Conversations grid; rows outside it are ignored
    #[serde(default = "default_grid")]
    pub grid: String,

    /// Structural role of one conversation row
    #[serde(default = "default_row")]
    pub row: String,

    /// Label lookups inside a row, highest priority first
    #[serde(default = "default_label_candidates")]
    pub label_candidates: Vec<String>,

    /// Accessibility label attribute used when no label text is found
    #[serde(default = "default_label_attribute")]
    pub label_attribute: String,

    /// Hidden screen-reader text marking an unread row (exact match)
    #[serde(default = "default_unread_marker")]
    pub unread_marker: String,

    /// Pattern present only in the currently open conversation's row
    #[serde(default = "default_selected_marker")]
    pub selected_marker: String,

    /// Element carrying the conversation permalink
    #[serde(default = "default_permalink")]
    pub permalink: String,

    /// Attribute of the permalink element holding the reference
    #[serde(default = "default_permalink_attribute")]
    pub permalink_attribute: String,

    /// Text slots inside a row; matches are indexed by the slot indices below
    #[serde(default = "default_text_slot")]
    pub text_slot: String,

    /// Index of the conversation title among the text slot matches
    #[serde(default)]
    pub title_slot_index: usize,

    /// Index of the message preview among the text slot matches
    #[serde(default = "default_body_slot_index")]
    pub body_slot_index: usize,

    /// Profile picture inside a row
    #[serde(default = "default_profile_image")]
    pub profile_image: String,

    /// Page-level favicon link
    #[serde(default = "default_favicon_link")]
    pub favicon_link: String,

    /// Attribute changes that count as observed mutations
    #[serde(default = "default_observed_attributes")]
    pub observed_attributes: Vec<String>,

    /// Image source substrings rendered as a thumbs-up reaction
    #[serde(default = "default_thumbs_up_sources")]
    pub thumbs_up_sources: Vec<String>,

    /// Glyph substituted for thumbs-up images
    #[serde(default = "default_thumbs_up_glyph")]
    pub thumbs_up_glyph: String,
}

fn default_version() -> u32 {
    SELECTOR_TABLE_VERSION
}

fn default_sidebar_root() -> String {
    "[role=navigation]".to_string()
}

fn default_conversation_list() -> String {
    "[role=grid] > [role=rowgroup]".to_string()
}

fn default_grid() -> String {
    "[role=grid]".to_string()
}

fn default_row() -> String {
    "[role=row]".to_string()
}

fn default_label_candidates() -> Vec<String> {
    vec![
        "[role=link] span[dir=auto] > span".to_string(),
        "[role=link] [dir=auto]".to_string(),
    ]
}

fn default_label_attribute() -> String {
    "aria-label".to_string()
}

fn default_unread_marker() -> String {
    "Unread message:".to_string()
}

fn default_selected_marker() -> String {
    "[role=link][aria-current=page] > div:only-child".to_string()
}

fn default_permalink() -> String {
    "[role=link][href]".to_string()
}

fn default_permalink_attribute() -> String {
    "href".to_string()
}

fn default_text_slot() -> String {
    "span[dir=auto] > span".to_string()
}

fn default_body_slot_index() -> usize {
    1
}

fn default_profile_image() -> String {
    "img".to_string()
}

fn default_favicon_link() -> String {
    "link[rel~=icon]".to_string()
}

fn default_observed_attributes() -> Vec<String> {
    vec!["class".to_string()]
}

fn default_thumbs_up_sources() -> Vec<String> {
    vec!["thumbs-up".to_string(), "like_emoji".to_string()]
}

fn default_thumbs_up_glyph() -> String {
    "\u{1F44D}".to_string()
}

impl Default for SelectorTable {
    fn default() -> Self {
        Self {
            version: default_version(),
            sidebar_root: default_sidebar_root(),
            conversation_list: default_conversation_list(),
            grid: default_grid(),
            row: default_row(),
            label_candidates: default_label_candidates(),
            label_attribute: default_label_attribute(),
            unread_marker: default_unread_marker(),
            selected_marker: default_selected_marker(),
            permalink: default_permalink(),
            permalink_attribute: default_permalink_attribute(),
            text_slot: default_text_slot(),
            title_slot_index: 0,
            body_slot_index: default_body_slot_index(),
            profile_image: default_profile_image(),
            favicon_link: default_favicon_link(),
            observed_attributes: default_observed_attributes(),
            thumbs_up_sources: default_thumbs_up_sources(),
            thumbs_up_glyph: default_thumbs_up_glyph(),
        }
    }
}

impl SelectorTable {
    /// Compile the table, rejecting unknown versions and invalid entries
    pub fn compile(&self) -> Result<StructuralQueries> {
        StructuralQueries::compile(self)
    }

    /// Validate without keeping the compiled form
    pub fn validate(&self) -> Result<()> {
        self.compile().map(|_| ())
    }
}

/// Compiled structural query table
#[derive(Debug, Clone)]
pub struct StructuralQueries {
    pub sidebar_root: Selector,
    pub conversation_list: Selector,
    pub grid: Selector,
    pub row: Selector,
    pub label_candidates: Vec<Selector>,
    pub label_attribute: String,
    pub unread_marker: String,
    pub selected_marker: Selector,
    pub permalink: Selector,
    pub permalink_attribute: String,
    pub text_slot: Selector,
    pub title_slot_index: usize,
    pub body_slot_index: usize,
    pub profile_image: Selector,
    pub favicon_link: Selector,
    pub observed_attributes: Vec<String>,
    pub thumbs_up_sources: Vec<String>,
    pub thumbs_up_glyph: String,
}

fn compile_entry(name: &str, source: &str) -> Result<Selector> {
    Selector::parse(source).map_err(|reason| MonitorError::InvalidSelector {
        name: name.to_string(),
        reason,
    })
}

impl StructuralQueries {
    /// Compile a selector table
    pub fn compile(table: &SelectorTable) -> Result<Self> {
        if table.version != SELECTOR_TABLE_VERSION {
            return Err(MonitorError::UnsupportedSelectorVersion {
                found: table.version,
                supported: SELECTOR_TABLE_VERSION,
            });
        }
        if table.unread_marker.trim().is_empty() {
            return Err(MonitorError::Configuration(
                "unread_marker must not be empty".to_string(),
            ));
        }
        if table.label_candidates.is_empty() {
            return Err(MonitorError::Configuration(
                "label_candidates must list at least one selector".to_string(),
            ));
        }
        if table.title_slot_index == table.body_slot_index {
            return Err(MonitorError::Configuration(
                "title_slot_index and body_slot_index must differ".to_string(),
            ));
        }

        let label_candidates = table
            .label_candidates
            .iter()
            .enumerate()
            .map(|(index, source)| compile_entry(&format!("label_candidates[{}]", index), source))
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            sidebar_root: compile_entry("sidebar_root", &table.sidebar_root)?,
            conversation_list: compile_entry("conversation_list", &table.conversation_list)?,
            grid: compile_entry("grid", &table.grid)?,
            row: compile_entry("row", &table.row)?,
            label_candidates,
            label_attribute: table.label_attribute.clone(),
            unread_marker: table.unread_marker.clone(),
            selected_marker: compile_entry("selected_marker", &table.selected_marker)?,
            permalink: compile_entry("permalink", &table.permalink)?,
            permalink_attribute: table.permalink_attribute.clone(),
            text_slot: compile_entry("text_slot", &table.text_slot)?,
            title_slot_index: table.title_slot_index,
            body_slot_index: table.body_slot_index,
            profile_image: compile_entry("profile_image", &table.profile_image)?,
            favicon_link: compile_entry("favicon_link", &table.favicon_link)?,
            observed_attributes: table.observed_attributes.clone(),
            thumbs_up_sources: table.thumbs_up_sources.clone(),
            thumbs_up_glyph: table.thumbs_up_glyph.clone(),
        })
    }

    /// Unread predicate
    ///
    /// True iff some descendant without element children has trimmed text
    /// exactly equal to the unread marker.
    pub fn is_unread<T: DocumentTree>(&self, tree: &T, row: &T::Node) -> bool {
        tree.descendants(row).iter().any(|node| {
            tree.element_children(node).is_empty()
                && tree.text_content(node).trim() == self.unread_marker
        })
    }

    /// Check if the row renders the open conversation
    pub fn is_selected<T: DocumentTree>(&self, tree: &T, row: &T::Node) -> bool {
        self.selected_marker.query_first(tree, row).is_some()
    }

    /// Resolve the display label of a row (trimmed, empty if none)
    ///
    /// First non-empty wins: text of the first label candidate match, the
    /// row's accessibility label, then the candidate's text with images read
    /// as their alt text.
    pub fn label<T: DocumentTree>(&self, tree: &T, row: &T::Node) -> String {
        let candidate = self
            .label_candidates
            .iter()
            .find_map(|selector| selector.query_first(tree, row));

        if let Some(element) = &candidate {
            let text = tree.text_content(element);
            let text = text.trim();
            if !text.is_empty() {
                return text.to_string();
            }
        }

        if let Some(label) = tree.attribute(row, &self.label_attribute) {
            let label = label.trim();
            if !label.is_empty() {
                return label.to_string();
            }
        }

        candidate
            .map(|element| self.text_with_images(tree, &element).trim().to_string())
            .unwrap_or_default()
    }

    /// Text content with every image replaced by its alt text
    ///
    /// Thumbs-up reaction images become the configured glyph.
    pub fn text_with_images<T: DocumentTree>(&self, tree: &T, node: &T::Node) -> String {
        if let Some(text) = tree.own_text(node) {
            return text;
        }
        if self.is_image(tree, node) {
            return self.image_text(tree, node);
        }
        tree.children(node)
            .iter()
            .map(|child| self.text_with_images(tree, child))
            .collect()
    }

    fn is_image<T: DocumentTree>(&self, tree: &T, node: &T::Node) -> bool {
        tree.tag(node)
            .is_some_and(|tag| tag.eq_ignore_ascii_case("img"))
    }

    fn image_text<T: DocumentTree>(&self, tree: &T, image: &T::Node) -> String {
        let source = tree.attribute(image, "src").unwrap_or_default();
        if self
            .thumbs_up_sources
            .iter()
            .any(|pattern| !pattern.is_empty() && source.contains(pattern.as_str()))
        {
            return self.thumbs_up_glyph.clone();
        }
        tree.attribute(image, "alt").unwrap_or_default()
    }

    /// Text of the `index`-th text slot of a row
    pub fn slot_text<T: DocumentTree>(
        &self,
        tree: &T,
        row: &T::Node,
        index: usize,
    ) -> Option<String> {
        self.text_slot
            .query_all(tree, row)
            .get(index)
            .map(|slot| self.text_with_images(tree, slot).trim().to_string())
    }

    /// Permalink reference of a row
    pub fn permalink<T: DocumentTree>(&self, tree: &T, row: &T::Node) -> Option<String> {
        self.permalink
            .query_first(tree, row)
            .and_then(|link| tree.attribute(&link, &self.permalink_attribute))
            .filter(|reference| !reference.trim().is_empty())
    }

    /// Check if an attribute mutation is one the observer watches
    pub fn observes_attribute(&self, name: Option<&str>) -> bool {
        match name {
            Some(name) => self.observed_attributes.iter().any(|a| a == name),
            None => true,
        }
    }
}
