//! A spine item bound to the store it is read from

use std::sync::Arc;

use tracing::debug;

use super::store::ContentStore;
use crate::cfi;
use crate::dom::{Document, NodeId, Range};
use crate::error::Result;
use crate::package::SpineItem;

/// Chapter of the book
#[derive(Clone)]
pub struct Chapter {
    item: SpineItem,
    store: Arc<dyn ContentStore>,
}

impl Chapter {
    pub fn new(item: SpineItem, store: Arc<dyn ContentStore>) -> Self {
        Self { item, store }
    }

    pub fn spine_item(&self) -> &SpineItem {
        &self.item
    }

    pub fn href(&self) -> &str {
        &self.item.href
    }

    pub fn url(&self) -> &str {
        &self.item.url
    }

    pub fn spine_pos(&self) -> usize {
        self.item.index
    }

    pub fn cfi_base(&self) -> &str {
        &self.item.cfi_base
    }

    /// Fetch and parse the chapter document
    pub async fn load(&self) -> Result<Document> {
        debug!(url = %self.item.url, "loading chapter");
        self.store.get_xml(&self.item.url).await
    }

    /// CFI of a range in this chapter's document
    pub fn cfi_from_range(&self, doc: &Document, range: &Range) -> String {
        cfi::generate_from_range(doc, range, &self.item.cfi_base)
    }

    /// CFI of an element in this chapter's document
    pub fn cfi_from_element(&self, doc: &Document, node: NodeId) -> String {
        cfi::generate_from_element(doc, node, &self.item.cfi_base)
    }
}

impl std::fmt::Debug for Chapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Chapter").field("item", &self.item).finish()
    }
}
