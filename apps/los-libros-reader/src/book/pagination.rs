//! Book-wide page numbers
//!
//! A page list is a sorted list of CFIs, one per page. Lookups go from a CFI
//! to the page that contains it, from a page to its CFI, and between pages
//! and percentages through the book.

use serde::{Deserialize, Serialize};

use crate::cfi::{index_of_sorted, location_of};
use crate::package::PageListItem;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Pagination {
    pages: Vec<u32>,
    locations: Vec<String>,
    first_page: u32,
    last_page: u32,
    total_pages: u32,
}

impl Pagination {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from a page list. Items without a CFI are skipped.
    pub fn from_page_list(page_list: &[PageListItem]) -> Self {
        let mut pagination = Self::new();
        pagination.process(page_list);
        pagination
    }

    /// Replace the pages with those of `page_list`
    pub fn process(&mut self, page_list: &[PageListItem]) {
        self.pages.clear();
        self.locations.clear();
        for item in page_list {
            let Some(cfi) = item.cfi.as_ref() else {
                continue;
            };
            self.pages.push(item.page);
            self.locations.push(cfi.clone());
        }

        self.first_page = self.pages.first().copied().unwrap_or(0);
        self.last_page = self.pages.last().copied().unwrap_or(0);
        self.total_pages = self.last_page.saturating_sub(self.first_page);
    }

    pub fn is_empty(&self) -> bool {
        self.pages.is_empty()
    }

    pub fn first_page(&self) -> u32 {
        self.first_page
    }

    pub fn last_page(&self) -> u32 {
        self.last_page
    }

    /// Pages after the first one
    pub fn total_pages(&self) -> u32 {
        self.total_pages
    }

    pub fn pages(&self) -> &[u32] {
        &self.pages
    }

    pub fn locations(&self) -> &[String] {
        &self.locations
    }

    /// Page containing `cfi`
    pub fn page_from_cfi(&self, cfi: &str) -> Option<u32> {
        if self.locations.is_empty() {
            return None;
        }

        // An exact hit on a page start, unless it is the very last entry
        if let Some(index) = index_of_sorted(cfi, &self.locations) {
            if index + 1 < self.locations.len() {
                return self.pages.get(index).copied();
            }
        }

        // Otherwise the page whose start comes right before the CFI
        let index = location_of(cfi, &self.locations);
        let index = index.saturating_sub(1);
        self.pages.get(index).copied()
    }

    /// CFI of the first position of `page`
    pub fn cfi_from_page(&self, page: u32) -> Option<&str> {
        self.pages
            .iter()
            .position(|&p| p == page)
            .and_then(|index| self.locations.get(index))
            .map(String::as_str)
    }

    /// Page at a fraction (0.0 to 1.0) of the book
    pub fn page_from_percentage(&self, percent: f64) -> u32 {
        (self.total_pages as f64 * percent).round() as u32
    }

    /// Fraction of the book before `page`, to three decimals
    pub fn percentage_from_page(&self, page: u32) -> f64 {
        if self.total_pages == 0 {
            return 0.0;
        }
        let percentage = (page as f64 - self.first_page as f64) / self.total_pages as f64;
        (percentage * 1000.0).round() / 1000.0
    }

    /// Fraction of the book before `cfi`
    pub fn percentage_from_cfi(&self, cfi: &str) -> Option<f64> {
        self.page_from_cfi(cfi).map(|page| self.percentage_from_page(page))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn page_list() -> Vec<PageListItem> {
        [
            "epubcfi(/6/2[ch01]!/4/2/1:0)",
            "epubcfi(/6/2[ch01]!/4/4/1:0)",
            "epubcfi(/6/4[ch02]!/4/2/1:0)",
            "epubcfi(/6/4[ch02]!/4/2/1:300)",
            "epubcfi(/6/6[ch03]!/4/2/1:0)",
        ]
        .iter()
        .enumerate()
        .map(|(i, cfi)| PageListItem {
            cfi: Some(cfi.to_string()),
            href: None,
            page_label: None,
            page: i as u32 + 1,
        })
        .collect()
    }

    #[test]
    fn test_process() {
        let pagination = Pagination::from_page_list(&page_list());
        assert_eq!(pagination.first_page(), 1);
        assert_eq!(pagination.last_page(), 5);
        assert_eq!(pagination.total_pages(), 4);
    }

    #[test]
    fn test_process_skips_items_without_cfi() {
        let mut list = page_list();
        list[1].cfi = None;
        let pagination = Pagination::from_page_list(&list);
        assert_eq!(pagination.pages(), &[1, 3, 4, 5]);
    }

    #[test]
    fn test_page_from_cfi() {
        let pagination = Pagination::from_page_list(&page_list());
        assert_eq!(pagination.page_from_cfi("epubcfi(/6/2[ch01]!/4/2/1:0)"), Some(1));
        assert_eq!(pagination.page_from_cfi("epubcfi(/6/2[ch01]!/4/2/1:40)"), Some(1));
        assert_eq!(pagination.page_from_cfi("epubcfi(/6/4[ch02]!/4/2/1:120)"), Some(3));
        assert_eq!(pagination.page_from_cfi("epubcfi(/6/4[ch02]!/4/2/1:300)"), Some(4));
        // Before the first page start
        assert_eq!(pagination.page_from_cfi("epubcfi(/6/2[ch01]!/2/1:0)"), Some(1));
        // The last page start resolves to the page before it
        assert_eq!(pagination.page_from_cfi("epubcfi(/6/6[ch03]!/4/2/1:0)"), Some(4));
        assert_eq!(pagination.page_from_cfi("epubcfi(/6/6[ch03]!/4/8/1:0)"), Some(5));
    }

    #[test]
    fn test_empty() {
        let pagination = Pagination::new();
        assert!(pagination.is_empty());
        assert_eq!(pagination.page_from_cfi("epubcfi(/6/2!/4/1:0)"), None);
        assert_eq!(pagination.cfi_from_page(1), None);
        assert_eq!(pagination.percentage_from_page(3), 0.0);
    }

    #[test]
    fn test_cfi_from_page() {
        let pagination = Pagination::from_page_list(&page_list());
        assert_eq!(pagination.cfi_from_page(3), Some("epubcfi(/6/4[ch02]!/4/2/1:0)"));
        assert_eq!(pagination.cfi_from_page(9), None);
    }

    #[test]
    fn test_percentages() {
        let pagination = Pagination::from_page_list(&page_list());
        assert_eq!(pagination.page_from_percentage(0.5), 2);
        assert_eq!(pagination.page_from_percentage(1.0), 4);
        assert_eq!(pagination.percentage_from_page(1), 0.0);
        assert_eq!(pagination.percentage_from_page(2), 0.25);
        assert_eq!(pagination.percentage_from_page(5), 1.0);

        let list: Vec<PageListItem> = page_list().into_iter().take(4).collect();
        let thirds = Pagination::from_page_list(&list);
        assert_eq!(thirds.percentage_from_page(2), 0.333);
    }
}
