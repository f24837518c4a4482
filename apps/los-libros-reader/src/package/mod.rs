//! EPUB package parsing
//!
//! Provides parsing of `META-INF/container.xml`, the OPF package document and
//! the navigation documents into the spine, manifest, table of contents and
//! page list the reader navigates.

mod nav;
mod parser;
mod types;

pub use nav::{parse_nav_page_list, parse_nav_toc, parse_ncx_page_list, parse_ncx_toc};
pub use parser::{
    directory_of, parse_container, parse_package, resolve_href, CONTAINER_PATH, NCX_MEDIA_TYPE,
};
pub use types::{
    BookMetadata, Container, ManifestItem, Package, PageListItem, SpineItem, TocEntry,
};
