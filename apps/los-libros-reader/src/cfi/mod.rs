//! CFI (Canonical Fragment Identifier) module for EPUB
//!
//! This module provides parsing, generation, comparison and resolution of
//! EPUB CFI strings.
//!
//! # Overview
//!
//! A CFI names a position inside a book: the spine item (chapter) and a path
//! of steps down the chapter's content document, ending in an optional
//! character offset. Page maps, location indexes and bookmarks are all lists
//! of CFIs, kept sorted with [`compare`].
//!
//! # Example CFI
//!
//! ```text
//! epubcfi(/6/4[chapter1]!/4/2/1:42)
//!         │  │          │ │ │ │ └── character offset 42
//!         │  │          │ │ │ └──── text node (odd = text)
//!         │  │          │ │ └────── element index
//!         │  │          │ └──────── element index (body)
//!         │  │          └────────── indirection (into content doc)
//!         │  └───────────────────── spine item with ID
//!         └──────────────────────── spine element
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use los_libros_reader::cfi::{parse, compare, find_parent, generate_from_text_node};
//!
//! // Parse never fails; invalid input has spine_pos == -1
//! let cfi = parse("epubcfi(/6/4!/4/2/1:42)");
//! assert_eq!(cfi.spine_pos, 1);
//!
//! // Resolve against the loaded chapter
//! let parent = find_parent(&cfi, &document);
//!
//! // Compare CFIs
//! let a = parse("epubcfi(/6/4!/4/2/1:10)");
//! let b = parse("epubcfi(/6/4!/4/2/1:20)");
//! assert!(is_before(&a, &b));
//! ```

mod comparator;
mod generator;
mod parser;
mod resolver;
mod types;

// Re-export main types
pub use types::{CfiStep, EpubCfi, StepKind};

// Re-export parser functions
pub use parser::{is_cfi_string, parse, try_parse, CfiParseError};

// Re-export generator
pub use generator::{
    generate_chapter_component, generate_from_element, generate_from_range,
    generate_from_text_node, generate_path_component, CfiBuilder,
};

// Re-export comparator functions
pub use comparator::{
    compare, compare_cfi_strings, index_of_sorted, is_after, is_before, is_in_range, location_of,
};

// Re-export resolver
pub use resolver::{
    add_marker, find_parent, find_text_node, range_from_cfi, remove_marker, MARKER_CLASS,
    SPLIT_CLASS,
};
