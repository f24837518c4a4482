//! Los Libros Reader Core
//!
//! Navigation core of the EPUB reader: opens a book, lays its chapters out
//! in columns and maps between CFI locations and on-screen pages.
//!
//! # Modules
//!
//! - `cfi`: CFI parsing, generation, ordering and resolution
//! - `dom`: Content document tree the CFI codec and page mapper walk
//! - `package`: Container, OPF, TOC and page-list parsing
//! - `layout`: Reflowable, spread and fixed-layout strategies
//! - `render`: Render surfaces, page maps and the chapter renderer
//! - `book`: Book orchestration, content stores, pagination and locations

pub mod book;
pub mod cfi;
pub mod config;
pub mod dom;
pub mod error;
pub mod events;
pub mod hooks;
pub mod layout;
pub mod package;
pub mod queue;
pub mod render;

pub use book::{Book, Locations, Navigation, Pagination, ReaderHandle};
pub use config::ReaderSettings;
pub use error::{ReaderError, Result, StoreError};
