//! EPUB chapter extraction: container parsing, spine traversal, and the
//! short-chapter filter that keeps alignment inputs comparable between
//! editions of the same book.

mod extract;
mod package;

pub use extract::{extract_epub, filter_chapters, write_stage_files};
pub use package::EpubPackage;
