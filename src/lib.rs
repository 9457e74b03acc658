//! Builds sentence-aligned bilingual corpora from paired EPUB editions:
//! chapter extraction, embedding-based alignment, and HTML/TMX reporting.

pub mod align;
pub mod config;
pub mod document;
pub mod embed;
pub mod epub;
pub mod pipeline;
pub mod progress;
pub mod report;
pub mod textutil;
