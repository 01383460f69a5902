//! Core types for essync

mod document;
mod field;

pub use document::*;
pub use field::*;
