//! In-page search, highlighting and selection editing.
//!
//! `engine` and `editing` hold the algorithms over the [`dom::Document`]
//! model; `script` carries the same routines as page-side sources for a live
//! target.

pub mod dom;
pub mod editing;
pub mod engine;
pub mod script;

pub use dom::{Document, Element, NodeId, Selection};
pub use engine::{remove_all_highlights, scroll_to_match, update_highlights};
