//! Find-in-page highlighting over a [`Document`].
//!
//! A query pass first strips every marker left by the previous pass, then
//! walks the visible text depth-first. Within each maximal run of adjacent
//! text nodes the first case-insensitive occurrence of the query is wrapped
//! in a marker `<span>`; anything else in that run stays plain text.

use std::ops::Range;

use super::dom::{Document, Element, NodeId};

pub const MARKER_CLASS: &str = "highlight-find-search-bar-query";
pub const CURRENT_MARKER_CLASS: &str = "selected-highlight-find-search-bar-query";
pub const MARKER_ID_PREFIX: &str = "highlight-find-search-bar-query-match-";

/// Tags whose text is never rendered.
pub const NON_VISUAL_TAGS: &[&str] = &["meta", "title", "script", "style", "noscript", "link"];

pub fn marker_id(ordinal: i64) -> String {
    format!("{}{}", MARKER_ID_PREFIX, ordinal)
}

/// A text node is judged by its parent element. Visible means a non-empty
/// box, no `display: none` or `visibility: hidden` on the element or above
/// it, and not a non-visual tag.
pub fn is_visible(doc: &Document, node: NodeId) -> bool {
    let element_id = if doc.is_text(node) {
        match doc.parent(node) {
            Some(parent) => parent,
            None => return false,
        }
    } else {
        node
    };
    let Some(element) = doc.element(element_id) else {
        return false;
    };
    if element.width <= 0.0 || element.height <= 0.0 {
        return false;
    }
    if NON_VISUAL_TAGS.contains(&element.tag.as_str()) {
        return false;
    }
    !doc.ancestors_or_self(element_id).any(|id| {
        doc.element(id)
            .map(|e| e.display_none || e.visibility_hidden)
            .unwrap_or(false)
    })
}

/// Replace every marker with its plain text and merge the text back into its
/// neighbours. Returns how many markers were removed; calling it on a clean
/// document does nothing.
pub fn remove_all_highlights(doc: &mut Document) -> usize {
    let markers: Vec<NodeId> = doc
        .descendants(doc.body())
        .into_iter()
        .filter(|&id| {
            doc.element(id)
                .map(|e| e.has_class(MARKER_CLASS) || e.has_class(CURRENT_MARKER_CLASS))
                .unwrap_or(false)
        })
        .collect();

    let mut touched: Vec<NodeId> = Vec::new();
    let mut removed = 0;
    for marker in markers {
        // A marker nested in an already-replaced marker is gone with it.
        let Some(parent) = doc.parent(marker) else {
            continue;
        };
        if !doc.is_attached(marker) {
            continue;
        }
        let text = doc.text_content(marker);
        let replacement = doc.create_text(&text);
        doc.insert_before(parent, replacement, Some(marker));
        doc.remove_child(parent, marker);
        if !touched.contains(&parent) {
            touched.push(parent);
        }
        removed += 1;
    }
    for parent in touched {
        doc.normalize(parent);
    }
    removed
}

/// Highlight `query` and return the markers created, in document order.
/// Marker ordinals restart at zero on every call. A blank query returns
/// nothing and leaves the document untouched.
pub fn update_highlights(doc: &mut Document, query: &str) -> Vec<NodeId> {
    let keyword = query.trim();
    if keyword.is_empty() {
        return Vec::new();
    }

    remove_all_highlights(doc);

    let mut matches = Vec::new();
    let body = doc.body();
    highlight_texts(doc, body, keyword, &mut matches);
    matches
}

fn highlight_texts(doc: &mut Document, node: NodeId, keyword: &str, matches: &mut Vec<NodeId>) {
    if doc.is_text(node) {
        highlight_run(doc, node, keyword, matches);
        return;
    }
    if doc.element(node).is_none() {
        return;
    }
    // Iterate a snapshot: wrapping a run detaches the siblings it absorbed,
    // and detached nodes are skipped below.
    for child in doc.children(node).to_vec() {
        highlight_texts(doc, child, keyword, matches);
    }
}

fn highlight_run(doc: &mut Document, first: NodeId, keyword: &str, matches: &mut Vec<NodeId>) {
    let Some(parent) = doc.parent(first) else {
        return;
    };
    if doc.text(first).map(str::is_empty).unwrap_or(true) || !is_visible(doc, first) {
        return;
    }

    let mut run = vec![first];
    let mut text = doc.text(first).unwrap_or_default().to_string();
    let mut next = doc.next_sibling(first);
    while let Some(sibling) = next {
        match doc.text(sibling) {
            Some(t) => {
                text.push_str(t);
                run.push(sibling);
                next = doc.next_sibling(sibling);
            }
            None => break,
        }
    }

    let Some(found) = find_case_insensitive(&text, keyword) else {
        return;
    };

    let before = &text[..found.start];
    let matched = &text[found.clone()];
    let after = &text[found.end..];

    let (width, height) = doc
        .element(parent)
        .map(|e| (e.width, e.height))
        .unwrap_or((0.0, 0.0));
    let ordinal = matches.len() as i64;
    let marker = doc.create_element(
        Element::new("span")
            .with_class(MARKER_CLASS)
            .with_id(&marker_id(ordinal))
            .with_size(width, height),
    );
    let marker_text = doc.create_text(matched);
    doc.insert_before(marker, marker_text, None);

    let mut fragment = Vec::with_capacity(3);
    if !before.is_empty() {
        fragment.push(doc.create_text(before));
    }
    fragment.push(marker);
    if !after.is_empty() {
        fragment.push(doc.create_text(after));
    }

    for node in run {
        doc.remove_child(parent, node);
    }
    for node in fragment {
        doc.insert_before(parent, node, next);
    }
    matches.push(marker);
}

/// Byte range of the first occurrence of `needle` in `haystack`, comparing
/// chars by their lowercase forms.
pub fn find_case_insensitive(haystack: &str, needle: &str) -> Option<Range<usize>> {
    if needle.is_empty() {
        return None;
    }
    let needle: Vec<char> = needle.chars().collect();
    for (start, _) in haystack.char_indices() {
        let mut hay = haystack[start..].char_indices();
        let mut end = start;
        let mut matched = true;
        for &n in &needle {
            match hay.next() {
                Some((offset, h)) if h.to_lowercase().eq(n.to_lowercase()) => {
                    end = start + offset + h.len_utf8();
                }
                _ => {
                    matched = false;
                    break;
                }
            }
        }
        if matched {
            return Some(start..end);
        }
    }
    None
}

/// Move the current-match emphasis from `previous` to `current` and scroll
/// the current marker into view. Returns false when no marker has the
/// `current` ordinal.
///
/// The emphasis is removed from `previous` before it is applied to
/// `current`, so `previous == current` leaves that marker emphasised.
pub fn scroll_to_match(doc: &mut Document, previous: i64, current: i64) -> bool {
    if let Some(prev) = doc.get_element_by_id(&marker_id(previous)) {
        if let Some(el) = doc.element_mut(prev) {
            el.remove_class(CURRENT_MARKER_CLASS);
        }
    }
    match doc.get_element_by_id(&marker_id(current)) {
        Some(cur) => {
            if let Some(el) = doc.element_mut(cur) {
                el.add_class(CURRENT_MARKER_CLASS);
            }
            doc.scrolled_to = Some(cur);
            true
        }
        None => false,
    }
}

/// Markers currently carrying the emphasis.
pub fn current_markers(doc: &Document) -> Vec<NodeId> {
    doc.elements_with_class(CURRENT_MARKER_CLASS)
}
