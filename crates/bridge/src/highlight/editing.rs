//! Selection editing for context-menu actions.
//!
//! The page tags the right-clicked element with a transient
//! `data-unique-id`, and for inputs it records the selection offsets in
//! `data-selection-start` / `data-selection-end`. Every routine here looks the
//! element up by that id and removes the id first, so replaying the same
//! action finds nothing and does nothing.

use tracing::warn;

use super::dom::{Document, NodeId, Selection};

pub const UID_ATTR: &str = "data-unique-id";
pub const SELECTION_START_ATTR: &str = "data-selection-start";
pub const SELECTION_END_ATTR: &str = "data-selection-end";

/// Take the transient id off the element carrying it.
fn claim(doc: &mut Document, uid: &str) -> Option<NodeId> {
    let node = doc.find_by_attribute(UID_ATTR, uid)?;
    if let Some(el) = doc.element_mut(node) {
        el.attributes.remove(UID_ATTR);
    }
    Some(node)
}

/// Recorded input selection, clamped to the value and ordered.
fn recorded_offsets(doc: &Document, node: NodeId) -> Option<(usize, usize)> {
    let el = doc.element(node)?;
    let start: usize = el.attr(SELECTION_START_ATTR)?.parse().ok()?;
    let end: usize = el.attr(SELECTION_END_ATTR)?.parse().ok()?;
    let len = el.value.chars().count();
    let (start, end) = (start.min(len), end.min(len));
    Some((start.min(end), start.max(end)))
}

fn splice(value: &str, start: usize, end: usize, insert: &str) -> String {
    let head: String = value.chars().take(start).collect();
    let tail: String = value.chars().skip(end).collect();
    format!("{}{}{}", head, insert, tail)
}

fn clear_offsets(doc: &mut Document, node: NodeId) {
    if let Some(el) = doc.element_mut(node) {
        el.attributes.remove(SELECTION_START_ATTR);
        el.attributes.remove(SELECTION_END_ATTR);
    }
}

/// Delete the recorded selection. Returns whether anything was edited.
pub fn remove_selection(doc: &mut Document, uid: &str) -> bool {
    let Some(node) = claim(doc, uid) else {
        return false;
    };
    let editable = doc.element(node).map(|e| e.content_editable).unwrap_or(false);
    if editable {
        return replace_live_selection(doc, "");
    }

    let Some((start, end)) = recorded_offsets(doc, node) else {
        warn!(uid, "remove-selection target has no recorded selection");
        return false;
    };
    if let Some(el) = doc.element_mut(node) {
        el.value = splice(&el.value, start, end, "");
        el.selection = Some((start, start));
    }
    clear_offsets(doc, node);
    true
}

/// Replace the recorded selection with `text`, leaving the caret after it.
pub fn paste_from_clipboard(doc: &mut Document, uid: &str, text: &str) -> bool {
    let Some(node) = claim(doc, uid) else {
        return false;
    };
    let (is_field, editable) = match doc.element(node) {
        Some(el) => (el.is_text_field(), el.content_editable),
        None => return false,
    };

    if is_field {
        let Some((start, end)) = recorded_offsets(doc, node) else {
            warn!(uid, "paste target has no recorded selection");
            return false;
        };
        let caret = start + text.chars().count();
        if let Some(el) = doc.element_mut(node) {
            el.value = splice(&el.value, start, end, text);
            el.selection = Some((caret, caret));
        }
        clear_offsets(doc, node);
        return true;
    }

    if editable {
        return replace_live_selection(doc, text);
    }
    false
}

/// Select everything in the target: the whole value of an input, otherwise
/// the nearest editable region around the live selection, otherwise the body.
/// With no uid the focused element is the target.
pub fn select_all(doc: &mut Document, uid: Option<&str>) -> bool {
    let target = match uid.filter(|u| !u.is_empty()) {
        Some(uid) => match claim(doc, uid) {
            Some(node) => Some(node),
            None => return false,
        },
        None => doc.focused,
    };

    if let Some(node) = target {
        if let Some(el) = doc.element_mut(node) {
            if el.is_text_field() {
                el.selection = Some((0, el.value.chars().count()));
                doc.focused = Some(node);
                return true;
            }
        }
    }

    let Some(selection) = doc.selection else {
        warn!("select-all with no live selection");
        return false;
    };
    let anchor = match selection {
        Selection::Range { node, .. } => {
            if doc.is_text(node) {
                doc.parent(node)
            } else {
                Some(node)
            }
        }
        Selection::Contents(node) => Some(node),
    };

    let editable_root = anchor.and_then(|start| {
        doc.ancestors_or_self(start)
            .find(|&n| doc.element(n).map(|e| e.content_editable).unwrap_or(false))
    });
    doc.selection = Some(Selection::Contents(editable_root.unwrap_or(doc.body())));
    true
}

/// Replace the live selection with `text` and collapse it after the insert.
fn replace_live_selection(doc: &mut Document, text: &str) -> bool {
    match doc.selection {
        Some(Selection::Range { node, start, end }) if doc.is_text(node) => {
            let current = doc.text(node).unwrap_or_default().to_string();
            let len = current.chars().count();
            let (start, end) = (start.min(len), end.min(len));
            let (start, end) = (start.min(end), start.max(end));
            doc.set_text(node, splice(&current, start, end, text));
            let caret = start + text.chars().count();
            doc.selection = Some(Selection::Range {
                node,
                start: caret,
                end: caret,
            });
            true
        }
        Some(Selection::Contents(container)) => {
            doc.remove_all_children(container);
            let inserted = doc.append_text(container, text);
            let caret = text.chars().count();
            doc.selection = Some(Selection::Range {
                node: inserted,
                start: caret,
                end: caret,
            });
            true
        }
        _ => false,
    }
}
