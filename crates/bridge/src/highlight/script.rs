//! Page-side sources.
//!
//! These run inside the target's own JavaScript context and mirror the
//! routines in [`super::engine`] and [`super::editing`]. Arguments are
//! embedded as JSON literals.

use serde_json::Value;

use super::editing::{SELECTION_END_ATTR, SELECTION_START_ATTR, UID_ATTR};
use super::engine::{CURRENT_MARKER_CLASS, MARKER_CLASS, MARKER_ID_PREFIX};
use crate::bindings::Binding;

pub const STYLE_ELEMENT_ID: &str = "pagebridge-highlight-styles";

pub fn highlight_css() -> String {
    format!(
        ".{marker} {{ background-color: yellow; color: black; }}\n\
         .{current} {{ background-color: orange; color: black; }}",
        marker = MARKER_CLASS,
        current = CURRENT_MARKER_CLASS,
    )
}

fn literal(value: impl Into<Value>) -> String {
    value.into().to_string()
}

/// Install the marker styles once per document.
pub fn install_styles() -> String {
    format!(
        r#"(function (id, css) {{
  if (document.getElementById(id)) return;
  const style = document.createElement('style');
  style.id = id;
  style.textContent = css;
  (document.head || document.documentElement).appendChild(style);
}})({id}, {css})"#,
        id = literal(STYLE_ELEMENT_ID),
        css = literal(highlight_css()),
    )
}

const HIGHLIGHT_PRELUDE: &str = r#"
  const NON_VISUAL = ['META', 'TITLE', 'SCRIPT', 'STYLE', 'NOSCRIPT', 'LINK'];
  const isVisible = (node) => {
    const el = node.nodeType === Node.TEXT_NODE ? node.parentElement : node;
    if (!el) return false;
    const rect = el.getBoundingClientRect();
    const style = getComputedStyle(el);
    return rect.width > 0 && rect.height > 0
      && style.visibility !== 'hidden'
      && style.display !== 'none'
      && !NON_VISUAL.includes(el.tagName);
  };
  const removeHighlights = () => {
    const markers = document.querySelectorAll('.' + MARKER + ', .' + CURRENT);
    const parents = new Set();
    markers.forEach((marker) => {
      if (!marker.parentNode) return;
      parents.add(marker.parentNode);
      marker.parentNode.replaceChild(document.createTextNode(marker.textContent), marker);
    });
    parents.forEach((parent) => parent.normalize());
    return markers.length;
  };
"#;

fn with_prelude(body: &str, args: &[(&str, String)]) -> String {
    let mut names = vec!["MARKER", "CURRENT", "PREFIX"];
    let mut values = vec![
        literal(MARKER_CLASS),
        literal(CURRENT_MARKER_CLASS),
        literal(MARKER_ID_PREFIX),
    ];
    for (name, value) in args {
        names.push(name);
        values.push(value.clone());
    }
    format!(
        "(function ({}) {{{}{}}})({})",
        names.join(", "),
        HIGHLIGHT_PRELUDE,
        body,
        values.join(", ")
    )
}

/// Evaluates to the number of markers created.
pub fn update_highlights(keyword: &str) -> String {
    with_prelude(
        r#"
  removeHighlights();
  const needle = keyword.toLowerCase();
  let id = 0;
  const highlight = (node) => {
    if (node.nodeType === Node.TEXT_NODE) {
      if (!node.textContent || !node.parentNode || !isVisible(node)) return;
      let text = node.textContent;
      let next = node.nextSibling;
      while (next && next.nodeType === Node.TEXT_NODE) {
        text += next.textContent;
        next = next.nextSibling;
      }
      const at = text.toLowerCase().indexOf(needle);
      if (at === -1) return;
      const parent = node.parentNode;
      const fragment = document.createDocumentFragment();
      const before = text.substring(0, at);
      const after = text.substring(at + keyword.length);
      if (before) fragment.appendChild(document.createTextNode(before));
      const span = document.createElement('span');
      span.className = MARKER;
      span.id = PREFIX + (id++);
      span.textContent = text.substring(at, at + keyword.length);
      fragment.appendChild(span);
      if (after) fragment.appendChild(document.createTextNode(after));
      let current = node;
      while (current && current !== next) {
        const following = current.nextSibling;
        parent.removeChild(current);
        current = following;
      }
      parent.insertBefore(fragment, next);
    } else if (node.nodeType === Node.ELEMENT_NODE) {
      Array.from(node.childNodes).forEach(highlight);
    }
  };
  highlight(document.body);
  return id;
"#,
        &[("keyword", literal(keyword))],
    )
}

/// Evaluates to the number of markers removed.
pub fn remove_all_highlights() -> String {
    with_prelude("\n  return removeHighlights();\n", &[])
}

/// Evaluates to true when the current marker exists.
pub fn scroll_to_match(previous: i64, current: i64) -> String {
    with_prelude(
        r#"
  const prev = document.getElementById(PREFIX + previous);
  if (prev) prev.classList.remove(CURRENT);
  const cur = document.getElementById(PREFIX + current);
  if (!cur) return false;
  cur.classList.add(CURRENT);
  cur.scrollIntoView({ behavior: 'smooth', block: 'center', inline: 'nearest' });
  return true;
"#,
        &[("previous", literal(previous)), ("current", literal(current))],
    )
}

const EDITING_PRELUDE: &str = r#"
  const claim = (uid) => {
    const el = document.querySelector('[' + UID + '="' + CSS.escape(uid) + '"]');
    if (el) el.removeAttribute(UID);
    return el;
  };
  const isField = (el) => el && (el.tagName === 'INPUT' || el.tagName === 'TEXTAREA');
  const offsets = (el) => {
    const start = el.getAttribute(SEL_START);
    const end = el.getAttribute(SEL_END);
    if (!/^\d+$/.test(start || '') || !/^\d+$/.test(end || '')) return null;
    el.removeAttribute(SEL_START);
    el.removeAttribute(SEL_END);
    const len = el.value.length;
    const a = Math.min(Number(start), len);
    const b = Math.min(Number(end), len);
    return [Math.min(a, b), Math.max(a, b)];
  };
"#;

fn with_editing_prelude(body: &str, args: &[(&str, String)]) -> String {
    let mut names = vec!["UID", "SEL_START", "SEL_END"];
    let mut values = vec![
        literal(UID_ATTR),
        literal(SELECTION_START_ATTR),
        literal(SELECTION_END_ATTR),
    ];
    for (name, value) in args {
        names.push(name);
        values.push(value.clone());
    }
    format!(
        "(function ({}) {{{}{}}})({})",
        names.join(", "),
        EDITING_PRELUDE,
        body,
        values.join(", ")
    )
}

pub fn remove_selection(uid: &str) -> String {
    with_editing_prelude(
        r#"
  const el = claim(uid);
  if (!el) return false;
  if (el.isContentEditable) {
    const selection = window.getSelection();
    if (!selection || selection.rangeCount === 0) return false;
    selection.getRangeAt(0).deleteContents();
    return true;
  }
  const range = offsets(el);
  if (!range) return false;
  el.value = el.value.slice(0, range[0]) + el.value.slice(range[1]);
  el.selectionStart = el.selectionEnd = range[0];
  return true;
"#,
        &[("uid", literal(uid))],
    )
}

pub fn paste_from_clipboard(uid: &str, text: &str) -> String {
    with_editing_prelude(
        r#"
  const el = claim(uid);
  if (!el) return false;
  if (isField(el)) {
    const range = offsets(el);
    if (!range) return false;
    el.value = el.value.slice(0, range[0]) + text + el.value.slice(range[1]);
    el.selectionStart = el.selectionEnd = range[0] + text.length;
    return true;
  }
  if (el.isContentEditable) {
    const selection = window.getSelection();
    if (!selection || selection.rangeCount === 0) return false;
    const range = selection.getRangeAt(0);
    range.deleteContents();
    const node = document.createTextNode(text);
    range.insertNode(node);
    range.setStart(node, text.length);
    range.setEnd(node, text.length);
    selection.removeAllRanges();
    selection.addRange(range);
    return true;
  }
  return false;
"#,
        &[("uid", literal(uid)), ("text", literal(text))],
    )
}

pub fn select_all(uid: Option<&str>) -> String {
    with_editing_prelude(
        r#"
  let el = document.activeElement;
  if (uid) {
    el = claim(uid);
    if (!el) return false;
  }
  if (isField(el)) {
    el.select();
    return true;
  }
  const selection = window.getSelection();
  if (!selection || selection.rangeCount === 0) return false;
  let node = selection.getRangeAt(0).commonAncestorContainer;
  if (node.nodeType === Node.TEXT_NODE) node = node.parentNode;
  while (node && node instanceof HTMLElement && !node.isContentEditable) {
    node = node.parentNode;
  }
  const range = document.createRange();
  range.selectNodeContents(node && node.isContentEditable ? node : document.body);
  selection.removeAllRanges();
  selection.addRange(range);
  return true;
"#,
        &[("uid", uid.map(literal).unwrap_or_else(|| "null".to_string()))],
    )
}

/// Installed on every new document. Sets up the binding call shim and, once
/// the host confirms clipboard sync, the copy/paste, keyboard, context-menu
/// and selection hooks.
pub fn bootstrap() -> String {
    let mut source = BOOTSTRAP_TEMPLATE.to_string();
    for binding in Binding::ALL {
        source = source.replace(&format!("${}", placeholder(binding)), &literal(binding.name()));
    }
    source
        .replace("$UID_ATTR", &literal(UID_ATTR))
        .replace("$SEL_START", &literal(SELECTION_START_ATTR))
        .replace("$SEL_END", &literal(SELECTION_END_ATTR))
}

fn placeholder(binding: Binding) -> &'static str {
    match binding {
        Binding::EnableCopyPaste => "ENABLE_COPY_PASTE",
        Binding::EmitCopy => "EMIT_COPY",
        Binding::GetPaste => "GET_PASTE",
        Binding::EmitContextMenu => "EMIT_CONTEXT_MENU",
        Binding::EmitSelection => "EMIT_SELECTION",
        Binding::EmitClick => "EMIT_CLICK",
        Binding::EmitSelectAll => "EMIT_SELECT_ALL",
        Binding::EmitFindQuery => "EMIT_FIND_QUERY",
        Binding::RemoveHighlights => "REMOVE_HIGHLIGHTS",
        Binding::UpdateHighlights => "UPDATE_HIGHLIGHTS",
    }
}

const BOOTSTRAP_TEMPLATE: &str = r#"(() => {
  if (window.__pagebridge) return;
  const pending = new Map();
  let seq = 0;
  const call = (name, ...args) => new Promise((resolve) => {
    const raw = window[name];
    if (typeof raw !== 'function') {
      resolve(undefined);
      return;
    }
    const id = ++seq;
    pending.set(id, resolve);
    raw(JSON.stringify({ seq: id, args }));
  });
  const deliver = (id, value) => {
    const resolve = pending.get(id);
    if (!resolve) return;
    pending.delete(id);
    resolve(value);
  };
  window.__pagebridge = { call, deliver };
  window.__pagebridge.findHighlights = (text) => call($UPDATE_HIGHLIGHTS, text);
  window.__pagebridge.clearHighlights = () => call($REMOVE_HIGHLIGHTS);

  const install = () => {
    const copyHandler = (event) => {
      const text = (event.clipboardData && event.clipboardData.getData('text/plain'))
        || (document.getSelection() || '').toString();
      if (text) call($EMIT_COPY, text);
    };
    document.addEventListener('copy', copyHandler);
    document.addEventListener('cut', copyHandler);
    document.addEventListener('paste', async (event) => {
      event.preventDefault();
      const text = await call($GET_PASTE);
      if (text) document.execCommand('insertText', false, text);
    });
    document.addEventListener('keydown', (event) => {
      if (!(event.ctrlKey || event.metaKey)) return;
      if (event.key === 'f') {
        event.preventDefault();
        call($EMIT_FIND_QUERY);
      } else if (event.key === 'a') {
        event.preventDefault();
        call($EMIT_SELECT_ALL, null);
      }
    });
    document.addEventListener('contextmenu', (event) => {
      event.preventDefault();
      const el = event.target;
      const uid = 'pagebridge-contextmenu';
      el.setAttribute($UID_ATTR, uid);
      const anchor = el.closest && el.closest('a');
      const href = anchor && anchor.href ? anchor.href : '';
      let editable = false;
      if (el.tagName === 'INPUT' || el.tagName === 'TEXTAREA') {
        el.setAttribute($SEL_START, String(el.selectionStart || 0));
        el.setAttribute($SEL_END, String(el.selectionEnd || 0));
        editable = true;
      } else if (el.isContentEditable) {
        editable = true;
      }
      call($EMIT_CONTEXT_MENU, {
        x: event.clientX,
        y: event.clientY,
        selectedElementUid: uid,
        selectedElementText: (document.getSelection() || '').toString(),
        isSelectedElementEditable: editable,
        href,
      });
    });
    document.addEventListener('mouseup', (event) => {
      const text = (document.getSelection() || '').toString();
      const el = event.target;
      if (!text) return;
      call($EMIT_SELECTION, {
        selectedElementText: text,
        isSelectedElementEditable: !!(el.isContentEditable
          || el.tagName === 'INPUT' || el.tagName === 'TEXTAREA'),
      });
    });
    document.addEventListener('click', () => call($EMIT_CLICK));
  };

  call($ENABLE_COPY_PASTE).then((enabled) => {
    if (enabled === true) install();
  });
})();"#;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bootstrap_names_every_binding() {
        let source = bootstrap();
        for binding in Binding::ALL {
            assert!(source.contains(binding.name()), "{} missing", binding.name());
        }
        assert!(!source.contains('$'), "unreplaced placeholder");
        assert!(source.contains("\"data-unique-id\""));
    }

    #[test]
    fn test_arguments_are_json_escaped() {
        let script = update_highlights("it's \"quoted\"\n");
        assert!(script.contains(r#""it's \"quoted\"\n""#));
        assert!(script.starts_with("(function (MARKER, CURRENT, PREFIX, keyword)"));
    }

    #[test]
    fn test_select_all_without_uid_passes_null() {
        assert!(select_all(None).ends_with("\"data-selection-end\", null)"));
        assert!(select_all(Some("ctx")).ends_with("\"data-selection-end\", \"ctx\")"));
    }

    #[test]
    fn test_styles_use_marker_classes() {
        let css = highlight_css();
        assert!(css.contains(".highlight-find-search-bar-query { background-color: yellow"));
        assert!(css.contains(".selected-highlight-find-search-bar-query { background-color: orange"));
        assert!(install_styles().contains(STYLE_ELEMENT_ID));
    }
}
