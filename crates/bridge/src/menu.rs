//! Context-menu state.
//!
//! The item set and order never change; [`compute_menu_state`] only flips
//! `disabled` flags from the latest selection snapshot and clipboard probe.

use pagebridge_core::Result;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;
use url::Url;

use crate::panel::PanelConnection;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MenuItemKind {
    Cut,
    Copy,
    Paste,
    Separator,
    SelectAll,
    CopyLink,
    CopyLinkDomain,
}

impl MenuItemKind {
    pub const ORDER: [MenuItemKind; 7] = [
        MenuItemKind::Cut,
        MenuItemKind::Copy,
        MenuItemKind::Paste,
        MenuItemKind::Separator,
        MenuItemKind::SelectAll,
        MenuItemKind::CopyLink,
        MenuItemKind::CopyLinkDomain,
    ];

    pub fn label(self) -> &'static str {
        match self {
            MenuItemKind::Cut => "Cut",
            MenuItemKind::Copy => "Copy",
            MenuItemKind::Paste => "Paste",
            MenuItemKind::Separator => "",
            MenuItemKind::SelectAll => "Select All",
            MenuItemKind::CopyLink => "Copy Link",
            MenuItemKind::CopyLinkDomain => "Copy Link Domain",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MenuItem {
    pub kind: MenuItemKind,
    pub disabled: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MenuState {
    items: Vec<MenuItem>,
}

impl Default for MenuState {
    fn default() -> Self {
        Self::new()
    }
}

impl MenuState {
    /// Every item in fixed order; only Select All starts enabled.
    pub fn new() -> Self {
        Self {
            items: MenuItemKind::ORDER
                .into_iter()
                .map(|kind| MenuItem {
                    kind,
                    disabled: !matches!(kind, MenuItemKind::SelectAll | MenuItemKind::Separator),
                })
                .collect(),
        }
    }

    pub fn items(&self) -> &[MenuItem] {
        &self.items
    }

    pub fn is_enabled(&self, kind: MenuItemKind) -> bool {
        self.items
            .iter()
            .find(|item| item.kind == kind)
            .map(|item| !item.disabled)
            .unwrap_or(false)
    }
}

/// The selection/link snapshot the page reports.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SelectionContext {
    pub selected_text: String,
    pub is_editable: bool,
    pub link_href: String,
}

pub fn compute_menu_state(
    current: &MenuState,
    ctx: &SelectionContext,
    clipboard_has_content: bool,
) -> MenuState {
    let has_text = !ctx.selected_text.is_empty();
    let has_link = !ctx.link_href.is_empty();
    let items = current
        .items
        .iter()
        .map(|item| {
            let disabled = match item.kind {
                MenuItemKind::Cut => !(has_text && ctx.is_editable),
                MenuItemKind::Copy => !has_text,
                MenuItemKind::Paste => !clipboard_has_content,
                MenuItemKind::SelectAll => false,
                MenuItemKind::CopyLink | MenuItemKind::CopyLinkDomain => !has_link,
                MenuItemKind::Separator => item.disabled,
            };
            MenuItem {
                kind: item.kind,
                disabled,
            }
        })
        .collect();
    MenuState { items }
}

/// `scheme://host[:port]` of `href`, or an empty string when it does not
/// parse. A host-less URL keeps its scheme: `mailto:a@b.c` gives `mailto://`.
pub fn link_domain(href: &str) -> String {
    let Ok(url) = Url::parse(href) else {
        return String::new();
    };
    let host = url.host_str().unwrap_or_default();
    match url.port() {
        Some(port) => format!("{}://{}:{}", url.scheme(), host, port),
        None => format!("{}://{}", url.scheme(), host),
    }
}

/// Payload of the page's `extension.contextMenu` event.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ContextMenuInfo {
    pub x: f64,
    pub y: f64,
    pub selected_element_uid: String,
    pub selected_element_text: Option<String>,
    pub is_selected_element_editable: bool,
    pub href: String,
}

/// Payload of the page's `extension.selection` event.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SelectionInfo {
    pub selected_element_text: String,
    pub is_selected_element_editable: bool,
}

/// One step of a menu action, as sent to the host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MenuCommand {
    WriteClipboard(String),
    RemoveSelection { uid: String },
    /// Read the clipboard, then paste what was read.
    PasteClipboard { uid: String },
    SelectAll { uid: String },
}

/// UI-side controller for the context menu.
#[derive(Debug, Clone, Default)]
pub struct ContextMenu {
    state: MenuState,
    context: SelectionContext,
    uid: String,
    position: (f64, f64),
    visible: bool,
    /// None while a probe is outstanding.
    clipboard_has_content: Option<bool>,
}

impl ContextMenu {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> &MenuState {
        &self.state
    }

    pub fn context(&self) -> &SelectionContext {
        &self.context
    }

    pub fn is_visible(&self) -> bool {
        self.visible
    }

    pub fn position(&self) -> (f64, f64) {
        self.position
    }

    fn recompute(&mut self) {
        self.state = compute_menu_state(
            &self.state,
            &self.context,
            self.clipboard_has_content.unwrap_or(false),
        );
    }

    pub fn show(&mut self, info: &ContextMenuInfo) {
        self.context = SelectionContext {
            selected_text: info.selected_element_text.clone().unwrap_or_default(),
            is_editable: info.is_selected_element_editable,
            link_href: info.href.clone(),
        };
        self.uid = info.selected_element_uid.clone();
        self.position = (info.x, info.y);
        self.visible = true;
        self.clipboard_has_content = None;
        self.recompute();
    }

    pub fn update_selection(&mut self, info: &SelectionInfo) {
        self.context.selected_text = info.selected_element_text.clone();
        self.context.is_editable = info.is_selected_element_editable;
        self.recompute();
    }

    pub fn clipboard_probed(&mut self, has_content: bool) {
        self.clipboard_has_content = Some(has_content);
        self.recompute();
    }

    pub fn hide(&mut self) {
        self.visible = false;
        self.recompute();
    }

    /// Steps for `kind`, or None when the item is disabled.
    pub fn plan(&self, kind: MenuItemKind) -> Option<Vec<MenuCommand>> {
        if !self.state.is_enabled(kind) {
            return None;
        }
        let uid = self.uid.clone();
        let commands = match kind {
            MenuItemKind::Cut => vec![
                MenuCommand::WriteClipboard(self.context.selected_text.clone()),
                MenuCommand::RemoveSelection { uid },
            ],
            MenuItemKind::Copy => vec![MenuCommand::WriteClipboard(
                self.context.selected_text.clone(),
            )],
            MenuItemKind::Paste => vec![MenuCommand::PasteClipboard { uid }],
            MenuItemKind::SelectAll => vec![MenuCommand::SelectAll { uid }],
            MenuItemKind::CopyLink => {
                vec![MenuCommand::WriteClipboard(self.context.link_href.clone())]
            }
            MenuItemKind::CopyLinkDomain => vec![MenuCommand::WriteClipboard(link_domain(
                &self.context.link_href,
            ))],
            MenuItemKind::Separator => Vec::new(),
        };
        Some(commands)
    }

    /// Ask the host whether the clipboard holds anything.
    pub async fn probe_clipboard(&mut self, conn: &PanelConnection) {
        let has = match conn.call("Clipboard.readText", json!({})).await {
            Ok(Value::String(text)) => !text.is_empty(),
            Ok(_) => false,
            Err(e) => {
                debug!(error = %e, "Clipboard probe failed");
                false
            }
        };
        self.clipboard_probed(has);
    }

    /// Run `kind` against the host and hide the menu. Returns false for a
    /// disabled item.
    pub async fn activate(&mut self, kind: MenuItemKind, conn: &PanelConnection) -> Result<bool> {
        let Some(commands) = self.plan(kind) else {
            return Ok(false);
        };
        let outcome = run_commands(commands, conn).await;
        self.hide();
        outcome.map(|_| true)
    }
}

async fn run_commands(commands: Vec<MenuCommand>, conn: &PanelConnection) -> Result<()> {
    for command in commands {
        match command {
            MenuCommand::WriteClipboard(text) => {
                conn.notify("Clipboard.writeText", json!({ "value": text }))
                    .await?;
            }
            MenuCommand::RemoveSelection { uid } => {
                conn.notify("Page.removeSelection", json!({ "value": { "uid": uid } }))
                    .await?;
            }
            MenuCommand::PasteClipboard { uid } => {
                let text = conn.call("Clipboard.readText", json!({})).await?;
                let text = text.as_str().unwrap_or_default();
                conn.notify(
                    "Page.pasteFromClipboard",
                    json!({ "value": { "uid": uid, "text": text } }),
                )
                .await?;
            }
            MenuCommand::SelectAll { uid } => {
                conn.notify("Page.selectAll", json!({ "value": { "uid": uid } }))
                    .await?;
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::panel::testing::connect;

    fn enabled(state: &MenuState) -> Vec<MenuItemKind> {
        state
            .items()
            .iter()
            .filter(|i| !i.disabled && i.kind != MenuItemKind::Separator)
            .map(|i| i.kind)
            .collect()
    }

    #[test]
    fn test_empty_context_enables_only_select_all() {
        let state = compute_menu_state(&MenuState::new(), &SelectionContext::default(), false);
        assert_eq!(enabled(&state), vec![MenuItemKind::SelectAll]);
    }

    #[test]
    fn test_editable_selection_with_link() {
        let ctx = SelectionContext {
            selected_text: "hi".to_string(),
            is_editable: true,
            link_href: "https://a.com/x".to_string(),
        };
        let state = compute_menu_state(&MenuState::new(), &ctx, false);
        assert_eq!(
            enabled(&state),
            vec![
                MenuItemKind::Cut,
                MenuItemKind::Copy,
                MenuItemKind::SelectAll,
                MenuItemKind::CopyLink,
                MenuItemKind::CopyLinkDomain,
            ]
        );
        assert_eq!(link_domain(&ctx.link_href), "https://a.com");
    }

    #[test]
    fn test_cut_needs_editable_and_paste_needs_clipboard() {
        let ctx = SelectionContext {
            selected_text: "read only".to_string(),
            ..Default::default()
        };
        let state = compute_menu_state(&MenuState::new(), &ctx, true);
        assert!(!state.is_enabled(MenuItemKind::Cut));
        assert!(state.is_enabled(MenuItemKind::Copy));
        assert!(state.is_enabled(MenuItemKind::Paste));
    }

    #[test]
    fn test_order_is_fixed_and_recompute_is_stable() {
        let ctx = SelectionContext {
            selected_text: "x".into(),
            ..Default::default()
        };
        let once = compute_menu_state(&MenuState::new(), &ctx, false);
        let twice = compute_menu_state(&once, &ctx, false);
        assert_eq!(once, twice);
        let kinds: Vec<_> = once.items().iter().map(|i| i.kind).collect();
        assert_eq!(kinds, MenuItemKind::ORDER.to_vec());
    }

    #[test]
    fn test_link_domain_keeps_explicit_port_and_tolerates_garbage() {
        assert_eq!(link_domain("http://localhost:8080/a?b"), "http://localhost:8080");
        assert_eq!(link_domain("https://a.com:443/"), "https://a.com");
        assert_eq!(link_domain("not a url"), "");
        assert_eq!(link_domain("mailto:me@example.com"), "mailto://");
    }

    #[test]
    fn test_copy_link_domain_plans_empty_write_for_bad_href() {
        let mut menu = ContextMenu::new();
        menu.show(&ContextMenuInfo {
            href: "::::".to_string(),
            ..Default::default()
        });
        assert_eq!(
            menu.plan(MenuItemKind::CopyLinkDomain),
            Some(vec![MenuCommand::WriteClipboard(String::new())])
        );
    }

    #[test]
    fn test_disabled_item_has_no_plan() {
        let mut menu = ContextMenu::new();
        menu.show(&ContextMenuInfo::default());
        assert_eq!(menu.plan(MenuItemKind::Cut), None);
        assert_eq!(menu.plan(MenuItemKind::Paste), None);
    }

    #[test]
    fn test_context_menu_payload_deserializes() {
        let info: ContextMenuInfo = serde_json::from_value(json!({
            "x": 10, "y": 20,
            "selectedElementUid": "pagebridge-contextmenu",
            "selectedElementText": "abc",
            "isSelectedElementEditable": true,
            "href": ""
        }))
        .unwrap();
        assert_eq!(info.selected_element_uid, "pagebridge-contextmenu");
        assert!(info.is_selected_element_editable);
    }

    #[tokio::test]
    async fn test_cut_writes_clipboard_then_removes_selection() {
        let (conn, mut seen) = connect(|_| None);
        let mut menu = ContextMenu::new();
        menu.show(&ContextMenuInfo {
            selected_element_uid: "ctx".into(),
            selected_element_text: Some("snip".into()),
            is_selected_element_editable: true,
            ..Default::default()
        });

        assert!(menu.activate(MenuItemKind::Cut, &conn).await.unwrap());
        assert!(!menu.is_visible());

        let first = seen.recv().await.unwrap();
        assert_eq!(first.action, "Clipboard.writeText");
        assert_eq!(first.params_or_null()["value"], "snip");
        let second = seen.recv().await.unwrap();
        assert_eq!(second.action, "Page.removeSelection");
        assert_eq!(second.params_or_null()["value"]["uid"], "ctx");
    }

    #[tokio::test]
    async fn test_paste_reads_then_pastes() {
        let (conn, mut seen) = connect(|req| {
            (req.action == "Clipboard.readText").then(|| json!("from clipboard"))
        });
        let mut menu = ContextMenu::new();
        menu.show(&ContextMenuInfo {
            selected_element_uid: "ctx".into(),
            ..Default::default()
        });
        menu.probe_clipboard(&conn).await;
        assert!(menu.state().is_enabled(MenuItemKind::Paste));

        assert!(menu.activate(MenuItemKind::Paste, &conn).await.unwrap());
        assert_eq!(seen.recv().await.unwrap().action, "Clipboard.readText");
        assert_eq!(seen.recv().await.unwrap().action, "Clipboard.readText");
        let paste = seen.recv().await.unwrap();
        assert_eq!(paste.action, "Page.pasteFromClipboard");
        assert_eq!(paste.params_or_null()["value"]["uid"], "ctx");
        assert_eq!(paste.params_or_null()["value"]["text"], "from clipboard");
    }
}
