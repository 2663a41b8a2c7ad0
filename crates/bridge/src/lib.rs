pub mod bindings;
pub mod cdp;
pub mod clipboard;
pub mod control;
pub mod correlator;
pub mod dispatcher;
pub mod document;
pub mod find_bar;
pub mod highlight;
pub mod host;
pub mod launcher;
pub mod manager;
pub mod menu;
pub mod panel;
pub mod router;
pub mod session;
pub mod transport;

pub use cdp::CdpClient;
pub use clipboard::{ClipboardProxy, MemoryClipboard};
#[cfg(feature = "system-clipboard")]
pub use clipboard::SystemClipboard;
pub use control::ControlChannel;
pub use correlator::{Correlator, PendingReply};
pub use dispatcher::{Action, Dispatcher};
pub use document::{RemoteDocument, ScriptedDocument, SnapshotDocument};
pub use find_bar::FindBar;
pub use host::{HostEvent, HostNotification, HostSink};
pub use launcher::{ChromeLauncher, LaunchOptions};
pub use manager::{RemoteTarget, SessionManager, TargetLauncher};
pub use menu::{compute_menu_state, ContextMenu, MenuItemKind, MenuState, SelectionContext};
pub use panel::PanelConnection;
pub use router::{EventRouter, RoutedEvent};
pub use session::{Session, SessionOptions};
pub use transport::{ChannelTransport, LineTransport, Transport};
