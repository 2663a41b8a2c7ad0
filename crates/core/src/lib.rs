pub mod config;
pub mod error;
pub mod message;
pub mod paths;

pub use config::BridgeConfig;
pub use error::{Error, Result};
pub use message::{Framing, Inbound, PanelMessage, PanelRequest};
pub use paths::Paths;
