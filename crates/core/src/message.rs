//! Wire envelopes exchanged between the panel UI, the bridge host, and the
//! remote control channel.
//!
//! Both directions of both links collapse into one tagged type, [`Inbound`]:
//! a message either answers a correlated call (`Response`) or is unsolicited
//! (`Event`). [`Framing`] knows the field names each link uses.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::error::{Error, Result};

/// A request travelling from the panel UI to the bridge host.
///
/// `callback_id` present means the UI is awaiting a correlated reply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PanelRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub callback_id: Option<u64>,
    #[serde(rename = "type")]
    pub action: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl PanelRequest {
    pub fn new(action: &str, params: Value) -> Self {
        Self {
            callback_id: None,
            action: action.to_string(),
            params: Some(params),
        }
    }

    #[must_use]
    pub fn with_callback(mut self, id: u64) -> Self {
        self.callback_id = Some(id);
        self
    }

    pub fn params_or_null(&self) -> Value {
        self.params.clone().unwrap_or(Value::Null)
    }
}

/// A message travelling from the bridge host to the panel UI.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PanelMessage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub callback_id: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl PanelMessage {
    pub fn result(callback_id: u64, result: Value) -> Self {
        Self {
            callback_id: Some(callback_id),
            method: None,
            result: Some(result),
            error: None,
        }
    }

    pub fn error(callback_id: u64, error: impl Into<String>) -> Self {
        Self {
            callback_id: Some(callback_id),
            method: None,
            result: None,
            error: Some(error.into()),
        }
    }

    pub fn event(method: &str, result: Value) -> Self {
        Self {
            callback_id: None,
            method: Some(method.to_string()),
            result: Some(result),
            error: None,
        }
    }
}

/// A decoded inbound message: either the answer to a correlated call or an
/// unsolicited event keyed by method name.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    Response {
        id: u64,
        outcome: std::result::Result<Value, String>,
    },
    Event {
        method: String,
        params: Value,
    },
}

/// Field naming used on a given link.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Framing {
    /// Panel UI ⇄ host: `{callbackId, type, params}` out,
    /// `{callbackId, method, result, error}` in.
    Panel,
    /// Host ⇄ remote control channel (DevTools protocol):
    /// `{id, method, params}` out, `{id, result | error}` or `{method, params}` in.
    Cdp,
}

impl Framing {
    /// Encode an outgoing correlated call.
    pub fn encode_call(self, id: u64, method: &str, params: Value) -> Value {
        match self {
            Framing::Panel => json!({
                "callbackId": id,
                "type": method,
                "params": params,
            }),
            Framing::Cdp => json!({
                "id": id,
                "method": method,
                "params": params,
            }),
        }
    }

    /// Encode a fire-and-forget message: same shape as a call, without an id.
    pub fn encode_notification(self, method: &str, params: Value) -> Value {
        match self {
            Framing::Panel => json!({
                "type": method,
                "params": params,
            }),
            Framing::Cdp => json!({
                "method": method,
                "params": params,
            }),
        }
    }

    /// Decode one inbound message. Anything that is neither a response nor an
    /// event is a protocol error.
    pub fn decode(self, value: &Value) -> Result<Inbound> {
        match self {
            Framing::Panel => decode_panel(value),
            Framing::Cdp => decode_cdp(value),
        }
    }

    pub fn decode_str(self, text: &str) -> Result<Inbound> {
        let value: Value = serde_json::from_str(text)
            .map_err(|e| Error::Protocol(format!("inbound message is not JSON: {}", e)))?;
        self.decode(&value)
    }
}

fn decode_panel(value: &Value) -> Result<Inbound> {
    if let Some(id) = value.get("callbackId").and_then(|v| v.as_u64()) {
        let outcome = match value.get("error") {
            Some(err) if !err.is_null() => Err(error_text(err)),
            _ => Ok(value.get("result").cloned().unwrap_or(Value::Null)),
        };
        return Ok(Inbound::Response { id, outcome });
    }
    if let Some(method) = value.get("method").and_then(|v| v.as_str()) {
        return Ok(Inbound::Event {
            method: method.to_string(),
            params: value.get("result").cloned().unwrap_or(Value::Null),
        });
    }
    Err(Error::Protocol(format!(
        "panel message has neither callbackId nor method: {}",
        value
    )))
}

fn decode_cdp(value: &Value) -> Result<Inbound> {
    if let Some(id) = value.get("id").and_then(|v| v.as_u64()) {
        let outcome = match value.get("error") {
            Some(err) if !err.is_null() => Err(error_text(err)),
            _ => Ok(value.get("result").cloned().unwrap_or(Value::Null)),
        };
        return Ok(Inbound::Response { id, outcome });
    }
    if let Some(method) = value.get("method").and_then(|v| v.as_str()) {
        return Ok(Inbound::Event {
            method: method.to_string(),
            params: value.get("params").cloned().unwrap_or(Value::Null),
        });
    }
    Err(Error::Protocol(format!(
        "control message has neither id nor method: {}",
        value
    )))
}

/// Errors arrive either as a bare string or as `{code, message}`.
fn error_text(err: &Value) -> String {
    match err {
        Value::String(s) => s.clone(),
        Value::Object(obj) => obj
            .get("message")
            .and_then(|m| m.as_str())
            .map(str::to_string)
            .unwrap_or_else(|| err.to_string()),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_panel_request_wire_shape() {
        let req = PanelRequest::new("Clipboard.readText", json!({})).with_callback(3);
        let wire = serde_json::to_value(&req).unwrap();
        assert_eq!(wire["callbackId"], 3);
        assert_eq!(wire["type"], "Clipboard.readText");

        let parsed: PanelRequest = serde_json::from_str(r#"{"type":"Page.goForward"}"#).unwrap();
        assert_eq!(parsed.callback_id, None);
        assert_eq!(parsed.params_or_null(), Value::Null);
    }

    #[test]
    fn test_panel_message_omits_empty_fields() {
        let msg = PanelMessage::event("extension.click", Value::Null);
        let text = serde_json::to_string(&msg).unwrap();
        assert!(!text.contains("callbackId"));
        assert!(!text.contains("error"));

        let err = PanelMessage::error(9, "boom");
        assert_eq!(err.callback_id, Some(9));
        assert_eq!(serde_json::to_value(&err).unwrap()["error"], "boom");
    }

    #[test]
    fn test_decode_panel_response_and_event() {
        let ok = Framing::Panel
            .decode(&json!({"callbackId": 4, "result": 7}))
            .unwrap();
        assert_eq!(ok, Inbound::Response { id: 4, outcome: Ok(json!(7)) });

        let err = Framing::Panel
            .decode(&json!({"callbackId": 5, "error": "nope"}))
            .unwrap();
        assert_eq!(err, Inbound::Response { id: 5, outcome: Err("nope".into()) });

        let event = Framing::Panel
            .decode(&json!({"method": "Page.frameNavigated", "result": {"url": "x"}}))
            .unwrap();
        assert_eq!(
            event,
            Inbound::Event { method: "Page.frameNavigated".into(), params: json!({"url": "x"}) }
        );
    }

    #[test]
    fn test_decode_cdp_error_object() {
        let inbound = Framing::Cdp
            .decode(&json!({"id": 2, "error": {"code": -32602, "message": "Invalid params"}}))
            .unwrap();
        assert_eq!(
            inbound,
            Inbound::Response { id: 2, outcome: Err("Invalid params".into()) }
        );
    }

    #[test]
    fn test_decode_cdp_event_without_params() {
        let inbound = Framing::Cdp
            .decode(&json!({"method": "Page.domContentEventFired"}))
            .unwrap();
        assert_eq!(
            inbound,
            Inbound::Event { method: "Page.domContentEventFired".into(), params: Value::Null }
        );
    }

    #[test]
    fn test_decode_unroutable_is_protocol_error() {
        assert!(matches!(
            Framing::Cdp.decode(&json!({"params": {}})),
            Err(Error::Protocol(_))
        ));
        assert!(matches!(Framing::Panel.decode_str("[]"), Err(Error::Protocol(_))));
    }

    #[test]
    fn test_encode_call_per_framing() {
        let panel = Framing::Panel.encode_call(1, "Page.selectAll", json!({"value": {}}));
        assert_eq!(panel["callbackId"], 1);
        assert_eq!(panel["type"], "Page.selectAll");

        let cdp = Framing::Cdp.encode_call(7, "Runtime.evaluate", json!({"expression": "1"}));
        assert_eq!(cdp["id"], 7);
        assert_eq!(cdp["method"], "Runtime.evaluate");
    }
}
