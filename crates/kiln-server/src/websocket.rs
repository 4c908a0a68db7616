//! WebSocket-based live reload.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Path of the live reload WebSocket endpoint.
pub const WS_PATH: &str = "/__kiln/ws";

/// Path the client script is served from.
pub const CLIENT_PATH: &str = "/__kiln/client.js";

/// Messages sent to clients for live reload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum HmrMessage {
    /// Full page reload
    Reload,

    /// Swap stylesheets in place
    Css {
        /// URL paths of the changed stylesheets (e.g. "/css/main.min.css")
        paths: Vec<String>,
    },

    /// Replace script elements in place
    Script {
        /// URL paths of the changed scripts
        paths: Vec<String>,
    },

    /// Connection established
    Connected,
}

/// Hub for broadcasting HMR messages to all connected clients.
#[derive(Debug, Clone)]
pub struct HmrHub {
    sender: broadcast::Sender<HmrMessage>,
}

impl HmrHub {
    /// Create a new HMR hub.
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(100);
        Self { sender }
    }

    /// Send a message to all connected clients.
    pub fn send(&self, msg: HmrMessage) {
        // Ignore send errors (no receivers)
        let _ = self.sender.send(msg);
    }

    /// Subscribe to HMR messages.
    pub fn subscribe(&self) -> broadcast::Receiver<HmrMessage> {
        self.sender.subscribe()
    }

    /// Get the number of active subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for HmrHub {
    fn default() -> Self {
        Self::new()
    }
}

/// Insert the client script tag before `</body>`, or append it.
pub fn inject_client(html: &str) -> String {
    let tag = format!(r#"<script src="{CLIENT_PATH}"></script>"#);
    match html.rfind("</body>") {
        Some(at) => {
            let mut out = String::with_capacity(html.len() + tag.len());
            out.push_str(&html[..at]);
            out.push_str(&tag);
            out.push_str(&html[at..]);
            out
        }
        None => format!("{html}{tag}"),
    }
}

/// Generate the client-side live reload script.
pub fn client_script() -> String {
    format!(
        r#"
(function() {{
  'use strict';

  var url = (location.protocol === 'https:' ? 'wss://' : 'ws://') + location.host + '{WS_PATH}';
  var ws = new WebSocket(url);
  var reconnectAttempts = 0;
  var maxReconnectAttempts = 10;

  function bust(href) {{
    var u = new URL(href, location.href);
    u.searchParams.set('kiln', Date.now());
    return u.toString();
  }}

  function matches(href, paths) {{
    var path = new URL(href, location.href).pathname;
    return paths.indexOf(path) !== -1;
  }}

  function swapStyles(paths) {{
    var swapped = 0;
    document.querySelectorAll('link[rel="stylesheet"]').forEach(function(link) {{
      if (matches(link.href, paths)) {{
        link.href = bust(link.href);
        swapped++;
      }}
    }});
    return swapped;
  }}

  function swapScripts(paths) {{
    var swapped = 0;
    document.querySelectorAll('script[src]').forEach(function(old) {{
      if (matches(old.src, paths)) {{
        var next = document.createElement('script');
        next.src = bust(old.src);
        old.parentNode.replaceChild(next, old);
        swapped++;
      }}
    }});
    return swapped;
  }}

  ws.onopen = function() {{
    console.log('[kiln] Connected');
    reconnectAttempts = 0;
  }};

  ws.onmessage = function(event) {{
    var msg = JSON.parse(event.data);

    switch (msg.type) {{
      case 'reload':
        location.reload();
        break;

      case 'css':
        if (swapStyles(msg.paths) === 0) {{
          location.reload();
        }}
        break;

      case 'script':
        if (swapScripts(msg.paths) === 0) {{
          location.reload();
        }}
        break;

      case 'connected':
        console.log('[kiln] Server acknowledged connection');
        break;
    }}
  }};

  ws.onclose = function() {{
    console.log('[kiln] Disconnected');
    if (reconnectAttempts < maxReconnectAttempts) {{
      reconnectAttempts++;
      setTimeout(function() {{
        location.reload();
      }}, 1000 * reconnectAttempts);
    }}
  }};
}})();
"#
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hub_broadcasts_messages() {
        let hub = HmrHub::new();
        let mut rx = hub.subscribe();

        hub.send(HmrMessage::Reload);

        match rx.try_recv() {
            Ok(HmrMessage::Reload) => {}
            _ => panic!("Expected Reload message"),
        }
    }

    #[test]
    fn send_without_clients_is_ignored() {
        let hub = HmrHub::new();
        assert_eq!(hub.subscriber_count(), 0);
        hub.send(HmrMessage::Reload);
    }

    #[test]
    fn serializes_messages() {
        let msg = HmrMessage::Css {
            paths: vec!["/css/main.min.css".to_string()],
        };

        let json = serde_json::to_string(&msg).unwrap();

        assert_eq!(json, r#"{"type":"css","paths":["/css/main.min.css"]}"#);
        assert_eq!(
            serde_json::to_string(&HmrMessage::Reload).unwrap(),
            r#"{"type":"reload"}"#
        );
    }

    #[test]
    fn injects_before_closing_body() {
        let html = inject_client("<html><body><p>x</p></body></html>");
        assert_eq!(
            html,
            r#"<html><body><p>x</p><script src="/__kiln/client.js"></script></body></html>"#
        );
    }

    #[test]
    fn injects_at_end_without_body() {
        let html = inject_client("<p>x</p>");
        assert!(html.ends_with(r#"<script src="/__kiln/client.js"></script>"#));
    }

    #[test]
    fn client_script_targets_ws_endpoint() {
        assert!(client_script().contains(WS_PATH));
    }
}
