//! Development server implementation.

use std::net::SocketAddr;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use axum::{
    body::Body,
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Request, State,
    },
    http::header,
    response::{Html, IntoResponse, Response},
    routing::get,
    Router,
};
use percent_encoding::percent_decode_str;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tower::ServiceExt;
use tower_http::services::ServeDir;

use crate::websocket::{client_script, inject_client, HmrHub, HmrMessage, CLIENT_PATH, WS_PATH};

/// Configuration for the development server.
#[derive(Debug, Clone)]
pub struct DevServerConfig {
    /// Directory to serve
    pub root: PathBuf,

    /// Port to listen on (0 picks a free port)
    pub port: u16,

    /// Host to bind to
    pub host: String,

    /// Open browser on start
    pub open: bool,
}

impl Default for DevServerConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("dist"),
            port: 3000,
            host: "127.0.0.1".to_string(),
            open: true,
        }
    }
}

/// Errors that can occur with the server.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("Invalid address {0}")]
    InvalidAddress(String),

    #[error("Failed to bind to {0}: {1}")]
    BindError(SocketAddr, String),

    #[error("Server error: {0}")]
    Serve(String),
}

/// Shared server state.
struct ServerState {
    root: PathBuf,
    hmr: HmrHub,
    shutdown: watch::Receiver<bool>,
}

/// A running development server.
///
/// Serves a directory over HTTP and pushes [`HmrMessage`]s from the hub to
/// every connected browser. Acquired with [`DevServer::start`] and released
/// with [`DevServer::stop`].
pub struct DevServer {
    addr: SocketAddr,
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<std::io::Result<()>>,
}

impl DevServer {
    /// Bind and start serving. Fails if the address is unavailable.
    pub async fn start(config: DevServerConfig, hmr: HmrHub) -> Result<Self, ServerError> {
        let addr: SocketAddr = format!("{}:{}", config.host, config.port)
            .parse()
            .map_err(|_| ServerError::InvalidAddress(format!("{}:{}", config.host, config.port)))?;

        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .map_err(|e| ServerError::BindError(addr, e.to_string()))?;
        let addr = listener
            .local_addr()
            .map_err(|e| ServerError::BindError(addr, e.to_string()))?;

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let state = Arc::new(ServerState {
            root: config.root.clone(),
            hmr,
            shutdown: shutdown_rx.clone(),
        });

        let app = Router::new()
            .route(WS_PATH, get(ws_handler))
            .route(CLIENT_PATH, get(client_script_handler))
            .fallback(static_handler)
            .with_state(state);

        let mut signal = shutdown_rx;
        let handle = tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async move {
                    let _ = signal.changed().await;
                })
                .await
        });

        tracing::info!("Serving {} at http://{}", config.root.display(), addr);

        if config.open {
            let url = format!("http://{}", addr);
            if let Err(e) = open::that(&url) {
                tracing::debug!("Could not open browser: {}", e);
            }
        }

        Ok(Self {
            addr,
            shutdown: shutdown_tx,
            handle,
        })
    }

    /// Address the server is bound to.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Stop accepting connections, close live reload sockets and wait for
    /// the server task to finish.
    pub async fn stop(self) -> Result<(), ServerError> {
        let _ = self.shutdown.send(true);
        match self.handle.await {
            Ok(result) => result.map_err(|e| ServerError::Serve(e.to_string())),
            Err(e) => Err(ServerError::Serve(e.to_string())),
        }
    }
}

/// Handler for the HMR WebSocket endpoint.
async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<ServerState>>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_ws(socket, state))
}

/// Handle a WebSocket connection.
async fn handle_ws(mut socket: WebSocket, state: Arc<ServerState>) {
    let mut rx = state.hmr.subscribe();
    let mut shutdown = state.shutdown.clone();

    if send_json(&mut socket, &HmrMessage::Connected).await.is_err() {
        return;
    }

    loop {
        tokio::select! {
            msg = rx.recv() => {
                let Ok(msg) = msg else { break };
                if send_json(&mut socket, &msg).await.is_err() {
                    break;
                }
            }
            _ = shutdown.changed() => {
                let _ = socket.send(Message::Close(None)).await;
                break;
            }
        }
    }
}

async fn send_json(socket: &mut WebSocket, msg: &HmrMessage) -> Result<(), axum::Error> {
    let json = serde_json::to_string(msg).map_err(axum::Error::new)?;
    socket.send(Message::Text(json.into())).await
}

/// Handler for the live reload client script.
async fn client_script_handler() -> impl IntoResponse {
    ([(header::CONTENT_TYPE, "application/javascript")], client_script())
}

/// Serve files from the root; HTML pages get the client script injected.
async fn static_handler(State(state): State<Arc<ServerState>>, req: Request<Body>) -> Response {
    if let Some(page) = html_target(&state.root, req.uri().path()).await {
        if let Ok(body) = tokio::fs::read_to_string(&page).await {
            return Html(inject_client(&body)).into_response();
        }
    }

    match ServeDir::new(&state.root).oneshot(req).await {
        Ok(res) => res.into_response(),
        Err(never) => match never {},
    }
}

/// Map a (percent-encoded) request path to an HTML file under `root`, if it
/// names one.
async fn html_target(root: &Path, uri_path: &str) -> Option<PathBuf> {
    let decoded = percent_decode_str(uri_path).decode_utf8().ok()?;
    let relative = Path::new(decoded.trim_start_matches('/'));
    if relative
        .components()
        .any(|c| !matches!(c, Component::Normal(_)))
    {
        return None;
    }

    let mut path = root.join(relative);
    let is_dir = tokio::fs::metadata(&path).await.is_ok_and(|m| m.is_dir());
    if decoded.ends_with('/') || is_dir {
        path = path.join("index.html");
    }

    let is_html = path
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("html") || e.eq_ignore_ascii_case("htm"));
    is_html.then_some(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::time::Duration;
    use tempfile::tempdir;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    fn test_config(root: &Path) -> DevServerConfig {
        DevServerConfig {
            root: root.to_path_buf(),
            port: 0,
            open: false,
            ..Default::default()
        }
    }

    async fn get_raw(addr: SocketAddr, path: &str) -> String {
        let mut stream = tokio::net::TcpStream::connect(addr).await.unwrap();
        let req = format!("GET {path} HTTP/1.1\r\nHost: {addr}\r\nConnection: close\r\n\r\n");
        stream.write_all(req.as_bytes()).await.unwrap();
        let mut buf = String::new();
        stream.read_to_string(&mut buf).await.unwrap();
        buf
    }

    #[test]
    fn default_config() {
        let config = DevServerConfig::default();
        assert_eq!(config.port, 3000);
        assert_eq!(config.root, PathBuf::from("dist"));
    }

    #[tokio::test]
    async fn maps_paths_to_html_pages() {
        let temp = tempdir().unwrap();
        let root = temp.path();
        fs::create_dir_all(root.join("docs")).unwrap();

        assert_eq!(html_target(root, "/").await, Some(root.join("index.html")));
        assert_eq!(html_target(root, "/about.html").await, Some(root.join("about.html")));
        assert_eq!(html_target(root, "/docs").await, Some(root.join("docs/index.html")));
        assert_eq!(html_target(root, "/css/main.min.css").await, None);
        assert_eq!(html_target(root, "/../secret.html").await, None);
    }

    #[tokio::test]
    async fn decodes_percent_encoded_paths() {
        let temp = tempdir().unwrap();
        let root = temp.path();

        assert_eq!(
            html_target(root, "/my%20page.html").await,
            Some(root.join("my page.html"))
        );
        assert_eq!(html_target(root, "/%2e%2e/secret.html").await, None);
    }

    #[tokio::test]
    async fn serves_pages_with_client_and_assets_as_is() {
        let temp = tempdir().unwrap();
        fs::create_dir_all(temp.path().join("css")).unwrap();
        fs::write(temp.path().join("index.html"), "<html><body>hi</body></html>").unwrap();
        fs::write(temp.path().join("css/main.min.css"), ".a{color:red}").unwrap();

        let server = DevServer::start(test_config(temp.path()), HmrHub::new())
            .await
            .unwrap();

        let page = get_raw(server.addr(), "/").await;
        assert!(page.starts_with("HTTP/1.1 200"));
        assert!(page.contains(r#"<script src="/__kiln/client.js"></script></body>"#));

        let css = get_raw(server.addr(), "/css/main.min.css").await;
        assert!(css.ends_with(".a{color:red}"));

        fs::write(temp.path().join("my page.html"), "<html><body>spaced</body></html>").unwrap();
        let spaced = get_raw(server.addr(), "/my%20page.html").await;
        assert!(spaced.contains("spaced"));
        assert!(spaced.contains(r#"<script src="/__kiln/client.js"></script></body>"#));

        let missing = get_raw(server.addr(), "/nope.png").await;
        assert!(missing.starts_with("HTTP/1.1 404"));

        tokio::time::timeout(Duration::from_secs(5), server.stop())
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn port_conflict_is_a_bind_error() {
        let temp = tempdir().unwrap();
        let first = DevServer::start(test_config(temp.path()), HmrHub::new())
            .await
            .unwrap();

        let taken = DevServerConfig {
            port: first.addr().port(),
            ..test_config(temp.path())
        };
        let err = DevServer::start(taken, HmrHub::new()).await.err().unwrap();
        assert!(matches!(err, ServerError::BindError(..)));

        first.stop().await.unwrap();
    }
}
