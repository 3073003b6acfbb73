//! WebSocket endpoint bridging browser connections onto windows.
//!
//! Each upgrade on [`WS_PATH`] becomes one [`Window`]: text frames are parsed
//! as JSON and fed to the window's transport, and everything the window sends
//! goes back out as text frames. The application callback runs on its own
//! task once the window is registered.

use std::future::Future;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::Router;
use axum::extract::ws::{Message, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::http::header;
use axum::response::Html;
use axum::routing::get;
use futures::future::BoxFuture;
use futures::{FutureExt, SinkExt, StreamExt};
use serde_json::Value;
use tether_runtime::{ChannelTransport, Window};
use tokio::net::TcpListener;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tower_http::services::{ServeDir, ServeFile};
use tracing::{debug, info, warn};

use crate::config::ServerConfig;
use crate::sessions::Sessions;

/// Path browsers connect to.
pub const WS_PATH: &str = "/ws";

/// Path of the browser-side client script.
pub const CLIENT_PATH: &str = "/tether.js";

const CLIENT_JS: &str = include_str!("../assets/tether.js");
const INDEX_HTML: &str = include_str!("../assets/index.html");

type OnConnect = Arc<dyn Fn(Window) -> BoxFuture<'static, ()> + Send + Sync>;

#[derive(Clone)]
struct AppState {
	sessions: Arc<Sessions>,
	on_connect: OnConnect,
}

/// Binds the configured address and serves until the process is stopped.
///
/// `on_connect` runs once per connected browser with its window.
pub async fn serve<F, Fut>(config: &ServerConfig, on_connect: F) -> Result<()>
where
	F: Fn(Window) -> Fut + Send + Sync + 'static,
	Fut: Future<Output = ()> + Send + 'static,
{
	let addr = config.addr()?;
	let listener = TcpListener::bind(addr)
		.await
		.with_context(|| format!("Failed to bind tether server to {addr}"))?;
	info!(target = "tether", host = %config.host, port = config.port, "starting tether server");

	let sessions = Arc::new(Sessions::new());
	let result = serve_on(
		listener,
		config.static_root.as_deref(),
		Arc::clone(&sessions),
		on_connect,
	)
	.await;
	sessions.disconnect_all();
	result
}

/// Serves on an already bound listener, registering windows in `sessions`.
pub async fn serve_on<F, Fut>(
	listener: TcpListener,
	static_root: Option<&Path>,
	sessions: Arc<Sessions>,
	on_connect: F,
) -> Result<()>
where
	F: Fn(Window) -> Fut + Send + Sync + 'static,
	Fut: Future<Output = ()> + Send + 'static,
{
	let app = router(static_root, sessions, on_connect);
	axum::serve(listener, app.into_make_service())
		.with_graceful_shutdown(shutdown_signal())
		.await
		.context("Tether server error")
}

/// Builds the WebSocket route plus the optional static file fallback.
pub fn router<F, Fut>(static_root: Option<&Path>, sessions: Arc<Sessions>, on_connect: F) -> Router
where
	F: Fn(Window) -> Fut + Send + Sync + 'static,
	Fut: Future<Output = ()> + Send + 'static,
{
	let on_connect: OnConnect = Arc::new(move |window| on_connect(window).boxed());
	let state = AppState {
		sessions,
		on_connect,
	};

	let mut app = Router::new()
		.route(
			WS_PATH,
			get(
				|ws: WebSocketUpgrade, State(state): State<AppState>| async move {
					ws.on_upgrade(|socket| handle_socket(socket, state))
				},
			),
		)
		.route(
			CLIENT_PATH,
			get(|| async { ([(header::CONTENT_TYPE, "text/javascript")], CLIENT_JS) }),
		);

	match static_root {
		Some(dir) if dir.exists() => {
			info!(target = "tether", dir = %dir.display(), "serving static files");
			let serve = ServeDir::new(dir)
				.append_index_html_on_directories(true)
				.fallback(ServeFile::new(dir.join("index.html")));
			app = app.fallback_service(serve);
		}
		Some(dir) => {
			warn!(target = "tether", dir = %dir.display(), "static root not found, serving built-in page");
			app = app.route("/", get(|| async { Html(INDEX_HTML) }));
		}
		None => {
			app = app.route("/", get(|| async { Html(INDEX_HTML) }));
		}
	}

	app.with_state(state)
}

async fn handle_socket(socket: WebSocket, state: AppState) {
	let (parts, remote) = ChannelTransport::pair();
	let (window, event_loop) = Window::connect(parts);
	let session = window.id();

	state.sessions.insert(window.clone());
	let sessions = Arc::clone(&state.sessions);
	window.on_disconnect(move || {
		sessions.remove(session);
	});
	info!(target = "tether", session, "browser connected");

	let (outbound, inbound) = remote.into_parts();
	let Some(inbound) = inbound else {
		window.disconnect();
		return;
	};

	let mut outbound = UnboundedReceiverStream::new(outbound);
	let (mut ws_tx, mut ws_rx) = socket.split();

	let send_task = tokio::spawn(async move {
		while let Some(value) = outbound.next().await {
			if ws_tx.send(Message::Text(value.to_string().into())).await.is_err() {
				break;
			}
		}
		let _ = ws_tx.send(Message::Close(None)).await;
	});
	let loop_task = tokio::spawn(event_loop.run());
	tokio::spawn((state.on_connect)(window.clone()));

	while let Some(msg) = ws_rx.next().await {
		match msg {
			Ok(Message::Text(text)) => match serde_json::from_str::<Value>(&text) {
				Ok(value) => {
					if inbound.send(value).is_err() {
						break;
					}
				}
				Err(err) => {
					warn!(target = "tether", session, error = %err, "undecodable frame, closing session");
					break;
				}
			},
			Ok(Message::Close(_)) => break,
			Ok(_) => {}
			Err(err) => {
				warn!(target = "tether", session, error = %err, "websocket error");
				break;
			}
		}
	}

	drop(inbound);
	if let Err(err) = loop_task.await {
		warn!(target = "tether", session, error = %err, "event loop task failed");
		window.disconnect();
	}
	send_task.abort();
	info!(target = "tether", session, "browser disconnected");
}

async fn shutdown_signal() {
	if tokio::signal::ctrl_c().await.is_err() {
		// No signal handler available; run until the listener fails.
		std::future::pending::<()>().await;
	}
	debug!(target = "tether", "shutdown signal received");
}
