use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, Stream, StreamExt};
use serde_json::{Value, json};
use tether_runtime::{JsFunction, Window};
use tether_server::{Sessions, WS_PATH, serve_on};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;

async fn start<F, Fut>(static_root: Option<PathBuf>, on_connect: F) -> (SocketAddr, Arc<Sessions>)
where
	F: Fn(Window) -> Fut + Send + Sync + 'static,
	Fut: std::future::Future<Output = ()> + Send + 'static,
{
	let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
	let addr = listener.local_addr().unwrap();
	let sessions = Arc::new(Sessions::new());
	let registry = Arc::clone(&sessions);
	tokio::spawn(async move {
		serve_on(listener, static_root.as_deref(), registry, on_connect)
			.await
			.unwrap();
	});
	(addr, sessions)
}

async fn next_json<S>(socket: &mut S) -> Value
where
	S: Stream<Item = Result<Message, tokio_tungstenite::tungstenite::Error>> + Unpin,
{
	loop {
		let frame = tokio::time::timeout(Duration::from_secs(5), socket.next())
			.await
			.expect("timed out waiting for frame")
			.expect("socket closed")
			.unwrap();
		if let Message::Text(text) = frame {
			return serde_json::from_str(&text).unwrap();
		}
	}
}

async fn wait_until(mut condition: impl FnMut() -> bool) {
	for _ in 0..100 {
		if condition() {
			return;
		}
		tokio::time::sleep(Duration::from_millis(20)).await;
	}
	panic!("condition not reached");
}

async fn http_get(addr: SocketAddr, path: &str) -> String {
	let mut stream = TcpStream::connect(addr).await.unwrap();
	let request = format!("GET {path} HTTP/1.1\r\nHost: {addr}\r\nConnection: close\r\n\r\n");
	stream.write_all(request.as_bytes()).await.unwrap();
	let mut response = String::new();
	stream.read_to_string(&mut response).await.unwrap();
	response
}

#[tokio::test]
async fn call_over_websocket() {
	let (results_tx, mut results_rx) = mpsc::unbounded_channel();
	let (addr, sessions) = start(None, move |window| {
		let results_tx = results_tx.clone();
		async move {
			let sum = window.call::<i64>(JsFunction::new("1+%1").arg(2)).await;
			let _ = results_tx.send(sum.map_err(|e| e.to_string()));
		}
	})
	.await;

	let (mut socket, _) = tokio_tungstenite::connect_async(format!("ws://{addr}{WS_PATH}"))
		.await
		.unwrap();

	let call = next_json(&mut socket).await;
	assert_eq!(call["type"], "call");
	assert_eq!(call["code"], "1+2");
	assert_eq!(sessions.len(), 1);

	let reply = json!({"type": "result", "id": call["id"], "value": 3});
	socket.send(Message::Text(reply.to_string())).await.unwrap();

	let sum = tokio::time::timeout(Duration::from_secs(5), results_rx.recv())
		.await
		.unwrap()
		.unwrap();
	assert_eq!(sum, Ok(3));

	socket.close(None).await.unwrap();
	wait_until(|| sessions.is_empty()).await;
}

#[tokio::test]
async fn disconnect_fails_pending_call() {
	let (results_tx, mut results_rx) = mpsc::unbounded_channel();
	let (addr, sessions) = start(None, move |window| {
		let results_tx = results_tx.clone();
		async move {
			let result = window.call_value(JsFunction::new("new Promise(() => {})")).await;
			let _ = results_tx.send(result.map_err(|e| e.is_session_closed()));
		}
	})
	.await;

	let (mut socket, _) = tokio_tungstenite::connect_async(format!("ws://{addr}{WS_PATH}"))
		.await
		.unwrap();
	let call = next_json(&mut socket).await;
	assert_eq!(call["type"], "call");
	drop(socket);

	let result = tokio::time::timeout(Duration::from_secs(5), results_rx.recv())
		.await
		.unwrap()
		.unwrap();
	assert_eq!(result, Err(true));
	wait_until(|| sessions.is_empty()).await;
}

#[tokio::test]
async fn browser_events_reach_handlers() {
	let (events_tx, mut events_rx) = mpsc::unbounded_channel();
	let (addr, _sessions) = start(None, move |window| {
		let events_tx = events_tx.clone();
		async move {
			let object = window.decode_ptr(json!({"$coupon": "c1"})).unwrap();
			window.adopt(window.root(), &object).unwrap();
			let mut clicks = window.event(&object, "click").unwrap().subscribe();
			if let Ok(args) = clicks.recv().await {
				let _ = events_tx.send(args);
			}
		}
	})
	.await;

	let (mut socket, _) = tokio_tungstenite::connect_async(format!("ws://{addr}{WS_PATH}"))
		.await
		.unwrap();

	let bind = next_json(&mut socket).await;
	assert_eq!(bind["type"], "run");
	let code = bind["code"].as_str().unwrap();
	assert!(code.starts_with(r#"Tether.bind(Tether.get("c1"), "click", "#));
	let handler = code
		.rsplit("Tether.get(\"")
		.next()
		.unwrap()
		.trim_end_matches("\"))")
		.to_string();

	let event = json!({"type": "event", "coupon": handler, "name": "click", "args": [42]});
	socket.send(Message::Text(event.to_string())).await.unwrap();

	let args = tokio::time::timeout(Duration::from_secs(5), events_rx.recv())
		.await
		.unwrap()
		.unwrap();
	assert_eq!(args, vec![json!(42)]);
}

#[tokio::test]
async fn malformed_frame_closes_session() {
	let (addr, sessions) = start(None, |_window| async {}).await;

	let (mut socket, _) = tokio_tungstenite::connect_async(format!("ws://{addr}{WS_PATH}"))
		.await
		.unwrap();
	wait_until(|| sessions.len() == 1).await;

	socket.send(Message::Text("not json".to_string())).await.unwrap();
	wait_until(|| sessions.is_empty()).await;
}

#[tokio::test]
async fn serves_client_script_and_page() {
	let (addr, _sessions) = start(None, |_window| async {}).await;

	let script = http_get(addr, "/tether.js").await;
	assert!(script.starts_with("HTTP/1.1 200"));
	assert!(script.contains("window.Tether = Tether"));

	let page = http_get(addr, "/").await;
	assert!(page.contains(r#"<script src="/tether.js""#));
}

#[tokio::test]
async fn client_script_forgets_released_objects_both_ways() {
	let (addr, _sessions) = start(None, |_window| async {}).await;
	let script = http_get(addr, "/tether.js").await;

	let forget = script
		.split("const forget = (coupon) => {")
		.nth(1)
		.and_then(|rest| rest.split("};").next())
		.expect("forget helper");
	assert!(forget.contains("coupons.delete(value)"));
	assert!(forget.contains("objects.delete(coupon)"));
	assert!(script.contains("for (const coupon of message.coupons) forget(coupon);"));
}

#[tokio::test]
async fn serves_static_root() {
	let dir = tempfile::tempdir().unwrap();
	std::fs::write(dir.path().join("index.html"), "<p>custom page</p>").unwrap();
	std::fs::write(dir.path().join("app.css"), "body { margin: 0 }").unwrap();
	let (addr, _sessions) = start(Some(dir.path().to_path_buf()), |_window| async {}).await;

	assert!(http_get(addr, "/app.css").await.contains("margin: 0"));
	assert!(http_get(addr, "/").await.contains("custom page"));
	assert!(http_get(addr, "/missing/route").await.contains("custom page"));
}
