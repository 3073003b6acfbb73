// End-to-end session scenarios against a simulated browser.
//
// The browser side is a `RemoteEnd` driven by the test: it reads what the
// window sends and answers with `result` and `event` frames.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tether_runtime::{
	ChannelTransport, ClientMessage, Coupon, Error, Handler, JsFunction, RemoteEnd, ServerMessage,
	Window, run_ui,
};

fn connect() -> (Window, RemoteEnd) {
	let (parts, remote) = ChannelTransport::pair();
	let (window, event_loop) = Window::connect(parts);
	tokio::spawn(event_loop.run());
	(window, remote)
}

async fn next(remote: &mut RemoteEnd) -> ServerMessage {
	tokio::time::timeout(Duration::from_secs(5), remote.recv())
		.await
		.expect("timed out waiting for server message")
		.expect("server side closed")
}

/// Answers every call with `answer(code)` until the window goes away.
fn serve_calls(mut remote: RemoteEnd, answer: impl Fn(&str) -> Value + Send + 'static) -> tokio::task::JoinHandle<Vec<ServerMessage>> {
	tokio::spawn(async move {
		let mut others = Vec::new();
		while let Ok(message) = remote.recv().await {
			match message {
				ServerMessage::Call { id, code } => {
					let reply = ClientMessage::Result {
						id,
						value: Some(answer(&code)),
						error: None,
					};
					if remote.send(&reply).is_err() {
						break;
					}
				}
				other => others.push(other),
			}
		}
		others
	})
}

#[tokio::test]
async fn test_call_with_argument() {
	let (window, remote) = connect();
	let _browser = serve_calls(remote, |code| match code {
		"1+2" => json!(3),
		other => panic!("unexpected code {other}"),
	});

	let sum: i64 = window
		.call(JsFunction::new("1+%1").arg(2))
		.await
		.expect("call should resolve");
	assert_eq!(sum, 3);
}

#[tokio::test]
async fn test_structured_results_decode() {
	#[derive(Debug, Deserialize, PartialEq, Serialize)]
	struct Rect {
		width: f64,
		height: f64,
		labels: Vec<String>,
	}

	let (window, remote) = connect();
	let _browser = serve_calls(remote, |_| json!({"width": 10.5, "height": 4.0, "labels": ["a", "b"]}));

	let rect: Rect = window
		.call(JsFunction::new("measure(%1)").arg(&json!({"deep": [1, null, true]})))
		.await
		.unwrap();
	assert_eq!(
		rect,
		Rect {
			width: 10.5,
			height: 4.0,
			labels: vec!["a".to_string(), "b".to_string()],
		}
	);

	let mismatch = window.call::<Vec<i64>>(JsFunction::new("measure()")).await;
	assert!(matches!(mismatch, Err(Error::Marshal(_))));
}

#[tokio::test]
async fn test_bound_handler_receives_object_event_once() {
	let (window, mut remote) = connect();
	let invocations = Arc::new(AtomicUsize::new(0));
	let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();

	let object = window.decode_ptr(json!({"$coupon": "c1"})).unwrap();
	window.adopt(window.root(), &object).unwrap();

	let count = Arc::clone(&invocations);
	let handler = window
		.bind(
			&object,
			"click",
			Handler::unary(move |n: i64| {
				count.fetch_add(1, Ordering::SeqCst);
				let tx = tx.clone();
				async move {
					let _ = tx.send(n);
					Ok(())
				}
			}),
		)
		.unwrap();

	let ServerMessage::Run { code } = next(&mut remote).await else {
		panic!("expected binding script");
	};
	assert_eq!(
		code,
		format!(
			r#"Tether.bind(Tether.get("c1"), "click", Tether.get("{}"))"#,
			handler.coupon()
		)
	);

	remote
		.send(&ClientMessage::Event {
			coupon: Coupon::new("c1"),
			name: "click".to_string(),
			args: vec![json!(42)],
		})
		.unwrap();

	let received = tokio::time::timeout(Duration::from_secs(5), rx.recv())
		.await
		.unwrap();
	assert_eq!(received, Some(42));
	tokio::time::sleep(Duration::from_millis(20)).await;
	assert_eq!(invocations.load(Ordering::SeqCst), 1);

	// Still reachable through the object.
	assert!(window.collect().is_empty());
	assert!(handler.is_live());

	window.root().clear_reachable().unwrap();
	window.collect();
	assert!(!handler.is_live());
}

#[tokio::test]
async fn test_event_stream_from_browser() {
	let (window, mut remote) = connect();
	let input = window.decode_ptr(json!({"$coupon": "c5"})).unwrap();
	window.adopt(window.root(), &input).unwrap();

	let mut values = window.event(&input, "input").unwrap().subscribe();
	assert!(matches!(next(&mut remote).await, ServerMessage::Run { .. }));

	for text in ["h", "he", "hey"] {
		remote
			.send(&ClientMessage::Event {
				coupon: Coupon::new("c5"),
				name: "input".to_string(),
				args: vec![json!({"value": text})],
			})
			.unwrap();
	}
	for text in ["h", "he", "hey"] {
		let args = tokio::time::timeout(Duration::from_secs(5), values.recv())
			.await
			.unwrap()
			.unwrap();
		assert_eq!(args, vec![json!({"value": text})]);
	}
}

#[tokio::test]
async fn test_disconnect_before_result() {
	let (window, mut remote) = connect();
	let disconnects = Arc::new(AtomicUsize::new(0));
	let counter = Arc::clone(&disconnects);
	window.on_disconnect(move || {
		counter.fetch_add(1, Ordering::SeqCst);
	});

	let pending = tokio::spawn({
		let window = window.clone();
		async move { window.call_value(JsFunction::new("prompt()")).await }
	});
	assert!(matches!(next(&mut remote).await, ServerMessage::Call { .. }));

	drop(remote);
	let err = tokio::time::timeout(Duration::from_secs(5), pending)
		.await
		.unwrap()
		.unwrap()
		.unwrap_err();
	assert!(err.is_session_closed());
	assert_eq!(window.pending_calls(), 0);
	assert_eq!(disconnects.load(Ordering::SeqCst), 1);

	window.disconnect();
	assert_eq!(disconnects.load(Ordering::SeqCst), 1);
	assert!(window.run(JsFunction::new("1")).unwrap_err().is_session_closed());
}

#[tokio::test]
async fn test_deferred_wiring_during_construction() {
	let (window, remote) = connect();
	let next_id = Arc::new(AtomicUsize::new(1));
	let ids = Arc::clone(&next_id);
	let browser = serve_calls(remote, move |code| {
		assert!(code.starts_with("document.createElement"));
		json!({"$coupon": format!("c{}", ids.fetch_add(1, Ordering::SeqCst))})
	});

	// Builds a parent with two children; appending is deferred until every
	// node exists.
	let parent = run_ui(&window, |ui| async move {
		let window = ui.window().clone();
		let parent = window
			.call_ptr_on(window.root(), JsFunction::new("document.createElement('ul')"))
			.await?;
		for _ in 0..2 {
			let child = window
				.call_ptr_on(&parent, JsFunction::new("document.createElement('li')"))
				.await?;
			let parent = parent.clone();
			ui.defer(move |window| async move {
				window.run(JsFunction::new("%1.appendChild(%2)").arg(&parent).arg(&child))
			});
		}
		Ok(parent)
	})
	.await
	.unwrap();

	assert!(parent.is_live());
	assert_eq!(window.vendor().len(), 4);

	window.disconnect();
	let others = tokio::time::timeout(Duration::from_secs(5), browser)
		.await
		.unwrap()
		.unwrap();
	let appended: Vec<_> = others
		.iter()
		.filter_map(|m| match m {
			ServerMessage::Run { code } => Some(code.as_str()),
			_ => None,
		})
		.collect();
	assert_eq!(
		appended,
		vec![
			r#"Tether.get("c1").appendChild(Tether.get("c2"))"#,
			r#"Tether.get("c1").appendChild(Tether.get("c3"))"#,
		]
	);
}

#[tokio::test]
async fn test_released_objects_are_announced() {
	let (window, mut remote) = connect();
	let a = window.decode_ptr(json!({"$coupon": "c1"})).unwrap();
	let b = window.decode_ptr(json!({"$coupon": "c2"})).unwrap();
	window.adopt(window.root(), &a).unwrap();
	window.adopt(&a, &b).unwrap();
	window.adopt(&b, &a).unwrap();

	window.root().clear_reachable().unwrap();
	let mut collected = window.collect();
	collected.sort();
	assert_eq!(collected, vec![Coupon::new("c1"), Coupon::new("c2")]);

	let ServerMessage::Release { mut coupons } = next(&mut remote).await else {
		panic!("expected release");
	};
	coupons.sort();
	assert_eq!(coupons, collected);
	assert!(matches!(a.with(|_, _| ()), Err(Error::Finalized(_))));
}
