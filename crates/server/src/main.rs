use clap::Parser;
use tether_runtime::{Handler, JsFunction, Window, run_ui};
use tether_server::{ServerConfig, logging, serve};
use tracing::{error, info};

#[tokio::main]
async fn main() {
	let config = ServerConfig::parse();
	logging::init_logging(config.verbose);

	if let Err(err) = serve(&config, demo).await {
		error!(target = "tether", error = %err, "server failed");
		std::process::exit(1);
	}
}

/// Counter demo: a button whose label tracks how often it was clicked.
async fn demo(window: Window) {
	let session = window.id();
	if let Err(err) = build_counter(&window).await {
		if err.is_session_closed() {
			info!(target = "tether", session, "session ended during setup");
		} else {
			error!(target = "tether", session, error = %err, "demo setup failed");
		}
	}
}

async fn build_counter(window: &Window) -> tether_runtime::Result<()> {
	let agent: String = window.call(JsFunction::new("navigator.userAgent")).await?;
	info!(target = "tether", session = window.id(), %agent, "browser attached");

	let button = run_ui(window, |ui| async move {
		let window = ui.window();
		let button = window
			.call_ptr_on(
				window.root(),
				JsFunction::new(
					"document.body.appendChild(Object.assign(document.createElement('button'), {textContent: %1}))",
				)
				.arg("clicked 0 times"),
			)
			.await?;

		let target = button.clone();
		ui.defer(move |window| async move {
			let reset = window.export_handler_on(
				&target,
				Handler::nullary({
					let window = window.clone();
					move || {
						let window = window.clone();
						async move { window.debug_log("counter reset requested") }
					}
				}),
			)?;
			window.run(
				JsFunction::new("%1.addEventListener('contextmenu', () => Tether.invoke(%2))")
					.arg(&target)
					.arg(&reset),
			)
		});
		Ok(button)
	})
	.await?;

	let mut clicks = window.event(&button, "click")?.subscribe();
	let mut count = 0u64;
	while clicks.recv().await.is_ok() {
		count += 1;
		window.run(
			JsFunction::new("%1.textContent = %2")
				.arg(&button)
				.arg(format!("clicked {count} times")),
		)?;
	}
	Ok(())
}
