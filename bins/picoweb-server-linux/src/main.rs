use std::path::PathBuf;

use chrono::Utc;
use picoweb_core::{load_config, ServerConfig, SessionNotice};
use picoweb_protocol::response::{build_response, BAD_REQUEST};
use picoweb_server::{StaticFiles, TokioDriver};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info,picoweb_server=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("picoweb server starting...");

    let config = match std::env::args().nth(1).map(PathBuf::from) {
        Some(path) => {
            tracing::info!("Loading configuration from {}", path.display());
            load_config(&path)?
        }
        None => ServerConfig {
            port: 8080,
            ..Default::default()
        },
    };

    let mut files = StaticFiles::new();
    files
        .add("index.html", include_bytes!("../web/index.html"))
        .add("app.js", include_bytes!("../web/app.js"))
        .add("style.css", include_bytes!("../web/style.css"));

    let started = Utc::now();
    let mut driver = TokioDriver::new(config);
    let server = driver.server_mut();

    server.set_http_handler(move |server, handle, request, _keep_open| {
        match request.path() {
            "/status" => {
                let body = serde_json::json!({
                    "started": started.to_rfc3339(),
                    "uptimeSeconds": (Utc::now() - started).num_seconds(),
                    "sessions": server.session_count(),
                    "handle": handle.as_u32(),
                });
                let response =
                    build_response("200 OK", "application/json", body.to_string().as_bytes());
                server.send_owned(handle, response).is_ok()
            }
            "/echo" if request.method() == "POST" => {
                let Some(text) = request.post_str("text") else {
                    return server.send_static(handle, BAD_REQUEST).is_ok();
                };
                let response = build_response("200 OK", "text/plain", text.as_bytes());
                server.send_owned(handle, response).is_ok()
            }
            _ => match files.serve(server, handle, request) {
                Ok(served) => served,
                Err(e) => {
                    tracing::warn!(%handle, "Failed to serve file: {}", e);
                    false
                }
            },
        }
    });

    server.set_message_handler(|server, handle, text| {
        if let Some(rest) = text.strip_prefix("all:") {
            let count = server.broadcast_message(rest);
            tracing::debug!(%handle, count, "Broadcast");
        } else if let Err(e) = server.send_message(handle, text) {
            tracing::debug!(%handle, "Echo failed: {}", e);
        }
    });

    server.set_notice_handler(|handle, notice| match notice {
        SessionNotice::Upgraded => tracing::info!(%handle, "WebSocket client connected"),
        SessionNotice::Closed => tracing::debug!(%handle, "Session closed"),
        _ => {}
    });

    let addr = driver.start()?;
    let handle = driver.handle();

    tracing::info!("picoweb server ready!");
    tracing::info!("   Page:      http://localhost:{}/", addr.port());
    tracing::info!("   Status:    http://localhost:{}/status", addr.port());
    tracing::info!("   WebSocket: ws://localhost:{}/ws", addr.port());

    let mut driver_task = tokio::spawn(driver.run());

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Received Ctrl+C, shutting down...");
            handle.shutdown();
        }
        result = &mut driver_task => {
            tracing::warn!("Server stopped: {:?}", result);
        }
    }

    if !driver_task.is_finished() {
        driver_task.await??;
    }

    tracing::info!("Shutdown complete");
    Ok(())
}
