//! Echo diagnostic plugin
//!
//! A minimal plugin speaking the full supervisor contract: it binds the
//! command socket it is given, declares readiness on stdout, accepts its
//! configuration, and echoes action bodies back verbatim. Useful for smoke
//! tests of a deployment and for soak-testing the supervisor; failure modes
//! are selectable via `CRUCIBLE_ECHO_MODE` to exercise the unhappy paths.

use std::io::Write;
use std::path::PathBuf;

use anyhow::Result;
use axum::http::StatusCode;
use axum::routing::post;
use axum::{Json, Router};
use clap::Parser;
use tokio::net::UnixListener;

/// Crucible echo plugin
#[derive(Parser, Debug)]
#[command(name = "crucible-echo-plugin")]
#[command(about = "Echo diagnostic plugin for Crucible", long_about = None)]
struct Args {
    /// Mode selector; the supervisor always passes "listen"
    mode: String,

    /// Socket this plugin listens on for commands
    command_socket: PathBuf,

    /// Socket the host serves its API on for callbacks
    callback_socket: PathBuf,
}

fn say(line: &str) -> Result<()> {
    // stdout is a pipe here, so it is block-buffered; the supervisor reads
    // line by line and must see each line as soon as it is written.
    let mut stdout = std::io::stdout();
    writeln!(stdout, "{line}")?;
    stdout.flush()?;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let mode = std::env::var("CRUCIBLE_ECHO_MODE").unwrap_or_default();

    say("starting up")?;
    eprintln!(
        "echo plugin: endpoint={} callback={}",
        std::env::var("CRUCIBLE_ENDPOINT").unwrap_or_default(),
        args.callback_socket.display()
    );

    match mode.as_str() {
        "fail-startup" => {
            say("Failed")?;
            return Ok(());
        }
        "exit-early" => return Ok(()),
        "hang" => {
            std::future::pending::<()>().await;
        }
        _ => {}
    }

    if args.mode != "listen" {
        say("Failed")?;
        anyhow::bail!("unsupported mode `{}`", args.mode);
    }

    let _ = std::fs::remove_file(&args.command_socket);
    let listener = UnixListener::bind(&args.command_socket)?;

    let reject_config = mode == "reject-config";
    let app = Router::new()
        .route(
            "/config",
            post(move |Json(params): Json<serde_json::Value>| async move {
                if reject_config {
                    eprintln!("echo plugin: rejecting configuration");
                    (
                        StatusCode::UNPROCESSABLE_ENTITY,
                        Json(serde_json::json!({ "error": "configuration rejected" })),
                    )
                } else {
                    eprintln!("echo plugin: configured with {params}");
                    (StatusCode::OK, Json(serde_json::json!({})))
                }
            }),
        )
        .route(
            "/echo",
            post(|Json(body): Json<serde_json::Value>| async move { Json(body) }),
        );

    // Only declare readiness once the socket is actually accepting.
    say("READY!")?;

    axum::serve(listener, app).await?;
    Ok(())
}
