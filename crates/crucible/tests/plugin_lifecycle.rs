//! End-to-end plugin supervision tests
//!
//! These spawn real child processes and speak over real unix sockets. The
//! happy paths drive the echo diagnostic plugin; the failure paths use
//! throwaway shell scripts so each startup misbehavior is explicit in the
//! test that needs it.

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crucible::plugin::{
    LaunchSpec, PluginCall, PluginError, PluginRegistry, RegistrySettings,
};
use crucible::token::RandomTokenIssuer;

fn registry(dir: &Path, load_timeout: Duration) -> Arc<PluginRegistry> {
    let comm_dir = dir.join("sockets");
    std::fs::create_dir_all(&comm_dir).unwrap();
    Arc::new(PluginRegistry::new(
        RegistrySettings {
            comm_dir,
            api_url: "http://127.0.0.1:9610".to_string(),
            fileserver_url: "http://127.0.0.1:9611/".to_string(),
            load_timeout,
        },
        Arc::new(RandomTokenIssuer::new(None)),
    ))
}

/// Write an executable shell script that stands in for a plugin binary.
fn script_plugin(dir: &Path, name: &str, body: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
    let mut perms = std::fs::metadata(&path).unwrap().permissions();
    perms.set_mode(0o755);
    std::fs::set_permissions(&path, perms).unwrap();
    path
}

fn echo_plugin() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_crucible-echo-plugin"))
}

#[tokio::test]
async fn load_call_unload_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let registry = registry(dir.path(), Duration::from_secs(20));

    let spec = LaunchSpec::new("echo", echo_plugin())
        .with_params(serde_json::json!({ "greeting": "hello" }));
    registry.load(spec).await.unwrap();

    let statuses = registry.list();
    assert_eq!(statuses.len(), 1);
    assert_eq!(statuses[0].name, "echo");
    assert_eq!(statuses[0].state, "ready");
    assert_eq!(statuses[0].in_flight, 0);

    // The plugin must hand back exactly the structure it was given.
    let payload = serde_json::json!({
        "machine": "node-01",
        "nested": { "values": [1, 2, 3], "flag": true }
    });
    let reply = registry
        .call("echo", &PluginCall::post("/echo", payload.clone()))
        .await
        .unwrap();
    assert_eq!(reply.status, 200);
    assert_eq!(reply.body, payload);

    registry.unload("echo").await.unwrap();
    assert!(registry.is_empty());

    // Both socket files are gone once the instance is torn down.
    let leftovers: Vec<_> = std::fs::read_dir(dir.path().join("sockets"))
        .unwrap()
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .collect();
    assert!(leftovers.is_empty(), "leaked sockets: {leftovers:?}");

    // A terminal instance frees its name for reuse.
    let spec = LaunchSpec::new("echo", echo_plugin());
    registry.load(spec).await.unwrap();
    registry.unload("echo").await.unwrap();
}

#[tokio::test]
async fn handshake_failure_sentinel_aborts_load() {
    let dir = tempfile::tempdir().unwrap();
    let registry = registry(dir.path(), Duration::from_secs(10));

    let plugin = script_plugin(
        dir.path(),
        "failing-plugin",
        "echo 'starting up'\necho 'Failed'\nsleep 30",
    );

    let err = registry
        .load(LaunchSpec::new("failing", plugin))
        .await
        .unwrap_err();
    assert!(matches!(err, PluginError::Handshake(_)));
    assert!(registry.is_empty());
}

#[tokio::test]
async fn handshake_eof_without_sentinel_aborts_load() {
    let dir = tempfile::tempdir().unwrap();
    let registry = registry(dir.path(), Duration::from_secs(10));

    let plugin = script_plugin(dir.path(), "quitter", "echo 'starting up'\nexit 0");

    let err = registry
        .load(LaunchSpec::new("quitter", plugin))
        .await
        .unwrap_err();
    assert!(matches!(err, PluginError::Handshake(_)));
    assert!(registry.is_empty());
}

#[tokio::test]
async fn config_rejection_terminates_plugin() {
    let dir = tempfile::tempdir().unwrap();
    let registry = registry(dir.path(), Duration::from_secs(20));

    let spec = LaunchSpec::new("picky", echo_plugin())
        .with_env("CRUCIBLE_ECHO_MODE", "reject-config");
    let err = registry.load(spec).await.unwrap_err();
    assert!(matches!(err, PluginError::Config(_)));
    assert!(registry.is_empty());
}

#[tokio::test]
async fn unresponsive_plugin_hits_load_timeout() {
    let dir = tempfile::tempdir().unwrap();
    let registry = registry(dir.path(), Duration::from_secs(1));

    let plugin = script_plugin(dir.path(), "sleeper", "echo 'starting up'\nsleep 60");

    let err = registry
        .load(LaunchSpec::new("sleeper", plugin))
        .await
        .unwrap_err();
    assert!(matches!(err, PluginError::Timeout(_)));
    assert!(registry.is_empty());
}

#[tokio::test]
async fn call_to_unknown_plugin_is_not_found() {
    let dir = tempfile::tempdir().unwrap();
    let registry = registry(dir.path(), Duration::from_secs(5));

    let err = registry
        .call("ghost", &PluginCall::post("/echo", serde_json::json!({})))
        .await
        .unwrap_err();
    assert!(matches!(err, PluginError::NotFound(_)));
    assert!(registry.is_empty());
}

#[tokio::test]
async fn unload_of_unknown_plugin_is_not_found() {
    let dir = tempfile::tempdir().unwrap();
    let registry = registry(dir.path(), Duration::from_secs(5));

    let err = registry.unload("ghost").await.unwrap_err();
    assert!(matches!(err, PluginError::NotFound(_)));
}

#[tokio::test]
async fn duplicate_load_is_rejected_while_instance_lives() {
    let dir = tempfile::tempdir().unwrap();
    let registry = registry(dir.path(), Duration::from_secs(20));

    registry
        .load(LaunchSpec::new("echo", echo_plugin()))
        .await
        .unwrap();

    let err = registry
        .load(LaunchSpec::new("echo", echo_plugin()))
        .await
        .unwrap_err();
    assert!(matches!(err, PluginError::AlreadyLoaded(_)));
    assert_eq!(registry.len(), 1);

    registry.unload("echo").await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn unload_waits_for_in_flight_calls() {
    let dir = tempfile::tempdir().unwrap();
    let registry = registry(dir.path(), Duration::from_secs(20));

    registry
        .load(LaunchSpec::new("echo", echo_plugin()))
        .await
        .unwrap();

    // Keep a stream of calls in flight while the unload starts.
    let mut callers = Vec::new();
    for i in 0..16 {
        let registry = Arc::clone(&registry);
        callers.push(tokio::spawn(async move {
            registry
                .call(
                    "echo",
                    &PluginCall::post("/echo", serde_json::json!({ "i": i })),
                )
                .await
        }));
    }

    registry.unload("echo").await.unwrap();
    assert!(registry.is_empty());

    // Every admitted call completed with the right answer; the rest were
    // turned away at the gate or found the plugin already gone.
    for (i, caller) in callers.into_iter().enumerate() {
        match caller.await.unwrap() {
            Ok(reply) => {
                assert_eq!(reply.status, 200);
                assert_eq!(reply.body, serde_json::json!({ "i": i }));
            }
            Err(
                PluginError::AdmissionRejected(_)
                | PluginError::NotFound(_)
                | PluginError::Transport(_),
            ) => {}
            Err(other) => panic!("unexpected call error: {other}"),
        }
    }

    // Calls after unload see nothing but NotFound.
    let err = registry
        .call("echo", &PluginCall::post("/echo", serde_json::json!({})))
        .await
        .unwrap_err();
    assert!(matches!(err, PluginError::NotFound(_)));
}

#[tokio::test]
async fn startup_diagnostics_do_not_break_handshake() {
    let dir = tempfile::tempdir().unwrap();
    let registry = registry(dir.path(), Duration::from_secs(20));

    // The echo plugin prints "starting up" and stderr chatter before READY!;
    // a load that succeeds proves the noise was forwarded, not fatal.
    registry
        .load(LaunchSpec::new("noisy", echo_plugin()))
        .await
        .unwrap();
    registry.unload("noisy").await.unwrap();
}
