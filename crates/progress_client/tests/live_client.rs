mod common;

use std::time::Duration;

use common::{envelope, init_logging, ConnectBehavior, ScriptedTransport, ServerSide};
use progress_client::{LiveProgressClient, OwnerNotice, Phase, ProgressView, ReconnectPolicy};
use tokio::sync::{mpsc, watch};
use tokio::time::{timeout, Instant};

async fn next_server(accepted: &mut mpsc::UnboundedReceiver<ServerSide>) -> ServerSide {
    timeout(Duration::from_secs(30), accepted.recv())
        .await
        .expect("connection in time")
        .expect("transport alive")
}

async fn wait_view(views: &mut watch::Receiver<ProgressView>, check: impl FnMut(&ProgressView) -> bool) {
    timeout(Duration::from_secs(30), views.wait_for(check))
        .await
        .expect("view in time")
        .expect("client alive");
}

fn processed(client: &LiveProgressClient) -> Option<u64> {
    client.view().snapshot.map(|snapshot| snapshot.processed)
}

#[tokio::test(start_paused = true)]
async fn connects_and_reports_connectivity() {
    init_logging();
    let (transport, mut accepted) = ScriptedTransport::new();
    let client = LiveProgressClient::start("task-1", transport.clone(), ReconnectPolicy::default());
    let mut views = client.subscribe();

    let server = next_server(&mut accepted).await;
    assert_eq!(server.task_id, "task-1");
    wait_view(&mut views, |view| view.is_connected).await;

    let view = client.view();
    assert_eq!(view.phase, Phase::Connected);
    assert_eq!(view.task_id.as_deref(), Some("task-1"));
    assert!(view.snapshot.is_none());
    client.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn late_status_does_not_regress_progress() {
    init_logging();
    let (transport, mut accepted) = ScriptedTransport::new();
    let client = LiveProgressClient::start("task-1", transport.clone(), ReconnectPolicy::default());
    let mut server = next_server(&mut accepted).await;

    server.send_text(envelope("status", 3));
    server.send_text(envelope("progress", 5));
    server.send_text(envelope("status", 4));
    server.barrier().await;

    assert_eq!(processed(&client), Some(5));
    let snapshot = client.view().snapshot.unwrap();
    assert_eq!(snapshot.message, "progress 5");
    assert_eq!(snapshot.task_id, "task-1");
    client.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn ping_gets_exactly_one_pong() {
    init_logging();
    let (transport, mut accepted) = ScriptedTransport::new();
    let client = LiveProgressClient::start("task-1", transport.clone(), ReconnectPolicy::default());
    let mut server = next_server(&mut accepted).await;
    server.send_text(envelope("progress", 2));

    server.barrier().await;
    let before = client.view();

    server.barrier().await;
    assert!(server.sent.try_recv().is_err());
    assert_eq!(client.view(), before);
    client.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn malformed_frames_keep_connection_and_snapshot() {
    init_logging();
    let (transport, mut accepted) = ScriptedTransport::new();
    let client = LiveProgressClient::start("task-1", transport.clone(), ReconnectPolicy::default());
    let mut server = next_server(&mut accepted).await;
    server.send_text(envelope("progress", 2));
    server.barrier().await;
    let before = client.view();

    server.send_text("{\"type\":\"progress\",\"data\":");
    server.send_text("<html>502 Bad Gateway</html>");
    server.send_text(r#"{"type":"telemetry","data":{}}"#);
    server.barrier().await;

    assert_eq!(client.view(), before);
    assert!(client.view().is_connected);
    assert!(!server.closed_by_client());
    assert_eq!(transport.attempts(), 1);
    client.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn unexpected_close_reconnects_after_two_seconds() {
    init_logging();
    let (transport, mut accepted) = ScriptedTransport::new();
    let client = LiveProgressClient::start("task-1", transport.clone(), ReconnectPolicy::default());
    let mut views = client.subscribe();
    let mut server = next_server(&mut accepted).await;
    server.send_text(envelope("progress", 7));
    server.barrier().await;

    let dropped_at = Instant::now();
    drop(server);
    wait_view(&mut views, |view| !view.is_connected && view.reconnect_pending).await;
    // The held snapshot survives the drop.
    assert_eq!(processed(&client), Some(7));

    let server = next_server(&mut accepted).await;
    let waited = dropped_at.elapsed();
    assert!(waited >= Duration::from_secs(2), "reconnected after {waited:?}");
    assert!(waited < Duration::from_secs(3), "reconnected after {waited:?}");
    assert_eq!(server.task_id, "task-1");
    wait_view(&mut views, |view| view.is_connected).await;
    assert_eq!(transport.attempts(), 2);
    client.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn refused_connect_is_retried() {
    init_logging();
    let (transport, mut accepted) = ScriptedTransport::new();
    transport.script(&[ConnectBehavior::Refuse, ConnectBehavior::Refuse]);
    let started = Instant::now();
    let client = LiveProgressClient::start("task-1", transport.clone(), ReconnectPolicy::default());

    let _server = next_server(&mut accepted).await;
    assert_eq!(transport.attempts(), 3);
    assert!(started.elapsed() >= Duration::from_secs(4));
    client.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn capped_policy_gives_up() {
    init_logging();
    let (transport, _accepted) = ScriptedTransport::new();
    transport.script(&[ConnectBehavior::Refuse; 5]);
    let policy = ReconnectPolicy {
        delay: Duration::from_secs(2),
        max_attempts: Some(3),
    };
    let client = LiveProgressClient::start("task-1", transport.clone(), policy);

    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(transport.attempts(), 3);
    let view = client.view();
    assert_eq!(view.phase, Phase::Disconnected);
    assert!(!view.reconnect_pending);
    client.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn stop_before_open_never_reconnects() {
    init_logging();
    let (transport, _accepted) = ScriptedTransport::new();
    transport.script(&[ConnectBehavior::Hang]);
    let client = LiveProgressClient::start("task-1", transport.clone(), ReconnectPolicy::default());
    while transport.attempts() == 0 {
        tokio::task::yield_now().await;
    }

    client.stop();
    tokio::time::sleep(Duration::from_secs(30)).await;

    assert_eq!(transport.attempts(), 1);
    assert_eq!(client.view().phase, Phase::Stopped);
    client.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn stop_twice_closes_once_and_never_reconnects() {
    init_logging();
    let (transport, mut accepted) = ScriptedTransport::new();
    let client = LiveProgressClient::start("task-1", transport.clone(), ReconnectPolicy::default());
    let mut views = client.subscribe();
    let server = next_server(&mut accepted).await;
    wait_view(&mut views, |view| view.is_connected).await;

    client.stop();
    client.stop();
    wait_view(&mut views, |view| view.phase == Phase::Stopped).await;
    tokio::time::sleep(Duration::from_secs(10)).await;

    assert!(server.closed_by_client());
    assert_eq!(transport.attempts(), 1);
    client.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn stop_during_pending_reconnect_cancels_it() {
    init_logging();
    let (transport, mut accepted) = ScriptedTransport::new();
    let client = LiveProgressClient::start("task-1", transport.clone(), ReconnectPolicy::default());
    let mut views = client.subscribe();
    let server = next_server(&mut accepted).await;
    wait_view(&mut views, |view| view.is_connected).await;

    drop(server);
    wait_view(&mut views, |view| view.reconnect_pending).await;
    client.stop();
    tokio::time::sleep(Duration::from_secs(10)).await;

    assert_eq!(transport.attempts(), 1);
    client.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn completed_clears_snapshot_and_notifies_once() {
    init_logging();
    let (transport, mut accepted) = ScriptedTransport::new();
    let mut client =
        LiveProgressClient::start("task-1", transport.clone(), ReconnectPolicy::default());
    let mut server = next_server(&mut accepted).await;
    server.send_text(envelope("progress", 20));
    server.send_text(r#"{"type":"completed","data":{"task_id":"task-1"}}"#);
    server.send_text(r#"{"type":"completed"}"#);
    server.barrier().await;

    assert!(client.view().snapshot.is_none());
    assert_eq!(client.try_recv_notice(), Some(OwnerNotice::RefreshRequested));
    assert_eq!(client.try_recv_notice(), None);

    // The backend closes finished streams; that must not bring the socket back.
    drop(server);
    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(transport.attempts(), 1);
    assert!(!client.view().is_connected);
    client.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn error_frame_surfaces_task_failure() {
    init_logging();
    let (transport, mut accepted) = ScriptedTransport::new();
    let mut client =
        LiveProgressClient::start("task-1", transport.clone(), ReconnectPolicy::default());
    let mut server = next_server(&mut accepted).await;
    server.send_text(envelope("progress", 4));
    server.send_text(r#"{"type":"error","data":{"message":"parser crashed"}}"#);
    server.barrier().await;

    assert_eq!(
        client.next_notice().await,
        Some(OwnerNotice::TaskFailed {
            message: "parser crashed".to_string()
        })
    );
    assert_eq!(processed(&client), Some(4));
    client.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn task_no_longer_running_suppresses_reconnect() {
    init_logging();
    let (transport, mut accepted) = ScriptedTransport::new();
    let client = LiveProgressClient::start("task-1", transport.clone(), ReconnectPolicy::default());
    let mut server = next_server(&mut accepted).await;
    server.barrier().await;

    client.observe_task_running(false);
    server.barrier().await;
    drop(server);
    tokio::time::sleep(Duration::from_secs(10)).await;

    assert_eq!(transport.attempts(), 1);
    client.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn dropping_client_releases_connection() {
    init_logging();
    let (transport, mut accepted) = ScriptedTransport::new();
    let client = LiveProgressClient::start("task-1", transport.clone(), ReconnectPolicy::default());
    let mut views = client.subscribe();
    let server = next_server(&mut accepted).await;
    wait_view(&mut views, |view| view.is_connected).await;

    drop(client);
    tokio::time::sleep(Duration::from_secs(1)).await;

    assert!(server.closed_by_client());
    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(transport.attempts(), 1);
}
