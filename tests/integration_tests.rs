//! Integration tests for rustgrace.
//!
//! These tests drive a full group lifecycle against real resources.

use rustgrace::graceful::{prepare, Context, Notify, OnError, Options, Phase, Signal, TaskFailure};
use rustgrace::server::HealthServer;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

type Failures = Arc<Mutex<Vec<(Phase, String)>>>;

fn recording_options() -> (Options, Failures) {
    let failures: Failures = Arc::new(Mutex::new(Vec::new()));
    let sink = OnError::new(
        Arc::clone(&failures),
        |_ctx: &Context, failures: &Failures, failure: &TaskFailure| {
            failures
                .lock()
                .unwrap()
                .push((failure.id.phase, failure.error.to_string()));
        },
    );

    (Options::default().notify(Notify::none()).on_error(sink), failures)
}

async fn serve(ctx: Context, server: Arc<HealthServer>) -> anyhow::Result<()> {
    server.run(ctx).await
}

async fn stop(ctx: Context, server: Arc<HealthServer>) -> anyhow::Result<()> {
    server.close(ctx).await
}

async fn health_check(server: &HealthServer) -> std::io::Result<String> {
    let mut stream = TcpStream::connect(server.local_addr()).await?;
    stream
        .write_all(b"GET /health HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n")
        .await?;

    let mut response = String::new();
    stream.read_to_string(&mut response).await?;
    Ok(response)
}

#[tokio::test]
async fn test_health_server_lifecycle() {
    let (options, failures) = recording_options();
    let (shutdown, mut group) = prepare(&Context::background(), options).unwrap();

    let server = Arc::new(HealthServer::bind("127.0.0.1:0".parse().unwrap()).await.unwrap());
    group.process(Arc::clone(&server), serve);
    group.close(Arc::clone(&server), stop);

    let waiter = tokio::spawn(group.wait(Duration::from_secs(5)));

    let response = health_check(&server).await.expect("server should answer");
    assert!(response.starts_with("HTTP/1.1 200 OK"));

    shutdown.cancel();
    tokio::time::timeout(Duration::from_secs(5), waiter)
        .await
        .expect("wait should finish within the deadline")
        .unwrap();

    assert!(health_check(&server).await.is_err());
    assert!(failures.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_failing_foreground_reports_then_tears_down() {
    let (options, failures) = recording_options();
    let (shutdown, mut group) = prepare(&Context::background(), options).unwrap();
    let closed = Arc::new(AtomicUsize::new(0));

    group.process((), |_ctx: Context, _: ()| async move {
        anyhow::bail!("listener crashed")
    });

    for _ in 0..3 {
        group.close(Arc::clone(&closed), |_ctx: Context, closed: Arc<AtomicUsize>| async move {
            closed.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
    }

    tokio::time::timeout(Duration::from_secs(5), group.wait(Duration::from_secs(1)))
        .await
        .expect("wait should return");

    assert!(shutdown.is_done());
    assert_eq!(closed.load(Ordering::SeqCst), 3);
    assert_eq!(
        *failures.lock().unwrap(),
        vec![(Phase::Foreground, "listener crashed".to_string())]
    );
}

#[tokio::test]
async fn test_teardown_errors_reach_sink() {
    let (options, failures) = recording_options();
    let (shutdown, mut group) = prepare(&Context::background(), options).unwrap();

    for i in 0..4 {
        group.close(i, |_ctx: Context, i: usize| async move {
            tokio::time::sleep(Duration::from_millis(5 * i as u64)).await;
            if i % 2 == 0 {
                anyhow::bail!("close {} failed", i);
            }
            Ok(())
        });
    }

    shutdown.cancel();
    group.wait(Duration::from_secs(5)).await;

    let mut failures = failures.lock().unwrap().clone();
    failures.sort();
    assert_eq!(
        failures,
        vec![
            (Phase::Teardown, "close 0 failed".to_string()),
            (Phase::Teardown, "close 2 failed".to_string()),
        ]
    );
}

#[tokio::test]
async fn test_teardown_gets_fresh_deadline() {
    let (options, _failures) = recording_options();
    let parent = Context::background().with_timeout(Duration::from_millis(10));
    let (shutdown, mut group) = prepare(&parent, options).unwrap();
    let observed = Arc::new(Mutex::new(None));

    let slot = Arc::clone(&observed);
    group.close(slot, |ctx: Context, slot: Arc<Mutex<Option<Duration>>>| async move {
        let remaining = ctx
            .deadline()
            .map(|deadline| deadline.saturating_duration_since(tokio::time::Instant::now()));
        *slot.lock().unwrap() = remaining;
        Ok(())
    });

    // The parent deadline ends the foreground phase.
    group.wait(Duration::from_secs(30)).await;

    assert!(shutdown.is_done());
    let remaining = observed.lock().unwrap().expect("teardown context has a deadline");
    assert!(remaining > Duration::from_secs(20));
}

#[cfg(unix)]
#[tokio::test]
async fn test_signal_starts_teardown() {
    let (options, failures) = recording_options();
    let options = options.notify(Notify::new([Signal::User1]));
    let (shutdown, mut group) = prepare(&Context::background(), options).unwrap();
    let closed = Arc::new(AtomicUsize::new(0));

    group.close(Arc::clone(&closed), |_ctx: Context, closed: Arc<AtomicUsize>| async move {
        closed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    });
    assert!(!group.shutdown_context().is_done());

    let status = std::process::Command::new("kill")
        .args(["-USR1", &std::process::id().to_string()])
        .status()
        .expect("failed to run kill");
    assert!(status.success());

    tokio::time::timeout(Duration::from_secs(2), group.wait(Duration::from_secs(1)))
        .await
        .expect("signal should end the foreground phase");

    assert!(shutdown.is_done());
    assert_eq!(closed.load(Ordering::SeqCst), 1);
    assert!(failures.lock().unwrap().is_empty());
}
