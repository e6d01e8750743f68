#![allow(clippy::unwrap_used, clippy::expect_used)]

mod support;

use std::{
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use mailchat::{Control, Controller};
use mailchat_common::{Address, Envelope, Event, directive};
use mailchat_module::testing::Harness;
use parking_lot::Mutex;
use pretty_assertions::assert_eq;
use tokio::sync::mpsc;

const CONFIG: &str = r#"[
    (name: "hostname", args: ["mx.example.com"]),
    (name: "test.endpoint", children: [
        (name: "use", args: ["&local_routing", "&archive"]),
    ]),
    (name: "test.target", args: ["remote"]),
    (name: "test.module", args: ["archive"]),
    (name: "target.queue", args: ["outbound"], children: [
        (name: "target", args: ["&remote"]),
        (name: "location", args: ["memory"]),
        (name: "tick", args: ["10ms"]),
    ]),
    (name: "msgpipeline", args: ["local_routing"], children: [
        (name: "default_destination", children: [
            (name: "deliver_to", args: ["&outbound"]),
        ]),
    ]),
]"#;

async fn controller(harness: &Harness, source: &str) -> Controller {
    let nodes = directive::parse(source, "mailchat.ron").unwrap();
    Controller::build(Arc::new(support::registry(harness)), nodes)
        .await
        .unwrap()
}

fn envelope() -> Envelope {
    Envelope::new(
        Address::parse("a@example.com").unwrap(),
        vec![Address::parse("x@b.com").unwrap()],
        b"Subject: test\r\n\r\nHello\r\n".as_slice(),
    )
}

#[tokio::test]
async fn serves_until_shutdown_then_closes_in_order() {
    let harness = Harness::new();
    let controller = controller(&harness, CONFIG).await;

    // Endpoints are already closed when the Shutdown hooks run.
    let seen_by_hook = Arc::new(Mutex::new(None));
    let seen = Arc::clone(&seen_by_hook);
    let closed = harness.clone();
    controller.graph().hooks().add(Event::Shutdown, move || {
        *seen.lock() = Some(closed.closed());
        async { Ok(()) }
    });

    let routing = Arc::clone(controller.graph().get("local_routing").unwrap())
        .as_target()
        .unwrap();
    let (control, requests) = mpsc::channel(1);
    let server = tokio::spawn(controller.serve(requests));

    let message = envelope();
    let results = routing.deliver(&message, &message.recipients).await;
    assert!(results.iter().all(Result::is_ok), "{results:?}");

    let remote = harness.target("remote").unwrap();
    tokio::time::timeout(Duration::from_secs(1), async {
        while remote.recipients().is_empty() {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    })
    .await
    .expect("queued message never delivered");

    control.send(Control::Shutdown).await.unwrap();
    server.await.unwrap().unwrap();

    assert_eq!(*seen_by_hook.lock(), Some(vec!["test.endpoint".to_string()]));
    assert_eq!(harness.closed(), vec!["test.endpoint", "archive"]);
}

#[tokio::test]
async fn log_rotation_runs_hooks() {
    let harness = Harness::new();
    let controller = controller(&harness, CONFIG).await;

    let rotations = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&rotations);
    controller.graph().hooks().add(Event::LogRotate, move || {
        counter.fetch_add(1, Ordering::SeqCst);
        async { Ok(()) }
    });

    let (control, requests) = mpsc::channel(4);
    control.send(Control::LogRotate).await.unwrap();
    control.send(Control::LogRotate).await.unwrap();
    control.send(Control::Shutdown).await.unwrap();

    controller.serve(requests).await.unwrap();
    assert_eq!(rotations.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn dropped_control_shuts_down() {
    let harness = Harness::new();
    let controller = controller(&harness, CONFIG).await;

    let (control, requests) = mpsc::channel(1);
    drop(control);

    controller.serve(requests).await.unwrap();
    assert_eq!(harness.closed(), vec!["test.endpoint", "archive"]);
}

#[tokio::test]
async fn failed_ready_hook_stops_the_server() {
    let harness = Harness::new();
    let controller = controller(&harness, CONFIG).await;
    controller
        .graph()
        .hooks()
        .add(Event::Ready, || async { Err(anyhow::anyhow!("listener unavailable")) });

    let (_control, requests) = mpsc::channel(1);
    let err = controller.serve(requests).await.unwrap_err();

    assert_eq!(err.to_string(), "listener unavailable");
    assert_eq!(harness.closed(), vec!["test.endpoint", "archive"]);
}

#[tokio::test]
async fn loads_configuration_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("mailchat.ron");
    std::fs::write(&path, CONFIG).unwrap();

    let harness = Harness::new();
    let controller = Controller::load(Arc::new(support::registry(&harness)), &path)
        .await
        .unwrap();

    assert_eq!(controller.graph().globals().hostname, "mx.example.com");
    assert!(controller.graph().get("outbound").is_some());
    controller.shutdown().await;
}

#[tokio::test]
async fn configuration_errors_name_the_file() {
    let harness = Harness::new();
    let nodes = directive::parse(
        r#"[
            (name: "test.endpoint", children: [
                (name: "use", args: ["&missing"], line: 3),
            ], line: 2),
        ]"#,
        "broken.ron",
    )
    .unwrap();

    let err = Controller::build(Arc::new(support::registry(&harness)), nodes)
        .await
        .err()
        .expect("configuration should not build");
    assert!(err.to_string().starts_with("broken.ron:3:"), "{err}");
}
