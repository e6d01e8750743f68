#![allow(clippy::unwrap_used, clippy::expect_used)]

mod support;

use mailchat_common::Envelope;
use mailchat_module::{ConfigError, ModuleError, testing::Failure};
use pretty_assertions::assert_eq;
use support::{Fixture, addrs, envelope, target};

fn rejection(result: &Result<(), ModuleError>) -> String {
    match result {
        Err(ModuleError::Rejected(reply)) => reply.to_string(),
        other => panic!("expected a rejection, got {other:?}"),
    }
}

async fn deliver(
    graph: &mailchat_module::Graph,
    name: &str,
    envelope: &Envelope,
) -> Vec<Result<(), ModuleError>> {
    target(graph, name)
        .deliver(envelope, &envelope.recipients)
        .await
}

#[tokio::test]
async fn unmatched_destination_falls_to_default_reject() {
    let fixture = Fixture::new();
    let graph = fixture
        .build(
            r#"[
                (name: "test.endpoint", children: [(name: "use", args: ["&routing"])]),
                (name: "test.target", args: ["mailboxes"]),
                (name: "msgpipeline", args: ["routing"], children: [
                    (name: "source", args: ["example.com"], children: [
                        (name: "check", children: [(name: "require_valid_sender")]),
                        (name: "destination", args: ["example.com"], children: [
                            (name: "deliver_to", args: ["&mailboxes"]),
                        ]),
                        (name: "default_destination", children: [
                            (name: "reject", args: ["550", "5.1.1", "User", "doesn't", "exist"]),
                        ]),
                    ]),
                    (name: "default_source", children: [(name: "reject")]),
                ]),
            ]"#,
        )
        .await
        .unwrap();

    let message = envelope("a@example.com", &["x@other.com"]);
    let results = deliver(&graph, "routing", &message).await;

    assert_eq!(rejection(&results[0]), "550 5.1.1 User doesn't exist");
    assert_eq!(fixture.harness.target("mailboxes").unwrap().attempts(), 0);
}

#[tokio::test]
async fn first_declared_rule_wins() {
    let fixture = Fixture::new();
    let graph = fixture
        .build(
            r#"[
                (name: "test.endpoint", children: [(name: "use", args: ["&routing"])]),
                (name: "test.target", args: ["by_domain"]),
                (name: "test.target", args: ["by_address"]),
                (name: "test.target", args: ["fallback"]),
                (name: "msgpipeline", args: ["routing"], children: [
                    (name: "destination", args: ["example.com"], children: [
                        (name: "deliver_to", args: ["&by_domain"]),
                    ]),
                    (name: "destination", args: ["a@example.com"], children: [
                        (name: "deliver_to", args: ["&by_address"]),
                    ]),
                    (name: "default_destination", children: [
                        (name: "deliver_to", args: ["&fallback"]),
                    ]),
                ]),
            ]"#,
        )
        .await
        .unwrap();

    let message = envelope("sender@example.net", &["a@example.com", "b@example.org"]);
    let results = deliver(&graph, "routing", &message).await;

    assert!(results.iter().all(Result::is_ok));
    assert_eq!(
        fixture.harness.target("by_domain").unwrap().recipients(),
        vec!["a@example.com"]
    );
    assert_eq!(fixture.harness.target("by_address").unwrap().attempts(), 0);
    assert_eq!(
        fixture.harness.target("fallback").unwrap().recipients(),
        vec!["b@example.org"]
    );
}

#[tokio::test]
async fn source_rules_select_by_sender() {
    let fixture = Fixture::new();
    let graph = fixture
        .build(
            r#"[
                (name: "test.endpoint", children: [(name: "use", args: ["&routing"])]),
                (name: "test.target", args: ["internal"]),
                (name: "msgpipeline", args: ["routing"], children: [
                    (name: "source", args: ["*.example.com"], children: [
                        (name: "deliver_to", args: ["&internal"]),
                    ]),
                    (name: "default_source", children: [
                        (name: "reject", args: ["554", "5.7.1", "Relaying", "denied"]),
                    ]),
                ]),
            ]"#,
        )
        .await
        .unwrap();

    let internal = envelope("a@mx.example.com", &["b@elsewhere.org"]);
    assert!(deliver(&graph, "routing", &internal).await[0].is_ok());

    let external = envelope("a@example.net", &["b@elsewhere.org"]);
    let results = deliver(&graph, "routing", &external).await;
    assert_eq!(rejection(&results[0]), "554 5.7.1 Relaying denied");

    let bounce = envelope("<>", &["b@elsewhere.org"]);
    assert!(deliver(&graph, "routing", &bounce).await[0].is_err());
}

#[tokio::test]
async fn results_are_reported_per_recipient() {
    let fixture = Fixture::new();
    let graph = fixture
        .build(
            r#"[
                (name: "test.endpoint", children: [(name: "use", args: ["&routing"])]),
                (name: "test.target", args: ["mailboxes"], children: [
                    (name: "fail_permanent", args: ["b@example.com"]),
                ]),
                (name: "msgpipeline", args: ["routing"], children: [
                    (name: "destination", args: ["example.com"], children: [
                        (name: "deliver_to", args: ["&mailboxes"]),
                    ]),
                    (name: "default_destination", children: [(name: "reject")]),
                ]),
            ]"#,
        )
        .await
        .unwrap();

    let message = envelope(
        "s@example.org",
        &["a@example.com", "b@example.com", "c@example.net"],
    );
    let results = deliver(&graph, "routing", &message).await;

    assert!(results[0].is_ok());
    assert!(matches!(&results[1], Err(ModuleError::Permanent(_))));
    assert_eq!(
        rejection(&results[2]),
        "554 5.7.0 Message rejected due to a local policy"
    );
}

#[tokio::test]
async fn expanded_recipients_report_to_their_origin() {
    let fixture = Fixture::new();
    let graph = fixture
        .build(
            r#"[
                (name: "test.endpoint", children: [(name: "use", args: ["&routing"])]),
                (name: "test.target", args: ["local"]),
                (name: "test.target", args: ["remote"]),
                (name: "msgpipeline", args: ["routing"], children: [
                    (name: "modify", children: [
                        (name: "replace_rcpt", args: ["team@example.com", "x@example.com", "y@example.org"]),
                    ]),
                    (name: "destination", args: ["example.com"], children: [
                        (name: "deliver_to", args: ["&local"]),
                    ]),
                    (name: "default_destination", children: [
                        (name: "deliver_to", args: ["&remote"]),
                    ]),
                ]),
            ]"#,
        )
        .await
        .unwrap();

    let message = envelope("s@example.com", &["team@example.com", "z@example.com"]);
    let results = deliver(&graph, "routing", &message).await;
    assert!(results.iter().all(Result::is_ok));
    assert_eq!(
        fixture.harness.target("local").unwrap().recipients(),
        vec!["x@example.com", "z@example.com"]
    );
    assert_eq!(
        fixture.harness.target("remote").unwrap().recipients(),
        vec!["y@example.org"]
    );

    // A failure for one expansion fails the recipient it came from, and
    // only that one
    fixture
        .harness
        .target("remote")
        .unwrap()
        .set_failure("y@example.org", Some(Failure::Temporary));
    let results = deliver(&graph, "routing", &message).await;
    assert!(matches!(&results[0], Err(err) if err.is_temporary()));
    assert!(results[1].is_ok());
}

#[tokio::test]
async fn reroute_runs_nested_rules() {
    let fixture = Fixture::new();
    let graph = fixture
        .build(
            r#"[
                (name: "test.endpoint", children: [(name: "use", args: ["&routing"])]),
                (name: "test.target", args: ["archive"]),
                (name: "msgpipeline", args: ["routing"], children: [
                    (name: "destination", args: ["example.com"], children: [
                        (name: "modify", children: [
                            (name: "replace_rcpt", args: ["example.com", "@archive.example.com"]),
                        ]),
                        (name: "reroute", children: [
                            (name: "destination", args: ["archive.example.com"], children: [
                                (name: "deliver_to", args: ["&archive"]),
                            ]),
                            (name: "default_destination", children: [(name: "reject")]),
                        ]),
                    ]),
                    (name: "default_destination", children: [(name: "reject")]),
                ]),
            ]"#,
        )
        .await
        .unwrap();

    let message = envelope("s@example.com", &["a@example.com"]);
    assert!(deliver(&graph, "routing", &message).await[0].is_ok());
    assert_eq!(
        fixture.harness.target("archive").unwrap().recipients(),
        vec!["a@archive.example.com"]
    );
}

#[tokio::test]
async fn pipelines_chain_into_each_other() {
    let fixture = Fixture::new();
    let graph = fixture
        .build(
            r#"[
                (name: "test.endpoint", children: [(name: "use", args: ["&outer"])]),
                (name: "test.target", args: ["mailboxes"]),
                (name: "msgpipeline", args: ["outer"], children: [
                    (name: "modify", children: [
                        (name: "add_header", args: ["X-Routed-By", "outer"]),
                    ]),
                    (name: "default_destination", children: [
                        (name: "deliver_to", args: ["&inner"]),
                    ]),
                ]),
                (name: "msgpipeline", args: ["inner"], children: [
                    (name: "default_destination", children: [
                        (name: "deliver_to", args: ["&mailboxes"]),
                    ]),
                ]),
            ]"#,
        )
        .await
        .unwrap();

    let message = envelope("s@example.com", &["a@example.com"]);
    assert!(deliver(&graph, "outer", &message).await[0].is_ok());

    let delivered = fixture.harness.target("mailboxes").unwrap().delivered();
    assert_eq!(delivered.len(), 1);
    assert_eq!(delivered[0].0.header("X-Routed-By").as_deref(), Some("outer"));
}

#[tokio::test]
async fn destination_checks_apply_per_destination() {
    let fixture = Fixture::new();
    let graph = fixture
        .build(
            r#"[
                (name: "test.endpoint", children: [(name: "use", args: ["&routing"])]),
                (name: "test.target", args: ["mailboxes"]),
                (name: "msgpipeline", args: ["routing"], children: [
                    (name: "check", children: [(name: "require_valid_sender")]),
                    (name: "destination", args: ["example.com"], children: [
                        (name: "check", children: [
                            (name: "deny_recipients", args: ["blocked@example.com"]),
                        ]),
                        (name: "deliver_to", args: ["&mailboxes"]),
                    ]),
                    (name: "default_destination", children: [(name: "reject")]),
                ]),
            ]"#,
        )
        .await
        .unwrap();

    let message = envelope("s@example.com", &["a@example.com", "b@example.org"]);
    let results = deliver(&graph, "routing", &message).await;
    assert!(results[0].is_ok());
    assert!(results[1].is_err());

    let blocked = envelope("s@example.com", &["blocked@example.com"]);
    let results = deliver(&graph, "routing", &blocked).await;
    assert_eq!(
        rejection(&results[0]),
        "550 5.7.1 Recipient address rejected: blocked@example.com"
    );
}

#[tokio::test]
async fn blockchain_transactions_are_broadcast() {
    let fixture = Fixture::new();
    let graph = fixture
        .build(
            r#"[
                (name: "test.endpoint", children: [(name: "use", args: ["&routing"])]),
                (name: "test.chain", args: ["chain"], children: [(name: "type", args: ["eth"])]),
                (name: "test.target", args: ["mailboxes"]),
                (name: "msgpipeline", args: ["routing"], children: [
                    (name: "modify", children: [
                        (name: "blockchain_tx", args: ["&chain"]),
                    ]),
                    (name: "default_destination", children: [
                        (name: "deliver_to", args: ["&mailboxes"]),
                    ]),
                ]),
            ]"#,
        )
        .await
        .unwrap();

    let mut message = envelope("s@example.com", &["a@example.com"]);
    message.prepend_header("X-Blockchain-Tx", "0xf86c0a85");
    message.prepend_header("X-Blockchain-Type", "eth");
    assert!(deliver(&graph, "routing", &message).await[0].is_ok());

    let mut other_chain = envelope("s@example.com", &["a@example.com"]);
    other_chain.prepend_header("X-Blockchain-Tx", "0xdeadbeef");
    other_chain.prepend_header("X-Blockchain-Type", "btc");
    assert!(deliver(&graph, "routing", &other_chain).await[0].is_ok());

    assert_eq!(*fixture.sent.lock(), vec!["0xf86c0a85"]);
    assert_eq!(fixture.harness.target("mailboxes").unwrap().attempts(), 2);
}

#[tokio::test]
async fn missing_default_is_a_config_error() {
    let fixture = Fixture::new();
    let err = fixture
        .build(
            r#"[
                (name: "test.endpoint", children: [(name: "use", args: ["&routing"])]),
                (name: "test.target", args: ["mailboxes"]),
                (name: "msgpipeline", args: ["routing"], line: 3, children: [
                    (name: "source", args: ["example.com"], children: [
                        (name: "deliver_to", args: ["&mailboxes"]),
                    ]),
                ]),
            ]"#,
        )
        .await
        .unwrap_err();

    let err = err.downcast_ref::<ConfigError>().unwrap();
    assert!(matches!(err, ConfigError::MissingDirective { name, .. } if name == "default_source"));
    assert_eq!(err.to_string(), "test.ron:3: missing required directive: default_source");
}

#[tokio::test]
async fn conflicting_actions_are_rejected() {
    let fixture = Fixture::new();
    let err = fixture
        .build(
            r#"[
                (name: "test.endpoint", children: [(name: "use", args: ["&routing"])]),
                (name: "test.target", args: ["mailboxes"]),
                (name: "msgpipeline", args: ["routing"], children: [
                    (name: "default_destination", children: [
                        (name: "deliver_to", args: ["&mailboxes"]),
                        (name: "reject", line: 6),
                    ]),
                ]),
            ]"#,
        )
        .await
        .unwrap_err();

    assert_eq!(
        err.to_string(),
        "test.ron:6: only one of deliver_to, reroute or reject may be used in a block"
    );
}

#[tokio::test]
async fn references_must_have_the_right_capability() {
    let fixture = Fixture::new();
    let err = fixture
        .build(
            r#"[
                (name: "test.endpoint", children: [(name: "use", args: ["&routing"])]),
                (name: "test.target", args: ["mailboxes"]),
                (name: "msgpipeline", args: ["routing"], children: [
                    (name: "check", args: ["&mailboxes"], line: 4),
                    (name: "default_destination", children: [
                        (name: "deliver_to", args: ["&mailboxes"]),
                    ]),
                ]),
            ]"#,
        )
        .await
        .unwrap_err();

    assert_eq!(err.to_string(), "test.ron:4: mailboxes is not a check");
}

#[tokio::test]
async fn recipients_can_fan_out_across_pipelines() {
    let fixture = Fixture::new();
    let graph = fixture
        .build(
            r#"[
                (name: "test.endpoint", children: [(name: "use", args: ["&routing"])]),
                (name: "test.target", args: ["a"]),
                (name: "test.target", args: ["b"]),
                (name: "msgpipeline", args: ["routing"], children: [
                    (name: "default_destination", children: [
                        (name: "deliver_to", args: ["&a", "&b"]),
                    ]),
                ]),
            ]"#,
        )
        .await
        .unwrap();

    let message = envelope("s@example.com", &["r@example.com"]);
    let targets = addrs(&["r@example.com"]);
    let results = target(&graph, "routing").deliver(&message, &targets).await;

    assert!(results[0].is_ok());
    assert_eq!(fixture.harness.target("a").unwrap().attempts(), 1);
    assert_eq!(fixture.harness.target("b").unwrap().attempts(), 1);
}
