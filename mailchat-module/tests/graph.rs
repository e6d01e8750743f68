#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::sync::Arc;

use mailchat_module::{
    ConfigError,
    testing::{Harness, build},
};
use pretty_assertions::assert_eq;

fn config_error(err: &anyhow::Error) -> &ConfigError {
    err.downcast_ref::<ConfigError>()
        .expect("expected a configuration error")
}

#[tokio::test]
async fn forward_references_resolve() {
    let harness = Harness::new();
    let graph = build(
        harness.registry(),
        r#"[
            (name: "test.endpoint", args: ["tcp://127.0.0.1:2525"], line: 1, children: [
                (name: "use", args: ["&first"], line: 2),
            ]),
            (name: "test.module", args: ["first"], line: 4, children: [
                (name: "use", args: ["&second"], line: 5),
            ]),
            (name: "test.module", args: ["second"], line: 7),
        ]"#,
    )
    .await
    .unwrap();

    assert_eq!(graph.endpoints().len(), 1);
    assert_eq!(graph.instances().names(), vec!["first", "second"]);

    // Modules finish initializing innermost first
    let order: Vec<&str> = graph
        .modules()
        .iter()
        .map(|module| module.instance().display_name())
        .collect();
    assert_eq!(order, vec!["second", "first"]);
}

#[tokio::test]
async fn aliases_resolve_to_the_same_instance() {
    let harness = Harness::new();
    let graph = build(
        harness.registry(),
        r#"[
            (name: "test.endpoint", children: [
                (name: "use", args: ["&mailboxes"]),
            ]),
            (name: "test.module", args: ["local_mailboxes", "mailboxes"]),
        ]"#,
    )
    .await
    .unwrap();

    let primary = graph.get("local_mailboxes").unwrap();
    let alias = graph.get("mailboxes").unwrap();
    assert!(Arc::ptr_eq(primary, alias));
    assert_eq!(graph.modules().len(), 1);
}

#[tokio::test]
async fn block_without_name_uses_its_type_name() {
    let harness = Harness::new();
    let graph = build(
        harness.registry(),
        r#"[
            (name: "test.endpoint", children: [
                (name: "use", args: ["&test.module"]),
            ]),
            (name: "test.module"),
        ]"#,
    )
    .await
    .unwrap();

    assert!(graph.get("test.module").is_some());
}

#[tokio::test]
async fn duplicate_name_fails_before_any_endpoint_starts() {
    let harness = Harness::new();
    let err = build(
        harness.registry(),
        r#"[
            (name: "test.endpoint", line: 1, children: [
                (name: "use", args: ["&a"]),
            ]),
            (name: "test.module", args: ["a"], line: 4),
            (name: "test.target", args: ["a"], line: 5),
        ]"#,
    )
    .await
    .unwrap_err();

    let err = config_error(&err);
    assert!(matches!(err, ConfigError::DuplicateName { name, .. } if name == "a"));
    assert_eq!(err.to_string(), "test.ron:5: config block named a already exists");
    assert!(harness.closed().is_empty());
}

#[tokio::test]
async fn alias_clashing_with_a_name_is_a_duplicate() {
    let harness = Harness::new();
    let err = build(
        harness.registry(),
        r#"[
            (name: "test.endpoint"),
            (name: "test.module", args: ["a"]),
            (name: "test.module", args: ["b", "a"]),
        ]"#,
    )
    .await
    .unwrap_err();

    assert!(matches!(config_error(&err), ConfigError::DuplicateName { name, .. } if name == "a"));
}

#[tokio::test]
async fn unreferenced_block_is_unused() {
    let harness = Harness::new();
    let err = build(
        harness.registry(),
        r#"[
            (name: "test.endpoint", line: 1),
            (name: "test.module", args: ["orphan"], line: 2),
        ]"#,
    )
    .await
    .unwrap_err();

    assert_eq!(
        config_error(&err).to_string(),
        "test.ron:2: unused configuration block: orphan"
    );
    // The endpoint was already initialized and is closed again
    assert_eq!(harness.closed(), vec!["test.endpoint"]);
}

#[tokio::test]
async fn cycles_are_reported() {
    let harness = Harness::new();
    let err = build(
        harness.registry(),
        r#"[
            (name: "test.endpoint", children: [
                (name: "use", args: ["&a"]),
            ]),
            (name: "test.module", args: ["a"], children: [
                (name: "use", args: ["&b"]),
            ]),
            (name: "test.module", args: ["b"], children: [
                (name: "use", args: ["&a"]),
            ]),
        ]"#,
    )
    .await
    .unwrap_err();

    assert!(matches!(config_error(&err), ConfigError::CyclicReference { name, .. } if name == "a"));
}

#[tokio::test]
async fn unknown_reference() {
    let harness = Harness::new();
    let err = build(
        harness.registry(),
        r#"[
            (name: "test.endpoint", children: [
                (name: "use", args: ["&missing"], line: 2),
            ]),
        ]"#,
    )
    .await
    .unwrap_err();

    assert_eq!(
        config_error(&err).to_string(),
        "test.ron:2: unknown reference: missing"
    );
}

#[tokio::test]
async fn unknown_module_type() {
    let harness = Harness::new();
    let err = build(
        harness.registry(),
        r#"[
            (name: "test.endpoint"),
            (name: "storage.nonexistent", line: 2),
        ]"#,
    )
    .await
    .unwrap_err();

    assert!(matches!(config_error(&err), ConfigError::UnknownModule { name, .. } if name == "storage.nonexistent"));
}

#[tokio::test]
async fn at_least_one_endpoint_is_required() {
    let harness = Harness::new();
    let err = build(harness.registry(), r#"[(name: "hostname", args: ["mx"])]"#)
        .await
        .unwrap_err();

    assert!(matches!(config_error(&err), ConfigError::NoEndpoints));
}

#[tokio::test]
async fn unread_directives_are_unknown() {
    let harness = Harness::new();
    let err = build(
        harness.registry(),
        r#"[
            (name: "test.endpoint", children: [
                (name: "use", args: ["&a"]),
            ]),
            (name: "test.module", args: ["a"], children: [
                (name: "bogus", line: 5),
            ]),
        ]"#,
    )
    .await
    .unwrap_err();

    assert!(matches!(config_error(&err), ConfigError::UnknownDirective { name, .. } if name == "bogus"));
}

#[tokio::test]
async fn failed_init_closes_what_was_started() {
    let harness = Harness::new();
    let err = build(
        harness.registry(),
        r#"[
            (name: "test.endpoint", args: ["first"], children: [
                (name: "use", args: ["&ok"]),
            ]),
            (name: "test.endpoint", args: ["second"], children: [
                (name: "use", args: ["&broken"]),
            ]),
            (name: "test.module", args: ["ok"]),
            (name: "test.module", args: ["broken"], children: [
                (name: "fail"),
            ]),
        ]"#,
    )
    .await
    .unwrap_err();

    assert!(config_error(&err).to_string().ends_with("asked to fail"));
    assert_eq!(harness.closed(), vec!["test.endpoint", "ok"]);
}

#[tokio::test]
async fn inline_definitions_get_their_own_instance() {
    let harness = Harness::new();
    let graph = build(
        harness.registry(),
        r#"[
            (name: "test.endpoint", children: [
                (name: "use", args: ["test.module"], children: [
                    (name: "use", args: ["&shared"]),
                ]),
                (name: "use", args: ["test.target"]),
            ]),
            (name: "test.module", args: ["shared"]),
        ]"#,
    )
    .await
    .unwrap();

    // Inline definitions are not named, but are initialized and closed
    assert_eq!(graph.instances().names(), vec!["shared"]);
    assert_eq!(graph.modules().len(), 3);
    assert!(graph.modules().iter().any(|m| m.instance().name.is_empty()));
}

#[tokio::test]
async fn rebuilding_is_deterministic() {
    let source = r#"[
        (name: "state_dir", args: ["/srv/mailchat"]),
        (name: "test.endpoint", children: [
            (name: "use", args: ["&b", "&a"]),
        ]),
        (name: "test.module", args: ["a"]),
        (name: "test.module", args: ["b"], children: [
            (name: "use", args: ["&c"]),
        ]),
        (name: "test.module", args: ["c"]),
    ]"#;

    let order = |graph: &mailchat_module::Graph| -> Vec<String> {
        graph
            .modules()
            .iter()
            .map(|module| module.instance().name.clone())
            .collect()
    };

    let first = build(Harness::new().registry(), source).await.unwrap();
    let second = build(Harness::new().registry(), source).await.unwrap();

    assert_eq!(order(&first), vec!["c", "b", "a"]);
    assert_eq!(order(&first), order(&second));
    assert_eq!(
        first.globals().state_dir,
        std::path::PathBuf::from("/srv/mailchat")
    );
}

#[tokio::test]
async fn shutdown_closes_endpoints_then_modules_in_reverse() {
    let harness = Harness::new();
    let graph = build(
        harness.registry(),
        r#"[
            (name: "test.endpoint", children: [
                (name: "use", args: ["&a", "&b"]),
            ]),
            (name: "test.module", args: ["a"]),
            (name: "test.module", args: ["b"]),
        ]"#,
    )
    .await
    .unwrap();

    graph.close_endpoints().await;
    graph.close_modules().await;

    assert_eq!(harness.closed(), vec!["test.endpoint", "b", "a"]);
}
