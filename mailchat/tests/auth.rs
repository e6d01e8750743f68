#![allow(clippy::unwrap_used, clippy::expect_used)]

mod support;

use std::sync::Arc;

use mailchat_module::{Authenticator, ConfigError, Graph, ModuleError, testing::Harness};
use pretty_assertions::assert_eq;

const WITH_STORAGE: &str = r#"[
    (name: "test.endpoint", children: [(name: "use", args: ["&wallet_auth"])]),
    (name: "test.chain", args: ["chain"]),
    (name: "storage.memory", args: ["local_mailboxes"]),
    (name: "auth.pass_blockchain", args: ["wallet_auth"], children: [
        (name: "blockchain", args: ["&chain"]),
        (name: "storage", args: ["&local_mailboxes"]),
    ]),
]"#;

fn authenticator(graph: &Graph) -> Arc<dyn Authenticator> {
    Arc::clone(graph.get("wallet_auth").unwrap())
        .as_authenticator()
        .expect("not an authenticator")
}

#[tokio::test]
async fn signature_of_lowercased_key_authenticates() {
    let harness = Harness::new();
    let graph = support::build(&harness, WITH_STORAGE).await.unwrap();
    let auth = authenticator(&graph);

    auth.authenticate("0xAbCd@mail.example", "signed:0xabcd")
        .await
        .unwrap();

    assert!(matches!(
        auth.authenticate("0xAbCd@mail.example", "signed:0xAbCd").await,
        Err(ModuleError::UnknownCredentials)
    ));
    assert!(matches!(
        auth.authenticate("not an address", "signed:not").await,
        Err(ModuleError::UnknownCredentials)
    ));
}

#[tokio::test]
async fn chain_failures_are_not_credential_failures() {
    let harness = Harness::new();
    let graph = support::build(&harness, WITH_STORAGE).await.unwrap();

    let err = authenticator(&graph)
        .authenticate("0xabcd@mail.example", "unreachable")
        .await
        .unwrap_err();
    assert!(err.is_temporary());
}

#[tokio::test]
async fn users_are_managed_through_storage() {
    let harness = Harness::new();
    let graph = support::build(&harness, WITH_STORAGE).await.unwrap();
    let auth = authenticator(&graph);

    auth.create_user("0xabcd@mail.example", "ignored").await.unwrap();
    auth.create_user("0xef01@mail.example", "ignored").await.unwrap();
    assert!(matches!(
        auth.create_user("0xABCD@mail.example", "ignored").await,
        Err(ModuleError::AlreadyExists(_))
    ));

    assert_eq!(
        auth.list_users().await.unwrap(),
        vec!["0xabcd@mail.example", "0xef01@mail.example"]
    );

    auth.delete_user("0xabcd@mail.example").await.unwrap();
    assert_eq!(
        auth.list_users().await.unwrap(),
        vec!["0xef01@mail.example"]
    );
}

#[tokio::test]
async fn user_management_needs_storage() {
    let harness = Harness::new();
    let graph = support::build(
        &harness,
        r#"[
            (name: "test.endpoint", children: [(name: "use", args: ["&wallet_auth"])]),
            (name: "test.chain", args: ["chain"]),
            (name: "auth.pass_blockchain", args: ["wallet_auth"], children: [
                (name: "blockchain", args: ["&chain"]),
            ]),
        ]"#,
    )
    .await
    .unwrap();

    assert!(matches!(
        authenticator(&graph).list_users().await,
        Err(ModuleError::Unsupported)
    ));
}

#[tokio::test]
async fn blockchain_is_required() {
    let harness = Harness::new();
    let err = support::build(
        &harness,
        r#"[
            (name: "test.endpoint", children: [(name: "use", args: ["&wallet_auth"])]),
            (name: "auth.pass_blockchain", args: ["wallet_auth"]),
        ]"#,
    )
    .await
    .unwrap_err()
    .downcast::<ConfigError>()
    .expect("not a configuration error");

    assert!(matches!(err, ConfigError::MissingDirective { name, .. } if name == "blockchain"));
}
