//! Deletion path tests: finalizer protocol and deletion policy.

mod common;

use common::*;
use mvirt_converge::clients::{CloudError, Op};
use mvirt_converge::finalizer::{self, FINALIZER};
use mvirt_converge::kinds::{DatabaseServer, StorageAccount};
use mvirt_converge::resource::{ConditionStatus, ConditionType, DeletionPolicy, Reason};
use mvirt_converge::{Action, ReconcileError};

#[tokio::test]
async fn test_delete_of_absent_resource_releases_finalizer() {
    let env = TestEnv::<DatabaseServer>::new();
    let mut db = managed::<DatabaseServer>("db1", db_params("Basic"));
    db.metadata.finalizers.push(FINALIZER.to_string());
    env.apply(db).await;
    env.request_delete("db1").await;

    let action = env.reconcile("db1").await.unwrap();
    assert_eq!(action, Action::await_change());
    assert!(env.try_get("db1").await.is_none());
    assert_eq!(env.cloud.calls(Op::Delete).await, 1);
    // A deleting object never takes the create path.
    assert_eq!(env.cloud.calls(Op::Create).await, 0);
}

#[tokio::test]
async fn test_transient_delete_failures_keep_finalizer() {
    let env = TestEnv::<DatabaseServer>::new();
    env.apply(managed::<DatabaseServer>("db1", db_params("Basic")))
        .await;
    env.reconcile("db1").await.unwrap();
    env.request_delete("db1").await;
    env.cloud
        .fail_next(Op::Delete, 2, CloudError::unavailable())
        .await;

    for _ in 0..2 {
        let err = env.reconcile("db1").await.unwrap_err();
        assert!(matches!(err, ReconcileError::Provider { .. }));
        assert_eq!(err.context(), "cannot delete database server");

        let db = env.get("db1").await;
        assert!(finalizer::has(&db.metadata));
        assert!(db.metadata.is_deleting());
        let ready = condition(&db, ConditionType::Ready);
        assert_eq!(ready.status, ConditionStatus::False);
        assert_eq!(ready.reason, Reason::Deleting);
        assert_eq!(
            condition(&db, ConditionType::Synced).reason,
            Reason::ReconcileError
        );
        assert!(env.cloud.observed("db1").await.is_some());
    }

    env.reconcile("db1").await.unwrap();
    assert!(env.try_get("db1").await.is_none());
    assert!(env.cloud.is_empty().await);
    assert_eq!(env.cloud.calls(Op::Delete).await, 3);
}

#[tokio::test]
async fn test_orphan_skips_external_delete() {
    let env = TestEnv::<StorageAccount>::new();
    let mut acct = managed::<StorageAccount>("acct1", storage_params("Standard_LRS"));
    acct.spec.deletion_policy = DeletionPolicy::Orphan;
    env.apply(acct).await;
    env.reconcile("acct1").await.unwrap();
    env.request_delete("acct1").await;

    env.reconcile("acct1").await.unwrap();

    assert!(env.try_get("acct1").await.is_none());
    assert_eq!(env.cloud.calls(Op::Delete).await, 0);
    assert!(env.cloud.observed("acct1").await.is_some());
}

#[tokio::test]
async fn test_foreign_finalizers_survive_deletion() {
    let env = TestEnv::<DatabaseServer>::new();
    let mut db = managed::<DatabaseServer>("db1", db_params("Basic"));
    db.metadata.finalizers.push("backup.example.io".to_string());
    env.apply(db).await;
    env.reconcile("db1").await.unwrap();
    env.request_delete("db1").await;

    env.reconcile("db1").await.unwrap();

    let db = env.get("db1").await;
    assert!(!finalizer::has(&db.metadata));
    assert_eq!(db.metadata.finalizers, vec!["backup.example.io".to_string()]);
    assert!(env.cloud.is_empty().await);
    // The surviving object no longer claims to be ready.
    let ready = condition(&db, ConditionType::Ready);
    assert_eq!(ready.status, ConditionStatus::False);
    assert_eq!(ready.reason, Reason::Deleting);

    // Nothing left for this engine to do.
    assert_eq!(env.reconcile("db1").await.unwrap(), Action::await_change());
    assert_eq!(env.cloud.calls(Op::Delete).await, 1);
}

#[tokio::test]
async fn test_connect_failure_blocks_deletion() {
    let env = TestEnv::<DatabaseServer>::new();
    env.apply(managed::<DatabaseServer>("db1", db_params("Basic")))
        .await;
    env.reconcile("db1").await.unwrap();
    env.edit("db1", |db| db.spec.provider_config_ref = Some("gone".to_string()))
        .await;
    env.request_delete("db1").await;

    let err = env.reconcile("db1").await.unwrap_err();
    assert!(matches!(err, ReconcileError::Auth { .. }));
    assert!(finalizer::has(&env.get("db1").await.metadata));
    assert!(env.cloud.observed("db1").await.is_some());
}

#[tokio::test]
async fn test_delete_uses_external_name() {
    let env = TestEnv::<mvirt_converge::kinds::VirtualNetworkRule>::new();
    env.apply(managed::<mvirt_converge::kinds::VirtualNetworkRule>(
        "rule1",
        rule_params("app"),
    ))
    .await;
    env.reconcile("rule1").await.unwrap();
    assert_eq!(env.cloud.len().await, 1);

    env.request_delete("rule1").await;
    env.reconcile("rule1").await.unwrap();

    assert!(env.cloud.is_empty().await);
    assert!(env.try_get("rule1").await.is_none());
}

#[tokio::test]
async fn test_orphaned_object_reports_deleting() {
    let env = TestEnv::<StorageAccount>::new();
    let mut acct = managed::<StorageAccount>("acct1", storage_params("Standard_LRS"));
    acct.spec.deletion_policy = DeletionPolicy::Orphan;
    acct.metadata.finalizers.push("backup.example.io".to_string());
    env.apply(acct).await;
    env.reconcile("acct1").await.unwrap();
    env.request_delete("acct1").await;

    env.reconcile("acct1").await.unwrap();

    let acct = env.get("acct1").await;
    assert_eq!(condition(&acct, ConditionType::Ready).reason, Reason::Deleting);
    assert!(env.cloud.observed("acct1").await.is_some());
}

#[tokio::test]
async fn test_failed_finalizer_release_is_retried() {
    let env = TestEnv::<DatabaseServer>::new();
    env.apply(managed::<DatabaseServer>("db1", db_params("Basic")))
        .await;
    env.reconcile("db1").await.unwrap();
    env.request_delete("db1").await;
    env.store.fail_updates(1);

    let err = env.reconcile("db1").await.unwrap_err();
    assert!(matches!(err, ReconcileError::Persistence { .. }));
    assert!(env.cloud.is_empty().await);

    let db = env.get("db1").await;
    assert!(finalizer::has(&db.metadata));
    let synced = condition(&db, ConditionType::Synced);
    assert_eq!(synced.status, ConditionStatus::False);
    assert_eq!(synced.reason, Reason::ReconcileError);

    // The resource is already gone at the provider, which counts as deleted.
    assert_eq!(env.reconcile("db1").await.unwrap(), Action::await_change());
    assert!(env.try_get("db1").await.is_none());
    assert_eq!(env.cloud.calls(Op::Delete).await, 2);
}

#[tokio::test]
async fn test_failed_finalizer_add_blocks_create() {
    let env = TestEnv::<DatabaseServer>::new();
    env.apply(managed::<DatabaseServer>("db1", db_params("Basic")))
        .await;
    env.store.fail_updates(1);

    let err = env.reconcile("db1").await.unwrap_err();
    assert!(matches!(err, ReconcileError::Persistence { .. }));
    assert_eq!(env.cloud.calls(Op::Create).await, 0);

    let db = env.get("db1").await;
    assert!(!finalizer::has(&db.metadata));
    assert_eq!(
        condition(&db, ConditionType::Synced).reason,
        Reason::ReconcileError
    );

    env.reconcile("db1").await.unwrap();
    assert!(finalizer::has(&env.get("db1").await.metadata));
    assert_eq!(env.cloud.calls(Op::Create).await, 1);
}
