use pretty_assertions::assert_eq;
use serde_json::json;
use stategraph_kernel::{
    CommitOutcome, CommitPolicy, KernelConfig, Lifecycle, OperationError, Params,
    ProductionError, TransformerKind,
};
use stategraph_test_utils::{
    delayed, failing, graph_shape, init_tracing, scripted_kernel, scripted_kernel_with_config,
    value,
};
use std::sync::Arc;
use std::time::Duration;

const NODE: &str = "node";

fn node() -> TransformerKind {
    TransformerKind::from_static(NODE)
}

#[tokio::test]
async fn test_full_revert_restores_previous_graph() {
    init_tracing();
    let (kernel, _) = scripted_kernel(&[NODE]);
    let root = kernel.root();
    let seeded = kernel
        .commit(
            kernel.begin(root).insert(node(), value(1)).insert(node(), value(2)),
            CommitPolicy::FULL_REVERT,
        )
        .await
        .unwrap();
    let first = seeded[0].reference.unwrap();
    let before = graph_shape(&kernel.graph());

    let err = kernel
        .commit(
            kernel
                .begin(first)
                .insert(node(), value(3))
                .upsert_tagged("tagged", node(), value(4))
                .delete(seeded[1].reference.unwrap())
                .insert(node(), failing()),
            CommitPolicy::FULL_REVERT,
        )
        .await
        .unwrap_err();

    assert_eq!(err.operation, 3);
    assert!(matches!(
        err.source,
        OperationError::Production {
            source: ProductionError::Failed(_),
            ..
        }
    ));
    assert_eq!(graph_shape(&kernel.graph()), before);
}

#[tokio::test]
async fn test_partial_commit_isolates_failure() {
    let (kernel, _) = scripted_kernel(&[NODE]);
    let root = kernel.root();

    let selectors = kernel
        .commit(
            kernel
                .begin(root)
                .insert(node(), value(1))
                .to(root)
                .insert(node(), failing())
                .to(root)
                .insert(node(), value(3)),
            CommitPolicy::PARTIAL,
        )
        .await
        .unwrap();

    assert_eq!(
        selectors.iter().map(|s| s.ok).collect::<Vec<_>>(),
        vec![true, false, true]
    );
    let lifecycles: Vec<_> = selectors
        .iter()
        .map(|s| kernel.resolve(s.reference.unwrap()).unwrap().lifecycle)
        .collect();
    assert_eq!(
        lifecycles,
        vec![Lifecycle::Ok, Lifecycle::Errored, Lifecycle::Ok]
    );

    let errored = kernel.resolve(selectors[1].reference.unwrap()).unwrap();
    assert!(errored.payload.is_none());
    assert_eq!(errored.error.as_deref(), Some("node asked to fail"));
    assert!(matches!(
        kernel.journal().last().map(|r| r.outcome),
        Some(CommitOutcome::PartiallyApplied { failed }) if failed == vec![1]
    ));
}

#[tokio::test]
async fn test_selectors_follow_operation_order() {
    let (kernel, _) = scripted_kernel(&[NODE]);
    let root = kernel.root();

    let selectors = kernel
        .commit(
            kernel
                .begin(root)
                .insert(node(), value(10))
                .insert(node(), value(20))
                .insert(node(), value(30)),
            CommitPolicy::FULL_REVERT,
        )
        .await
        .unwrap();

    let values: Vec<_> = selectors
        .iter()
        .map(|s| s.payload_as::<serde_json::Value>().unwrap()["value"].clone())
        .collect();
    assert_eq!(values, vec![json!(10), json!(20), json!(30)]);
}

#[tokio::test]
async fn test_anchor_deleted_earlier_in_transaction() {
    let (kernel, _) = scripted_kernel(&[NODE]);
    let root = kernel.root();
    let seeded = kernel
        .commit(kernel.begin(root).insert(node(), value(1)), CommitPolicy::FULL_REVERT)
        .await
        .unwrap();
    let doomed = seeded[0].reference.unwrap();

    let err = kernel
        .commit(
            kernel.begin(doomed).delete(doomed).insert(node(), value(2)),
            CommitPolicy::FULL_REVERT,
        )
        .await
        .unwrap_err();

    assert_eq!(err.operation, 1);
    assert!(err.source.is_invalid_reference());
    assert!(kernel.resolve(doomed).is_some());
}

#[tokio::test]
async fn test_stale_reference_is_invalid() {
    let (kernel, _) = scripted_kernel(&[NODE]);
    let root = kernel.root();
    let seeded = kernel
        .commit(kernel.begin(root).insert(node(), value(1)), CommitPolicy::FULL_REVERT)
        .await
        .unwrap();
    let stale = seeded[0].reference.unwrap();
    kernel
        .commit(kernel.begin(root).delete(stale), CommitPolicy::FULL_REVERT)
        .await
        .unwrap();

    let selectors = kernel
        .commit(
            kernel.begin(stale).insert(node(), value(2)),
            CommitPolicy::PARTIAL,
        )
        .await
        .unwrap();

    assert!(!selectors[0].ok);
    assert!(selectors[0].reference.is_none());
    assert!(selectors[0]
        .error
        .as_ref()
        .is_some_and(OperationError::is_invalid_reference));
    assert_eq!(kernel.node_count(), 1);
}

#[tokio::test]
async fn test_unknown_transformer_fails_operation() {
    let (kernel, _) = scripted_kernel(&[NODE]);

    let err = kernel
        .commit(
            kernel
                .begin(kernel.root())
                .insert("not-registered", Params::empty()),
            CommitPolicy::FULL_REVERT,
        )
        .await
        .unwrap_err();

    assert!(matches!(
        err.source,
        OperationError::Production {
            source: ProductionError::UnknownTransformer(_),
            ..
        }
    ));
}

#[tokio::test]
async fn test_production_timeout() {
    let config = KernelConfig::new().with_production_timeout(Duration::from_millis(20));
    let (kernel, _) = scripted_kernel_with_config(config, &[NODE]);

    let err = kernel
        .commit(
            kernel.begin(kernel.root()).insert(node(), delayed(2_000)),
            CommitPolicy::FULL_REVERT,
        )
        .await
        .unwrap_err();

    assert!(matches!(
        err.source,
        OperationError::Production {
            source: ProductionError::TimedOut(_),
            ..
        }
    ));
    assert_eq!(kernel.node_count(), 1);
}

#[tokio::test]
async fn test_commits_apply_in_submission_order() {
    let (kernel, _) = scripted_kernel(&[NODE]);
    let root = kernel.root();

    let commits = (0..5).map(|i| {
        let params = Params::new(json!({ "delay_ms": 5 * (5 - i), "value": i }));
        kernel.commit(kernel.begin(root).insert(node(), params), CommitPolicy::FULL_REVERT)
    });
    let results = futures::future::join_all(commits).await;
    assert!(results.iter().all(Result::is_ok));

    let values: Vec<_> = kernel
        .children(root)
        .into_iter()
        .map(|child| {
            kernel.resolve(child).unwrap().payload_as::<serde_json::Value>().unwrap()["value"]
                .clone()
        })
        .collect();
    assert_eq!(values, (0..5).map(|i| json!(i)).collect::<Vec<_>>());

    let sequences: Vec<_> = kernel.journal().records().iter().map(|r| r.sequence).collect();
    assert_eq!(sequences, vec![1, 2, 3, 4, 5]);
}

#[tokio::test]
async fn test_readers_never_observe_in_flight_commit() {
    let (kernel, _) = scripted_kernel(&[NODE]);
    let kernel = Arc::new(kernel);
    let root = kernel.root();

    let writer = {
        let kernel = Arc::clone(&kernel);
        tokio::spawn(async move {
            kernel
                .commit(
                    kernel
                        .begin(root)
                        .insert(node(), value(1))
                        .insert(node(), delayed(100)),
                    CommitPolicy::FULL_REVERT,
                )
                .await
        })
    };

    tokio::time::sleep(Duration::from_millis(30)).await;
    assert_eq!(kernel.node_count(), 1);
    assert!(kernel
        .graph()
        .views()
        .iter()
        .all(|view| view.lifecycle.is_settled()));

    writer.await.unwrap().unwrap();
    assert_eq!(kernel.node_count(), 3);
    assert!(kernel
        .graph()
        .views()
        .iter()
        .all(|view| view.lifecycle == Lifecycle::Ok));
}

#[tokio::test]
async fn test_dropped_commit_leaves_graph_untouched() {
    let (kernel, _) = scripted_kernel(&[NODE]);
    let root = kernel.root();
    let before = graph_shape(&kernel.graph());

    let outcome = tokio::time::timeout(
        Duration::from_millis(20),
        kernel.commit(
            kernel.begin(root).insert(node(), value(1)).insert(node(), delayed(1_000)),
            CommitPolicy::PARTIAL,
        ),
    )
    .await;
    assert!(outcome.is_err());

    assert_eq!(graph_shape(&kernel.graph()), before);
    // The commit lock was released with the dropped future
    kernel
        .commit(kernel.begin(root).insert(node(), value(2)), CommitPolicy::FULL_REVERT)
        .await
        .unwrap();
    assert_eq!(kernel.node_count(), 2);
}

#[tokio::test]
async fn test_root_cannot_be_deleted() {
    let (kernel, _) = scripted_kernel(&[NODE]);
    let root = kernel.root();

    let selectors = kernel
        .commit(kernel.begin(root).delete(root), CommitPolicy::PARTIAL)
        .await
        .unwrap();

    assert!(!selectors[0].ok);
    assert!(kernel.resolve(root).is_some_and(|view| view.is_ok()));
}
