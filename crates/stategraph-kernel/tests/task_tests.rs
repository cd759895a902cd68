use pretty_assertions::assert_eq;
use stategraph_kernel::{CommitPolicy, Lifecycle, TaskError, TaskRunner, TransformerKind};
use stategraph_test_utils::{delayed, graph_shape, init_tracing, scripted_kernel, value};
use std::sync::Arc;
use std::time::Duration;

const NODE: &str = "node";

fn node() -> TransformerKind {
    TransformerKind::from_static(NODE)
}

fn runner() -> TaskRunner {
    let (kernel, _) = scripted_kernel(&[NODE]);
    TaskRunner::new(Arc::new(kernel))
}

#[tokio::test]
async fn test_cancel_during_commit_reverts() {
    init_tracing();
    let runner = runner();
    let kernel = Arc::clone(runner.kernel());
    let before = graph_shape(&kernel.graph());

    let handle = runner.run("slow insert", |ctx| async move {
        let root = ctx.kernel().root();
        ctx.commit(
            ctx.begin(root).insert(node(), value(1)).insert(node(), delayed(5_000)),
            CommitPolicy::FULL_REVERT,
        )
        .await
    });

    tokio::time::sleep(Duration::from_millis(30)).await;
    handle.cancel();

    match handle.await {
        Err(TaskError::Commit(e)) => {
            assert!(e.is_cancellation());
            assert_eq!(e.operation, 1);
        }
        other => panic!("unexpected result {other:?}"),
    }
    assert_eq!(graph_shape(&kernel.graph()), before);
    assert_eq!(kernel.journal().len(), 1);
}

#[tokio::test]
async fn test_cancel_during_partial_commit_marks_node_errored() {
    let runner = runner();
    let kernel = Arc::clone(runner.kernel());

    let handle = runner.run("slow partial insert", |ctx| async move {
        let root = ctx.kernel().root();
        ctx.commit(
            ctx.begin(root)
                .insert(node(), value(1))
                .to(root)
                .insert(node(), delayed(5_000)),
            CommitPolicy::PARTIAL,
        )
        .await
    });

    tokio::time::sleep(Duration::from_millis(30)).await;
    handle.cancel();
    let selectors = handle.await.unwrap();

    assert!(selectors[0].ok);
    assert!(!selectors[1].ok);
    assert!(selectors[1]
        .error
        .as_ref()
        .is_some_and(|e| e.is_cancellation()));

    let cancelled = kernel.resolve(selectors[1].reference.unwrap()).unwrap();
    assert_eq!(cancelled.lifecycle, Lifecycle::Errored);
    assert!(cancelled.payload.is_none());
    assert!(kernel
        .graph()
        .views()
        .iter()
        .all(|view| view.lifecycle.is_settled()));
}

#[tokio::test]
async fn test_cancel_before_commit_leaves_no_trace() {
    let runner = runner();
    let kernel = Arc::clone(runner.kernel());

    let handle = runner.run("late insert", |ctx| async move {
        ctx.cancellation().cancelled().await;
        let root = ctx.kernel().root();
        ctx.commit(ctx.begin(root).insert(node(), value(1)), CommitPolicy::PARTIAL)
            .await
    });
    handle.cancel();

    assert!(matches!(handle.await, Err(TaskError::Cancelled)));
    assert_eq!(kernel.node_count(), 1);
    assert!(kernel.journal().is_empty());
}

#[tokio::test]
async fn test_task_commits_serialize_with_direct_commits() {
    let runner = runner();
    let kernel = Arc::clone(runner.kernel());
    let root = kernel.root();

    let task = runner.run("first", move |ctx| async move {
        ctx.commit(ctx.begin(root).insert(node(), delayed(50)), CommitPolicy::FULL_REVERT)
            .await
    });
    tokio::time::sleep(Duration::from_millis(10)).await;

    // Queued behind the task's commit
    kernel
        .commit(kernel.begin(root).insert(node(), value(2)), CommitPolicy::FULL_REVERT)
        .await
        .unwrap();
    let first = task.await.unwrap()[0].reference.unwrap();

    let children = kernel.children(root);
    assert_eq!(children.len(), 2);
    assert_eq!(children[0], first);
    assert_eq!(kernel.journal().total_commits(), 2);
}

#[tokio::test]
async fn test_resolution_failure_is_surfaced() {
    let runner = runner();

    let result = runner
        .run_and_wait("lookup", |ctx| async move {
            let root = ctx.kernel().root();
            let missing = ctx.kernel().children(root).first().copied();
            missing.ok_or_else(|| TaskError::resolution("no children yet"))
        })
        .await;

    match result {
        Err(TaskError::Resolution(reason)) => assert_eq!(reason, "no children yet"),
        other => panic!("unexpected result {other:?}"),
    }
}
