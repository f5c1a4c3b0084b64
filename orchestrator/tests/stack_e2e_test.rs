//! End-to-end start of a three-process stack.

#![cfg(unix)]

mod common;

use common::{healthy_stack_config, init_logger, stack_config};
use devstack_orchestrator::pipeline::{Pipeline, PipelineState};
use devstack_orchestrator::process::{ProcessState, StopSignal};
use devstack_orchestrator::setup::steps::start_steps;
use devstack_orchestrator::setup::SetupContext;
use devstack_orchestrator::{DevStack, StackError};
use tokio::time::{timeout, Duration};

async fn force_stop(ctx: &mut SetupContext) {
    ctx.supervisor.stop(true).await;
}

#[tokio::test]
async fn test_three_process_stack_completes() {
    init_logger();
    let dir = tempfile::tempdir().unwrap();
    let stack = DevStack::new(healthy_stack_config(dir.path()));

    let report = stack.start().await.unwrap();

    assert_eq!(report.state, PipelineState::Completed);
    assert_eq!(
        report.executed(),
        vec!["Start node", "Start worker", "Start relay"]
    );
    let processes = stack.supervisor().processes();
    let names: Vec<_> = processes.iter().map(|p| p.name().to_string()).collect();
    assert_eq!(names, vec!["node", "worker", "relay"]);
    for process in &processes {
        assert_eq!(process.state(), ProcessState::Ready);
        assert!(!process.has_exited());
    }
    // Default data dirs are recreated under the root
    assert!(dir.path().join("data").join("worker").is_dir());

    // Running components are not started twice
    let rerun = stack.start().await.unwrap();
    assert_eq!(rerun.skipped().len(), 3);

    stack.stop(false).await;
    for process in &processes {
        assert!(process.has_exited());
    }
}

#[tokio::test]
async fn test_kill_during_worker_start_aborts_pipeline() {
    init_logger();
    let dir = tempfile::tempdir().unwrap();
    let config = stack_config(
        dir.path(),
        "echo node-ready; exec sleep 30",
        "echo worker-booting; exec sleep 30",
        "echo relay-ready; exec sleep 30",
    );
    let stack = DevStack::new(config.clone());
    let supervisor = stack.supervisor().clone();

    let kill = supervisor.kill_switch();
    let observer = supervisor.clone();
    tokio::spawn(async move {
        while observer.get("worker").is_none() {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        kill.trigger();
    });

    let mut ctx = SetupContext::new(config, supervisor.clone());
    let mut pipeline = Pipeline::new("start")
        .steps(start_steps())
        .with_kill_switch(supervisor.kill_switch())
        .on_abort(|ctx: &mut SetupContext| Box::pin(force_stop(ctx)));

    let err = timeout(Duration::from_secs(10), pipeline.run(&mut ctx))
        .await
        .expect("kill aborts the pending start")
        .unwrap_err();

    assert!(err.is_killed());
    assert_eq!(pipeline.state(), PipelineState::Aborted);
    assert_eq!(pipeline.report().executed(), vec!["Start node"]);

    let node = supervisor.get("node").unwrap();
    timeout(Duration::from_secs(5), node.wait_exit()).await.unwrap();
    assert_eq!(node.state(), ProcessState::Ready);
    assert_eq!(node.last_signal(), Some(StopSignal::Kill));

    let worker = supervisor.get("worker").unwrap();
    assert_eq!(worker.state(), ProcessState::Killed);
    assert!(supervisor.get("relay").is_none());
}

#[tokio::test]
async fn test_failed_start_stops_earlier_processes() {
    init_logger();
    let dir = tempfile::tempdir().unwrap();
    let config = stack_config(
        dir.path(),
        "echo node-ready; exec sleep 30",
        "echo worker-ready; exec sleep 30",
        "echo 'relay: bad config'; exit 2",
    );
    let stack = DevStack::new(config);

    let err = stack.start().await.unwrap_err();

    assert!(!err.is_killed());
    assert!(err.to_string().contains("Start relay"), "{}", err);
    for name in ["node", "worker"] {
        let process = stack.supervisor().get(name).unwrap();
        timeout(Duration::from_secs(5), process.wait_exit()).await.unwrap();
        assert_eq!(process.last_signal(), Some(StopSignal::Kill));
    }
}

#[tokio::test]
async fn test_worker_dying_during_start_reports_runtime_exit() {
    init_logger();
    let dir = tempfile::tempdir().unwrap();
    let config = stack_config(
        dir.path(),
        "echo node-ready; exec sleep 30",
        "echo worker-ready; sleep 1; echo worker-crashed; exit 4",
        "echo relay-booting; exec sleep 30",
    );
    let stack = DevStack::new(config);

    let err = timeout(Duration::from_secs(10), stack.start())
        .await
        .expect("runtime exit aborts the pending relay start")
        .unwrap_err();

    match err {
        StackError::RuntimeExit {
            component,
            code,
            tail,
        } => {
            assert_eq!(component, "worker");
            assert_eq!(code, Some(4));
            assert!(tail.contains("worker-crashed"), "tail: {:?}", tail);
        }
        other => panic!("unexpected error: {}", other),
    }
    assert!(stack.kill_switch().is_triggered());

    for name in ["node", "relay"] {
        let process = stack.supervisor().get(name).unwrap();
        timeout(Duration::from_secs(5), process.wait_exit()).await.unwrap();
        assert_eq!(process.last_signal(), Some(StopSignal::Kill));
    }
    assert_eq!(
        stack.supervisor().get("relay").unwrap().state(),
        ProcessState::Killed
    );
}
