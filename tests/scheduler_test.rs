//! Integration tests for the DAG task scheduler.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use render_core::scheduler::{
    DependencyGraph, GraphError, SchedulerError, SpawnExecutor, Task, TaskError, TaskId, TaskScheduler,
    TaskStatus, MAX_CONCURRENCY,
};

/// Small deterministic generator so graph shapes vary without a rand
/// dependency.
struct Lcg(u64);

impl Lcg {
    fn next(&mut self, bound: u64) -> u64 {
        self.0 = self.0.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
        (self.0 >> 33) % bound
    }
}

struct Gauge {
    running: AtomicUsize,
    peak: AtomicUsize,
}

fn gauged(id: String, ms: u64, gauge: &Arc<Gauge>) -> Task {
    let gauge = Arc::clone(gauge);
    Task::new(id, move || async move {
        let now = gauge.running.fetch_add(1, Ordering::SeqCst) + 1;
        gauge.peak.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(ms)).await;
        gauge.running.fetch_sub(1, Ordering::SeqCst);
        Ok(())
    })
}

#[tokio::test]
async fn dependency_order_holds_for_varied_graphs() {
    let mut rng = Lcg(0x5eed);
    for round in 0..6 {
        let concurrency = 1 + rng.next(MAX_CONCURRENCY as u64) as usize;
        let gauge = Arc::new(Gauge {
            running: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        });
        let mut scheduler = TaskScheduler::new(concurrency);

        let count = 12;
        for i in 0..count {
            let mut task = gauged(format!("t{i}"), 1 + rng.next(4), &gauge)
                .with_priority(rng.next(5) as i32 - 2);
            // Edges only point backwards, so the graph stays acyclic.
            for j in 0..i {
                if rng.next(4) == 0 {
                    task = task.depends_on(format!("t{j}"));
                }
            }
            scheduler.add_task(task).unwrap();
        }
        scheduler.validate().unwrap();

        let summary = scheduler.run().await;
        assert_eq!(summary.completed, count, "round {round}");
        assert!(summary.peak_concurrency <= concurrency);
        assert!(gauge.peak.load(Ordering::SeqCst) <= concurrency);

        for record in scheduler.records() {
            let started = record.started_at.unwrap();
            for dep in &record.dependencies {
                let finished = scheduler.record(dep).unwrap().finished_at.unwrap();
                assert!(started >= finished, "round {round}: {} before {dep}", record.id);
            }
        }
    }
}

#[tokio::test]
async fn failed_task_starves_every_transitive_dependent() {
    let mut scheduler = TaskScheduler::new(2);
    scheduler.add_task(Task::blocking("root", || Ok(()))).unwrap();
    scheduler
        .add_task(Task::blocking("bad", || Err(TaskError::failed("boom"))).depends_on("root"))
        .unwrap();
    for (id, dep) in [("c1", "bad"), ("c2", "c1"), ("c3", "c1"), ("c4", "c3")] {
        scheduler.add_task(Task::blocking(id, || Ok(())).depends_on(dep)).unwrap();
    }
    scheduler
        .add_task(Task::blocking("mixed", || Ok(())).with_dependencies(["root", "c4"]))
        .unwrap();

    let summary = scheduler.run().await;
    assert_eq!(summary.completed, 1);
    assert_eq!(summary.failed, 1);
    assert_eq!(summary.blocked, 5);

    let graph_view: Vec<TaskId> = ["c1", "c2", "c3", "c4", "mixed"].into_iter().map(TaskId::from).collect();
    for id in &graph_view {
        let record = scheduler.record(id).unwrap();
        assert_eq!(record.status, TaskStatus::Pending);
        assert!(record.started_at.is_none());
    }
    assert_eq!(
        scheduler.record(&"bad".into()).unwrap().error,
        Some(TaskError::failed("boom"))
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn spawned_tasks_run_in_parallel_and_can_be_watched() {
    let executor = Arc::new(SpawnExecutor);
    let mut scheduler = TaskScheduler::with_executor(4, executor);
    for i in 0..4 {
        scheduler
            .add_task(Task::new(format!("load{i}"), || async {
                tokio::time::sleep(Duration::from_millis(40)).await;
                Ok(())
            }))
            .unwrap();
    }
    scheduler
        .add_task(Task::blocking("link", || Ok(())).with_dependencies(["load0", "load1", "load2", "load3"]))
        .unwrap();

    let mut watch = scheduler.watch(&"link".into()).unwrap();
    let waiter = tokio::spawn(async move { watch.wait(Duration::from_secs(2)).await });

    let summary = scheduler.run().await;
    assert_eq!(summary.completed, 5);
    assert_eq!(summary.peak_concurrency, 4);
    // Four 40 ms loads in parallel, not back to back.
    assert!(summary.elapsed < Duration::from_millis(150), "{:?}", summary.elapsed);
    assert_eq!(waiter.await.unwrap(), Ok(TaskStatus::Completed));
}

#[tokio::test]
async fn scheduler_is_reusable_after_reset() {
    let mut scheduler = TaskScheduler::new(2);
    scheduler.add_task(Task::blocking("a", || Ok(()))).unwrap();
    assert_eq!(scheduler.run().await.completed, 1);

    assert!(matches!(
        scheduler.add_task(Task::blocking("a", || Ok(()))),
        Err(SchedulerError::DuplicateTask(_))
    ));

    scheduler.reset();
    assert!(scheduler.is_empty());
    scheduler.add_task(Task::blocking("a", || Ok(()))).unwrap();
    scheduler.add_task(Task::blocking("b", || Ok(())).depends_on("a")).unwrap();
    let summary = scheduler.run().await;
    assert_eq!(summary.completed, 2);
}

#[test]
fn graph_validation_reports_cycles_and_missing_nodes() {
    let mut graph = DependencyGraph::new();
    graph.add_node(&"a".into(), &["b".into()], |_| false);
    graph.add_node(&"b".into(), &["a".into()], |_| false);
    assert!(matches!(graph.validate(), Err(GraphError::Cycle(2))));

    let mut graph = DependencyGraph::new();
    graph.add_node(&"a".into(), &["ghost".into()], |_| false);
    assert!(matches!(graph.validate(), Err(GraphError::MissingDependency { .. })));
}
