#![allow(missing_docs)]
#![allow(clippy::unwrap_used)]

use mosaic_core::colorize::ColorSettings;
use mosaic_core::grid::BlockGeometry;
use mosaic_core::task::{
    IntegralImageExecutor, Priority, RunnerConfig, Task, TaskError, TaskExecutor, TaskKind,
    TaskOutput, TaskRunner,
};
use mosaic_core::test_utils::{brute_force_sum, gradient, transparent_border};
use mosaic_core::{Dimensions, IntegralTables, Rgb};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

fn fast_config() -> RunnerConfig {
    RunnerConfig {
        restart_delay: Duration::from_millis(5),
        max_restart_delay: Duration::from_millis(20),
        max_consecutive_faults: 3,
    }
}

/// Panics on the first `faults` tasks, then builds tables normally.
struct Flaky {
    faults: usize,
    calls: AtomicUsize,
}

impl TaskExecutor for Flaky {
    fn supports(&self, kind: TaskKind) -> bool {
        kind == TaskKind::BuildIntegral
    }

    fn execute(&self, task: Task) -> Result<TaskOutput, TaskError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        assert!(call >= self.faults, "simulated context crash {call}");
        IntegralImageExecutor.execute(task)
    }
}

fn build_task(width: u32) -> Task {
    Task::BuildIntegral {
        raster: Arc::new(gradient(width, 8)),
    }
}

#[test]
fn test_queue_survives_a_fault() {
    let runner = TaskRunner::new(fast_config());
    runner.register(
        "flaky",
        Arc::new(Flaky {
            faults: 1,
            calls: AtomicUsize::new(0),
        }),
    );
    let handles = runner
        .submit_batch(
            "flaky",
            (10..14).map(|w| (build_task(w), Priority::Normal)).collect(),
        )
        .unwrap();

    let mut results = handles.into_iter().map(|h| h.wait());
    assert!(matches!(results.next(), Some(Err(TaskError::ContextFault(_)))));
    for (result, width) in results.zip(11..14) {
        let tables = result.unwrap().into_integral().unwrap();
        assert_eq!(tables.width(), width);
    }

    let stats = runner.stats();
    let flaky = stats.category("flaky").unwrap();
    assert_eq!(flaky.restarts, 1);
    assert_eq!(flaky.consecutive_faults, 0);
    assert_eq!(flaky.completed, 3);
}

#[test]
fn test_repeated_faults_fail_the_queue_then_recover() {
    let runner = TaskRunner::new(fast_config());
    runner.register(
        "flaky",
        Arc::new(Flaky {
            faults: 3,
            calls: AtomicUsize::new(0),
        }),
    );
    let handles = runner
        .submit_batch(
            "flaky",
            (20..25).map(|w| (build_task(w), Priority::Normal)).collect(),
        )
        .unwrap();
    let results: Vec<_> = handles.into_iter().map(|h| h.wait()).collect();
    assert!(results[..3]
        .iter()
        .all(|r| matches!(r, Err(TaskError::ContextFault(_)))));
    assert!(results[3..]
        .iter()
        .all(|r| matches!(r, Err(TaskError::ContextUnavailable(_)))));

    // A later submission starts a fresh context.
    let tables = runner
        .submit("flaky", build_task(30), Priority::High)
        .unwrap()
        .wait()
        .unwrap()
        .into_integral()
        .unwrap();
    assert_eq!(tables.width(), 30);
}

#[test]
fn test_concurrent_submitters() {
    let runner = Arc::new(TaskRunner::default());
    runner.register("integral-a", Arc::new(IntegralImageExecutor));
    runner.register("integral-b", Arc::new(IntegralImageExecutor));

    let workers: Vec<_> = (0..4u32)
        .map(|t| {
            let runner = Arc::clone(&runner);
            thread::spawn(move || {
                let category = if t % 2 == 0 { "integral-a" } else { "integral-b" };
                (0..5u32)
                    .map(|i| {
                        let width = 4 + t * 5 + i;
                        runner
                            .submit(category, build_task(width), Priority::Normal)
                            .unwrap()
                            .wait()
                            .unwrap()
                            .into_integral()
                            .unwrap()
                            .width()
                            == width
                    })
                    .all(|ok| ok)
            })
        })
        .collect();
    for worker in workers {
        assert!(worker.join().unwrap());
    }
    let stats = runner.stats();
    assert_eq!(stats.total_queued(), 0);
    assert_eq!(
        stats.categories.iter().map(|c| c.completed).sum::<u64>(),
        20
    );
}

#[test]
fn test_color_blocks_task() {
    let raster = transparent_border(40, 40, 10, [40, 120, 200]);
    let tables = Arc::new(IntegralTables::build(&raster));
    let runner = TaskRunner::default();
    runner.register("colors", Arc::new(IntegralImageExecutor));

    let blocks = vec![
        BlockGeometry::new(0.0, 0.0, 20.0, 20.0),
        BlockGeometry::new(20.0, 20.0, 20.0, 20.0),
        BlockGeometry::new(0.0, 0.0, 10.0, 10.0),
    ];
    let results = runner
        .submit(
            "colors",
            Task::ColorBlocks {
                tables,
                blocks,
                display: Dimensions::new(40, 40),
                settings: ColorSettings::default(),
            },
            Priority::Normal,
        )
        .unwrap()
        .wait()
        .unwrap()
        .into_block_colors()
        .unwrap();

    assert_eq!(results.len(), 3);
    assert_eq!(
        results.iter().map(|r| r.index).collect::<Vec<_>>(),
        vec![0, 1, 2]
    );
    // Quarter blocks overlap the opaque centre by 10x10 of 20x20.
    let [_, _, _, opaque] = brute_force_sum(&raster, 0, 0, 19, 19);
    assert!((results[0].coverage - opaque as f64 / 400.0).abs() < 1e-12);
    assert_eq!(results[0].color, Rgb::new(40, 120, 200));
    assert_eq!(results[1].color, Rgb::new(40, 120, 200));
    assert!(!results[0].skip_refine);

    assert_eq!(results[2].coverage, 0.0);
    assert_eq!(results[2].color, Rgb::WHITE);
    assert!(results[2].skip_refine);
}

#[test]
fn test_shutdown_rejects_new_work() {
    let runner = TaskRunner::default();
    runner.register("integral", Arc::new(IntegralImageExecutor));
    runner.shutdown();
    assert_eq!(
        runner
            .submit("integral", build_task(8), Priority::Low)
            .unwrap_err(),
        TaskError::Shutdown
    );
}
