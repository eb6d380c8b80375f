use crate::clock;
use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::job_engine::job::{Job, Message, Payload, TENANT_KEY};
use crate::job_engine::node::{router_loop, Node, NodeLinks};
use crate::job_engine::pipe::{pipe, Closed, Outlet};
use crate::job_engine::queue::{QueueConfig, WorkerPool};
use crate::job_engine::scheduler::SchedulerMessage;
use crate::stats::{NullReporter, StatsMessage};
use crate::worker::closure_worker::ClosureWorker;
use crate::worker::{Tracking, WorkerRegistry};

use async_io::Timer;
use futures::executor::block_on;
use serde_json::json;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Simple shared integer counter
fn shared_counter() -> Arc<AtomicUsize> {
    Arc::new(AtomicUsize::new(0))
}

fn fast_engine() -> EngineConfig {
    EngineConfig {
        tick_interval: Duration::from_millis(10),
        poll_interval: Duration::from_millis(10),
        refresh_interval: Duration::from_millis(10),
    }
}

fn counting_worker(counter: Arc<AtomicUsize>, work: Duration) -> ClosureWorker {
    ClosureWorker::new(
        "count",
        Tracking::Track,
        Box::new(move |_ctx, _payload| {
            let counter = counter.clone();
            Box::pin(async move {
                Timer::after(work).await;
                counter.fetch_add(1, Ordering::SeqCst);
                anyhow::Ok(())
            })
        }),
    )
}

/// Links for a pool tested without a node. The stats outlet must be kept
/// alive by the caller.
fn standalone_links(registry: WorkerRegistry, pool: &str) -> (NodeLinks, Outlet<StatsMessage>) {
    let (intake, _) = pipe();
    let (scheduler, _) = pipe();
    let (stats, stats_outlet) = pipe();
    let links = NodeLinks::new(
        intake,
        scheduler,
        BTreeSet::from([pool.to_string()]),
        Arc::new(registry),
        stats,
    );
    (links, stats_outlet)
}

fn job(pool: &str, worker_type: &str) -> Message {
    Message::Job(Job::new(pool, worker_type, Payload::new()))
}

//
// 1. Pipe ordering
//
#[test]
fn test_pipe_is_fifo_and_reports_closure_after_drain() {
    let (inlet, outlet) = pipe();
    for i in 0..5 {
        inlet.send_now(i).unwrap();
    }
    inlet.close();
    let received: Vec<i32> = std::iter::from_fn(|| outlet.recv_blocking().ok()).collect();
    assert_eq!(received, [0, 1, 2, 3, 4]);
    assert_eq!(outlet.recv_blocking(), Err(Closed));
    assert!(inlet.send_now(5).is_err());
}

//
// 2. Pool shutdown protocol
//
#[test]
fn test_pool_shutdown_runs_every_job_sent_before_stop() {
    let c = shared_counter();
    let mut registry = WorkerRegistry::new();
    registry
        .register("count", Arc::new(counting_worker(c.clone(), Duration::from_millis(2))))
        .unwrap();
    let (links, stats) = standalone_links(registry, "work");

    let mut pool = WorkerPool::start(QueueConfig::new("work", 3), links).unwrap();
    for _ in 0..20 {
        pool.inlet().send_now(job("work", "count")).unwrap();
    }

    assert_eq!(pool.shutdown().unwrap(), 3);
    assert_eq!(c.load(Ordering::SeqCst), 20);
    assert!(pool.inlet().is_closed());

    let mut points = 0;
    while let Some(StatsMessage::Point(_)) = stats.try_recv() {
        points += 1;
    }
    assert_eq!(points, 20);
}

//
// 3. Idempotent shutdown
//
#[test]
fn test_pool_shutdown_twice() {
    let c = shared_counter();
    let mut registry = WorkerRegistry::new();
    registry
        .register("count", Arc::new(counting_worker(c.clone(), Duration::ZERO)))
        .unwrap();
    let (links, _stats) = standalone_links(registry, "work");

    let mut pool = WorkerPool::start(QueueConfig::new("work", 4), links).unwrap();
    pool.inlet().send_now(job("work", "count")).unwrap();

    assert_eq!(pool.shutdown().unwrap(), 4);
    assert_eq!(pool.shutdown().unwrap(), 4);
    assert_eq!(c.load(Ordering::SeqCst), 1);
}

//
// 4. Failure isolation
//
#[test]
fn test_failing_and_panicking_jobs_do_not_kill_the_worker() {
    let c = shared_counter();
    let mut registry = WorkerRegistry::new();
    registry
        .register("count", Arc::new(counting_worker(c.clone(), Duration::ZERO)))
        .unwrap();
    registry
        .register(
            "fail",
            Arc::new(ClosureWorker::new(
                "fail",
                Tracking::Track,
                Box::new(|_ctx, _payload| Box::pin(async { Err::<(), _>(anyhow::anyhow!("boom")) })),
            )),
        )
        .unwrap();
    registry
        .register(
            "panic",
            Arc::new(ClosureWorker::new(
                "panic",
                Tracking::Track,
                Box::new(|_ctx, payload| {
                    Box::pin(async move {
                        if payload.is_empty() {
                            panic!("job panicked on purpose");
                        }
                        anyhow::Ok(())
                    })
                }),
            )),
        )
        .unwrap();
    let (links, _stats) = standalone_links(registry, "work");

    // a single worker has to survive both
    let mut pool = WorkerPool::start(QueueConfig::new("work", 1), links).unwrap();
    pool.inlet().send_now(job("work", "fail")).unwrap();
    pool.inlet().send_now(job("work", "panic")).unwrap();
    pool.inlet().send_now(job("work", "nobody")).unwrap();
    pool.inlet().send_now(job("work", "count")).unwrap();

    assert_eq!(pool.shutdown().unwrap(), 1);
    assert_eq!(c.load(Ordering::SeqCst), 1);
}

//
// 5. Node configuration errors
//
#[test]
fn test_node_rejects_duplicate_queue() {
    let mut node = Node::new(fast_engine(), WorkerRegistry::new(), Arc::new(NullReporter));
    node.queue("default", 2).unwrap();
    assert_eq!(
        node.queue("default", 1),
        Err(EngineError::DuplicateQueue("default".into()))
    );
}

#[test]
fn test_node_rejects_unknown_queue_and_worker() {
    let c = shared_counter();
    let mut registry = WorkerRegistry::new();
    registry
        .register("count", Arc::new(counting_worker(c.clone(), Duration::ZERO)))
        .unwrap();
    let mut node = Node::new(fast_engine(), registry, Arc::new(NullReporter));
    node.queue("default", 1).unwrap();

    assert_eq!(
        node.enqueue("default", "count", Payload::new()),
        Err(EngineError::NotStarted)
    );
    node.start().unwrap();
    assert_eq!(node.start(), Err(EngineError::AlreadyStarted));

    assert_eq!(
        node.enqueue("nope", "count", Payload::new()),
        Err(EngineError::UnknownQueue("nope".into()))
    );
    assert_eq!(
        node.enqueue("default", "nope", Payload::new()),
        Err(EngineError::UnknownWorker("nope".into()))
    );
    assert_eq!(
        node.schedule_at(clock::wall(), "nope", "count", Payload::new()),
        Err(EngineError::UnknownQueue("nope".into()))
    );

    let points = node.stop().unwrap();
    assert!(points.is_empty());
    assert_eq!(c.load(Ordering::SeqCst), 0);
    assert_eq!(node.stop(), Ok(Vec::new()));
}

//
// 6. Routing end to end
//
#[test]
fn test_node_routes_jobs_to_their_pool() {
    let seen: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
    let mut registry = WorkerRegistry::new();
    let seen_in_worker = seen.clone();
    registry
        .register(
            "record",
            Arc::new(ClosureWorker::new(
                "record",
                Tracking::Track,
                Box::new(move |ctx, _payload| {
                    let seen = seen_in_worker.clone();
                    Box::pin(async move {
                        seen.lock().unwrap().push(ctx.pool().to_string());
                        anyhow::Ok(())
                    })
                }),
            )),
        )
        .unwrap();

    let mut node = Node::new(fast_engine(), registry, Arc::new(NullReporter));
    node.queue("a", 2).unwrap();
    node.queue("b", 1).unwrap();
    node.start().unwrap();

    for tenant in 0..5u64 {
        let mut payload = Payload::new();
        payload.insert(TENANT_KEY.into(), json!(tenant));
        let pool = if tenant % 2 == 0 { "a" } else { "b" };
        node.enqueue(pool, "record", payload).unwrap();
    }

    let points = node.wait_till_executed(5).unwrap();
    assert_eq!(points.len(), 5);
    for point in &points {
        let tenant = point.tenant.unwrap();
        assert_eq!(point.pool, if tenant % 2 == 0 { "a" } else { "b" });
        assert!(point.latency() >= 0.0);
    }

    let mut seen = seen.lock().unwrap().clone();
    seen.sort();
    assert_eq!(seen, ["a", "a", "a", "b", "b"]);
}

//
// 7. Jobs enqueued from jobs
//
#[test]
fn test_follow_up_job_inherits_enqueue_time() {
    let mut registry = WorkerRegistry::new();
    registry
        .register(
            "parent",
            Arc::new(ClosureWorker::new(
                "parent",
                Tracking::DoNotTrack,
                Box::new(|ctx, payload| {
                    Box::pin(async move {
                        Timer::after(Duration::from_millis(30)).await;
                        ctx.enqueue("default", "child", payload).await?;
                        anyhow::Ok(())
                    })
                }),
            )),
        )
        .unwrap();
    registry
        .register(
            "child",
            Arc::new(counting_worker(shared_counter(), Duration::ZERO)),
        )
        .unwrap();

    let mut node = Node::new(fast_engine(), registry, Arc::new(NullReporter));
    node.queue("default", 2).unwrap();
    node.start().unwrap();
    node.enqueue("default", "parent", Payload::new()).unwrap();

    let points = node.wait_till_executed(2).unwrap();
    assert_eq!(points.len(), 2);
    assert!(points[0].do_not_track);
    assert!(!points[1].do_not_track);
    assert_eq!(points[0].enqueued_at, points[1].enqueued_at);
    assert!(points[1].latency() >= 0.03);
}

//
// 8. Delayed submission
//
#[test]
fn test_scheduled_job_runs_after_fire_time() {
    let c = shared_counter();
    let mut registry = WorkerRegistry::new();
    registry
        .register("count", Arc::new(counting_worker(c.clone(), Duration::ZERO)))
        .unwrap();
    let mut node = Node::new(fast_engine(), registry, Arc::new(NullReporter));
    node.queue("default", 1).unwrap();
    node.start().unwrap();

    let submitted = clock::monotonic();
    node.schedule_at(clock::wall() + 0.1, "default", "count", Payload::new())
        .unwrap();

    let points = node.wait_till_executed(1).unwrap();
    assert_eq!(c.load(Ordering::SeqCst), 1);
    assert!(points[0].started_at >= submitted + 0.09);
    // latency of an external delayed job counts from its release
    assert!(points[0].enqueued_at >= submitted + 0.09);
}

//
// 9. Background loops
//
#[test]
fn test_background_loop_is_cancelled_on_stop() {
    let ticks = shared_counter();
    let mut registry = WorkerRegistry::new();
    registry
        .register(
            "count",
            Arc::new(counting_worker(shared_counter(), Duration::from_millis(50))),
        )
        .unwrap();
    let mut node = Node::new(fast_engine(), registry, Arc::new(NullReporter));
    node.queue("default", 1).unwrap();

    let ticks_in_loop = ticks.clone();
    node.background(
        "ticker",
        Box::new(move || {
            Box::pin(async move {
                loop {
                    ticks_in_loop.fetch_add(1, Ordering::SeqCst);
                    Timer::after(Duration::from_millis(5)).await;
                }
            })
        }),
    )
    .unwrap();
    node.start().unwrap();
    // the second job starts once the first has slept for 50 ms
    node.enqueue("default", "count", Payload::new()).unwrap();
    node.enqueue("default", "count", Payload::new()).unwrap();
    node.wait_till_executed(2).unwrap();

    let after_stop = ticks.load(Ordering::SeqCst);
    assert!(after_stop > 0);
    std::thread::sleep(Duration::from_millis(30));
    assert_eq!(ticks.load(Ordering::SeqCst), after_stop);
}

//
// 10. Router with a job for a pool it does not know
//
#[test]
fn test_router_reports_unknown_pool_and_keeps_routing() {
    let (intake, intake_outlet) = pipe();
    let (scheduler, scheduler_outlet) = pipe();
    let (fatal, fatal_outlet) = pipe();
    let (pool_a, pool_a_outlet) = pipe();
    let routes = BTreeMap::from([("a".to_string(), pool_a)]);

    intake.send_now(job("nowhere", "count")).unwrap();
    intake.send_now(job("a", "count")).unwrap();
    intake.send_now(Message::Stop).unwrap();
    block_on(router_loop(
        intake_outlet,
        routes,
        scheduler,
        fatal,
        Vec::new(),
    ));

    assert_eq!(
        fatal_outlet.try_recv(),
        Some(EngineError::UnknownQueue("nowhere".into()))
    );
    match pool_a_outlet.try_recv() {
        Some(Message::Job(job)) => assert_eq!(job.pool, "a"),
        other => panic!("expected the job for a, got {other:?}"),
    }
    assert!(matches!(
        scheduler_outlet.try_recv(),
        Some(SchedulerMessage::Stop)
    ));
    assert!(intake.is_closed());
}

#[test]
fn test_router_survives_a_closed_fatal_pipe() {
    let (intake, intake_outlet) = pipe();
    let (scheduler, _scheduler_outlet) = pipe();
    let (fatal, fatal_outlet) = pipe::<EngineError>();
    let (pool_a, pool_a_outlet) = pipe();
    fatal_outlet.close();

    intake.send_now(job("nowhere", "count")).unwrap();
    intake.send_now(job("a", "count")).unwrap();
    intake.send_now(Message::Stop).unwrap();
    block_on(router_loop(
        intake_outlet,
        BTreeMap::from([("a".to_string(), pool_a)]),
        scheduler,
        fatal,
        Vec::new(),
    ));

    assert_eq!(pool_a_outlet.len(), 1);
}
