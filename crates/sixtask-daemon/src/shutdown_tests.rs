use super::*;
use sixtask_cron::TaskTemplate;
use sixtask_workqueue::{
    HandlerRegistry, Job, JobStatus, MemoryBackend, QueueClient, WorkerConfig,
};
use tokio::time::sleep;

async fn client() -> QueueClient {
    QueueClient::connect(Arc::new(MemoryBackend::new()))
        .await
        .unwrap()
}

fn pool(client: QueueClient, handlers: HandlerRegistry) -> Arc<WorkerPool> {
    let config = WorkerConfig::default()
        .with_concurrency(4)
        .with_queues([("default", 1)])
        .with_poll_interval(Duration::from_millis(10));
    Arc::new(WorkerPool::new(config, client, handlers).unwrap())
}

#[tokio::test(start_paused = true)]
async fn test_trigger_stops_registry_and_pool() {
    let client = client().await;
    let registry = Arc::new(ScheduleRegistry::new(client.clone()));
    registry
        .load(vec![
            registry
                .register(TaskTemplate::with_payload("tick", vec![]))
                .every_minute()
                .unwrap(),
        ])
        .unwrap();
    let pool = pool(client, HandlerRegistry::new());

    registry.start().unwrap();
    pool.start().unwrap();

    let coordinator = ShutdownCoordinator::new(DEFAULT_SHUTDOWN_TIMEOUT)
        .with_registry(registry.clone())
        .with_pool(pool.clone());
    let report = coordinator.trigger().await.unwrap();

    assert_eq!(report.registry, Some(StopOutcome::Stopped));
    assert_eq!(report.pool, Some(ShutdownOutcome::Graceful));
    assert!(!report.is_forced());
    assert_eq!(report.abandoned(), 0);
    assert!(!registry.is_running());
    assert!(!pool.is_running());
    assert!(coordinator.is_triggered());
}

#[tokio::test]
async fn test_second_trigger_is_ignored() {
    let client = client().await;
    let pool = pool(client, HandlerRegistry::new());
    pool.start().unwrap();

    let coordinator = ShutdownCoordinator::new(Duration::from_secs(1)).with_pool(pool);
    assert!(coordinator.trigger().await.is_some());
    assert!(coordinator.trigger().await.is_none());
}

#[tokio::test(start_paused = true)]
async fn test_forced_shutdown_reports_abandoned_jobs() {
    let client = client().await;
    let mut handlers = HandlerRegistry::new();
    handlers.register_fn("stuck", |_, _| async {
        sleep(Duration::from_secs(3600)).await;
        Ok(())
    });
    let pool = pool(client.clone(), handlers);
    let mut events = pool.subscribe();

    client.enqueue(Job::new("stuck", vec![]), "default").await.unwrap();
    pool.start().unwrap();
    while events.recv().await.unwrap().status != JobStatus::Running {}

    let timeout = Duration::from_millis(200);
    let coordinator = ShutdownCoordinator::new(timeout).with_pool(pool);
    let started = Instant::now();
    let report = coordinator.trigger().await.unwrap();

    assert!(report.is_forced());
    assert_eq!(report.abandoned(), 1);
    assert_eq!(report.registry, None);
    assert!(started.elapsed() < timeout + Duration::from_millis(50));
}

#[tokio::test(start_paused = true)]
async fn test_deadline_is_shared() {
    let client = client().await;
    let mut handlers = HandlerRegistry::new();
    handlers.register_fn("stuck", |_, _| async {
        sleep(Duration::from_secs(3600)).await;
        Ok(())
    });
    let registry = Arc::new(ScheduleRegistry::new(client.clone()));
    let pool = pool(client.clone(), handlers);
    let mut events = pool.subscribe();

    client.enqueue(Job::new("stuck", vec![]), "default").await.unwrap();
    registry.start().unwrap();
    pool.start().unwrap();
    while events.recv().await.unwrap().status != JobStatus::Running {}

    let timeout = Duration::from_millis(300);
    let report = ShutdownCoordinator::new(timeout)
        .with_registry(registry)
        .with_pool(pool)
        .trigger()
        .await
        .unwrap();

    assert_eq!(report.registry, Some(StopOutcome::Stopped));
    assert!(report.is_forced());
    assert!(report.elapsed < timeout + Duration::from_millis(50));
}

#[tokio::test]
async fn test_run_until_signal() {
    let coordinator = Arc::new(ShutdownCoordinator::new(Duration::from_secs(1)));
    let signals = SignalHandler::new();

    let task = {
        let coordinator = coordinator.clone();
        let signals = signals.clone();
        tokio::spawn(async move { coordinator.run_until_signal(&signals).await })
    };

    sleep(Duration::from_millis(10)).await;
    assert!(!coordinator.is_triggered());
    signals.request_shutdown();

    let report = tokio::time::timeout(Duration::from_secs(1), task)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(report.registry, None);
    assert_eq!(report.pool, None);
}
