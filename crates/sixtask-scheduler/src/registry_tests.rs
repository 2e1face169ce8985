use super::*;
use chrono::NaiveDate;
use sixtask_workqueue::{MemoryBackend, QueueBackend, RetryPolicy};
use std::sync::atomic::AtomicU32;

fn at(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(y, mo, d)
        .unwrap()
        .and_hms_opt(h, mi, 0)
        .unwrap()
}

async fn registry() -> (Arc<MemoryBackend>, ScheduleRegistry) {
    let backend = Arc::new(MemoryBackend::new());
    let client = QueueClient::connect(backend.clone()).await.unwrap();
    (backend, ScheduleRegistry::new(client))
}

fn template(job_type: &str) -> TaskTemplate {
    TaskTemplate::with_payload(job_type, b"{}".to_vec())
}

#[tokio::test]
async fn test_load_registers_all() {
    let (_, registry) = registry().await;
    let records = vec![
        registry.register(template("cleanup")).daily_at("02:30").unwrap(),
        registry.register(template("report")).id("weekly-report").weekly().unwrap(),
    ];

    let ids = registry.load(records).unwrap();
    assert_eq!(ids, vec!["cleanup:30 2 * * *:default", "weekly-report"]);
    assert_eq!(registry.len(), 2);
    assert!(!registry.is_empty());
}

#[tokio::test]
async fn test_load_is_all_or_nothing() {
    let (_, registry) = registry().await;
    registry
        .load(vec![registry.register(template("existing")).hourly().unwrap()])
        .unwrap();

    let mut bad = registry.register(template("bad")).daily().unwrap();
    bad.cron_expression = "61 * * * *".to_string();
    let records = vec![
        registry.register(template("good")).daily_at("01:00").unwrap(),
        bad,
    ];

    let err = registry.load(records).unwrap_err();
    assert!(matches!(err, ScheduleError::Invalid { .. }));
    assert_eq!(registry.len(), 1);
    assert!(registry.get("good:0 1 * * *:default").is_none());
}

#[tokio::test]
async fn test_load_rejects_unsatisfiable() {
    let (_, registry) = registry().await;
    let record = registry.register(template("never")).cron("0 0 30 2 *").unwrap();

    let err = registry.load(vec![record]).unwrap_err();
    assert!(matches!(
        err,
        ScheduleError::Invalid {
            source: ValidationError::Unsatisfiable(_),
            ..
        }
    ));
    assert!(registry.is_empty());
}

#[tokio::test]
async fn test_load_rejects_duplicates() {
    let (_, registry) = registry().await;
    let record = || registry.register(template("dup")).id("same").daily().unwrap();

    // within one batch
    let err = registry.load(vec![record(), record()]).unwrap_err();
    assert!(matches!(err, ScheduleError::DuplicateEntry(ref id) if id == "same"));
    assert!(registry.is_empty());

    // against the registry
    registry.load(vec![record()]).unwrap();
    let err = registry.load(vec![record()]).unwrap_err();
    assert!(matches!(err, ScheduleError::DuplicateEntry(_)));
    assert_eq!(registry.len(), 1);
}

#[tokio::test]
async fn test_load_rejects_bad_queue() {
    let (_, registry) = registry().await;
    let record = registry
        .register(template("x"))
        .queue("no spaces allowed")
        .daily()
        .unwrap();
    assert!(matches!(
        registry.load(vec![record]),
        Err(ScheduleError::InvalidQueue { .. })
    ));
}

#[tokio::test]
async fn test_unregister() {
    let (_, registry) = registry().await;
    registry
        .load(vec![registry.register(template("a")).id("a").daily().unwrap()])
        .unwrap();

    assert!(registry.unregister("a"));
    assert!(!registry.unregister("a"));
    assert!(registry.is_empty());
}

#[tokio::test]
async fn test_entries_snapshot() {
    let (_, registry) = registry().await;
    registry
        .load(vec![
            registry.register(template("b")).id("b").hourly().unwrap(),
            registry.register(template("a")).id("a").queue("ops").daily().unwrap(),
        ])
        .unwrap();

    let entries = registry.entries();
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0].id, "a");
    assert_eq!(entries[0].queue, "ops");
    assert_eq!(entries[0].expression, "@daily");
    assert!(entries[0].next_fire.is_some());
    assert_eq!(entries[1].job_type, "b");
}

#[tokio::test]
async fn test_tick_enqueues_due_entries_once_per_minute() {
    let (backend, registry) = registry().await;
    registry
        .load(vec![
            registry.register(template("cleanup")).daily_at("02:30").unwrap(),
            registry.register(template("other")).daily_at("03:00").unwrap(),
        ])
        .unwrap();

    let t = at(2026, 3, 14, 2, 30) + chrono::Duration::seconds(42);
    let report = registry.tick_at(t).await;
    assert_eq!(report.minute, at(2026, 3, 14, 2, 30));
    assert_eq!((report.due, report.enqueued), (1, 1));

    // same minute again: nothing
    let report = registry.tick_at(at(2026, 3, 14, 2, 30)).await;
    assert_eq!(report.due, 0);

    // not due
    let report = registry.tick_at(at(2026, 3, 14, 2, 31)).await;
    assert_eq!(report.due, 0);

    assert_eq!(backend.len("default").await.unwrap(), 1);
    let job = backend.pop("default").await.unwrap().unwrap();
    assert_eq!(job.job_type, "cleanup");
    assert_eq!(job.queue, "default");

    // next day fires again
    let report = registry.tick_at(at(2026, 3, 15, 2, 30)).await;
    assert_eq!(report.enqueued, 1);
}

#[tokio::test]
async fn test_tick_materializes_fresh_payloads() {
    let (backend, registry) = registry().await;
    let counter = Arc::new(AtomicU32::new(0));
    let c = counter.clone();
    let template = TaskTemplate::new("count", move || {
        c.fetch_add(1, Ordering::SeqCst).to_string().into_bytes()
    });
    registry
        .load(vec![registry.register(template).cron("* * * * *").unwrap()])
        .unwrap();

    registry.tick_at(at(2026, 1, 1, 0, 0)).await;
    registry.tick_at(at(2026, 1, 1, 0, 1)).await;

    let first = backend.pop("default").await.unwrap().unwrap();
    let second = backend.pop("default").await.unwrap().unwrap();
    assert_eq!(first.payload, b"0");
    assert_eq!(second.payload, b"1");
    assert_ne!(first.id, second.id);
}

#[tokio::test]
async fn test_tick_every_interval_from_anchor() {
    let (backend, registry) = registry().await;
    let ids = registry
        .load(vec![registry.register(template("poll")).every_five_minutes().unwrap()])
        .unwrap();
    let entry = registry.get(&ids[0]).unwrap();
    let anchor = truncate_to_minute(entry.anchor).unwrap();

    assert_eq!(registry.tick_at(anchor).await.due, 0);
    assert_eq!(registry.tick_at(anchor + chrono::Duration::minutes(3)).await.due, 0);
    assert_eq!(registry.tick_at(anchor + chrono::Duration::minutes(5)).await.due, 1);
    assert_eq!(registry.tick_at(anchor + chrono::Duration::minutes(10)).await.due, 1);
    assert_eq!(backend.len("default").await.unwrap(), 2);
}

#[tokio::test]
async fn test_tick_dedup_key_skips_live_job() {
    let (backend, registry) = registry().await;
    registry
        .load(vec![
            registry
                .register(template("sync"))
                .dedup_key("sync")
                .cron("* * * * *")
                .unwrap(),
        ])
        .unwrap();

    assert_eq!(registry.tick_at(at(2026, 1, 1, 0, 0)).await.enqueued, 1);
    let report = registry.tick_at(at(2026, 1, 1, 0, 1)).await;
    assert_eq!((report.enqueued, report.deduplicated), (0, 1));

    let job = backend.pop("default").await.unwrap().unwrap();
    backend.ack(&job).await.unwrap();
    assert_eq!(registry.tick_at(at(2026, 1, 1, 0, 2)).await.enqueued, 1);
}

#[tokio::test]
async fn test_tick_counts_enqueue_failures() {
    let backend = Arc::new(MemoryBackend::new());
    let client = QueueClient::connect(backend.clone())
        .await
        .unwrap()
        .with_retry(RetryPolicy::none());
    let registry = ScheduleRegistry::new(client);
    registry
        .load(vec![registry.register(template("x")).cron("* * * * *").unwrap()])
        .unwrap();

    backend.set_online(false);
    let report = registry.tick_at(at(2026, 1, 1, 0, 0)).await;
    assert_eq!((report.due, report.failed), (1, 1));

    // the registry keeps working once the backend recovers
    backend.set_online(true);
    assert_eq!(registry.tick_at(at(2026, 1, 1, 0, 1)).await.enqueued, 1);
}

#[tokio::test]
async fn test_day_matching_and() {
    let backend = Arc::new(MemoryBackend::new());
    let client = QueueClient::connect(backend).await.unwrap();
    let registry = ScheduleRegistry::new(client).with_day_matching(DayMatching::And);
    registry
        .load(vec![registry.register(template("x")).cron("0 0 1 * 1").unwrap()])
        .unwrap();

    // 2026-04-01 is a Wednesday
    assert_eq!(registry.tick_at(at(2026, 4, 1, 0, 0)).await.due, 0);
    // 2026-06-01 is a Monday
    assert_eq!(registry.tick_at(at(2026, 6, 1, 0, 0)).await.due, 1);
}

#[tokio::test(start_paused = true)]
async fn test_start_and_stop() {
    let (_, registry) = registry().await;
    let registry = Arc::new(registry);

    registry.start().unwrap();
    assert!(registry.is_running());
    assert!(matches!(registry.start(), Err(ScheduleError::AlreadyRunning)));

    assert_eq!(registry.stop(Duration::from_secs(1)).await, StopOutcome::Stopped);
    assert!(!registry.is_running());
    assert_eq!(
        registry.stop(Duration::from_secs(1)).await,
        StopOutcome::AlreadyStopped
    );
    assert!(matches!(registry.start(), Err(ScheduleError::Stopped)));
}

/// Wall clock that follows tokio time and can be stepped by hand.
struct SteppedClock {
    base: NaiveDateTime,
    started: tokio::time::Instant,
    offset: Mutex<chrono::Duration>,
}

impl SteppedClock {
    fn new(base: NaiveDateTime) -> Arc<Self> {
        Arc::new(Self {
            base,
            started: tokio::time::Instant::now(),
            offset: Mutex::new(chrono::Duration::zero()),
        })
    }

    fn step(&self, by: chrono::Duration) {
        let mut offset = self.offset.lock();
        *offset = *offset + by;
    }
}

impl Clock for SteppedClock {
    fn now(&self) -> NaiveDateTime {
        let elapsed = chrono::Duration::from_std(self.started.elapsed()).unwrap();
        self.base + elapsed + *self.offset.lock()
    }
}

async fn clocked_registry(clock: Arc<SteppedClock>) -> (Arc<MemoryBackend>, Arc<ScheduleRegistry>) {
    let (backend, registry) = registry().await;
    let registry = Arc::new(registry.with_clock(clock));
    registry
        .load(vec![registry.register(template("tick")).cron("* * * * *").unwrap()])
        .unwrap();
    (backend, registry)
}

#[tokio::test(start_paused = true)]
async fn test_loop_fires_on_minute_boundaries() {
    let clock = SteppedClock::new(at(2026, 3, 14, 10, 0) + chrono::Duration::seconds(30));
    let start = tokio::time::Instant::now();
    let (backend, registry) = clocked_registry(clock).await;
    registry.start().unwrap();

    tokio::time::sleep_until(start + Duration::from_secs(29)).await;
    assert_eq!(backend.len("default").await.unwrap(), 0);

    // 10:01:00
    tokio::time::sleep_until(start + Duration::from_secs(31)).await;
    assert_eq!(backend.len("default").await.unwrap(), 1);
    let entry = registry.get("tick:* * * * *:default").unwrap();
    assert_eq!(entry.last_fired(), Some(at(2026, 3, 14, 10, 1)));

    // 10:02:00 and 10:03:00
    tokio::time::sleep_until(start + Duration::from_secs(151)).await;
    assert_eq!(backend.len("default").await.unwrap(), 3);

    assert_eq!(registry.stop(Duration::from_secs(1)).await, StopOutcome::Stopped);
}

#[tokio::test(start_paused = true)]
async fn test_loop_ignores_backwards_clock_step() {
    let clock = SteppedClock::new(at(2026, 3, 14, 10, 0) + chrono::Duration::seconds(30));
    let start = tokio::time::Instant::now();
    let (backend, registry) = clocked_registry(clock.clone()).await;
    registry.start().unwrap();

    // fires 10:01, then the wall clock jumps back a minute
    tokio::time::sleep_until(start + Duration::from_secs(31)).await;
    assert_eq!(backend.len("default").await.unwrap(), 1);
    clock.step(chrono::Duration::seconds(-60));

    // the next wake-up reads 10:01:00 again
    tokio::time::sleep_until(start + Duration::from_secs(91)).await;
    assert_eq!(backend.len("default").await.unwrap(), 1);

    // 10:02:00
    tokio::time::sleep_until(start + Duration::from_secs(151)).await;
    assert_eq!(backend.len("default").await.unwrap(), 2);

    registry.stop(Duration::from_secs(1)).await;
}

#[tokio::test]
async fn test_stop_without_start() {
    let (_, registry) = registry().await;
    assert_eq!(registry.stop(Duration::from_millis(10)).await, StopOutcome::Stopped);
    assert_eq!(
        registry.stop(Duration::from_millis(10)).await,
        StopOutcome::AlreadyStopped
    );
}

#[test]
fn test_until_next_minute() {
    let t = at(2026, 1, 1, 0, 0) + chrono::Duration::seconds(45);
    assert_eq!(until_next_minute(t), Duration::from_secs(15));
    assert_eq!(until_next_minute(at(2026, 1, 1, 0, 0)), Duration::from_secs(60));
}
