use fleet_scheduler::{ManualScheduler, Scheduler, one_shot, repeating};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

#[tokio::test]
async fn one_shot_runs_only_when_due() {
    let scheduler = ManualScheduler::new(0);
    let fired = Arc::new(AtomicU64::new(0));
    let counter = fired.clone();
    scheduler.schedule_at(
        10_000,
        one_shot(move || async move {
            counter.fetch_add(1, Ordering::SeqCst);
        }),
    );

    scheduler.advance(Duration::from_millis(9_999)).await;
    assert_eq!(fired.load(Ordering::SeqCst), 0);
    assert_eq!(scheduler.pending_one_shots(), 1);

    scheduler.advance(Duration::from_millis(1)).await;
    assert_eq!(fired.load(Ordering::SeqCst), 1);
    assert_eq!(scheduler.pending_one_shots(), 0);

    scheduler.advance(Duration::from_secs(60)).await;
    assert_eq!(fired.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn repeating_task_sees_each_tick_time() {
    let scheduler = Arc::new(ManualScheduler::new(1_000));
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    let clock = scheduler.clone();
    scheduler.schedule_every(
        Duration::from_secs(5),
        repeating(move || {
            let sink = sink.clone();
            let clock = clock.clone();
            async move {
                sink.lock().expect("lock").push(clock.now_ms());
            }
        }),
    );

    scheduler.advance(Duration::from_secs(16)).await;
    assert_eq!(*seen.lock().expect("lock"), vec![6_000, 11_000, 16_000]);
    assert_eq!(scheduler.now_ms(), 17_000);
}

#[tokio::test]
async fn tasks_scheduled_during_advance_also_run() {
    let scheduler = Arc::new(ManualScheduler::new(0));
    let fired = Arc::new(AtomicU64::new(0));
    let inner_scheduler = scheduler.clone();
    let counter = fired.clone();
    scheduler.schedule_at(
        1_000,
        one_shot(move || async move {
            let counter = counter.clone();
            inner_scheduler.schedule_at(
                2_000,
                one_shot(move || async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                }),
            );
        }),
    );

    scheduler.advance_to(5_000).await;
    assert_eq!(fired.load(Ordering::SeqCst), 1);
}
