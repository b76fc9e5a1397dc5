//! 定时任务抽象。
//!
//! - `TokioScheduler`：真实时钟，任务由 tokio 定时器驱动
//! - `ManualScheduler`：模拟时钟，测试中调用 `advance` 推进时间并同步执行到期任务
//!
//! 自动关闭定时器、过期扫描、在线扫描都通过 `Scheduler` 调度，
//! 组件本身不直接依赖 tokio 的时间源。

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::warn;

/// 任务返回的 future。
pub type TaskFuture = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

/// 一次性任务。
pub type OneShotTask = Box<dyn FnOnce() -> TaskFuture + Send + 'static>;

/// 周期任务，每个周期调用一次生成新的 future。
pub type RepeatingTask = Arc<dyn Fn() -> TaskFuture + Send + Sync + 'static>;

/// 把 async 闭包包装成一次性任务。
pub fn one_shot<F, Fut>(task: F) -> OneShotTask
where
    F: FnOnce() -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    Box::new(move || Box::pin(task()) as TaskFuture)
}

/// 把 async 闭包包装成周期任务。
pub fn repeating<F, Fut>(task: F) -> RepeatingTask
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    Arc::new(move || Box::pin(task()) as TaskFuture)
}

/// 调度器接口。
pub trait Scheduler: Send + Sync {
    /// 当前时间（epoch 毫秒）。
    fn now_ms(&self) -> i64;

    /// 在 `at_ms` 执行一次；时间已过则尽快执行。
    fn schedule_at(&self, at_ms: i64, task: OneShotTask);

    /// 每隔 `interval` 执行一次，首次执行在一个周期之后。
    fn schedule_every(&self, interval: Duration, task: RepeatingTask);
}

/// 基于 tokio 定时器的调度器。
#[derive(Debug, Default, Clone)]
pub struct TokioScheduler;

impl TokioScheduler {
    pub fn new() -> Self {
        Self
    }
}

impl Scheduler for TokioScheduler {
    fn now_ms(&self) -> i64 {
        domain::now_epoch_ms()
    }

    fn schedule_at(&self, at_ms: i64, task: OneShotTask) {
        let delay_ms = at_ms.saturating_sub(self.now_ms()).max(0) as u64;
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(delay_ms)).await;
            task().await;
        });
    }

    fn schedule_every(&self, interval: Duration, task: RepeatingTask) {
        let interval = interval.max(Duration::from_millis(1));
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // interval 的第一次 tick 立即完成
            ticker.tick().await;
            loop {
                ticker.tick().await;
                // 单独 spawn，任务 panic 不会终止后续周期
                if let Err(err) = tokio::spawn(task()).await {
                    warn!(
                        target: "fleet.scheduler",
                        interval_ms = interval.as_millis() as u64,
                        error = %err,
                        "scheduled_tick_panicked"
                    );
                }
            }
        });
    }
}

struct PendingOnce {
    at_ms: i64,
    seq: u64,
    task: OneShotTask,
}

struct PendingEvery {
    interval_ms: i64,
    next_at_ms: i64,
    task: RepeatingTask,
}

struct ManualState {
    now_ms: i64,
    seq: u64,
    once: Vec<PendingOnce>,
    every: Vec<PendingEvery>,
}

enum Due {
    Once(OneShotTask),
    Every(RepeatingTask),
}

/// 模拟时钟调度器。
///
/// 时间只在 `advance` / `advance_to` 中前进；到期任务按时间顺序逐个执行，
/// 执行前先把时钟拨到该任务的到期时间。任务中再次调度的新任务同样会在本次推进中执行。
pub struct ManualScheduler {
    state: Mutex<ManualState>,
}

impl ManualScheduler {
    pub fn new(start_ms: i64) -> Self {
        Self {
            state: Mutex::new(ManualState {
                now_ms: start_ms,
                seq: 0,
                once: Vec::new(),
                every: Vec::new(),
            }),
        }
    }

    /// 推进 `by`，执行期间到期的所有任务。
    pub async fn advance(&self, by: Duration) {
        let target = self.now_ms().saturating_add(by.as_millis() as i64);
        self.advance_to(target).await;
    }

    /// 推进到 `target_ms`（不会倒退）。
    pub async fn advance_to(&self, target_ms: i64) {
        while let Some(due) = self.take_next_due(target_ms) {
            match due {
                Due::Once(task) => task().await,
                Due::Every(task) => task().await,
            }
        }
        if let Ok(mut state) = self.state.lock() {
            state.now_ms = state.now_ms.max(target_ms);
        }
    }

    /// 尚未执行的一次性任务数量。
    pub fn pending_one_shots(&self) -> usize {
        self.state.lock().map(|state| state.once.len()).unwrap_or(0)
    }

    fn take_next_due(&self, target_ms: i64) -> Option<Due> {
        let mut state = self.state.lock().ok()?;
        let next_once = state
            .once
            .iter()
            .enumerate()
            .filter(|(_, item)| item.at_ms <= target_ms)
            .min_by_key(|(_, item)| (item.at_ms, item.seq))
            .map(|(index, item)| (index, item.at_ms));
        let next_every = state
            .every
            .iter()
            .enumerate()
            .filter(|(_, item)| item.next_at_ms <= target_ms)
            .min_by_key(|(_, item)| item.next_at_ms)
            .map(|(index, item)| (index, item.next_at_ms));

        match (next_once, next_every) {
            (Some((index, at_ms)), every) if every.is_none_or(|(_, next)| at_ms <= next) => {
                let item = state.once.swap_remove(index);
                state.now_ms = state.now_ms.max(at_ms);
                Some(Due::Once(item.task))
            }
            (_, Some((index, next_at_ms))) => {
                state.now_ms = state.now_ms.max(next_at_ms);
                let item = &mut state.every[index];
                item.next_at_ms = next_at_ms.saturating_add(item.interval_ms);
                Some(Due::Every(item.task.clone()))
            }
            _ => None,
        }
    }
}

impl Scheduler for ManualScheduler {
    fn now_ms(&self) -> i64 {
        self.state.lock().map(|state| state.now_ms).unwrap_or(0)
    }

    fn schedule_at(&self, at_ms: i64, task: OneShotTask) {
        if let Ok(mut state) = self.state.lock() {
            state.seq += 1;
            let seq = state.seq;
            state.once.push(PendingOnce { at_ms, seq, task });
        }
    }

    fn schedule_every(&self, interval: Duration, task: RepeatingTask) {
        if let Ok(mut state) = self.state.lock() {
            let interval_ms = (interval.as_millis() as i64).max(1);
            let next_at_ms = state.now_ms.saturating_add(interval_ms);
            state.every.push(PendingEvery {
                interval_ms,
                next_at_ms,
                task,
            });
        }
    }
}
