//! Single event loop owning punching, reminders and sync bookkeeping.
//!
//! Network calls run on spawned tasks and come back as events; only the loop
//! writes to the punch log.

use crate::database::models::PunchType;
use crate::engine::context::{EngineContext, SyncTrigger};
use crate::engine::executor::{
    DEFAULT_FIRST_FIX_TIMEOUT, DEFAULT_FIX_MAX_AGE, PunchExecutor, PunchOutcome,
};
use crate::engine::reminders;
use crate::engine::scheduler::{AutoPunchScheduler, TickOutcome, every_after};
use crate::error::{PunchError, PunchResult, SyncResult};
use crate::location::{SharedLocation, parse_location_text};
use crate::sync::monitor::ConnectivityMonitor;
use crate::sync::reconciler::{
    DEFAULT_PULL_MIN_INTERVAL, DEFAULT_PUSH_BATCH, InflightGuard, PushResults, Reconciler,
};
use crate::sync::remote::RemoteRecord;
use crate::utils::format::{format_error_message, format_punch_error, format_success_message};
use crate::utils::time::MonthKey;
use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

#[derive(Debug, Clone)]
pub struct RuntimeOptions {
    pub auto_interval: Duration,
    pub sync_interval: Duration,
    pub monitor_interval: Duration,
    pub first_sync_delay: Duration,
    pub fix_max_age: Duration,
    pub first_fix_timeout: Duration,
    pub push_batch: usize,
    pub pull_min_interval: Duration,
    pub embed_cid_tag: bool,
}

impl Default for RuntimeOptions {
    fn default() -> Self {
        Self {
            auto_interval: Duration::from_secs(60),
            sync_interval: Duration::from_secs(20),
            monitor_interval: Duration::from_secs(12),
            first_sync_delay: Duration::from_secs(2),
            fix_max_age: DEFAULT_FIX_MAX_AGE,
            first_fix_timeout: DEFAULT_FIRST_FIX_TIMEOUT,
            push_batch: DEFAULT_PUSH_BATCH,
            pull_min_interval: DEFAULT_PULL_MIN_INTERVAL,
            embed_cid_tag: true,
        }
    }
}

impl RuntimeOptions {
    pub fn build_executor(&self, ctx: EngineContext) -> PunchExecutor {
        PunchExecutor::new(ctx)
            .with_fix_max_age(self.fix_max_age)
            .with_first_fix_timeout(self.first_fix_timeout)
    }

    pub fn build_reconciler(&self, ctx: EngineContext) -> Reconciler {
        Reconciler::new(ctx)
            .with_batch_size(self.push_batch)
            .with_pull_min_interval(self.pull_min_interval)
            .with_cid_tag(self.embed_cid_tag)
    }
}

enum Event {
    AutoTick,
    SyncTick,
    MonitorTick,
    Probed(bool),
    Punch {
        forced: Option<PunchType>,
        reply: oneshot::Sender<PunchResult<PunchOutcome>>,
    },
    PushDone {
        outcome: SyncResult<PushResults>,
        guard: InflightGuard,
    },
    PullDone {
        outcome: SyncResult<Vec<RemoteRecord>>,
        guard: InflightGuard,
    },
    Shutdown,
}

/// Cloneable front door for UI shells and the CLI.
#[derive(Clone)]
pub struct RuntimeHandle {
    tx: mpsc::Sender<Event>,
}

impl RuntimeHandle {
    /// Manual punch, executed on the loop.
    pub async fn punch(&self, forced: Option<PunchType>) -> PunchResult<PunchOutcome> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Event::Punch { forced, reply })
            .await
            .map_err(|_| PunchError::Storage(anyhow::anyhow!("runtime has stopped")))?;
        rx.await
            .map_err(|_| PunchError::Storage(anyhow::anyhow!("runtime dropped the request")))?
    }

    pub async fn shutdown(&self) {
        let _ = self.tx.send(Event::Shutdown).await;
    }
}

/// Feed `lat,lon` fixes and `punch [type]` commands into a running loop.
///
/// Punches run on their own tasks so fixes keep arriving while one of them
/// waits for a location. Each punch result is handed to `report`.
pub async fn read_commands<R, F>(
    input: R,
    location: Arc<SharedLocation>,
    handle: RuntimeHandle,
    report: F,
) where
    R: AsyncBufRead + Unpin,
    F: Fn(String) + Clone + Send + 'static,
{
    let mut lines = input.lines();
    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                tracing::warn!("Failed to read commands: {}", e);
                break;
            }
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        if let Some(rest) = line.strip_prefix("punch") {
            let forced = match rest.trim() {
                "" => None,
                text => match text.parse::<PunchType>() {
                    Ok(t) => Some(t),
                    Err(e) => {
                        report(format_error_message(&e.to_string()));
                        continue;
                    }
                },
            };
            let handle = handle.clone();
            let report = report.clone();
            tokio::spawn(async move {
                match handle.punch(forced).await {
                    Ok(outcome) => report(format_success_message(&outcome.message())),
                    Err(e) => report(format_punch_error(&e)),
                }
            });
            continue;
        }

        match parse_location_text(line) {
            Some(point) => {
                location.update(point);
            }
            None => tracing::warn!("Ignoring unrecognised input: {}", line),
        }
    }
}

pub struct Runtime {
    ctx: EngineContext,
    options: RuntimeOptions,
    executor: Arc<PunchExecutor>,
    scheduler: AutoPunchScheduler,
    reconciler: Arc<Reconciler>,
    monitor: ConnectivityMonitor,
    trigger: SyncTrigger,
    tx: mpsc::Sender<Event>,
    rx: mpsc::Receiver<Event>,
}

impl Runtime {
    pub fn new(ctx: EngineContext, options: RuntimeOptions) -> Self {
        let trigger = SyncTrigger::new();
        let executor = Arc::new(
            options
                .build_executor(ctx.clone())
                .with_sync_trigger(trigger.clone()),
        );
        let scheduler = AutoPunchScheduler::new(executor.clone());
        let reconciler = Arc::new(options.build_reconciler(ctx.clone()));
        let (tx, rx) = mpsc::channel(64);

        Self {
            ctx,
            options,
            executor,
            scheduler,
            reconciler,
            monitor: ConnectivityMonitor::new(),
            trigger,
            tx,
            rx,
        }
    }

    pub fn handle(&self) -> RuntimeHandle {
        RuntimeHandle {
            tx: self.tx.clone(),
        }
    }

    pub async fn run(mut self) -> Result<()> {
        tracing::info!(user = %self.ctx.username(), "Attendance runtime started");

        let tickers = vec![
            self.tick_into(Duration::ZERO, self.options.auto_interval, || Event::AutoTick),
            self.tick_into(Duration::ZERO, self.options.monitor_interval, || {
                Event::MonitorTick
            }),
            self.tick_into(
                self.options.first_sync_delay,
                self.options.sync_interval,
                || Event::SyncTick,
            ),
        ];

        loop {
            tokio::select! {
                Some(event) = self.rx.recv() => {
                    if matches!(event, Event::Shutdown) {
                        break;
                    }
                    self.handle_event(event).await;
                }
                _ = self.trigger.fired() => self.start_push().await,
            }
        }

        for ticker in tickers {
            ticker.abort();
        }
        tracing::info!("Attendance runtime stopped");
        Ok(())
    }

    fn tick_into(&self, delay: Duration, period: Duration, make: fn() -> Event) -> JoinHandle<()> {
        let tx = self.tx.clone();
        every_after(delay, period, move || {
            let tx = tx.clone();
            async move {
                let _ = tx.send(make()).await;
            }
        })
    }

    async fn handle_event(&mut self, event: Event) {
        match event {
            Event::AutoTick => self.on_auto_tick().await,
            Event::SyncTick => {
                self.start_push().await;
                self.start_pull();
            }
            Event::MonitorTick => {
                let remote = self.reconciler.remote();
                let tx = self.tx.clone();
                tokio::spawn(async move {
                    let online = remote.is_reachable().await;
                    let _ = tx.send(Event::Probed(online)).await;
                });
            }
            Event::Probed(online) => {
                if self.monitor.observe(online) {
                    self.start_push().await;
                    self.start_pull();
                }
            }
            Event::Punch { forced, reply } => {
                let result = self.executor.attempt_punch(forced, false).await;
                match &result {
                    Ok(outcome) => tracing::info!("{}", outcome.message()),
                    Err(PunchError::NoActionNeeded { reason }) => tracing::debug!("{}", reason),
                    Err(e) if e.is_validation() => tracing::info!("Manual punch refused: {}", e),
                    Err(e) => tracing::warn!("Manual punch failed: {}", e),
                }
                let _ = reply.send(result);
            }
            Event::PushDone { outcome, guard } => {
                if let Err(e) = self.reconciler.apply_push(outcome).await {
                    tracing::warn!("Push failed: {}", e);
                }
                drop(guard);
            }
            Event::PullDone { outcome, guard } => {
                match self.reconciler.apply_pull(outcome).await {
                    Ok(summary) if summary.ingested > 0 => {
                        tracing::debug!(ingested = summary.ingested, "Pulled remote records");
                    }
                    Ok(_) => {}
                    Err(e) => tracing::debug!("Pull failed: {}", e),
                }
                drop(guard);
            }
            Event::Shutdown => {}
        }
    }

    async fn on_auto_tick(&mut self) {
        match self.scheduler.tick().await {
            Ok(TickOutcome::Punched(outcome)) => tracing::info!("{}", outcome.message()),
            Ok(_) => {}
            Err(e) => tracing::warn!("Automatic punch tick failed: {}", e),
        }

        match reminders::due_reminders(&self.ctx).await {
            Ok(due) => {
                for reminder in due {
                    tracing::info!("{}", reminder.message(self.ctx.username()));
                }
            }
            Err(e) => tracing::warn!("Reminder check failed: {}", e),
        }
    }

    async fn start_push(&self) {
        let Some(guard) = self.reconciler.try_begin_push() else {
            return;
        };
        let batch = match self.reconciler.prepare_push().await {
            Ok(batch) if batch.is_empty() => return,
            Ok(batch) => batch,
            Err(e) => {
                tracing::warn!("Could not load unsynced records: {}", e);
                return;
            }
        };

        let remote = self.reconciler.remote();
        let embed = self.reconciler.embeds_cid_tag();
        let current_month = MonthKey::of(self.ctx.clock.today());
        let tx = self.tx.clone();
        tokio::spawn(async move {
            let outcome =
                Reconciler::collect_push(remote.as_ref(), batch, embed, current_month).await;
            let _ = tx.send(Event::PushDone { outcome, guard }).await;
        });
    }

    fn start_pull(&self) {
        let month = MonthKey::of(self.ctx.clock.today());
        let Some(guard) = self.reconciler.try_begin_pull(month) else {
            return;
        };

        let remote = self.reconciler.remote();
        let tx = self.tx.clone();
        tokio::spawn(async move {
            let outcome = Reconciler::collect_pull(remote.as_ref(), month).await;
            let _ = tx.send(Event::PullDone { outcome, guard }).await;
        });
    }
}
