//! Tick loop and effect runner.
//!
//! [`TickDriver`] calls the lifecycle on a fixed interval and passes each
//! tick's effects to an [`EffectRunner`]. Storage calls are synchronous and
//! run on the blocking pool so the runtime stays responsive.
//!
//! An announcement is recorded as delivered only after the announcer
//! succeeds. An undelivered opening is re-emitted by every tick while the
//! round is in its prize window. A failed result is counted against the
//! round and retried on the next tick until `max_announce_attempts` is
//! reached. A delivery outcome that cannot be recorded is logged and the
//! rest of the batch still runs; the next tick repeats the announcement.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use quizround_core::QuizError;
use quizround_core::lifecycle::{AnnounceRetry, Effect, RoundLifecycle};
use quizround_core::model::RoundId;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::announcer::Announcer;
use crate::state::SharedState;

/// Counts from one pass of the effect runner.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    /// Announcements the announcer accepted.
    pub delivered: usize,
    /// Announcements the announcer rejected.
    pub failed: usize,
    /// Delivery outcomes that could not be written to the store.
    pub unrecorded: usize,
}

/// Executes the effects returned by a tick.
pub struct EffectRunner {
    lifecycle: RoundLifecycle,
    announcer: Arc<dyn Announcer>,
    max_announce_attempts: u32,
}

impl EffectRunner {
    /// Creates a runner delivering through `announcer`.
    #[must_use]
    pub fn new(
        lifecycle: RoundLifecycle,
        announcer: Arc<dyn Announcer>,
        max_announce_attempts: u32,
    ) -> Self {
        Self {
            lifecycle,
            announcer,
            max_announce_attempts,
        }
    }

    /// Delivers every effect in order.
    ///
    /// Announcer failures and failures to record an outcome are logged and
    /// counted; one effect never prevents the rest of the batch from running.
    pub async fn run(&self, effects: Vec<Effect>) -> RunSummary {
        let mut summary = RunSummary::default();

        for effect in effects {
            let round_id = effect.round_id();
            let recorded = match effect {
                Effect::AnnounceRoundOpened {
                    round_id,
                    started_at,
                    prize_window_ends_at,
                    ends_at,
                } => {
                    match self
                        .announcer
                        .announce_round_opened(round_id, started_at, prize_window_ends_at, ends_at)
                        .await
                    {
                        Ok(()) => {
                            summary.delivered += 1;
                            self.mark_opened_announced(round_id).await
                        },
                        Err(e) => {
                            warn!(round_id, error = %e, "round opened announcement failed");
                            summary.failed += 1;
                            Ok(())
                        },
                    }
                },
                Effect::AnnounceRoundResult {
                    round_id,
                    winners,
                    participant_count,
                } => {
                    match self
                        .announcer
                        .announce_round_result(round_id, &winners, participant_count)
                        .await
                    {
                        Ok(()) => {
                            summary.delivered += 1;
                            self.mark_announced(round_id).await
                        },
                        Err(e) => {
                            warn!(round_id, error = %e, "round result announcement failed");
                            summary.failed += 1;
                            self.record_failure(round_id).await
                        },
                    }
                },
            };

            if let Err(e) = recorded {
                warn!(round_id, "announcement outcome not recorded, will repeat: {e:#}");
                summary.unrecorded += 1;
            }
        }

        summary
    }

    async fn mark_opened_announced(&self, round_id: RoundId) -> Result<()> {
        let lifecycle = self.lifecycle.clone();
        tokio::task::spawn_blocking(move || lifecycle.mark_opened_announced(round_id))
            .await
            .context("announcement recording task panicked")?
            .with_context(|| format!("failed to mark round {round_id} opening announced"))?;
        Ok(())
    }

    async fn mark_announced(&self, round_id: RoundId) -> Result<()> {
        let lifecycle = self.lifecycle.clone();
        let changed = tokio::task::spawn_blocking(move || lifecycle.mark_announced(round_id))
            .await
            .context("announcement recording task panicked")?
            .with_context(|| format!("failed to mark round {round_id} announced"))?;
        if !changed {
            debug!(round_id, "round was already announced");
        }
        Ok(())
    }

    async fn record_failure(&self, round_id: RoundId) -> Result<()> {
        let lifecycle = self.lifecycle.clone();
        let max_attempts = self.max_announce_attempts;
        let outcome = tokio::task::spawn_blocking(move || {
            lifecycle.record_announce_failure(round_id, max_attempts)
        })
        .await
        .context("announcement recording task panicked")?
        .with_context(|| format!("failed to record announcement failure for round {round_id}"))?;

        if let AnnounceRetry::RetryLater { attempts } = outcome {
            debug!(round_id, attempts, max_attempts, "result announcement will be retried");
        }
        Ok(())
    }
}

/// Drives the lifecycle on a fixed interval.
pub struct TickDriver {
    lifecycle: RoundLifecycle,
    runner: EffectRunner,
    state: SharedState,
    interval: Duration,
}

impl TickDriver {
    /// Creates a driver ticking every `interval`.
    #[must_use]
    pub const fn new(
        lifecycle: RoundLifecycle,
        runner: EffectRunner,
        state: SharedState,
        interval: Duration,
    ) -> Self {
        Self {
            lifecycle,
            runner,
            state,
            interval,
        }
    }

    /// Runs one tick at `now` and executes its effects.
    ///
    /// # Errors
    ///
    /// Returns lifecycle storage errors. Effect failures are counted in the
    /// summary instead.
    pub async fn tick_at(&self, now: DateTime<Utc>) -> Result<RunSummary> {
        let lifecycle = self.lifecycle.clone();
        let report = tokio::task::spawn_blocking(move || lifecycle.tick(now))
            .await
            .context("tick task panicked")??;

        if report.effects.is_empty() {
            return Ok(RunSummary::default());
        }
        debug!(now = %report.now, effects = report.effects.len(), "tick produced effects");
        Ok(self.runner.run(report.effects).await)
    }

    /// Ticks until shutdown is requested.
    ///
    /// A tick in progress when shutdown arrives completes first. Tick errors
    /// are logged and the loop continues.
    pub async fn run(&self) {
        let mut interval = tokio::time::interval(self.interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        info!(interval_secs = self.interval.as_secs(), "tick driver started");

        loop {
            tokio::select! {
                _ = interval.tick() => {}
                () = self.state.shutdown_requested() => {}
            }

            if self.state.is_shutdown_requested() {
                info!("tick driver shutting down");
                break;
            }

            match self.tick_at(Utc::now()).await {
                Ok(summary) => {
                    if summary != RunSummary::default() {
                        debug!(
                            delivered = summary.delivered,
                            failed = summary.failed,
                            unrecorded = summary.unrecorded,
                            "tick finished"
                        );
                    }
                },
                Err(e) => {
                    let transient = e
                        .downcast_ref::<QuizError>()
                        .is_some_and(QuizError::is_transient);
                    if transient {
                        warn!(error = %e, "tick hit a storage conflict, retrying next interval");
                    } else {
                        error!("tick failed: {e:#}");
                    }
                },
            }
        }
    }
}
