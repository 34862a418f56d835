//! Side effects of lifecycle transitions, run after the state change is durable.
//!
//! Transitions only describe what should happen; the dispatcher does it,
//! bounded by a per-attempt timeout and a retry budget. A failed effect is
//! logged and reported, never rolled back into the booking.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use crate::limits::MAX_EFFECT_ATTEMPTS;
use crate::model::{Booking, UnitId};
use crate::ports::{AmenityStock, Notifier};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    SendConfirmation { booking: Box<Booking> },
    SendCancellation { booking: Box<Booking> },
    ConsumeAmenities { reference: String, units: Vec<UnitId> },
}

impl Effect {
    pub fn label(&self) -> &'static str {
        match self {
            Effect::SendConfirmation { .. } => "send_confirmation",
            Effect::SendCancellation { .. } => "send_cancellation",
            Effect::ConsumeAmenities { .. } => "consume_amenities",
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum EffectError {
    #[error("timed out after {0:?}")]
    Timeout(Duration),
    #[error("not delivered")]
    Undelivered,
    #[error("rejected: {0}")]
    Rejected(String),
}

#[derive(Debug, Clone)]
pub struct EffectOutcome {
    pub effect: Effect,
    pub delivered: bool,
    pub attempts: u32,
    pub error: Option<String>,
}

pub struct EffectDispatcher {
    notifier: Arc<dyn Notifier>,
    stock: Arc<dyn AmenityStock>,
    timeout: Duration,
    max_attempts: u32,
    backoff: Duration,
}

impl EffectDispatcher {
    pub fn new(notifier: Arc<dyn Notifier>, stock: Arc<dyn AmenityStock>, timeout: Duration) -> Self {
        Self {
            notifier,
            stock,
            timeout,
            max_attempts: MAX_EFFECT_ATTEMPTS,
            backoff: Duration::from_millis(200),
        }
    }

    pub fn with_retries(mut self, max_attempts: u32, backoff: Duration) -> Self {
        self.max_attempts = max_attempts.max(1);
        self.backoff = backoff;
        self
    }

    async fn attempt(&self, effect: &Effect) -> Result<(), EffectError> {
        let call = async {
            match effect {
                Effect::SendConfirmation { booking } => {
                    if self.notifier.send_confirmation(booking).await {
                        Ok(())
                    } else {
                        Err(EffectError::Undelivered)
                    }
                }
                Effect::SendCancellation { booking } => {
                    if self.notifier.send_cancellation(booking).await {
                        Ok(())
                    } else {
                        Err(EffectError::Undelivered)
                    }
                }
                Effect::ConsumeAmenities { reference, units } => self
                    .stock
                    .consume_for_stay(reference, units)
                    .await
                    .map_err(EffectError::Rejected),
            }
        };
        tokio::time::timeout(self.timeout, call)
            .await
            .map_err(|_| EffectError::Timeout(self.timeout))?
    }

    /// Run one effect with retries.
    pub async fn execute(&self, effect: Effect) -> EffectOutcome {
        let mut last_error = None;
        for attempt in 1..=self.max_attempts {
            match self.attempt(&effect).await {
                Ok(()) => {
                    return EffectOutcome {
                        effect,
                        delivered: true,
                        attempts: attempt,
                        error: None,
                    };
                }
                Err(e) => {
                    tracing::debug!("{} attempt {attempt} failed: {e}", effect.label());
                    last_error = Some(e.to_string());
                    if attempt < self.max_attempts {
                        tokio::time::sleep(self.backoff * attempt).await;
                    }
                }
            }
        }
        tracing::warn!(
            "{} gave up after {} attempts: {}",
            effect.label(),
            self.max_attempts,
            last_error.as_deref().unwrap_or("unknown")
        );
        metrics::counter!(crate::observability::EFFECTS_FAILED_TOTAL, "effect" => effect.label()).increment(1);
        EffectOutcome {
            effect,
            delivered: false,
            attempts: self.max_attempts,
            error: last_error,
        }
    }

    /// Run a batch concurrently; outcomes come back in input order.
    pub async fn dispatch(&self, effects: Vec<Effect>) -> Vec<EffectOutcome> {
        futures::future::join_all(effects.into_iter().map(|e| self.execute(e))).await
    }
}

/// Drain effect batches in the background until every sender is dropped.
pub async fn run_dispatcher(dispatcher: Arc<EffectDispatcher>, mut rx: mpsc::Receiver<Vec<Effect>>) {
    while let Some(batch) = rx.recv().await {
        dispatcher.dispatch(batch).await;
    }
    tracing::debug!("effect dispatcher stopped");
}
