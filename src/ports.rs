//! Collaborators the engine talks to but does not own.

use async_trait::async_trait;
use dashmap::DashMap;
use ulid::Ulid;

use crate::model::{Booking, UnitId};

/// Resolves guest contact details to a stable guest id.
#[async_trait]
pub trait GuestDirectory: Send + Sync {
    async fn get_or_create_guest_id(&self, email: &str, phone: &str) -> Result<Ulid, String>;
}

/// Guest-facing messages. `false` means the message was not delivered.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send_confirmation(&self, booking: &Booking) -> bool;
    async fn send_cancellation(&self, booking: &Booking) -> bool;
}

/// Amenity inventory drawn down when guests arrive.
#[async_trait]
pub trait AmenityStock: Send + Sync {
    async fn consume_for_stay(&self, reference: &str, units: &[UnitId]) -> Result<(), String>;
}

/// Guest ids keyed by lower-cased email, or by phone when there is no email.
#[derive(Default)]
pub struct InMemoryGuestDirectory {
    ids: DashMap<String, Ulid>,
}

impl InMemoryGuestDirectory {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl GuestDirectory for InMemoryGuestDirectory {
    async fn get_or_create_guest_id(&self, email: &str, phone: &str) -> Result<Ulid, String> {
        let key = match email.trim() {
            "" => phone.trim().to_string(),
            email => email.to_lowercase(),
        };
        if key.is_empty() {
            return Err("guest has neither email nor phone".into());
        }
        Ok(*self.ids.entry(key).or_insert_with(Ulid::new))
    }
}

/// Writes guest messages to the log instead of sending them.
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send_confirmation(&self, booking: &Booking) -> bool {
        tracing::info!("confirmation for {} to {}", booking.reference, booking.guest.email);
        true
    }

    async fn send_cancellation(&self, booking: &Booking) -> bool {
        tracing::info!("cancellation for {} to {}", booking.reference, booking.guest.email);
        true
    }
}

/// Stock that accepts every draw-down.
pub struct NoopStock;

#[async_trait]
impl AmenityStock for NoopStock {
    async fn consume_for_stay(&self, _reference: &str, _units: &[UnitId]) -> Result<(), String> {
        Ok(())
    }
}
