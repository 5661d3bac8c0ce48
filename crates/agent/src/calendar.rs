use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use frontdesk_core::domain::lead::Booking;

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("calendar endpoint unreachable: {0}")]
    Unreachable(String),
    #[error("calendar rejected booking `{booking_id}`: {reason}")]
    Rejected { booking_id: String, reason: String },
}

/// Receives bookings once they are stored. Delivery is best effort.
#[async_trait]
pub trait BookingNotifier: Send + Sync {
    async fn booking_created(&self, booking: &Booking) -> Result<(), NotifyError>;
}

/// Default notifier: records the booking in the log stream only.
#[derive(Default)]
pub struct LoggingBookingNotifier;

#[async_trait]
impl BookingNotifier for LoggingBookingNotifier {
    async fn booking_created(&self, booking: &Booking) -> Result<(), NotifyError> {
        tracing::info!(
            event_name = "pipeline.booking.push",
            booking_id = %booking.id.0,
            agent_id = %booking.agent_id.0,
            preferred_date = booking.preferred_date.as_deref().unwrap_or("unspecified"),
            "booking ready for calendar sync"
        );
        Ok(())
    }
}

/// Pushes the booking on a detached task. Failures are logged and never reach the turn.
pub fn push_in_background(notifier: Arc<dyn BookingNotifier>, booking: Booking) {
    tokio::spawn(async move {
        if let Err(error) = notifier.booking_created(&booking).await {
            tracing::warn!(
                event_name = "pipeline.booking.push_failed",
                booking_id = %booking.id.0,
                error = %error,
                "calendar push failed"
            );
        }
    });
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use async_trait::async_trait;
    use chrono::Utc;
    use tokio::sync::mpsc;

    use frontdesk_core::domain::agent::{AgentId, OrganizationId};
    use frontdesk_core::domain::conversation::ConversationId;
    use frontdesk_core::domain::lead::{Booking, BookingId, BookingStatus};

    use super::{push_in_background, BookingNotifier, NotifyError};

    struct ChannelNotifier {
        sender: mpsc::UnboundedSender<String>,
        fail: bool,
    }

    #[async_trait]
    impl BookingNotifier for ChannelNotifier {
        async fn booking_created(&self, booking: &Booking) -> Result<(), NotifyError> {
            let _ = self.sender.send(booking.id.0.clone());
            if self.fail {
                Err(NotifyError::Rejected {
                    booking_id: booking.id.0.clone(),
                    reason: "slot already taken".to_string(),
                })
            } else {
                Ok(())
            }
        }
    }

    fn booking() -> Booking {
        Booking {
            id: BookingId("booking-1".to_string()),
            organization_id: OrganizationId("org-1".to_string()),
            agent_id: AgentId("agent-1".to_string()),
            conversation_id: ConversationId("conversation-1".to_string()),
            attendee_name: "Sam".to_string(),
            attendee_email: None,
            attendee_phone: None,
            preferred_date: Some("tomorrow 3pm".to_string()),
            reason: None,
            status: BookingStatus::Pending,
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn failing_notifier_does_not_propagate() {
        let (sender, mut receiver) = mpsc::unbounded_channel();
        push_in_background(Arc::new(ChannelNotifier { sender, fail: true }), booking());
        assert_eq!(receiver.recv().await.as_deref(), Some("booking-1"));
    }

    #[test]
    fn notify_errors_name_the_booking() {
        let error = NotifyError::Rejected {
            booking_id: "booking-1".to_string(),
            reason: "slot already taken".to_string(),
        };
        assert_eq!(error.to_string(), "calendar rejected booking `booking-1`: slot already taken");
        assert_eq!(
            NotifyError::Unreachable("connection refused".to_string()).to_string(),
            "calendar endpoint unreachable: connection refused"
        );
    }
}
