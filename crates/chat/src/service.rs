use std::sync::Arc;

use async_trait::async_trait;
use chrono::Duration;
use dealdesk_core::{ApplicationError, DealIntake, InterfaceError};
use dealdesk_store::{submit_report, DealStore};
use tracing::{info, warn};
use uuid::Uuid;

use crate::{
    blocks::{self, MessageTemplate},
    events::{DealMessageService, EventContext, EventHandlerError, MessageEvent},
};

/// Validates free-text submissions and writes the valid deals to the store.
pub struct DealSubmissionService {
    intake: Arc<DealIntake>,
    store: Arc<dyn DealStore>,
    max_message_age: Duration,
}

impl DealSubmissionService {
    pub fn new(intake: Arc<DealIntake>, store: Arc<dyn DealStore>, max_message_age_secs: u64) -> Self {
        let seconds = i64::try_from(max_message_age_secs).unwrap_or(i64::MAX);
        Self {
            intake,
            store,
            max_message_age: Duration::try_seconds(seconds).unwrap_or(Duration::MAX),
        }
    }

    fn is_stale(&self, event: &MessageEvent, ctx: &EventContext) -> bool {
        ctx.received_at.signed_duration_since(event.sent_at) > self.max_message_age
    }
}

#[async_trait]
impl DealMessageService for DealSubmissionService {
    async fn handle_deal_message(
        &self,
        event: &MessageEvent,
        ctx: &EventContext,
    ) -> Result<Option<MessageTemplate>, EventHandlerError> {
        if self.is_stale(event, ctx) {
            info!(
                event_name = "chat.submission.stale_skipped",
                correlation_id = %ctx.correlation_id,
                chat_id = event.chat_id,
                sent_at = %event.sent_at,
            );
            return Ok(None);
        }

        let submission_id = Uuid::new_v4();
        let report = match self.intake.process(&event.text) {
            Ok(report) => report,
            Err(error) => {
                warn!(
                    event_name = "chat.submission.rejected",
                    correlation_id = %ctx.correlation_id,
                    submission_id = %submission_id,
                    chat_id = event.chat_id,
                    error = %error,
                );
                let detail = error.to_string();
                let interface = ApplicationError::from(error).into_interface(&ctx.correlation_id);
                let detail = matches!(interface, InterfaceError::BadRequest { .. }).then_some(detail);
                return Ok(Some(blocks::rejection_message(
                    interface.user_message(),
                    detail.as_deref(),
                    interface.correlation_id(),
                )));
            }
        };

        if report.is_empty() {
            return Ok(Some(blocks::empty_submission_message()));
        }

        info!(
            event_name = "chat.submission.validated",
            correlation_id = %ctx.correlation_id,
            submission_id = %submission_id,
            chat_id = event.chat_id,
            sender = event.sender.as_deref().unwrap_or("unknown"),
            deals = report.total(),
            valid = report.valid_count,
            invalid = report.invalid_count,
        );

        let receipt = submit_report(self.store.as_ref(), &report).await;
        for failure in receipt.failures() {
            warn!(
                event_name = "chat.submission.store_write_failed",
                correlation_id = %ctx.correlation_id,
                submission_id = %submission_id,
                chat_id = event.chat_id,
                error = %failure,
            );
        }
        if !receipt.is_empty() {
            info!(
                event_name = "chat.submission.stored",
                correlation_id = %ctx.correlation_id,
                submission_id = %submission_id,
                backend = self.store.backend(),
                stored = receipt.stored_count,
                failed = receipt.failed_count,
            );
        }

        Ok(Some(blocks::report_message(&report, Some(&receipt))))
    }
}
