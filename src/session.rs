//! One streamed generation, end to end.
//!
//! A [`GenerationSession`] owns the extractor and dispatcher of a single
//! prompt and shares the process-wide [`RelayChannel`]. The caller feeds
//! fragments in arrival order; the session is not `Clone` and every method
//! takes `&mut self` or `self`, so fragments of one generation are never
//! processed concurrently.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::config::ExtractorConfig;
use crate::dispatch::{DispatchContext, DispatchOutcome, Dispatcher, HandlerRegistry};
use crate::extractor::BlockExtractor;
use crate::grammar::TagFamily;
use crate::relay::{RelayChannel, RelayEnvelope};
use crate::Result;

/// Tally of a completed generation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GenerationOutcome {
    /// Blocks whose handler ran to completion.
    pub dispatched: usize,
    /// Blocks whose handler failed.
    pub failed: usize,
    /// Blocks with no registered handler.
    pub unhandled: usize,
    /// Sandbox diff returned with the `prompt-end` reply.
    pub diff: Option<String>,
}

/// Extractor, dispatcher and relay bound to one prompt.
pub struct GenerationSession {
    ctx: DispatchContext,
    extractor: BlockExtractor,
    dispatcher: Dispatcher,
    relay: RelayChannel,
    outcome: GenerationOutcome,
}

impl GenerationSession {
    /// Create a session extracting `family` blocks for the generation in `ctx`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the extractor cannot be built.
    pub fn new(
        ctx: DispatchContext,
        family: TagFamily,
        extractor: &ExtractorConfig,
        registry: Arc<HandlerRegistry>,
        relay: RelayChannel,
    ) -> Result<Self> {
        Ok(Self {
            ctx,
            extractor: BlockExtractor::new(family, extractor)?,
            dispatcher: Dispatcher::new(registry),
            relay,
            outcome: GenerationOutcome::default(),
        })
    }

    /// Identity of this generation.
    #[must_use]
    pub fn context(&self) -> &DispatchContext {
        &self.ctx
    }

    /// Tally so far; `diff` is only set by [`finish`](Self::finish).
    #[must_use]
    pub fn outcome(&self) -> &GenerationOutcome {
        &self.outcome
    }

    /// Announce the generation to the sandbox.
    ///
    /// # Errors
    ///
    /// Returns any error from [`RelayChannel::send`].
    pub fn start(&self) -> Result<()> {
        self.relay
            .send(&RelayEnvelope::prompt_start(self.ctx.prompt_id.as_str()))?;
        info!(
            prompt_id = %self.ctx.prompt_id,
            project_id = %self.ctx.project_id,
            tag = self.extractor.family().tag_name(),
            "session: generation started"
        );
        Ok(())
    }

    /// Append `fragment` and dispatch every block it completes.
    ///
    /// Returns the number of blocks extracted by this call. Malformed blocks
    /// are retried and eventually dropped by the extractor without ending
    /// the generation.
    ///
    /// # Errors
    ///
    /// Returns `AppError::BufferLimit` when the parse buffer overflows; the
    /// caller should [`abort`](Self::abort).
    pub async fn feed(&mut self, fragment: &str) -> Result<usize> {
        self.extractor.append(fragment);

        let mut extracted = 0;
        loop {
            let block = match self.extractor.try_extract() {
                Ok(Some(block)) => block,
                Ok(None) => break,
                Err(err) if err.is_malformed() => continue,
                Err(err) => return Err(err),
            };
            extracted += 1;

            match self.dispatcher.dispatch(&self.ctx, &block).await {
                DispatchOutcome::Handled => self.outcome.dispatched += 1,
                DispatchOutcome::Unhandled => self.outcome.unhandled += 1,
                DispatchOutcome::Failed(_) => self.outcome.failed += 1,
                DispatchOutcome::Duplicate => {}
            }
        }
        Ok(extracted)
    }

    /// End the generation and wait for the sandbox's `prompt-end` reply.
    ///
    /// An unclosed block still in the buffer is logged and dropped.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Timeout` or `AppError::ChannelClosed` if the reply
    /// does not arrive, or any error from queueing the message.
    pub async fn finish(self) -> Result<GenerationOutcome> {
        let Self {
            ctx,
            extractor,
            relay,
            mut outcome,
            ..
        } = self;

        if let Some(tail) = extractor.finish() {
            warn!(
                prompt_id = %ctx.prompt_id,
                dropped_bytes = tail.len(),
                "session: unclosed block dropped at end of stream"
            );
        }

        let reply = relay
            .request(
                RelayEnvelope::prompt_end(ctx.prompt_id.as_str()),
                &ctx.prompt_id,
            )
            .await?;
        outcome.diff = reply.diff().map(str::to_owned);

        info!(
            prompt_id = %ctx.prompt_id,
            dispatched = outcome.dispatched,
            failed = outcome.failed,
            unhandled = outcome.unhandled,
            has_diff = outcome.diff.is_some(),
            "session: generation finished"
        );
        Ok(outcome)
    }

    /// Abandon the generation, telling the sandbox without waiting for a reply.
    pub fn abort(self, reason: &str) {
        warn!(prompt_id = %self.ctx.prompt_id, reason, "session: generation aborted");
        if let Err(e) = self
            .relay
            .send(&RelayEnvelope::prompt_end(self.ctx.prompt_id.as_str()))
        {
            debug!(prompt_id = %self.ctx.prompt_id, error = %e, "session: prompt-end not sent");
        }
    }
}
