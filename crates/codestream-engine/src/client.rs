use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use codestream_contracts::protocol::{
    CloseKind, CodePayload, GenerationParams, ServerMessage, USER_CLOSE_CODE,
};
use codestream_contracts::stream::{StreamDemux, StreamKey};

use crate::transport::{CodegenTransport, TransportEvent};

pub const FAILURE_MESSAGE: &str =
    "Code generation failed. Check the developer console and backend logs for details.";
pub const CANCEL_MESSAGE: &str = "Code generation cancelled";

/// A user-facing notification raised while a generation runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
    Failure(String),
    Cancelled(String),
}

/// Receives everything a generation produces, in wire order.
///
/// Exactly one of `on_cancel` / `on_complete` is called per run, and it is
/// always the last call.
pub trait GenerationCallbacks {
    fn on_change(&mut self, _fragment: &str, _key: StreamKey) {}
    fn on_set_code(&mut self, _code: &CodePayload, _key: StreamKey) {}
    fn on_status_update(&mut self, _status: &str, _key: StreamKey) {}
    fn on_variant_complete(&mut self, _key: StreamKey) {}
    fn on_variant_error(&mut self, _key: StreamKey, _message: &str) {}
    fn on_variant_count(&mut self, _count: usize, _page: usize) {}
    fn on_notice(&mut self, _notice: Notice) {}
    fn on_cancel(&mut self) {}
    fn on_complete(&mut self) {}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelReason {
    /// Stopped by the user, locally or by the service echoing the user code.
    User,
    /// The service closed after reporting its own error.
    ApplicationError,
    /// The connection failed or closed unexpectedly.
    Transport,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GenerationOutcome {
    Completed,
    Cancelled(CancelReason),
}

/// Cooperative stop signal shared with whoever may cancel a running request.
#[derive(Debug, Clone, Default)]
pub struct CancelHandle(Arc<AtomicBool>);

impl CancelHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Drives one generation request over one connection.
pub struct CodegenClient<T> {
    transport: T,
    streams: StreamDemux,
    block_updates: bool,
    cancel: CancelHandle,
}

impl<T: CodegenTransport> CodegenClient<T> {
    pub fn new(transport: T, block_updates: bool, cancel: CancelHandle) -> Self {
        Self {
            transport,
            streams: StreamDemux::new(),
            block_updates,
            cancel,
        }
    }

    /// Sends `params`, then dispatches inbound messages until the connection
    /// closes or the cancel handle fires.
    pub fn run(
        mut self,
        params: &GenerationParams,
        callbacks: &mut dyn GenerationCallbacks,
    ) -> GenerationOutcome {
        let request = match serde_json::to_string(params) {
            Ok(raw) => raw,
            Err(err) => {
                tracing::error!(error = %err, "failed to serialize generation request");
                return self.finish(CloseKind::Unexpected(None), callbacks);
            }
        };
        if let Err(err) = self.transport.send_text(&request) {
            tracing::warn!(error = %format!("{err:#}"), "generation request not sent");
            return self.finish(CloseKind::Unexpected(None), callbacks);
        }

        loop {
            if self.cancel.is_cancelled() {
                if let Err(err) = self.transport.close(USER_CLOSE_CODE, CANCEL_MESSAGE) {
                    tracing::debug!(error = %format!("{err:#}"), "close after cancel failed");
                }
                return self.finish(CloseKind::UserCancelled, callbacks);
            }
            match self.transport.next_event() {
                Ok(TransportEvent::Idle) => continue,
                Ok(TransportEvent::Text(raw)) => self.dispatch(&raw, callbacks),
                Ok(TransportEvent::Closed(code)) => {
                    tracing::debug!(?code, "connection closed");
                    return self.finish(CloseKind::from_code(code), callbacks);
                }
                Err(err) => {
                    tracing::warn!(error = %format!("{err:#}"), "connection failed");
                    return self.finish(CloseKind::Unexpected(None), callbacks);
                }
            }
        }
    }

    fn dispatch(&mut self, raw: &str, callbacks: &mut dyn GenerationCallbacks) {
        let Some(message) = ServerMessage::parse(raw) else {
            tracing::debug!(raw = %truncate(raw, 200), "dropping malformed message");
            return;
        };
        match message {
            ServerMessage::Chunk { slot, text } => {
                if self.block_updates {
                    if !text.is_empty() {
                        callbacks.on_change(&text, slot);
                    }
                    return;
                }
                let extracted = self.streams.route(slot, &text);
                if !extracted.is_empty() {
                    callbacks.on_change(&extracted, slot);
                }
            }
            ServerMessage::Status { slot, text } => callbacks.on_status_update(&text, slot),
            ServerMessage::SetCode { slot, code } => {
                self.streams.reset(slot);
                callbacks.on_set_code(&code, slot);
            }
            ServerMessage::VariantComplete { slot } => callbacks.on_variant_complete(slot),
            ServerMessage::VariantError { slot, message } => {
                callbacks.on_variant_error(slot, &message)
            }
            ServerMessage::VariantCount { page, count } => callbacks.on_variant_count(count, page),
            ServerMessage::Error { message } => {
                tracing::error!(%message, "generation error");
                callbacks.on_notice(Notice::Failure(message));
            }
        }
    }

    fn finish(self, kind: CloseKind, callbacks: &mut dyn GenerationCallbacks) -> GenerationOutcome {
        match kind {
            CloseKind::Normal => {
                callbacks.on_complete();
                GenerationOutcome::Completed
            }
            CloseKind::UserCancelled => {
                callbacks.on_notice(Notice::Cancelled(CANCEL_MESSAGE.to_string()));
                callbacks.on_cancel();
                GenerationOutcome::Cancelled(CancelReason::User)
            }
            CloseKind::ApplicationError => {
                callbacks.on_cancel();
                GenerationOutcome::Cancelled(CancelReason::ApplicationError)
            }
            CloseKind::Unexpected(code) => {
                tracing::warn!(?code, "connection closed unexpectedly");
                callbacks.on_notice(Notice::Failure(FAILURE_MESSAGE.to_string()));
                callbacks.on_cancel();
                GenerationOutcome::Cancelled(CancelReason::Transport)
            }
        }
    }
}

fn truncate(text: &str, limit: usize) -> &str {
    match text.char_indices().nth(limit) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}
