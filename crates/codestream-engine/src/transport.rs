use std::io::ErrorKind;
use std::net::TcpStream;
use std::time::Duration;

use anyhow::{Context, Result};
use tungstenite::protocol::frame::coding::CloseCode;
use tungstenite::protocol::CloseFrame;
use tungstenite::stream::MaybeTlsStream;
use tungstenite::{connect as websocket_connect, Message as WsMessage, WebSocket};

/// What a single read from the connection produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    Text(String),
    /// The peer closed, with the close code when one was sent.
    Closed(Option<u16>),
    /// Nothing arrived before the read timeout.
    Idle,
}

/// A bidirectional text-message connection to the generation service.
pub trait CodegenTransport {
    fn send_text(&mut self, raw: &str) -> Result<()>;
    fn next_event(&mut self) -> Result<TransportEvent>;
    fn close(&mut self, code: u16, reason: &str) -> Result<()>;
}

pub struct WebSocketTransport {
    ws: WebSocket<MaybeTlsStream<TcpStream>>,
}

impl WebSocketTransport {
    /// Opens the connection. Reads time out after `read_timeout` so the
    /// caller gets a chance to look at its cancel flag.
    pub fn connect(url: &str, read_timeout: Duration) -> Result<Self> {
        let (mut ws, _) = websocket_connect(url)
            .with_context(|| format!("failed to connect code generation websocket {url}"))?;
        set_socket_read_timeout(&mut ws, Some(read_timeout));
        tracing::info!(url, "connected to code generation service");
        Ok(Self { ws })
    }
}

impl CodegenTransport for WebSocketTransport {
    fn send_text(&mut self, raw: &str) -> Result<()> {
        self.ws
            .send(WsMessage::Text(raw.to_string().into()))
            .context("failed to send generation request")
    }

    fn next_event(&mut self) -> Result<TransportEvent> {
        let message = match self.ws.read() {
            Ok(message) => message,
            Err(tungstenite::Error::Io(err))
                if matches!(err.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) =>
            {
                return Ok(TransportEvent::Idle);
            }
            Err(tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed) => {
                return Ok(TransportEvent::Closed(None));
            }
            Err(err) => return Err(err).context("code generation read failed"),
        };

        let event = match message {
            WsMessage::Text(text) => TransportEvent::Text(text.to_string()),
            WsMessage::Binary(bytes) => {
                TransportEvent::Text(String::from_utf8_lossy(&bytes).to_string())
            }
            WsMessage::Close(frame) => {
                TransportEvent::Closed(frame.map(|frame| u16::from(frame.code)))
            }
            _ => TransportEvent::Idle,
        };
        Ok(event)
    }

    fn close(&mut self, code: u16, reason: &str) -> Result<()> {
        let frame = CloseFrame {
            code: CloseCode::from(code),
            reason: reason.to_string().into(),
        };
        match self.ws.close(Some(frame)) {
            Ok(()) | Err(tungstenite::Error::ConnectionClosed) => Ok(()),
            Err(err) => Err(err).context("failed to close code generation websocket"),
        }
    }
}

fn set_socket_read_timeout(
    ws: &mut WebSocket<MaybeTlsStream<TcpStream>>,
    timeout: Option<Duration>,
) {
    match ws.get_mut() {
        MaybeTlsStream::Plain(stream) => {
            let _ = stream.set_read_timeout(timeout);
        }
        MaybeTlsStream::Rustls(stream) => {
            let _ = stream.get_mut().set_read_timeout(timeout);
        }
        _ => {}
    }
}

#[cfg(test)]
pub(crate) mod scripted {
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};

    use anyhow::{anyhow, Result};

    use super::{CodegenTransport, TransportEvent};
    use crate::client::CancelHandle;

    pub(crate) enum Step {
        Event(TransportEvent),
        Fail(&'static str),
        /// Flips the cancel handle and reports an idle read.
        Cancel(CancelHandle),
    }

    #[derive(Debug, Default)]
    pub(crate) struct TransportLog {
        pub sent: Vec<String>,
        pub closed_with: Option<u16>,
        pub reads: usize,
    }

    /// In-memory transport that replays a fixed script of reads.
    pub(crate) struct ScriptedTransport {
        steps: VecDeque<Step>,
        log: Arc<Mutex<TransportLog>>,
        fail_send: bool,
    }

    impl ScriptedTransport {
        pub(crate) fn new(steps: Vec<Step>) -> Self {
            Self {
                steps: steps.into(),
                log: Arc::new(Mutex::new(TransportLog::default())),
                fail_send: false,
            }
        }

        pub(crate) fn texts(messages: &[serde_json::Value], close: Option<u16>) -> Self {
            let mut steps: Vec<Step> = messages
                .iter()
                .map(|message| Step::Event(TransportEvent::Text(message.to_string())))
                .collect();
            steps.push(Step::Event(TransportEvent::Closed(close)));
            Self::new(steps)
        }

        pub(crate) fn failing_send(mut self) -> Self {
            self.fail_send = true;
            self
        }

        pub(crate) fn log(&self) -> Arc<Mutex<TransportLog>> {
            Arc::clone(&self.log)
        }

        fn with_log(&self, f: impl FnOnce(&mut TransportLog)) -> Result<()> {
            let mut log = self
                .log
                .lock()
                .map_err(|_| anyhow!("transport log poisoned"))?;
            f(&mut log);
            Ok(())
        }
    }

    impl CodegenTransport for ScriptedTransport {
        fn send_text(&mut self, raw: &str) -> Result<()> {
            if self.fail_send {
                return Err(anyhow!("broken pipe"));
            }
            self.with_log(|log| log.sent.push(raw.to_string()))
        }

        fn next_event(&mut self) -> Result<TransportEvent> {
            self.with_log(|log| log.reads += 1)?;
            match self.steps.pop_front() {
                Some(Step::Event(event)) => Ok(event),
                Some(Step::Fail(message)) => Err(anyhow!(message)),
                Some(Step::Cancel(handle)) => {
                    handle.cancel();
                    Ok(TransportEvent::Idle)
                }
                None => Err(anyhow!("script exhausted")),
            }
        }

        fn close(&mut self, code: u16, _reason: &str) -> Result<()> {
            self.with_log(|log| log.closed_with = Some(code))
        }
    }
}
