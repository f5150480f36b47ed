use axum::extract::ws::{CloseFrame, Message, WebSocket};
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use std::future::Future;
use std::time::Duration;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::time::{interval, timeout};
use tokio_util::sync::CancellationToken;

use crate::config::WebSocketConfig;
use crate::state::AppState;
use crate::ws::delivery::{DeliveryEngine, DeliveryOutcome};
use crate::ws::handler::{CLOSE_GOING_AWAY, CLOSE_INTERNAL_ERROR};
use crate::ws::protocol;
use crate::ws::registry::{ConnectionHandle, ConnectionSender, Session};

/// How long the writer gets to flush queued frames after the reader stops.
const WRITER_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// Why a connection's receive loop stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Termination {
    /// Client sent a close frame.
    ClientClosed,
    /// Underlying stream ended without a close frame.
    StreamEnded,
    /// No pong within the heartbeat window.
    HeartbeatLost,
    /// Server is shutting down.
    Shutdown,
    /// Unrecoverable transport or processing error.
    Fault(String),
}

impl Termination {
    /// Close frame the server sends on the way out, if any.
    pub fn close_frame(&self) -> Option<CloseFrame> {
        match self {
            Termination::Fault(_) => Some(CloseFrame {
                code: CLOSE_INTERNAL_ERROR,
                reason: "Internal error".into(),
            }),
            Termination::Shutdown => Some(CloseFrame {
                code: CLOSE_GOING_AWAY,
                reason: "Server shutting down".into(),
            }),
            // Heartbeat task already queued its own close; client-initiated
            // closes are answered by the transport.
            Termination::ClientClosed | Termination::StreamEnded | Termination::HeartbeatLost => None,
        }
    }
}

/// Run one authenticated connection from registration to teardown.
///
/// Splits the WebSocket into reader and writer halves:
/// - Writer task: owns the sink, forwards frames queued on the connection's channel
/// - Heartbeat task: periodic pings, closes the connection when pongs stop
/// - Reader (this task): decodes each inbound frame in order and hands it to
///   the delivery engine before reading the next one
pub async fn run_connection(socket: WebSocket, state: AppState, user_id: String) {
    let (ws_sender, mut ws_receiver) = socket.split();
    let (tx, rx) = mpsc::channel::<Message>(state.websocket.outbound_capacity());

    let handle = ConnectionHandle::new(tx.clone());
    let session = Session::new(&user_id, handle.clone());
    let connected_at = session.connected_at;
    state.sessions.register(session);

    tracing::info!(
        user_id = %user_id,
        connection_id = %handle.id(),
        "WebSocket actor started"
    );

    let writer_handle = tokio::spawn(writer_task(ws_sender, rx));

    // One pending pong is enough to prove liveness
    let (pong_tx, pong_rx) = mpsc::channel::<()>(1);
    let mut heartbeat_handle = tokio::spawn(heartbeat_task(tx.clone(), pong_rx, state.websocket.clone()));

    let ctx = FrameContext {
        user_id: &user_id,
        engine: &state.engine,
        outbound: &tx,
        pongs: &pong_tx,
    };
    let heartbeat_done = async {
        let _ = (&mut heartbeat_handle).await;
    };
    let termination = receive_loop(&mut ws_receiver, &ctx, heartbeat_done, &state.shutdown).await;

    // Terminating: deregister before anything else so nothing new is routed here
    heartbeat_handle.abort();
    state.sessions.unregister(&user_id, &handle);

    match &termination {
        Termination::Fault(error) => tracing::error!(
            user_id = %user_id,
            connection_id = %handle.id(),
            error = %error,
            "WebSocket connection failed"
        ),
        other => tracing::info!(
            user_id = %user_id,
            connection_id = %handle.id(),
            reason = ?other,
            "WebSocket connection ending"
        ),
    }

    if let Some(frame) = termination.close_frame() {
        let _ = timeout(WRITER_DRAIN_TIMEOUT, tx.send(Message::Close(Some(frame)))).await;
    }

    // The writer exits once every sender is gone; deliveries in flight on
    // other connections may still hold a clone, so the wait is bounded.
    drop(tx);
    drop(pong_tx);
    drop(handle);
    let writer_abort = writer_handle.abort_handle();
    if timeout(WRITER_DRAIN_TIMEOUT, writer_handle).await.is_err() {
        writer_abort.abort();
    }

    let connected_for = chrono::Utc::now() - connected_at;
    tracing::info!(
        user_id = %user_id,
        connected_secs = connected_for.num_seconds(),
        "WebSocket actor stopped"
    );
}

/// Per-connection references needed while handling frames.
pub(crate) struct FrameContext<'a> {
    pub user_id: &'a str,
    pub engine: &'a DeliveryEngine,
    pub outbound: &'a ConnectionSender,
    pub pongs: &'a mpsc::Sender<()>,
}

/// Sequential receive loop. Returns when the connection should terminate.
pub(crate) async fn receive_loop<S, H>(
    frames: &mut S,
    ctx: &FrameContext<'_>,
    heartbeat_done: H,
    shutdown: &CancellationToken,
) -> Termination
where
    S: Stream<Item = Result<Message, axum::Error>> + Unpin,
    H: Future<Output = ()>,
{
    tokio::pin!(heartbeat_done);

    loop {
        tokio::select! {
            biased;
            _ = shutdown.cancelled() => return Termination::Shutdown,
            _ = &mut heartbeat_done => return Termination::HeartbeatLost,
            _ = ctx.outbound.closed() => {
                return Termination::Fault("outbound channel closed".to_string());
            }
            frame = frames.next() => match frame {
                Some(Ok(msg)) => {
                    if let Some(termination) = handle_frame(msg, ctx).await {
                        return termination;
                    }
                }
                Some(Err(e)) => return Termination::Fault(e.to_string()),
                None => return Termination::StreamEnded,
            },
        }
    }
}

async fn handle_frame(msg: Message, ctx: &FrameContext<'_>) -> Option<Termination> {
    match msg {
        Message::Text(text) => handle_text(text.as_str(), ctx).await,
        Message::Binary(data) => match std::str::from_utf8(&data) {
            Ok(text) => handle_text(text, ctx).await,
            Err(_) => tracing::warn!(
                user_id = %ctx.user_id,
                bytes = data.len(),
                "Dropping non-UTF-8 binary frame"
            ),
        },
        Message::Pong(_) => {
            let _ = ctx.pongs.try_send(());
        }
        Message::Ping(data) => {
            let _ = ctx.outbound.try_send(Message::Pong(data));
        }
        Message::Close(frame) => {
            tracing::info!(user_id = %ctx.user_id, reason = ?frame, "Client initiated close");
            return Some(Termination::ClientClosed);
        }
    }
    None
}

/// Decode and deliver one text payload. Decode failures are logged and dropped.
async fn handle_text(text: &str, ctx: &FrameContext<'_>) {
    let operation = match protocol::decode(text) {
        Ok(op) => op,
        Err(e) => {
            tracing::warn!(
                user_id = %ctx.user_id,
                error = %e,
                payload = %text.chars().take(100).collect::<String>(),
                "Dropping undecodable frame"
            );
            return;
        }
    };

    match ctx.engine.deliver(ctx.user_id, operation).await {
        DeliveryOutcome::Message { id, persisted, live } => tracing::info!(
            user_id = %ctx.user_id,
            message_id = %id,
            persisted,
            live,
            "Message handled"
        ),
        DeliveryOutcome::Typing { live } => {
            tracing::trace!(user_id = %ctx.user_id, live, "Typing signal handled");
        }
        DeliveryOutcome::Ignored => {}
    }
}

/// Writer task: receives frames from the connection channel and forwards them to the sink.
async fn writer_task<W>(mut ws_sender: W, mut rx: mpsc::Receiver<Message>)
where
    W: Sink<Message> + Unpin,
{
    while let Some(msg) = rx.recv().await {
        let closing = matches!(msg, Message::Close(_));
        if ws_sender.send(msg).await.is_err() || closing {
            break;
        }
    }
}

/// Heartbeat task: sends a ping every interval and closes the connection with
/// 1001 if no pong arrives within the timeout. Returns when the connection is
/// considered dead.
async fn heartbeat_task(
    tx: ConnectionSender,
    mut pong_rx: mpsc::Receiver<()>,
    config: WebSocketConfig,
) {
    let mut ping_timer = interval(config.ping_interval());
    // Skip the first immediate tick
    ping_timer.tick().await;

    loop {
        ping_timer.tick().await;

        // Drop pongs that answered earlier pings
        while pong_rx.try_recv().is_ok() {}

        // A full queue skips this ping; the missing pong then ends the connection
        let ping = tx.try_send(Message::Ping(vec![1, 2, 3, 4].into()));
        if let Err(TrySendError::Closed(_)) = ping {
            // Writer task has died, connection is gone
            break;
        }

        match timeout(config.pong_timeout(), pong_rx.recv()).await {
            Ok(Some(())) => {}
            _ => {
                tracing::warn!("Pong timeout, closing connection");
                let _ = tx.try_send(Message::Close(Some(CloseFrame {
                    code: CLOSE_GOING_AWAY,
                    reason: "Pong timeout".into(),
                })));
                break;
            }
        }
    }
}
