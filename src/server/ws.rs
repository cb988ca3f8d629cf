use std::time::Duration;

use axum::{
    extract::{
        State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::IntoResponse,
};
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use tokio::time::Instant;

use super::api::SharedState;
use crate::jobs::{JobEvent, Subscription};

/// How often to send WebSocket Ping frames.
const PING_INTERVAL: Duration = Duration::from_secs(30);

/// How long to wait for a Pong response before considering the connection dead.
const PONG_TIMEOUT: Duration = Duration::from_secs(60);

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<SharedState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: SharedState) {
    let broadcaster = state.queue.broadcaster().clone();
    let subscription = broadcaster.subscribe();
    let subscriber = subscription.id;
    tracing::debug!(subscriber, "websocket connected");

    let (sender, receiver) = socket.split();
    run_socket_loop(sender, receiver, subscription).await;

    broadcaster.unsubscribe(subscriber);
    tracing::debug!(subscriber, "websocket closed");
}

/// Serialize a job event into the text frame clients receive.
pub fn encode_event(event: &JobEvent) -> Option<Message> {
    match serde_json::to_string(event) {
        Ok(json) => Some(Message::Text(json.into())),
        Err(e) => {
            tracing::error!(job = %event.id, error = %e, "failed to serialize job event");
            None
        }
    }
}

/// Forward job events to the client with ping/pong keepalive.
///
/// Exits when the client closes, a send fails, the subscription ends, or
/// no Pong arrives within [`PONG_TIMEOUT`] of a Ping.
async fn run_socket_loop<S, R, E>(mut sender: S, mut receiver: R, mut subscription: Subscription)
where
    S: Sink<Message> + Unpin,
    R: Stream<Item = Result<Message, E>> + Unpin,
{
    let mut ping_interval = tokio::time::interval(PING_INTERVAL);
    // First tick is immediate.
    ping_interval.tick().await;

    let mut last_pong = Instant::now();
    let mut awaiting_pong = false;

    loop {
        tokio::select! {
            // ── Periodic ping ───────────────────────────────────────
            _ = ping_interval.tick() => {
                if awaiting_pong && last_pong.elapsed() > PONG_TIMEOUT {
                    tracing::debug!(subscriber = subscription.id, "pong timeout");
                    break;
                }
                if sender.send(Message::Ping(Vec::new().into())).await.is_err() {
                    break;
                }
                awaiting_pong = true;
            }

            // ── Event forwarding ────────────────────────────────────
            event = subscription.receiver.recv() => {
                let Some(event) = event else { break };
                if let Some(msg) = encode_event(&event)
                    && sender.send(msg).await.is_err()
                {
                    break;
                }
            }

            // ── Client messages ─────────────────────────────────────
            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Pong(_))) => {
                        last_pong = Instant::now();
                        awaiting_pong = false;
                    }
                    Some(Ok(Message::Close(_))) | None | Some(Err(_)) => break,
                    Some(Ok(_)) => {}
                }
            }
        }
    }

    // Best-effort close frame
    let _ = sender.send(Message::Close(None)).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::{Job, JobEventKind, ProgressBroadcaster};
    use futures::channel::mpsc;
    use serde_json::{Map, Value};

    type ClientFrames = mpsc::UnboundedSender<Result<Message, axum::Error>>;

    fn socket() -> (
        mpsc::UnboundedSender<Message>,
        mpsc::UnboundedReceiver<Message>,
        ClientFrames,
        mpsc::UnboundedReceiver<Result<Message, axum::Error>>,
    ) {
        let (out_tx, out_rx) = mpsc::unbounded();
        let (in_tx, in_rx) = mpsc::unbounded();
        (out_tx, out_rx, in_tx, in_rx)
    }

    fn text_json(msg: Message) -> Value {
        match msg {
            Message::Text(text) => serde_json::from_str(text.as_str()).unwrap(),
            other => panic!("expected text frame, got {other:?}"),
        }
    }

    #[test]
    fn test_encode_event_uses_wire_names() {
        let job = Job::new("shop", Map::new());
        let msg = encode_event(&JobEvent::from_job(JobEventKind::Created, &job)).unwrap();
        let json = text_json(msg);
        assert_eq!(json["type"], "job:created");
        assert_eq!(json["id"], job.id.to_string());
        assert_eq!(json["status"], "queued");
    }

    #[tokio::test]
    async fn test_events_are_forwarded_until_client_closes() {
        let broadcaster = ProgressBroadcaster::new(8);
        let subscription = broadcaster.subscribe();
        let (out_tx, mut out_rx, in_tx, in_rx) = socket();

        let task = tokio::spawn(run_socket_loop(out_tx, in_rx, subscription));

        let job = Job::new("shop", Map::new());
        broadcaster.notify(&JobEvent::from_job(JobEventKind::Created, &job));
        let first = text_json(out_rx.next().await.unwrap());
        assert_eq!(first["type"], "job:created");

        in_tx.unbounded_send(Ok(Message::Close(None))).unwrap();
        task.await.unwrap();

        assert!(matches!(out_rx.next().await, Some(Message::Close(None))));
    }

    #[tokio::test]
    async fn test_loop_ends_when_client_stream_ends() {
        let broadcaster = ProgressBroadcaster::new(8);
        let subscription = broadcaster.subscribe();
        let (out_tx, _out_rx, in_tx, in_rx) = socket();
        drop(in_tx);

        tokio::time::timeout(
            Duration::from_secs(5),
            run_socket_loop(out_tx, in_rx, subscription),
        )
        .await
        .unwrap();
    }
}
