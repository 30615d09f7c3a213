//! WebSocket transport
//!
//! One socket is one connection: a [`StreamHandler`] is created on upgrade,
//! registered for the lifetime of the socket and shut down when it closes.
//! Text frames carry control and status JSON, binary frames carry media
//! (see [`super::wire`]).
//!
//! Control messages run on one task per connection, in arrival order, so a
//! slow stop never stalls the media read loop.

use super::wire::{self, MediaPacket};
use super::ServerState;
use crate::handler::StreamHandler;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::Response;
use futures::{Sink, SinkExt, Stream, StreamExt};
use std::fmt::Display;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use uuid::Uuid;

/// Outbound messages buffered between the pumps and the socket writer
const OUTBOUND_BUFFER: usize = 256;

/// Control messages waiting for the control task
const CONTROL_BUFFER: usize = 64;

/// Runs a connection's control messages one at a time, in order
pub struct ControlLoop {
    tx: mpsc::Sender<String>,
    task: JoinHandle<()>,
}

impl ControlLoop {
    pub fn spawn(handler: Arc<StreamHandler>) -> Self {
        let (tx, mut rx) = mpsc::channel::<String>(CONTROL_BUFFER);
        let task = tokio::spawn(async move {
            while let Some(text) = rx.recv().await {
                handler.handle_text(&text).await;
            }
        });
        Self { tx, task }
    }

    /// Queue a control message. Returns `false` if the control task is gone.
    pub async fn submit(&self, text: String) -> bool {
        self.tx.send(text).await.is_ok()
    }

    /// Stop accepting messages and wait until the queued ones are handled
    pub async fn close(self) {
        let ControlLoop { tx, task } = self;
        drop(tx);
        if let Err(e) = task.await {
            tracing::error!("Control task did not complete: {}", e);
        }
    }
}

/// `GET /ws`
pub async fn ws_upgrade(ws: WebSocketUpgrade, State(state): State<Arc<ServerState>>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: Arc<ServerState>) {
    let (socket_tx, socket_rx) = socket.split();
    run_connection(state, socket_tx, socket_rx).await;
}

/// Serve one connection over any message sink and stream until the stream
/// ends or yields an error.
pub async fn run_connection<W, R, E>(state: Arc<ServerState>, mut socket_tx: W, mut socket_rx: R)
where
    W: Sink<Message> + Unpin + Send + 'static,
    R: Stream<Item = Result<Message, E>> + Unpin,
    E: Display,
{
    let connection_id = Uuid::new_v4().to_string();
    let handler = Arc::new(StreamHandler::new(
        connection_id.clone(),
        state.config.clone(),
        state.video_sinks.clone(),
    ));
    handler.start_up();
    state.registry.register(handler.clone());

    let (out_tx, mut out_rx) = mpsc::channel::<Message>(OUTBOUND_BUFFER);

    let writer = tokio::spawn(async move {
        while let Some(message) = out_rx.recv().await {
            if socket_tx.send(message).await.is_err() {
                break;
            }
        }
    });
    let pumps = [
        spawn_audio_pump(handler.clone(), out_tx.clone()),
        spawn_video_pump(handler.clone(), out_tx.clone()),
        spawn_status_pump(handler.clone(), out_tx),
    ];
    let control = ControlLoop::spawn(handler.clone());

    while let Some(message) = socket_rx.next().await {
        match message {
            Ok(Message::Text(text)) => {
                if !control.submit(text).await {
                    tracing::error!("[conn {}] Control task stopped", connection_id);
                    break;
                }
            }
            Ok(Message::Binary(bytes)) => match wire::decode(&bytes) {
                Ok(MediaPacket::Audio(frame)) => handler.receive_audio_frame(frame),
                Ok(MediaPacket::Video(frame)) => handler.receive_video_frame(frame),
                Err(e) => tracing::warn!("[conn {}] Dropping media packet: {}", connection_id, e),
            },
            Ok(Message::Close(_)) => break,
            Ok(_) => {}
            Err(e) => {
                tracing::warn!("[conn {}] WebSocket error: {}", connection_id, e);
                break;
            }
        }
    }

    control.close().await;
    for pump in &pumps {
        pump.abort();
    }
    handler.shutdown().await;
    state.registry.unregister(&connection_id);
    writer.abort();
    tracing::info!("[conn {}] Connection closed", connection_id);
}

fn spawn_audio_pump(handler: Arc<StreamHandler>, out: mpsc::Sender<Message>) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(frame) = handler.emit_audio().await {
            if out.send(Message::Binary(wire::encode_audio(&frame))).await.is_err() {
                break;
            }
        }
    })
}

fn spawn_video_pump(handler: Arc<StreamHandler>, out: mpsc::Sender<Message>) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(frame) = handler.emit_video().await {
            if out.send(Message::Binary(wire::encode_video(&frame))).await.is_err() {
                break;
            }
        }
    })
}

fn spawn_status_pump(handler: Arc<StreamHandler>, out: mpsc::Sender<Message>) -> JoinHandle<()> {
    let mut status = handler.subscribe_status();
    let connection_id = handler.connection_id().to_string();
    drop(handler);

    tokio::spawn(async move {
        loop {
            match status.recv().await {
                Ok(message) => {
                    let text = match message.to_json() {
                        Ok(text) => text,
                        Err(e) => {
                            tracing::error!("[conn {}] Failed to encode status: {}", connection_id, e);
                            continue;
                        }
                    };
                    if out.send(Message::Text(text)).await.is_err() {
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(
                        "[conn {}] Status listener lagged, {} messages skipped",
                        connection_id,
                        skipped
                    );
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use crate::encode::video::FfmpegVideoSinkFactory;
    use crate::handler::{ControlAction, StatusMessage};
    use crate::media::VideoFrame;
    use crate::recorder::StreamMode;
    use futures::channel::mpsc as channel;
    use std::path::Path;
    use std::time::Duration;

    fn state(dir: &Path) -> Arc<ServerState> {
        let config = AppConfig::with_data_dir(dir);
        config.init_directories().unwrap();
        let config = Arc::new(config);
        let sinks = Arc::new(FfmpegVideoSinkFactory::new(config.pipeline.video_codec));
        Arc::new(ServerState::new(config, sinks))
    }

    fn action(name: &str) -> Message {
        Message::Text(format!(r#"{{"action":"{}"}}"#, name))
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_connection_handles_control_in_order_and_cleans_up() {
        let tmp = tempfile::tempdir().unwrap();
        let state = state(tmp.path());
        let (inbound_tx, inbound_rx) = channel::unbounded::<Result<Message, std::io::Error>>();
        let (outbound_tx, _outbound_rx) = channel::unbounded::<Message>();
        let connection = tokio::spawn(run_connection(state.clone(), outbound_tx, inbound_rx));

        while state.registry.is_empty() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        let id = state.registry.connections()[0].webrtc_id.clone();
        let handler = state.registry.get(&id).unwrap();
        let mut status = handler.subscribe_status();

        let frame = wire::encode_video(&VideoFrame::solid(8, 8, [1, 2, 3]));
        inbound_tx.unbounded_send(Ok(Message::Binary(frame))).unwrap();
        for _ in 0..20 {
            inbound_tx.unbounded_send(Ok(action("start_frame_capture"))).unwrap();
            inbound_tx.unbounded_send(Ok(action("stop_frame_capture"))).unwrap();
        }
        drop(inbound_tx);
        tokio::time::timeout(Duration::from_secs(30), connection)
            .await
            .unwrap()
            .unwrap();

        assert!(state.registry.is_empty());
        let mut captures = Vec::new();
        while let Ok(message) = status.try_recv() {
            if let StatusMessage::FrameCaptureStatus { message, .. } = message {
                captures.push(message);
            }
        }
        assert_eq!(captures.len(), 40, "{:?}", captures);
        for pair in captures.chunks(2) {
            assert_eq!(pair[0], "Frame capture started");
            assert!(pair[1].starts_with("Frame capture stopped"), "{}", pair[1]);
        }

        // Nothing starts once the connection is gone
        handler.dispatch(ControlAction::StartRecord).await;
        assert_eq!(handler.mode(), StreamMode::Live);
    }

    #[tokio::test]
    async fn test_control_loop_drains_before_close() {
        let tmp = tempfile::tempdir().unwrap();
        let state = state(tmp.path());
        let handler = Arc::new(StreamHandler::new(
            "control-loop",
            state.config.clone(),
            state.video_sinks.clone(),
        ));

        let control = ControlLoop::spawn(handler.clone());
        assert!(control.submit(r#"{"action":"start_record"}"#.to_string()).await);
        assert!(control.submit(r#"{"action":"stop_record"}"#.to_string()).await);
        control.close().await;

        assert_eq!(handler.mode(), StreamMode::Replaying);
    }
}
