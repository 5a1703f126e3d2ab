use std::future::Future;
use std::io::Read;
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::thread;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use mailbox_frame::{FrameError, FrameReader, ReaderConfig};
use mailbox_ingest::{
    BroadcastHub, BusMessage, DeviceState, DeviceStateView, HubConfig, IngestConfig,
    IngestCoordinator,
};
use serde::Serialize;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{info, warn};

use crate::cmd::{check_topic, subscription, ServeArgs};
use crate::exit::{ingest_error, io_error, CliError, CliResult, FAILURE, INTERNAL, SUCCESS};
use crate::output::{print_stats, OutputFormat};

/// Payloads buffered between the stdin reader and the ingest loop.
const INGEST_QUEUE_CAPACITY: usize = 256;

struct ServerState {
    hub: BroadcastHub,
    devices: DeviceStateView,
    shutdown: watch::Receiver<bool>,
}

#[derive(Serialize)]
struct DeviceEntry {
    device_ip: Ipv4Addr,
    #[serde(flatten)]
    state: DeviceState,
}

pub fn run(args: ServeArgs) -> CliResult<i32> {
    check_topic(&args.topic, &args.subscription)?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|err| io_error("runtime setup failed", err))?;
    runtime.block_on(serve(args))
}

async fn serve(args: ServeArgs) -> CliResult<i32> {
    let hub = BroadcastHub::with_config(HubConfig {
        observer_capacity: args.observer_capacity,
        overflow: args.overflow.into(),
    });
    let config = IngestConfig {
        subscription: subscription(&args.subscription),
    };
    let mut coordinator = IngestCoordinator::with_config(hub.clone(), config)
        .map_err(|err| ingest_error("invalid subscription", err))?;

    let interrupted =
        interrupt_signal().map_err(|err| io_error("installing interrupt handler failed", err))?;

    let listener = TcpListener::bind(args.bind)
        .await
        .map_err(|err| io_error(&format!("bind {} failed", args.bind), err))?;
    let local_addr = listener
        .local_addr()
        .map_err(|err| io_error("bind failed", err))?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let state = Arc::new(ServerState {
        hub,
        devices: coordinator.devices(),
        shutdown: shutdown_rx.clone(),
    });
    let app = router(state);

    let mut server_shutdown = shutdown_rx;
    let server = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = server_shutdown.changed().await;
            })
            .await
    });

    let (messages_tx, messages_rx) = mpsc::channel(INGEST_QUEUE_CAPACITY);
    let (end_tx, mut end_rx) = oneshot::channel();
    spawn_stdin_reader(
        args.topic.clone(),
        args.delimiter.reader_config(),
        messages_tx,
        end_tx,
    )?;
    info!(address = %local_addr, topic = %args.topic, "observer server listening");

    coordinator.run(messages_rx, interrupted).await;
    // Empty when the loop was interrupted with the reader still blocked.
    if let Ok(Some(err)) = end_rx.try_recv() {
        coordinator.record_stream_error(&err);
    }
    let stats = coordinator.stats();

    let _ = shutdown_tx.send(true);
    match server.await {
        Ok(Ok(())) => {}
        Ok(Err(err)) => return Err(io_error("observer server failed", err)),
        Err(err) => {
            return Err(CliError::new(
                INTERNAL,
                format!("observer server task failed: {err}"),
            ))
        }
    }

    print_stats(&stats, OutputFormat::Json);
    Ok(if stats.io_errors > 0 { FAILURE } else { SUCCESS })
}

fn router(state: Arc<ServerState>) -> Router {
    Router::new()
        .route("/ws", get(upgrade_handler))
        .route("/devices", get(devices_handler))
        .with_state(state)
}

/// Resolves on the first Ctrl-C. The handler is installed before this
/// returns, so an interrupt that arrives early is not lost.
#[cfg(unix)]
fn interrupt_signal() -> std::io::Result<impl Future<Output = ()>> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut interrupt = signal(SignalKind::interrupt())?;
    Ok(async move {
        interrupt.recv().await;
        info!("interrupt received; shutting down");
    })
}

#[cfg(not(unix))]
fn interrupt_signal() -> std::io::Result<impl Future<Output = ()>> {
    Ok(async {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("interrupt received; shutting down");
        }
    })
}

/// Reads stdin on a plain thread. A blocking read cannot be cancelled, so
/// the thread is detached and never joined; process exit ends it.
fn spawn_stdin_reader(
    topic: String,
    config: ReaderConfig,
    messages: mpsc::Sender<BusMessage>,
    end: oneshot::Sender<Option<FrameError>>,
) -> CliResult<()> {
    thread::Builder::new()
        .name("stdin-reader".to_string())
        .spawn(move || {
            let outcome = publish_frames(std::io::stdin().lock(), &topic, config, &messages);
            // Report the outcome before the channel closes.
            let _ = end.send(outcome);
            drop(messages);
        })
        .map_err(|err| io_error("spawning stdin reader failed", err))?;
    Ok(())
}

/// Publish every frame-sized payload of `input` on `topic`.
///
/// Returns the stream error that ended the input, if any. Payloads are not
/// decoded here; the ingest loop decodes and counts them.
fn publish_frames<R: Read>(
    input: R,
    topic: &str,
    config: ReaderConfig,
    messages: &mpsc::Sender<BusMessage>,
) -> Option<FrameError> {
    let mut reader = FrameReader::with_config(input, config);
    while let Some(item) = reader.next_payload() {
        match item {
            Ok(payload) => {
                if messages.blocking_send(BusMessage::new(topic, payload)).is_err() {
                    return None;
                }
            }
            Err(err) => return Some(err),
        }
    }
    info!("input stream closed; shutting down");
    None
}

async fn devices_handler(State(state): State<Arc<ServerState>>) -> Json<Vec<DeviceEntry>> {
    let devices = state
        .devices
        .snapshot()
        .into_iter()
        .map(|(device_ip, state)| DeviceEntry { device_ip, state })
        .collect();
    Json(devices)
}

async fn upgrade_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<ServerState>>,
) -> axum::response::Response {
    ws.on_upgrade(|socket| observer_session(socket, state))
}

async fn observer_session(mut socket: WebSocket, state: Arc<ServerState>) {
    let mut observer = state.hub.register();
    let mut shutdown = state.shutdown.clone();
    let id = observer.id();
    info!(observer = %id, "websocket observer connected");

    loop {
        tokio::select! {
            event = observer.recv() => {
                let Some(event) = event else {
                    break;
                };
                let Ok(text) = serde_json::to_string(&event) else {
                    warn!(observer = %id, "failed to serialise telemetry event");
                    continue;
                };
                if socket.send(Message::Text(text)).await.is_err() {
                    break;
                }
            }
            message = socket.recv() => {
                match message {
                    Some(Ok(Message::Ping(payload))) => {
                        if socket.send(Message::Pong(payload)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                    Some(Ok(_)) => {}
                }
            }
            _ = shutdown.changed() => {
                let _ = socket.send(Message::Close(None)).await;
                break;
            }
        }
    }

    info!(observer = %id, "websocket observer disconnected");
}

#[cfg(test)]
mod tests {
    use std::net::SocketAddr;
    use std::time::Duration;

    use futures_util::{SinkExt, StreamExt};
    use mailbox_frame::{encode_frame, MailboxState, TelemetryFrame};
    use mailbox_ingest::{DeviceStateMachine, TelemetryEvent, TopicClass};
    use tokio::task::JoinHandle;
    use tokio::time::{sleep, timeout};
    use tokio_tungstenite::{connect_async, tungstenite::protocol::Message as WsMessage};

    use super::*;

    fn frame() -> TelemetryFrame {
        TelemetryFrame {
            device_ip: Ipv4Addr::new(192, 168, 1, 100),
            timestamp: 1_705_095_875,
            distance: 250,
            state: MailboxState::HasMail,
            success_rate: 98,
            baseline: 300,
            confidence: 87,
        }
    }

    type ServerTask = JoinHandle<std::io::Result<()>>;

    async fn start_server(hub: BroadcastHub) -> (SocketAddr, watch::Sender<bool>, ServerTask) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (tx, rx) = watch::channel(false);
        let state = Arc::new(ServerState {
            hub,
            devices: DeviceStateMachine::new().view(),
            shutdown: rx.clone(),
        });
        let mut server_shutdown = rx;
        let server = tokio::spawn(async move {
            axum::serve(listener, router(state))
                .with_graceful_shutdown(async move {
                    let _ = server_shutdown.changed().await;
                })
                .await
        });
        (addr, tx, server)
    }

    async fn wait_for_observers(hub: &BroadcastHub, count: usize) {
        timeout(Duration::from_secs(5), async {
            while hub.observer_count() != count {
                sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("observer count should settle");
    }

    #[test]
    fn device_entries_flatten_state() {
        let frame = frame();
        let mut machine = DeviceStateMachine::new();
        machine.apply(TopicClass::MailDropped, &frame);

        let entry = DeviceEntry {
            device_ip: frame.device_ip,
            state: machine.get(frame.device_ip).unwrap(),
        };
        let value = serde_json::to_value(&entry).unwrap();
        assert_eq!(value["device_ip"], "192.168.1.100");
        assert_eq!(value["state"], "has_mail");
        assert_eq!(value["distance"], 250);
        assert_eq!(value["timestamp"], 1_705_095_875u32);
    }

    #[test]
    fn stdin_payloads_are_published_in_order() {
        let mut input = encode_frame(&frame()).to_vec();
        input.extend_from_slice(&[0u8; 15]);
        input.extend_from_slice(&[0xc0, 0xa8]);
        let (tx, mut rx) = mpsc::channel(8);

        let outcome = publish_frames(
            input.as_slice(),
            "home/mailbox/status",
            ReaderConfig::default(),
            &tx,
        );

        assert!(matches!(outcome, Some(FrameError::Truncated { residual: 2 })));
        let first = rx.try_recv().unwrap();
        assert_eq!(first.topic, "home/mailbox/status");
        assert_eq!(first.payload.as_ref(), &encode_frame(&frame())[..]);
        assert_eq!(rx.try_recv().unwrap().payload.as_ref(), &[0u8; 15][..]);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn publishing_stops_once_ingest_loop_is_gone() {
        let (tx, rx) = mpsc::channel(1);
        drop(rx);

        let input = encode_frame(&frame());
        let outcome = publish_frames(
            &input[..],
            "home/mailbox/status",
            ReaderConfig::default(),
            &tx,
        );
        assert!(outcome.is_none());
    }

    #[tokio::test]
    async fn websocket_observer_receives_events() {
        let hub = BroadcastHub::new();
        let (addr, shutdown, server) = start_server(hub.clone()).await;

        let (mut socket, _response) = connect_async(format!("ws://{addr}/ws")).await.unwrap();
        wait_for_observers(&hub, 1).await;

        let event = TelemetryEvent::from_frame(TopicClass::MailDropped, &frame());
        assert_eq!(hub.broadcast(&event).delivered, 1);

        let received = timeout(Duration::from_secs(5), socket.next())
            .await
            .expect("event should arrive")
            .unwrap()
            .unwrap();
        match received {
            WsMessage::Text(text) => {
                let value: serde_json::Value = serde_json::from_str(&text).unwrap();
                assert_eq!(value["event_type"], "mail_dropped");
                assert_eq!(value["device_ip"], "192.168.1.100");
                assert_eq!(value["timestamp"], 1_705_095_875u32);
                assert_eq!(value["state"], "has_mail");
                assert_eq!(value["distance"], 250);
                assert_eq!(value["baseline"], 300);
                assert_eq!(value["success_rate"], 98);
                assert_eq!(value["confidence"], 87);
            }
            other => panic!("unexpected message: {other:?}"),
        }

        socket.send(WsMessage::Close(None)).await.unwrap();
        wait_for_observers(&hub, 0).await;

        shutdown.send(true).unwrap();
        assert!(server.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn shutdown_signal_ends_server() {
        let (_addr, shutdown, server) = start_server(BroadcastHub::new()).await;

        shutdown.send(true).unwrap();
        assert!(server.await.unwrap().is_ok());
    }
}
