use std::sync::Arc;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::{accept_hdr_async, WebSocketStream};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::handshake::server::{Request, Response, ErrorResponse};
use tokio_tungstenite::tungstenite::http::StatusCode;
use log::{info, warn, error, debug};

use crate::events::{ClientCommand, ServerEvent};
use crate::subscription::{BroadcastEngine, ConnectionId, ConnectionLifecycle};

pub const WS_PATH: &str = "/ws";

type WsSink = SplitSink<WebSocketStream<TcpStream>, Message>;
type WsSource = SplitStream<WebSocketStream<TcpStream>>;

pub struct WebSocketHandler {
    lifecycle: ConnectionLifecycle,
    peer_addr: String,
    outbound_buffer: usize,
}

impl WebSocketHandler {
    pub fn new(lifecycle: ConnectionLifecycle, peer_addr: String, outbound_buffer: usize) -> Self {
        Self {
            lifecycle,
            peer_addr,
            outbound_buffer,
        }
    }

    pub async fn handle_connection(self, stream: TcpStream) {
        let ws_stream = match accept_hdr_async(stream, |req: &Request, response: Response| {
            self.check_request(req, response)
        }).await {
            Ok(ws) => ws,
            Err(e) => {
                warn!("WebSocket handshake failed for {}: {:?}", self.peer_addr, e);
                return;
            }
        };

        let (outbound_tx, outbound_rx) = mpsc::channel::<ServerEvent>(self.outbound_buffer);
        let connection = match self.lifecycle.on_connect(&self.peer_addr, outbound_tx) {
            Ok(connection) => connection,
            Err(e) => {
                warn!("Rejecting {} after handshake: {}", self.peer_addr, e);
                return;
            }
        };

        self.run_connection(connection, ws_stream, outbound_rx).await;
    }

    fn check_request(&self, req: &Request, response: Response) -> Result<Response, ErrorResponse> {
        let path = req.uri().path();
        if path != WS_PATH {
            warn!("Unknown WebSocket path '{}' from {}", path, self.peer_addr);
            return Err(error_response(StatusCode::NOT_FOUND, "Invalid WebSocket path"));
        }
        if !self.lifecycle.has_capacity() {
            warn!("Connection limit reached, refusing {}", self.peer_addr);
            return Err(error_response(StatusCode::SERVICE_UNAVAILABLE, "Maximum connections reached"));
        }
        Ok(response)
    }

    async fn run_connection(
        &self,
        connection: ConnectionId,
        ws_stream: WebSocketStream<TcpStream>,
        outbound_rx: mpsc::Receiver<ServerEvent>,
    ) {
        let (write, read) = ws_stream.split();
        let (close_tx, close_rx) = mpsc::channel::<()>(1);

        let write_task = spawn_write_task(connection, write, outbound_rx, close_rx);
        let read_task = spawn_read_task(connection, read, close_tx, self.lifecycle.engine().clone());
        let write_abort = write_task.abort_handle();
        let read_abort = read_task.abort_handle();

        tokio::select! {
            _ = write_task => {
                debug!("Write task completed for {}", connection);
            }
            _ = read_task => {
                debug!("Read task completed for {}", connection);
            }
        }
        write_abort.abort();
        read_abort.abort();

        self.lifecycle.on_disconnect(connection);
    }
}

fn error_response(status: StatusCode, message: &str) -> ErrorResponse {
    let mut response = ErrorResponse::new(Some(message.to_string()));
    *response.status_mut() = status;
    response
}

fn spawn_write_task(
    connection: ConnectionId,
    mut write: WsSink,
    mut outbound_rx: mpsc::Receiver<ServerEvent>,
    mut close_rx: mpsc::Receiver<()>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                event = outbound_rx.recv() => {
                    let Some(event) = event else {
                        break;
                    };
                    let text = match event.to_json() {
                        Ok(text) => text,
                        Err(e) => {
                            error!("Failed to encode {} for {}: {}", event.event, connection, e);
                            continue;
                        }
                    };
                    if let Err(e) = write.send(Message::Text(text)).await {
                        warn!("Error sending to {}: {:?}", connection, e);
                        break;
                    }
                }
                _ = close_rx.recv() => {
                    debug!("Received close signal for {}", connection);
                    break;
                }
            }
        }
        let _ = write.close().await;
    })
}

fn spawn_read_task(
    connection: ConnectionId,
    mut read: WsSource,
    close_tx: mpsc::Sender<()>,
    engine: Arc<BroadcastEngine>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(msg_result) = read.next().await {
            match msg_result {
                Ok(Message::Text(text)) => match ClientCommand::parse(&text) {
                    Some(command) => engine.dispatch(connection, command).await,
                    None => warn!("Ignoring unrecognised frame from {}: {}", connection, text),
                },
                Ok(Message::Close(close_frame)) => {
                    info!("Received close frame from {}: {:?}", connection, close_frame);
                    break;
                }
                Ok(Message::Binary(data)) => {
                    debug!("Ignoring {} byte binary frame from {}", data.len(), connection);
                }
                Ok(_) => {}
                Err(e) => {
                    warn!("Error reading from {}: {:?}", connection, e);
                    break;
                }
            }
        }
        if close_tx.send(()).await.is_err() {
            debug!("Write task for {} already gone", connection);
        }
    })
}
