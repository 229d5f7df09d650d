//! WebSocket batch source.
//!
//! Speaks the upstream stream server's protocol: a JSON start command
//! opens the feed, each message carries paired `input_data`/`label` rows,
//! an optional `"ack"` is sent per batch, and `{"finished": true}` marks
//! end-of-stream.

pub mod parse;

use async_trait::async_trait;
use core_types::config::WsConfig;
use core_types::stream::{BatchSource, SourceError};
use core_types::types::Sample;
use futures::{SinkExt, StreamExt};
use log::{info, warn};
use serde::Serialize;
use thiserror::Error;
use tokio::net::TcpStream;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use url::Url;

use crate::parse::ParsedMessage;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

#[derive(Debug, Error)]
pub enum WsSourceError {
    #[error("invalid websocket url {url}: {source}")]
    InvalidUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },
}

/// Request sent once after connecting, mirroring the server's contract.
#[derive(Serialize)]
struct StartCommand<'a> {
    command: &'a str,
    batch_size: usize,
    start_index: usize,
}

pub struct WsSource {
    url: Url,
    batch_size: usize,
    start_index: usize,
    ack_batches: bool,
    conn: Option<WsStream>,
    finished: bool,
}

impl WsSource {
    pub fn new(config: &WsConfig) -> Result<Self, WsSourceError> {
        let url = Url::parse(&config.url).map_err(|source| WsSourceError::InvalidUrl {
            url: config.url.clone(),
            source,
        })?;
        Ok(Self {
            url,
            batch_size: config.batch_size,
            start_index: config.start_index,
            ack_batches: config.ack_batches,
            conn: None,
            finished: false,
        })
    }

    /// Connect and send the start command.
    async fn connect(&self) -> Result<WsStream, SourceError> {
        info!("[ws-source] connecting to {}", self.url);
        let (mut stream, _) = connect_async(self.url.as_str())
            .await
            .map_err(|err| SourceError::Transport {
                source: Box::new(err),
            })?;
        let start = StartCommand {
            command: "start",
            batch_size: self.batch_size,
            start_index: self.start_index,
        };
        let payload = serde_json::to_string(&start).map_err(|err| SourceError::Transport {
            source: Box::new(err),
        })?;
        stream
            .send(Message::Text(payload))
            .await
            .map_err(|err| SourceError::Transport {
                source: Box::new(err),
            })?;
        info!(
            "[ws-source] streaming started: batch_size={}, start_index={}",
            self.batch_size, self.start_index
        );
        Ok(stream)
    }
}

#[async_trait]
impl BatchSource for WsSource {
    async fn next_batch(&mut self) -> Result<Option<Vec<Sample>>, SourceError> {
        if self.finished {
            return Ok(None);
        }
        let mut conn = match self.conn.take() {
            Some(conn) => conn,
            None => self.connect().await?,
        };
        loop {
            match conn.next().await {
                Some(Ok(Message::Text(text))) => match parse::parse_message(&text) {
                    Ok(ParsedMessage::Batch(samples)) => {
                        if self.ack_batches {
                            if let Err(err) = conn.send(Message::Text("ack".to_string())).await {
                                warn!("[ws-source] ack failed: {err}");
                            }
                        }
                        self.conn = Some(conn);
                        return Ok(Some(samples));
                    }
                    Ok(ParsedMessage::Finished) => {
                        info!("[ws-source] server reported end-of-stream");
                        self.finished = true;
                        if let Err(err) = conn.close(None).await {
                            warn!("[ws-source] close failed: {err}");
                        }
                        return Ok(None);
                    }
                    Err(detail) => {
                        // Keep the connection; the stream continues past a
                        // bad batch.
                        self.conn = Some(conn);
                        return Err(SourceError::Malformed { detail });
                    }
                },
                Some(Ok(Message::Ping(payload))) => {
                    if let Err(err) = conn.send(Message::Pong(payload)).await {
                        warn!("[ws-source] pong failed: {err}");
                    }
                }
                Some(Ok(Message::Close(frame))) => {
                    return Err(SourceError::Disconnected {
                        detail: match frame {
                            Some(frame) => format!("server closed: {}", frame.reason),
                            None => "server closed".to_string(),
                        },
                    });
                }
                Some(Ok(_)) => {
                    // Binary/pong frames are not part of the protocol.
                }
                Some(Err(err)) => {
                    return Err(SourceError::Disconnected {
                        detail: err.to_string(),
                    });
                }
                None => {
                    return Err(SourceError::Disconnected {
                        detail: "stream ended without finished marker".to_string(),
                    });
                }
            }
        }
    }
}
