//! Push channel transport.
//!
//! [`PushConnector`] opens one physical connection and hands back a
//! [`PushLink`]: a sender for outgoing text frames and a stream of incoming
//! payloads that ends when the connection closes. Reconnection is not done
//! here; see [`super::supervisor::ConnectionSupervisor`].

use async_trait::async_trait;
use futures_channel::mpsc::{unbounded, UnboundedSender};
use futures_util::future::ready;
use futures_util::stream::LocalBoxStream;
use futures_util::{SinkExt, StreamExt};
use thiserror::Error;
use tokio::task::spawn_local;
use tokio_tungstenite::{connect_async, tungstenite::Message};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PushError {
    #[error("could not open push channel: {0}")]
    Connect(String),
    #[error("push channel failed: {0}")]
    Transport(String),
}

/// One open connection.
pub struct PushLink {
    /// Dropping the sender closes the connection's write side.
    pub outgoing: UnboundedSender<String>,
    /// Ends when the connection closes; an `Err` item means it failed.
    pub incoming: LocalBoxStream<'static, Result<String, PushError>>,
}

#[async_trait(?Send)]
pub trait PushConnector {
    async fn open(&self, url: &str) -> Result<PushLink, PushError>;
}

/// WebSocket connector using tokio-tungstenite.
#[derive(Debug, Clone, Copy, Default)]
pub struct WsConnector;

#[async_trait(?Send)]
impl PushConnector for WsConnector {
    async fn open(&self, url: &str) -> Result<PushLink, PushError> {
        let (ws_stream, _response) = connect_async(url)
            .await
            .map_err(|e| PushError::Connect(e.to_string()))?;
        crate::log_info!("push channel connected to {url}");

        let (mut write, read) = ws_stream.split();
        let (outgoing, mut outgoing_rx) = unbounded::<String>();

        // Write task: forwards until the sender is dropped or the socket fails.
        spawn_local(async move {
            while let Some(text) = outgoing_rx.next().await {
                crate::log_debug!("push send: {text}");
                if let Err(e) = write.send(Message::Text(text.into())).await {
                    crate::log_error!("push send failed: {e}");
                    break;
                }
            }
            let _ = write.close().await;
        });

        let incoming = read
            .take_while(|frame| ready(!matches!(frame, Ok(Message::Close(_)))))
            .filter_map(|frame| {
                ready(match frame {
                    Ok(Message::Text(text)) => Some(Ok(text.as_str().to_owned())),
                    Ok(Message::Binary(bytes)) => {
                        Some(Ok(String::from_utf8_lossy(&bytes).into_owned()))
                    }
                    // Pong is handled automatically by tungstenite
                    Ok(_) => None,
                    Err(e) => Some(Err(PushError::Transport(e.to_string()))),
                })
            })
            .boxed_local();

        Ok(PushLink { outgoing, incoming })
    }
}
