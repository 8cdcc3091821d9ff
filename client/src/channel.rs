use crate::{Error, Result};
use degendome_types::{Frame, Inbound, Outbound};
use futures_util::{SinkExt, StreamExt};
use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex, PoisonError,
    },
    time::Duration,
};
use tokio::{
    sync::{broadcast, mpsc},
    task::JoinHandle,
};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, error, trace, warn};
use url::Url;

const DEFAULT_DIAL_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_CHANNEL_CAPACITY: usize = 1024;

/// Persistent, bidirectional connection to the battle authority.
///
/// `error` frames carry no correlation id, so every subscriber sees every
/// rejection. A bet placed over a channel that is also submitting trades
/// fails on a trade's `error` frame as well as its own.
pub trait Channel: Send + Sync {
    /// Queue one event for delivery. Never retries.
    fn emit(&self, event: Outbound) -> Result<()>;

    /// Receive every inbound event that arrives after this call. Once the
    /// connection is gone the receiver reports [broadcast::error::RecvError::Closed].
    fn subscribe(&self) -> broadcast::Receiver<Inbound>;
}

/// [Channel] over a websocket carrying JSON event frames.
///
/// Dropping the channel closes the connection.
pub struct WsChannel {
    outbound: mpsc::UnboundedSender<Message>,
    /// Taken by the reader when the socket ends.
    inbound: Arc<Mutex<Option<broadcast::Sender<Inbound>>>>,
    closed: Arc<AtomicBool>,
    writer: JoinHandle<()>,
    reader: JoinHandle<()>,
}

impl Drop for WsChannel {
    fn drop(&mut self) {
        self.writer.abort();
        self.reader.abort();
    }
}

impl WsChannel {
    pub async fn connect(url: &str) -> Result<Self> {
        Self::connect_with_timeout(url, DEFAULT_DIAL_TIMEOUT).await
    }

    pub async fn connect_with_timeout(url: &str, dial_timeout: Duration) -> Result<Self> {
        let url = Url::parse(url)?;
        match url.scheme() {
            "ws" | "wss" => {}
            other => return Err(Error::InvalidScheme(other.to_string())),
        }
        let (ws, _) = tokio::time::timeout(dial_timeout, connect_async(url.as_str()))
            .await
            .map_err(|_| Error::DialTimeout)??;
        debug!(%url, "connected to battle authority");

        let (mut sink, mut stream) = ws.split();
        let (outbound, mut outbound_rx) = mpsc::unbounded_channel::<Message>();
        let (inbound, _) = broadcast::channel(DEFAULT_CHANNEL_CAPACITY);
        let closed = Arc::new(AtomicBool::new(false));
        let shared_inbound = Arc::new(Mutex::new(Some(inbound.clone())));

        let writer = {
            let closed = closed.clone();
            tokio::spawn(async move {
                while let Some(message) = outbound_rx.recv().await {
                    if let Err(err) = sink.send(message).await {
                        warn!(error = %err, "failed to send websocket message");
                        break;
                    }
                }
                closed.store(true, Ordering::Release);
            })
        };

        let reader = {
            let closed = closed.clone();
            let shared_inbound = shared_inbound.clone();
            tokio::spawn(async move {
                while let Some(message) = stream.next().await {
                    match message {
                        Ok(Message::Text(text)) => {
                            trace!(len = text.len(), "received websocket message");
                            let event = match Frame::decode(&text).and_then(Inbound::from_frame) {
                                Ok(event) => event,
                                Err(err) => {
                                    warn!(error = %err, "failed to decode inbound frame");
                                    continue;
                                }
                            };
                            // No subscribers is fine: nobody is waiting on this event.
                            let _ = inbound.send(event);
                        }
                        Ok(Message::Close(_)) => {
                            debug!("websocket closed");
                            break;
                        }
                        Ok(_) => {} // Ignore other message types
                        Err(err) => {
                            error!("websocket error: {}", err);
                            break;
                        }
                    }
                }
                closed.store(true, Ordering::Release);
                // Receivers see Closed once the last sender is gone.
                shared_inbound
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .take();
                drop(inbound);
            })
        };

        Ok(Self {
            outbound,
            inbound: shared_inbound,
            closed,
            writer,
            reader,
        })
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

impl Channel for WsChannel {
    fn emit(&self, event: Outbound) -> Result<()> {
        if self.is_closed() {
            return Err(Error::ConnectionClosed);
        }
        let name = event.name();
        let text = event.to_frame()?.encode()?;
        self.outbound
            .send(Message::Text(text))
            .map_err(|_| Error::ConnectionClosed)?;
        debug!(event = name, "emitted event");
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<Inbound> {
        let inbound = self.inbound.lock().unwrap_or_else(PoisonError::into_inner);
        match inbound.as_ref() {
            Some(sender) => sender.subscribe(),
            None => broadcast::channel(1).1,
        }
    }
}
