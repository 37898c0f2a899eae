use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;

use parley_api::{ApiClient, ApiError, parse_base_url};
use parley_types::events::{LiveEvent, LiveFrame};
use parley_types::models::{TargetKey, UserId};

use crate::error::StreamError;
use crate::subscription::{LiveStream, Subscription};

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Client ping every 15 seconds. Two consecutive missed pongs (~30s) drop
/// the connection.
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);
pub const INITIAL_BACKOFF: Duration = Duration::from_secs(1);
pub const MAX_BACKOFF: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub base: Url,
    pub heartbeat: Duration,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl GatewayConfig {
    pub fn new(ws_base: &str) -> Result<Self, StreamError> {
        Ok(Self {
            base: parse_base_url(ws_base)?,
            heartbeat: HEARTBEAT_INTERVAL,
            initial_backoff: INITIAL_BACKOFF,
            max_backoff: MAX_BACKOFF,
        })
    }
}

/// Room name for a direct conversation: both participant ids, lower first.
/// Without our own id the peer id alone names the room.
pub fn direct_room(own: Option<UserId>, peer: UserId) -> String {
    match own {
        Some(me) => format!("{}_{}", me.min(peer), me.max(peer)),
        None => format!("user_{}", peer),
    }
}

/// WebSocket URL for `target`, authenticated with `token`.
pub fn endpoint(
    base: &Url,
    target: TargetKey,
    own: Option<UserId>,
    token: &str,
) -> Result<Url, url::ParseError> {
    let path = match target {
        TargetKey::User(peer) => format!("chat/{}/", direct_room(own, peer)),
        TargetKey::Group(id) => format!("group/{}/", id),
    };
    let mut url = base.join(&path)?;
    url.query_pairs_mut().append_pair("token", token);
    Ok(url)
}

/// Opens one WebSocket per subscription and keeps it alive until the
/// subscription is cancelled.
#[derive(Clone)]
pub struct Gateway {
    config: Arc<GatewayConfig>,
    api: ApiClient,
}

impl Gateway {
    pub fn new(config: GatewayConfig, api: ApiClient) -> Self {
        Self {
            config: Arc::new(config),
            api,
        }
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }
}

impl LiveStream for Gateway {
    fn subscribe(&self, target: TargetKey) -> Subscription {
        let (tx, rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();

        tokio::spawn(run(
            self.api.clone(),
            self.config.clone(),
            target,
            tx,
            cancel.clone(),
        ));

        Subscription::new(target, rx, cancel)
    }
}

enum Exit {
    Cancelled,
    Dropped,
}

/// Connect, pump frames, and reconnect with backoff until cancelled.
async fn run(
    api: ApiClient,
    config: Arc<GatewayConfig>,
    target: TargetKey,
    events: mpsc::UnboundedSender<LiveEvent>,
    cancel: CancellationToken,
) {
    let mut backoff = config.initial_backoff;

    loop {
        let connected = tokio::select! {
            _ = cancel.cancelled() => break,
            result = connect(&api, &config, target) => result,
        };

        match connected {
            Ok(socket) => {
                info!("Live stream connected for {}", target);
                backoff = config.initial_backoff;
                if events.send(LiveEvent::Connected { target }).is_err() {
                    break;
                }
                match pump(socket, target, &events, &cancel, config.heartbeat).await {
                    Exit::Cancelled => break,
                    Exit::Dropped => {
                        if events.send(LiveEvent::Disconnected { target }).is_err() {
                            break;
                        }
                    }
                }
            }
            Err(e) if e.is_fatal() => {
                warn!("Live stream for {} stopped: {}", target, e);
                break;
            }
            Err(e) => warn!("Live stream for {} failed to connect: {}", target, e),
        }

        debug!("Reconnecting {} in {:?}", target, backoff);
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(backoff) => {}
        }
        backoff = (backoff * 2).min(config.max_backoff);
    }

    debug!("Live stream for {} closed", target);
}

async fn connect(
    api: &ApiClient,
    config: &GatewayConfig,
    target: TargetKey,
) -> Result<Socket, StreamError> {
    let token = api.access_token().await?;
    let url = endpoint(&config.base, target, api.session().user_id(), &token)?;

    match connect_async(url.as_str()).await {
        Ok((socket, _)) => Ok(socket),
        Err(tungstenite::Error::Http(resp))
            if resp.status().as_u16() == 401 || resp.status().as_u16() == 403 =>
        {
            // refresh keyed by the token the server refused, then let the
            // backoff loop retry with whatever is current
            api.tokens()
                .refresh_after_unauthorized(&token)
                .await
                .map_err(ApiError::from)?;
            Err(StreamError::Rejected(resp.status().as_u16()))
        }
        Err(e) => Err(e.into()),
    }
}

async fn pump(
    socket: Socket,
    target: TargetKey,
    events: &mpsc::UnboundedSender<LiveEvent>,
    cancel: &CancellationToken,
    heartbeat: Duration,
) -> Exit {
    let (mut sender, mut receiver) = socket.split();

    let mut ticker = tokio::time::interval(heartbeat);
    ticker.tick().await;
    let mut pong_received = true;
    let mut missed_heartbeats: u8 = 0;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                let _ = sender.send(Message::Close(None)).await;
                return Exit::Cancelled;
            }
            _ = ticker.tick() => {
                if std::mem::replace(&mut pong_received, false) {
                    missed_heartbeats = 0;
                } else {
                    missed_heartbeats += 1;
                    if missed_heartbeats >= 2 {
                        warn!("Heartbeat timeout on {} (missed {} pongs), dropping connection", target, missed_heartbeats);
                        return Exit::Dropped;
                    }
                }
                if sender.send(Message::Ping(Vec::new().into())).await.is_err() {
                    return Exit::Dropped;
                }
            }
            frame = receiver.next() => {
                let frame = match frame {
                    Some(Ok(frame)) => frame,
                    Some(Err(e)) => {
                        warn!("Live stream for {} errored: {}", target, e);
                        return Exit::Dropped;
                    }
                    None => return Exit::Dropped,
                };

                match frame {
                    Message::Text(text) => match LiveFrame::parse(text.as_str()) {
                        Ok(message) => {
                            if events.send(LiveEvent::MessageCreate(message)).is_err() {
                                return Exit::Cancelled;
                            }
                        }
                        Err(e) => debug!("Skipping frame on {}: {}", target, e),
                    },
                    Message::Pong(_) => pong_received = true,
                    Message::Close(_) => {
                        info!("Server closed live stream for {}", target);
                        return Exit::Dropped;
                    }
                    // pings are answered by tungstenite on the next write
                    _ => {}
                }
            }
        }
    }
}
