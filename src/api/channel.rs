//! イベントチャネルクライアント
//!
//! ストアサーバーとの双方向イベントチャネル（WebSocket）。部屋（room）単位で
//! イベントがスコープされ、クライアントは `joinRoom` で購読を宣言する。
//!
//! ## 使用方法
//!
//! ```ignore
//! let channel = Arc::new(ChannelClient::new(url));
//! let mut events = channel.subscribe();
//! channel.clone().start();
//! channel.join_room(&identity)?;
//!
//! while let Ok(event) = events.recv().await {
//!     // ServerEvent を処理
//! }
//! ```
//!
//! 接続断は自動再接続（ジッター付き指数バックオフ）で回復し、
//! 参加済みの部屋は再接続後に自動で再参加される。

use chrono::{DateTime, Utc};
use futures_util::{SinkExt, StreamExt};
use rand::Rng;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use crate::models::{ChatMessage, IdentityWire, SessionIdentity, StockAlertKind};
use crate::{ShopdeskError, ShopdeskResult};

/// タイピング状態イベントのペイロード
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct TypingState {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(rename = "cartToken", default, skip_serializing_if = "Option::is_none")]
    pub cart_token: Option<String>,
    #[serde(rename = "isTyping")]
    pub is_typing: bool,
    #[serde(rename = "isAdmin")]
    pub is_admin: bool,
}

impl TypingState {
    /// 識別子からタイピングイベントを構成する
    pub fn new(identity: &SessionIdentity, is_typing: bool, is_admin: bool) -> Self {
        Self {
            email: identity.email().map(|s| s.to_string()),
            cart_token: identity.guest_token().map(|s| s.to_string()),
            is_typing,
            is_admin,
        }
    }

    /// このイベントが属するセッションの識別子
    pub fn identity(&self) -> Option<SessionIdentity> {
        SessionIdentity::from_parts(self.email.as_deref(), self.cart_token.as_deref())
    }
}

/// 在庫アラートのプッシュイベント
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct StockEvent {
    #[serde(rename = "type")]
    pub kind: StockAlertKind,
    #[serde(rename = "productId")]
    pub product_id: String,
    #[serde(rename = "productName")]
    pub product_name: String,
    #[serde(rename = "productImage", default, skip_serializing_if = "Option::is_none")]
    pub product_image: Option<String>,
    pub message: String,
    pub quantity: u32,
    pub time: DateTime<Utc>,
}

/// クライアントからサーバーへのイベント
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum ClientEvent {
    /// 部屋への参加宣言
    #[serde(rename = "joinRoom")]
    JoinRoom(IdentityWire),
    /// タイピング状態の通知
    #[serde(rename = "typing")]
    Typing(TypingState),
}

/// サーバーからクライアントへのイベント
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum ServerEvent {
    /// チャットメッセージ（送信者自身の部屋にもエコーされる）
    #[serde(rename = "receiveMessage")]
    ReceiveMessage(ChatMessage),
    /// 相手のタイピング状態
    #[serde(rename = "userTyping")]
    UserTyping(TypingState),
    /// 在庫アラートのプッシュ
    #[serde(rename = "stockNotification")]
    StockNotification(StockEvent),
}

/// チャネル接続の状態
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

/// 再接続バックオフの初期値
const RECONNECT_DELAY_INITIAL_MS: u64 = 1_000;
/// 再接続バックオフの上限
const RECONNECT_DELAY_MAX_MS: u64 = 30_000;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// イベントチャネルクライアント
pub struct ChannelClient {
    url: String,
    state: Arc<parking_lot::RwLock<ConnectionState>>,
    /// 参加済みの部屋。再接続時にここから再参加する。
    rooms: Arc<parking_lot::Mutex<HashSet<SessionIdentity>>>,
    outbound_tx: mpsc::UnboundedSender<ClientEvent>,
    /// start() が取り出して接続タスクへ移す
    outbound_rx: parking_lot::Mutex<Option<mpsc::UnboundedReceiver<ClientEvent>>>,
    event_tx: broadcast::Sender<ServerEvent>,
    shutdown: Arc<AtomicBool>,
}

impl ChannelClient {
    /// 新しいチャネルクライアントを作成
    pub fn new(url: impl Into<String>) -> Self {
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (event_tx, _) = broadcast::channel(1024);
        Self {
            url: url.into(),
            state: Arc::new(parking_lot::RwLock::new(ConnectionState::Disconnected)),
            rooms: Arc::new(parking_lot::Mutex::new(HashSet::new())),
            outbound_tx,
            outbound_rx: parking_lot::Mutex::new(Some(outbound_rx)),
            event_tx,
            shutdown: Arc::new(AtomicBool::new(false)),
        }
    }

    /// 受信イベントの購読を開始する
    pub fn subscribe(&self) -> broadcast::Receiver<ServerEvent> {
        self.event_tx.subscribe()
    }

    /// 接続ループを開始する。2回目以降の呼び出しは何もしない。
    pub fn start(self: Arc<Self>) {
        let Some(outbound_rx) = self.outbound_rx.lock().take() else {
            tracing::warn!("Channel client is already started");
            return;
        };

        tokio::spawn(async move {
            self.connection_loop(outbound_rx).await;
        });
    }

    /// 部屋に参加する。接続前に呼んでも記録され、接続確立時に参加される。
    pub fn join_room(&self, identity: &SessionIdentity) -> ShopdeskResult<()> {
        let newly_joined = self.rooms.lock().insert(identity.clone());
        if !newly_joined {
            return Ok(());
        }

        tracing::debug!("🚪 Joining room: {}", identity.display_label());
        self.send(ClientEvent::JoinRoom(identity_wire(identity)))
    }

    /// タイピング状態を送信する
    pub fn send_typing(&self, typing: TypingState) -> ShopdeskResult<()> {
        self.send(ClientEvent::Typing(typing))
    }

    /// イベントを送信キューに積む（非ブロッキング）
    pub fn send(&self, event: ClientEvent) -> ShopdeskResult<()> {
        self.outbound_tx
            .send(event)
            .map_err(|_| ShopdeskError::ChannelClosed)
    }

    /// 現在の接続状態を取得
    pub fn connection_state(&self) -> ConnectionState {
        *self.state.read()
    }

    /// チャネルを停止する
    pub fn stop(&self) {
        tracing::info!("🛑 Stopping event channel client");
        self.shutdown.store(true, Ordering::SeqCst);
    }

    /// 接続・再接続ループ
    async fn connection_loop(&self, mut outbound_rx: mpsc::UnboundedReceiver<ClientEvent>) {
        let mut delay_ms = RECONNECT_DELAY_INITIAL_MS;

        while !self.shutdown.load(Ordering::SeqCst) {
            *self.state.write() = ConnectionState::Connecting;
            tracing::debug!("Connecting to event channel: {}", self.url);

            match tokio_tungstenite::connect_async(&self.url).await {
                Ok((ws_stream, _)) => {
                    *self.state.write() = ConnectionState::Connected;
                    tracing::info!("🔌 Event channel connected: {}", self.url);
                    delay_ms = RECONNECT_DELAY_INITIAL_MS;

                    if let Err(e) = self.run_session(ws_stream, &mut outbound_rx).await {
                        tracing::warn!("Event channel session ended: {}", e);
                    }

                    *self.state.write() = ConnectionState::Disconnected;
                    if self.shutdown.load(Ordering::SeqCst) {
                        break;
                    }
                    tracing::info!("🔄 Event channel disconnected, will reconnect");
                }
                Err(e) => {
                    *self.state.write() = ConnectionState::Disconnected;
                    tracing::warn!("Failed to connect event channel: {}", e);
                }
            }

            // ジッター付きバックオフで再接続
            let jitter = rand::thread_rng().gen_range(0..delay_ms / 2 + 1);
            tokio::time::sleep(tokio::time::Duration::from_millis(delay_ms + jitter)).await;
            delay_ms = (delay_ms * 2).min(RECONNECT_DELAY_MAX_MS);
        }

        *self.state.write() = ConnectionState::Disconnected;
        tracing::info!("🛑 Event channel client stopped");
    }

    /// 1本の接続上でのセッション処理
    async fn run_session(
        &self,
        ws_stream: WsStream,
        outbound_rx: &mut mpsc::UnboundedReceiver<ClientEvent>,
    ) -> ShopdeskResult<()> {
        let (mut write, mut read) = ws_stream.split();

        // 参加済みの部屋へ再参加
        let rooms: Vec<SessionIdentity> = self.rooms.lock().iter().cloned().collect();
        for room in rooms {
            let frame = serde_json::to_string(&ClientEvent::JoinRoom(identity_wire(&room)))?;
            write.send(Message::Text(frame)).await?;
        }

        loop {
            tokio::select! {
                outgoing = outbound_rx.recv() => {
                    match outgoing {
                        Some(event) => {
                            let json = serde_json::to_string(&event)?;
                            write.send(Message::Text(json)).await?;
                        }
                        // 送信側ハンドルがすべて破棄された
                        None => return Ok(()),
                    }
                }

                incoming = read.next() => {
                    match incoming {
                        Some(Ok(Message::Text(text))) => {
                            match serde_json::from_str::<ServerEvent>(&text) {
                                Ok(event) => {
                                    // 購読者がいない場合の送信失敗は無害
                                    let _ = self.event_tx.send(event);
                                }
                                Err(e) => {
                                    tracing::debug!("Ignoring unrecognized channel frame: {}", e);
                                }
                            }
                        }
                        Some(Ok(Message::Ping(data))) => {
                            write.send(Message::Pong(data)).await?;
                        }
                        Some(Ok(Message::Close(_))) | None => {
                            return Ok(());
                        }
                        Some(Err(e)) => {
                            return Err(e.into());
                        }
                        _ => {}
                    }
                }

                _ = tokio::time::sleep(tokio::time::Duration::from_millis(100)) => {
                    // 停止フラグの定期チェック
                    if self.shutdown.load(Ordering::SeqCst) {
                        let _ = write.send(Message::Close(None)).await;
                        return Ok(());
                    }
                }
            }
        }
    }
}

/// チャネルへの送信面
///
/// ウィジェットや管理コンソールはこのトレイト越しに部屋参加と
/// タイピング通知を行う。テストでは記録用実装に差し替えられる。
pub trait ChannelOutbound: Send + Sync {
    fn join_room(&self, identity: &SessionIdentity) -> ShopdeskResult<()>;
    fn send_typing(&self, typing: TypingState) -> ShopdeskResult<()>;
}

impl ChannelOutbound for ChannelClient {
    fn join_room(&self, identity: &SessionIdentity) -> ShopdeskResult<()> {
        ChannelClient::join_room(self, identity)
    }

    fn send_typing(&self, typing: TypingState) -> ShopdeskResult<()> {
        ChannelClient::send_typing(self, typing)
    }
}

/// 識別子をワイヤ形式に変換する
fn identity_wire(identity: &SessionIdentity) -> IdentityWire {
    IdentityWire {
        email: identity.email().map(|s| s.to_string()),
        cart_token: identity.guest_token().map(|s| s.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_event_wire_format() {
        let identity = SessionIdentity::Guest("tok123".to_string());
        let event = ClientEvent::JoinRoom(identity_wire(&identity));
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"event\":\"joinRoom\""));
        assert!(json.contains("\"cartToken\":\"tok123\""));
    }

    #[test]
    fn test_server_event_deserialization() {
        let json = r#"{
            "event": "receiveMessage",
            "data": {
                "_id": "m1",
                "direction": "user",
                "text": "Hello",
                "time": "2024-01-01T00:00:00Z",
                "cartToken": "tok123"
            }
        }"#;
        let event: ServerEvent = serde_json::from_str(json).unwrap();
        match event {
            ServerEvent::ReceiveMessage(msg) => {
                assert_eq!(msg.id.as_deref(), Some("m1"));
                assert_eq!(msg.text, "Hello");
            }
            other => panic!("Expected ReceiveMessage, got: {:?}", other),
        }
    }

    #[test]
    fn test_stock_event_deserialization() {
        let json = r#"{
            "event": "stockNotification",
            "data": {
                "type": "low_stock",
                "productId": "p1",
                "productName": "Shoe",
                "message": "Shoe is low on stock (3 left)",
                "quantity": 3,
                "time": "2024-01-01T00:00:00Z"
            }
        }"#;
        let event: ServerEvent = serde_json::from_str(json).unwrap();
        match event {
            ServerEvent::StockNotification(evt) => {
                assert_eq!(evt.kind, StockAlertKind::LowStock);
                assert_eq!(evt.product_id, "p1");
                assert_eq!(evt.quantity, 3);
            }
            other => panic!("Expected StockNotification, got: {:?}", other),
        }
    }

    #[test]
    fn test_typing_state_identity() {
        let identity = SessionIdentity::Email("a@x.com".to_string());
        let typing = TypingState::new(&identity, true, false);
        assert_eq!(typing.identity(), Some(identity));
        let json = serde_json::to_string(&typing).unwrap();
        assert!(json.contains("\"isTyping\":true"));
        assert!(json.contains("\"isAdmin\":false"));
    }

    #[tokio::test]
    async fn test_join_room_is_recorded_once() {
        let client = ChannelClient::new("ws://127.0.0.1:1/socket");
        let identity = SessionIdentity::Guest("tok123".to_string());
        client.join_room(&identity).unwrap();
        client.join_room(&identity).unwrap();
        assert_eq!(client.rooms.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_initial_state_is_disconnected() {
        let client = ChannelClient::new("ws://127.0.0.1:1/socket");
        assert_eq!(client.connection_state(), ConnectionState::Disconnected);
    }
}
