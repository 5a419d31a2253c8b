//! ドメインデータモデル
//!
//! サーバーとのワイヤ形式（REST/イベントチャネル共通）と、
//! 永続化される通知レコードの定義。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// セッションの識別子
///
/// メールアドレスが存在する場合は常にメールが優先され、
/// 未認証の買い物客はクライアント生成のゲストトークンで識別される。
/// 1セッションにつき識別子はちょうど1つ。
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SessionIdentity {
    /// 認証済みユーザー（メールアドレス）
    Email(String),
    /// 未認証ゲスト（カートトークン）
    Guest(String),
}

impl SessionIdentity {
    /// ワイヤ上の `email` / `cartToken` ペアから識別子を構成する。
    /// 両方が存在する場合はメールが優先される。
    pub fn from_parts(email: Option<&str>, guest_token: Option<&str>) -> Option<Self> {
        match (email, guest_token) {
            (Some(e), _) if !e.is_empty() => Some(Self::Email(e.to_string())),
            (_, Some(t)) if !t.is_empty() => Some(Self::Guest(t.to_string())),
            _ => None,
        }
    }

    /// 新しいゲスト識別子を生成
    pub fn new_guest() -> Self {
        Self::Guest(uuid::Uuid::new_v4().to_string())
    }

    pub fn email(&self) -> Option<&str> {
        match self {
            Self::Email(e) => Some(e),
            Self::Guest(_) => None,
        }
    }

    pub fn guest_token(&self) -> Option<&str> {
        match self {
            Self::Email(_) => None,
            Self::Guest(t) => Some(t),
        }
    }

    /// 表示用ラベル。ゲストはトークンをマスクして表示する。
    pub fn display_label(&self) -> String {
        match self {
            Self::Email(e) => e.clone(),
            Self::Guest(t) => mask_guest_token(t),
        }
    }
}

/// ゲストトークンを表示用にマスクする（先頭6文字のみ）
pub fn mask_guest_token(token: &str) -> String {
    let prefix: String = token.chars().take(6).collect();
    format!("Guest-{}", prefix)
}

/// メッセージの方向
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// 顧客からのメッセージ
    User,
    /// 管理者からのメッセージ
    Admin,
}

/// チャットメッセージ（ワイヤ形式）
///
/// `id` はサーバーが永続化した時点で採番される。ローカルで楽観的挿入は
/// 行わないため、`id` の無いメッセージはローカル発ではないと仮定できる。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    /// サーバー採番ID（未永続化の場合はNone）
    #[serde(rename = "_id", default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub direction: Direction,
    pub text: String,
    pub time: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(rename = "cartToken", default, skip_serializing_if = "Option::is_none")]
    pub guest_token: Option<String>,
}

impl ChatMessage {
    /// このメッセージが属するセッションの識別子
    pub fn identity(&self) -> Option<SessionIdentity> {
        SessionIdentity::from_parts(self.email.as_deref(), self.guest_token.as_deref())
    }

    /// 送信者の表示ラベル
    pub fn sender_label(&self) -> String {
        self.identity()
            .map(|i| i.display_label())
            .unwrap_or_else(|| "Unknown".to_string())
    }
}

/// 商品（在庫アラートで参照するフィールドのみ）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Product {
    #[serde(rename = "_id")]
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub images: Vec<String>,
    #[serde(default)]
    pub quantity: u32,
}

impl Product {
    /// 代表画像（先頭の1枚）
    pub fn primary_image(&self) -> Option<&str> {
        self.images.first().map(|s| s.as_str())
    }
}

/// 在庫スナップショット（`GET /low_stock_products` のレスポンス）
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StockSnapshot {
    #[serde(default)]
    pub out_of_stock: Vec<Product>,
    #[serde(default)]
    pub low_stock: Vec<Product>,
}

/// 在庫アラートの種別
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StockAlertKind {
    OutOfStock,
    LowStock,
}

/// チャット通知の種別タグ（現状は `message` のみ）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageNotificationKind {
    #[default]
    Message,
}

/// チャットメッセージ通知（永続化レコード）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageNotification {
    pub id: String,
    #[serde(rename = "type", default)]
    pub kind: MessageNotificationKind,
    pub message: String,
    /// 表示用の送信者ラベル（メール、またはマスク済みゲストトークン）
    pub sender: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(rename = "guestToken", default, skip_serializing_if = "Option::is_none")]
    pub guest_token: Option<String>,
    pub time: DateTime<Utc>,
    pub read: bool,
}

impl MessageNotification {
    /// 受信メッセージから通知レコードを作成する。
    /// サーバーIDが無い場合はタイムスタンプ由来のローカルIDを割り当てる。
    pub fn from_message(msg: &ChatMessage, now: DateTime<Utc>) -> Self {
        let id = msg
            .id
            .clone()
            .unwrap_or_else(|| format!("local-{}", now.timestamp_millis()));
        Self {
            id,
            kind: MessageNotificationKind::Message,
            message: msg.text.clone(),
            sender: msg.sender_label(),
            email: msg.email.clone(),
            guest_token: msg.guest_token.clone(),
            time: msg.time,
            read: false,
        }
    }
}

/// 在庫アラート通知（永続化レコード）
///
/// `id` は productId + 作成時刻から導出されるため、突合パスをまたいで
/// 安定ではない。突合結果の正規集合では productId ごとに高々1件。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StockNotification {
    pub id: String,
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
    pub read: bool,
}

impl StockNotification {
    /// 商品スナップショットから新しい通知を合成する
    pub fn synthesize(kind: StockAlertKind, product: &Product, now: DateTime<Utc>) -> Self {
        let quantity = match kind {
            StockAlertKind::OutOfStock => 0,
            StockAlertKind::LowStock => product.quantity,
        };
        Self {
            id: format!("{}-{}", product.id, now.timestamp_millis()),
            kind,
            product_id: product.id.clone(),
            product_name: product.name.clone(),
            product_image: product.primary_image().map(|s| s.to_string()),
            message: stock_alert_message(kind, &product.name, quantity),
            quantity,
            time: now,
            read: false,
        }
    }
}

/// 在庫アラートの表示メッセージを組み立てる
pub fn stock_alert_message(kind: StockAlertKind, product_name: &str, quantity: u32) -> String {
    match kind {
        StockAlertKind::OutOfStock => format!("{} is out of stock", product_name),
        StockAlertKind::LowStock => {
            format!("{} is low on stock ({} left)", product_name, quantity)
        }
    }
}

/// チャットセッション一覧のエントリ（`GET /chats` のワイヤ形式）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RosterEntryWire {
    #[serde(rename = "_id")]
    pub id: IdentityWire,
    #[serde(rename = "lastMessage", default)]
    pub last_message: Option<String>,
}

/// ワイヤ上の識別子表現
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IdentityWire {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(rename = "cartToken", default, skip_serializing_if = "Option::is_none")]
    pub cart_token: Option<String>,
}

impl RosterEntryWire {
    pub fn identity(&self) -> Option<SessionIdentity> {
        SessionIdentity::from_parts(self.id.email.as_deref(), self.id.cart_token.as_deref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn guest_message(id: Option<&str>, token: &str, text: &str) -> ChatMessage {
        ChatMessage {
            id: id.map(|s| s.to_string()),
            direction: Direction::User,
            text: text.to_string(),
            time: Utc::now(),
            email: None,
            guest_token: Some(token.to_string()),
        }
    }

    #[test]
    fn test_identity_email_takes_precedence() {
        let id = SessionIdentity::from_parts(Some("a@x.com"), Some("tok123"));
        assert_eq!(id, Some(SessionIdentity::Email("a@x.com".to_string())));
    }

    #[test]
    fn test_identity_falls_back_to_guest_token() {
        let id = SessionIdentity::from_parts(None, Some("tok123"));
        assert_eq!(id, Some(SessionIdentity::Guest("tok123".to_string())));
        assert_eq!(SessionIdentity::from_parts(None, None), None);
        // 空文字列は識別子にならない
        assert_eq!(SessionIdentity::from_parts(Some(""), Some("")), None);
    }

    #[test]
    fn test_generated_guest_identities_are_distinct() {
        let a = SessionIdentity::new_guest();
        let b = SessionIdentity::new_guest();
        assert_ne!(a, b);

        let token = a.guest_token().unwrap();
        assert!(!token.is_empty());
        assert!(a.email().is_none());
        // 表示ラベルは常にマスクされる
        assert_eq!(a.display_label(), format!("Guest-{}", &token[..6]));
    }

    #[test]
    fn test_guest_token_masking() {
        assert_eq!(mask_guest_token("abcdef123456"), "Guest-abcdef");
        // 短いトークンでもパニックしない
        assert_eq!(mask_guest_token("ab"), "Guest-ab");
    }

    #[test]
    fn test_chat_message_wire_format() {
        let msg = guest_message(Some("m1"), "tok123", "Hello");
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains("\"_id\":\"m1\""));
        assert!(json.contains("\"cartToken\":\"tok123\""));
        assert!(json.contains("\"direction\":\"user\""));
        // email は省略される
        assert!(!json.contains("email"));
    }

    #[test]
    fn test_message_notification_without_server_id() {
        let msg = guest_message(None, "tok123", "Hi");
        let now = Utc::now();
        let n = MessageNotification::from_message(&msg, now);
        assert!(n.id.starts_with("local-"));
        assert_eq!(n.sender, "Guest-tok123");
        assert!(!n.read);
    }

    #[test]
    fn test_stock_snapshot_deserialization() {
        let json = r#"{"outOfStock":[{"_id":"p1","name":"Shoe"}],"lowStock":[]}"#;
        let snap: StockSnapshot = serde_json::from_str(json).unwrap();
        assert_eq!(snap.out_of_stock.len(), 1);
        assert_eq!(snap.out_of_stock[0].id, "p1");
        assert_eq!(snap.out_of_stock[0].quantity, 0);
        assert!(snap.low_stock.is_empty());
    }

    #[test]
    fn test_stock_notification_synthesis() {
        let product = Product {
            id: "p1".to_string(),
            name: "Shoe".to_string(),
            images: vec!["shoe.png".to_string()],
            quantity: 3,
        };
        let now = Utc::now();
        let out = StockNotification::synthesize(StockAlertKind::OutOfStock, &product, now);
        assert_eq!(out.quantity, 0);
        assert_eq!(out.product_image.as_deref(), Some("shoe.png"));
        assert!(out.id.starts_with("p1-"));

        let low = StockNotification::synthesize(StockAlertKind::LowStock, &product, now);
        assert_eq!(low.quantity, 3);
        assert!(low.message.contains("3 left"));
    }

    #[test]
    fn test_stock_notification_wire_tags() {
        let product = Product {
            id: "p1".to_string(),
            name: "Shoe".to_string(),
            images: vec![],
            quantity: 0,
        };
        let n = StockNotification::synthesize(StockAlertKind::OutOfStock, &product, Utc::now());
        let json = serde_json::to_string(&n).unwrap();
        assert!(json.contains("\"type\":\"out_of_stock\""));
        assert!(json.contains("\"productId\":\"p1\""));
    }

    #[test]
    fn test_roster_entry_identity() {
        let json = r#"[{"_id":{"cartToken":"tok123"},"lastMessage":"hey"}]"#;
        let roster: Vec<RosterEntryWire> = serde_json::from_str(json).unwrap();
        assert_eq!(
            roster[0].identity(),
            Some(SessionIdentity::Guest("tok123".to_string()))
        );
        assert_eq!(roster[0].last_message.as_deref(), Some("hey"));
    }
}
