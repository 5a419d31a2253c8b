//! アラート通知の出力先抽象
//!
//! トースト表示や通知音の再生はホスト側の責務とし、コアは
//! `AlertSink` 経由で「アラートを上げた」事実だけを渡す。

use crate::models::SessionIdentity;
use chrono::{DateTime, Utc};

/// アラートの種類
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AlertKind {
    /// 新着チャットメッセージ
    ChatMessage,
    /// 在庫切れ
    OutOfStock,
    /// 在庫僅少
    LowStock,
}

/// ホストに引き渡すアラート
#[derive(Debug, Clone)]
pub struct Alert {
    pub kind: AlertKind,
    /// 表示用メッセージ
    pub message: String,
    /// クリックで遷移すべきチャットセッション（チャット由来の場合）
    pub navigate_to: Option<SessionIdentity>,
    /// 通知音を鳴らすべきか
    pub play_sound: bool,
    pub time: DateTime<Utc>,
}

impl Alert {
    /// チャットメッセージ用のアラートを作成
    pub fn chat(message: impl Into<String>, navigate_to: Option<SessionIdentity>) -> Self {
        Self {
            kind: AlertKind::ChatMessage,
            message: message.into(),
            navigate_to,
            play_sound: true,
            time: Utc::now(),
        }
    }

    /// 在庫アラートを作成
    pub fn stock(kind: AlertKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            navigate_to: None,
            play_sound: true,
            time: Utc::now(),
        }
    }
}

/// アラートの出力先
///
/// 実装は非ブロッキングであること。コアはイベントハンドラの中から
/// 呼び出すため、ここで待たされるとイベントループ全体が止まる。
pub trait AlertSink: Send + Sync {
    fn raise(&self, alert: Alert);
}

/// ログ出力のみのデフォルト実装
#[derive(Debug, Default)]
pub struct TracingAlertSink;

impl AlertSink for TracingAlertSink {
    fn raise(&self, alert: Alert) {
        match alert.kind {
            AlertKind::ChatMessage => {
                tracing::info!("💬 [ALERT] {}", alert.message);
            }
            AlertKind::OutOfStock => {
                tracing::warn!("📦 [ALERT] {}", alert.message);
            }
            AlertKind::LowStock => {
                tracing::info!("📦 [ALERT] {}", alert.message);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chat_alert_carries_navigation_target() {
        let identity = SessionIdentity::Email("a@x.com".to_string());
        let alert = Alert::chat("new message from a@x.com", Some(identity.clone()));
        assert_eq!(alert.kind, AlertKind::ChatMessage);
        assert_eq!(alert.navigate_to, Some(identity));
        assert!(alert.play_sound);
    }

    #[test]
    fn test_tracing_sink_does_not_panic() {
        let sink = TracingAlertSink;
        sink.raise(Alert::stock(AlertKind::OutOfStock, "Shoe is out of stock"));
    }
}
