//! クレート共通エラー型
//!
//! すべての公開APIは `ShopdeskResult` を返し、呼び出し側で `?` 伝播できる。

use thiserror::Error;

/// shopdesk全体のエラー型
#[derive(Debug, Error)]
pub enum ShopdeskError {
    /// ファイルI/Oエラー
    #[error("File I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSONシリアライズ/デシリアライズエラー
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// HTTPリクエストエラー
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    /// サーバーがエラーステータスを返した
    #[error("Server returned {status} for {endpoint}")]
    ServerStatus { status: u16, endpoint: String },

    /// イベントチャネル（WebSocket）エラー
    #[error("Channel error: {0}")]
    Channel(#[from] tokio_tungstenite::tungstenite::Error),

    /// チャネルが未接続
    #[error("Event channel is not connected")]
    ChannelClosed,

    /// 設定エラー
    #[error("Configuration error: {0}")]
    Config(String),

    /// 永続化エラー
    #[error("Persistence error for '{key}': {message}")]
    Persistence { key: String, message: String },

    /// コンテキスト付き汎用エラー
    #[error("Error in {context}: {message}")]
    Generic { context: String, message: String },
}

impl ShopdeskError {
    /// コンテキスト付き汎用エラーを作成
    pub fn generic(context: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Generic {
            context: context.into(),
            message: message.into(),
        }
    }

    /// 設定エラーを作成
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// 永続化エラーを作成
    pub fn persistence(key: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Persistence {
            key: key.into(),
            message: message.into(),
        }
    }
}

/// クレート共通Result型
pub type ShopdeskResult<T> = Result<T, ShopdeskError>;
