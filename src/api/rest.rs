//! REST APIクライアント
//!
//! ストアサーバーが提供する4つのエンドポイントへの薄いクライアント。
//! コアの各コンポーネントは `StoreApi` トレイト越しに依存するため、
//! テストではインメモリ実装に差し替えられる。

use async_trait::async_trait;
use std::time::Duration;

use crate::config::ServerConfig;
use crate::models::{ChatMessage, RosterEntryWire, SessionIdentity, StockSnapshot};
use crate::{ShopdeskError, ShopdeskResult};

/// ストアサーバーAPIへのアクセス面
#[async_trait]
pub trait StoreApi: Send + Sync {
    /// セッションのメッセージ履歴を取得（`GET /messages`）
    async fn fetch_history(&self, identity: &SessionIdentity)
        -> ShopdeskResult<Vec<ChatMessage>>;

    /// メッセージを永続化する（`POST /live_chat`）。
    /// 返り値はサーバー採番IDが付与されたメッセージ。
    async fn post_message(&self, message: &ChatMessage) -> ShopdeskResult<ChatMessage>;

    /// アクティブなチャットセッション一覧を取得（`GET /chats`）
    async fn fetch_roster(&self) -> ShopdeskResult<Vec<RosterEntryWire>>;

    /// 在庫切れ/在庫僅少の商品スナップショットを取得（`GET /low_stock_products`）
    async fn fetch_stock_snapshot(&self) -> ShopdeskResult<StockSnapshot>;
}

/// reqwestベースの実装
pub struct RestClient {
    http: reqwest::Client,
    base_url: String,
}

impl RestClient {
    /// 新しいRESTクライアントを作成
    pub fn new(config: &ServerConfig) -> ShopdeskResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .user_agent(concat!("shopdesk/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// ステータスコードを検査し、エラーなら `ServerStatus` に変換する
    fn check_status(
        response: reqwest::Response,
        endpoint: &str,
    ) -> ShopdeskResult<reqwest::Response> {
        let status = response.status();
        if status.is_success() {
            Ok(response)
        } else {
            Err(ShopdeskError::ServerStatus {
                status: status.as_u16(),
                endpoint: endpoint.to_string(),
            })
        }
    }
}

#[async_trait]
impl StoreApi for RestClient {
    async fn fetch_history(
        &self,
        identity: &SessionIdentity,
    ) -> ShopdeskResult<Vec<ChatMessage>> {
        let url = self.endpoint("/messages");
        let query: [(&str, &str); 1] = match identity {
            SessionIdentity::Email(email) => [("email", email.as_str())],
            SessionIdentity::Guest(token) => [("cartToken", token.as_str())],
        };

        let response = self.http.get(&url).query(&query).send().await?;
        let response = Self::check_status(response, "/messages")?;
        let messages = response.json::<Vec<ChatMessage>>().await?;

        tracing::debug!(
            "📜 Fetched {} messages for {}",
            messages.len(),
            identity.display_label()
        );
        Ok(messages)
    }

    async fn post_message(&self, message: &ChatMessage) -> ShopdeskResult<ChatMessage> {
        let url = self.endpoint("/live_chat");
        let response = self.http.post(&url).json(message).send().await?;
        let response = Self::check_status(response, "/live_chat")?;
        Ok(response.json::<ChatMessage>().await?)
    }

    async fn fetch_roster(&self) -> ShopdeskResult<Vec<RosterEntryWire>> {
        let url = self.endpoint("/chats");
        let response = self.http.get(&url).send().await?;
        let response = Self::check_status(response, "/chats")?;
        Ok(response.json::<Vec<RosterEntryWire>>().await?)
    }

    async fn fetch_stock_snapshot(&self) -> ShopdeskResult<StockSnapshot> {
        let url = self.endpoint("/low_stock_products");
        let response = self.http.get(&url).send().await?;
        let response = Self::check_status(response, "/low_stock_products")?;
        Ok(response.json::<StockSnapshot>().await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_creation_and_endpoint_join() {
        let config = ServerConfig {
            base_url: "http://localhost:5000/".to_string(),
            channel_url: None,
            request_timeout_secs: 5,
        };
        let client = RestClient::new(&config).unwrap();
        assert_eq!(client.endpoint("/chats"), "http://localhost:5000/chats");
    }

    #[tokio::test]
    async fn test_fetch_history_network_error_surfaces() {
        // 接続先が存在しないポート。失敗はエラーとして返り、パニックしない。
        let config = ServerConfig {
            base_url: "http://127.0.0.1:1".to_string(),
            channel_url: None,
            request_timeout_secs: 1,
        };
        let client = RestClient::new(&config).unwrap();
        let identity = SessionIdentity::Email("a@x.com".to_string());
        let result = client.fetch_history(&identity).await;
        assert!(result.is_err());
    }
}
