//! 管理者側チャットウィンドウ
//!
//! 顧客ウィジェットと同じ状態機械だが、対象セッションを切り替えられる。
//! セッション切替時は世代カウンタで進行中の履歴取得を無効化し、
//! 受信イベントは配送時点の現在セッションと照合する。

use std::sync::Arc;

use chrono::Utc;
use tokio::sync::oneshot;

use crate::api::channel::{ChannelOutbound, ServerEvent, TypingState};
use crate::api::rest::StoreApi;
use crate::chat::TYPING_STOP_DELAY;
use crate::models::{ChatMessage, Direction, SessionIdentity};
use crate::ShopdeskResult;

/// 管理者側チャットウィンドウ
pub struct AdminChatWindow {
    api: Arc<dyn StoreApi>,
    channel: Arc<dyn ChannelOutbound>,
    current: Option<SessionIdentity>,
    messages: Vec<ChatMessage>,
    draft: String,
    customer_typing: bool,
    loading: bool,
    last_failed_text: Option<String>,
    /// 履歴取得の世代。セッション切替で進み、古い応答を破棄する。
    history_generation: u64,
    typing_cancel: Option<oneshot::Sender<()>>,
}

impl AdminChatWindow {
    pub fn new(api: Arc<dyn StoreApi>, channel: Arc<dyn ChannelOutbound>) -> Self {
        Self {
            api,
            channel,
            current: None,
            messages: Vec::new(),
            draft: String::new(),
            customer_typing: false,
            loading: false,
            last_failed_text: None,
            history_generation: 0,
            typing_cancel: None,
        }
    }

    /// 対象セッションを切り替える。
    ///
    /// 表示リストは即座に空になり、新セッションの履歴取得が始まる。
    /// 旧セッション宛に進行中だった取得結果は世代不一致で破棄される。
    pub async fn select_session(&mut self, identity: SessionIdentity) -> ShopdeskResult<()> {
        tracing::info!("💬 Opening chat session: {}", identity.display_label());
        self.cancel_typing_timer();
        self.customer_typing = false;
        self.messages.clear();
        self.draft.clear();
        self.loading = true;
        self.current = Some(identity.clone());

        self.channel.join_room(&identity)?;

        self.history_generation += 1;
        let generation = self.history_generation;

        match self.api.fetch_history(&identity).await {
            Ok(history) => self.apply_history(generation, history),
            Err(e) => {
                tracing::warn!("Failed to fetch chat history: {}", e);
                self.loading = false;
            }
        }
        Ok(())
    }

    /// 取得済み履歴を反映する。世代が進んでいる場合は破棄する。
    pub fn apply_history(&mut self, generation: u64, history: Vec<ChatMessage>) {
        if generation != self.history_generation {
            tracing::debug!("Discarding stale history response (generation {})", generation);
            return;
        }
        self.messages = history;
        self.loading = false;
    }

    /// ウィンドウを閉じる
    pub fn close(&mut self) {
        self.current = None;
        self.customer_typing = false;
        self.messages.clear();
        self.history_generation += 1;
        self.cancel_typing_timer();
    }

    /// 入力中テキストを更新し、管理者のタイピング状態を顧客の部屋へ通知する
    pub fn update_draft(&mut self, text: impl Into<String>) {
        self.draft = text.into();
        self.notify_typing();
    }

    fn notify_typing(&mut self) {
        let Some(identity) = self.current.clone() else {
            return;
        };
        let typing = TypingState::new(&identity, true, true);
        if let Err(e) = self.channel.send_typing(typing) {
            tracing::debug!("Failed to send typing event: {}", e);
        }

        self.cancel_typing_timer();
        let (cancel_tx, mut cancel_rx) = oneshot::channel();
        self.typing_cancel = Some(cancel_tx);

        let channel = Arc::clone(&self.channel);
        tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(TYPING_STOP_DELAY) => {
                    let stopped = TypingState::new(&identity, false, true);
                    if let Err(e) = channel.send_typing(stopped) {
                        tracing::debug!("Failed to send typing-stop event: {}", e);
                    }
                }
                _ = &mut cancel_rx => {}
            }
        });
    }

    fn cancel_typing_timer(&mut self) {
        if let Some(cancel) = self.typing_cancel.take() {
            let _ = cancel.send(());
        }
    }

    /// 返信を送信する。挿入はサーバーエコー経由でのみ行われる。
    pub async fn send(&mut self) -> ShopdeskResult<()> {
        let Some(identity) = self.current.clone() else {
            return Ok(());
        };
        let text = std::mem::take(&mut self.draft);
        if text.is_empty() {
            return Ok(());
        }
        self.cancel_typing_timer();

        let message = ChatMessage {
            id: None,
            direction: Direction::Admin,
            text: text.clone(),
            time: Utc::now(),
            email: identity.email().map(|s| s.to_string()),
            guest_token: identity.guest_token().map(|s| s.to_string()),
        };

        if let Err(e) = self.api.post_message(&message).await {
            tracing::warn!("Failed to send message: {}", e);
            self.last_failed_text = Some(text);
            return Err(e);
        }
        Ok(())
    }

    /// チャネルからの受信イベントを処理する
    pub fn handle_event(&mut self, event: &ServerEvent) {
        match event {
            ServerEvent::ReceiveMessage(msg) => self.handle_message(msg),
            ServerEvent::UserTyping(typing) => self.handle_typing(typing),
            ServerEvent::StockNotification(_) => {}
        }
    }

    fn handle_message(&mut self, msg: &ChatMessage) {
        // 配送時点の現在セッションと照合する
        if self.current.is_none() || msg.identity() != self.current {
            return;
        }

        if msg.direction == Direction::User {
            self.customer_typing = false;
        }

        if let Some(id) = msg.id.as_deref() {
            if self
                .messages
                .iter()
                .any(|m| m.id.as_deref() == Some(id))
            {
                return;
            }
        }

        self.messages.push(msg.clone());
    }

    fn handle_typing(&mut self, typing: &TypingState) {
        if !typing.is_admin && typing.identity() == self.current && self.current.is_some() {
            self.customer_typing = typing.is_typing;
        }
    }

    pub fn current_session(&self) -> Option<&SessionIdentity> {
        self.current.as_ref()
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    pub fn draft(&self) -> &str {
        &self.draft
    }

    pub fn customer_typing(&self) -> bool {
        self.customer_typing
    }

    pub fn is_loading(&self) -> bool {
        self.loading
    }

    pub fn last_failed_text(&self) -> Option<&str> {
        self.last_failed_text.as_deref()
    }
}

impl Drop for AdminChatWindow {
    fn drop(&mut self) {
        self.cancel_typing_timer();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat::testing::{FixedApi, RecordingChannel};

    fn window(api: FixedApi) -> (AdminChatWindow, Arc<RecordingChannel>) {
        let channel = Arc::new(RecordingChannel::default());
        let window = AdminChatWindow::new(Arc::new(api), channel.clone());
        (window, channel)
    }

    fn guest(token: &str) -> SessionIdentity {
        SessionIdentity::Guest(token.to_string())
    }

    fn echo(id: &str, direction: Direction, token: &str) -> ServerEvent {
        ServerEvent::ReceiveMessage(ChatMessage {
            id: Some(id.to_string()),
            direction,
            text: "hello".to_string(),
            time: Utc::now(),
            email: None,
            guest_token: Some(token.to_string()),
        })
    }

    #[tokio::test]
    async fn test_select_session_joins_room_and_loads_history() {
        let (mut window, channel) = window(FixedApi::default());

        window.select_session(guest("tok-a")).await.unwrap();

        assert_eq!(window.current_session(), Some(&guest("tok-a")));
        assert!(!window.is_loading());
        assert_eq!(channel.joined_rooms(), vec![guest("tok-a")]);
    }

    #[tokio::test]
    async fn test_switching_sessions_discards_stale_history() {
        let (mut window, _) = window(FixedApi::default());

        window.select_session(guest("tok-a")).await.unwrap();
        let stale_generation = 1;
        window.select_session(guest("tok-b")).await.unwrap();

        window.apply_history(
            stale_generation,
            vec![ChatMessage {
                id: Some("old".to_string()),
                direction: Direction::User,
                text: "from session a".to_string(),
                time: Utc::now(),
                email: None,
                guest_token: Some("tok-a".to_string()),
            }],
        );

        // 旧セッション宛の応答は新セッションの表示を汚染しない
        assert!(window.messages().is_empty());
    }

    #[tokio::test]
    async fn test_events_matched_against_current_session() {
        let (mut window, _) = window(FixedApi::default());
        window.select_session(guest("tok-a")).await.unwrap();

        window.handle_event(&echo("m1", Direction::User, "tok-a"));
        window.handle_event(&echo("m2", Direction::User, "tok-b"));

        assert_eq!(window.messages().len(), 1);
        assert_eq!(window.messages()[0].id.as_deref(), Some("m1"));
    }

    #[tokio::test]
    async fn test_echo_deduplicated_by_id() {
        let (mut window, _) = window(FixedApi::default());
        window.select_session(guest("tok-a")).await.unwrap();

        let event = echo("m1", Direction::Admin, "tok-a");
        window.handle_event(&event);
        window.handle_event(&event);

        assert_eq!(window.messages().len(), 1);
    }

    #[tokio::test]
    async fn test_send_uses_admin_direction_and_does_not_insert() {
        let (mut window, _) = window(FixedApi::default());
        window.select_session(guest("tok-a")).await.unwrap();

        window.update_draft("Can I help?");
        window.send().await.unwrap();

        assert_eq!(window.draft(), "");
        assert!(window.messages().is_empty());

        window.handle_event(&echo("m1", Direction::Admin, "tok-a"));
        assert_eq!(window.messages().len(), 1);
        assert_eq!(window.messages()[0].direction, Direction::Admin);
    }

    #[tokio::test]
    async fn test_customer_typing_mirrored_and_cleared() {
        let (mut window, _) = window(FixedApi::default());
        window.select_session(guest("tok-a")).await.unwrap();

        let identity = guest("tok-a");
        window.handle_event(&ServerEvent::UserTyping(TypingState::new(
            &identity, true, false,
        )));
        assert!(window.customer_typing());

        // 管理者自身のタイピングエコーは無視する
        window.handle_event(&ServerEvent::UserTyping(TypingState::new(
            &identity, false, true,
        )));
        assert!(window.customer_typing());

        window.handle_event(&echo("m1", Direction::User, "tok-a"));
        assert!(!window.customer_typing());
    }

    #[tokio::test]
    async fn test_typing_notification_flagged_as_admin() {
        let (mut window, channel) = window(FixedApi::default());
        window.select_session(guest("tok-a")).await.unwrap();

        window.update_draft("typing...");

        let events = channel.typing_events();
        assert_eq!(events.len(), 1);
        assert!(events[0].is_admin);
        assert!(events[0].is_typing);
    }

    #[tokio::test]
    async fn test_failed_send_keeps_failed_text() {
        let (mut window, _) = window(FixedApi::failing());
        window.current = Some(guest("tok-a"));

        window.update_draft("lost reply");
        assert!(window.send().await.is_err());
        assert_eq!(window.last_failed_text(), Some("lost reply"));
        assert_eq!(window.draft(), "");
    }
}
