//! 顧客側チャットウィジェット
//!
//! 1つのセッション識別子に紐づくチャットの状態機械。
//! `Closed → LoadingHistory → Ready` と遷移し、メッセージの表示リストは
//! サーバーのエコーだけで構築される（ローカルの楽観的挿入はしない）。

use std::sync::Arc;

use chrono::Utc;
use tokio::sync::oneshot;

use crate::api::channel::{ChannelOutbound, ServerEvent, TypingState};
use crate::api::rest::StoreApi;
use crate::chat::TYPING_STOP_DELAY;
use crate::models::{ChatMessage, Direction, SessionIdentity};
use crate::ShopdeskResult;

/// ウィジェットの状態
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WidgetState {
    /// 閉じている（バッジのみ更新される）
    Closed,
    /// 開いていて履歴取得中。取得に失敗してもこの状態のまま入力は可能。
    LoadingHistory,
    /// 履歴取得済み
    Ready,
}

/// 顧客側チャットウィジェット
pub struct ChatWidget {
    identity: SessionIdentity,
    api: Arc<dyn StoreApi>,
    channel: Arc<dyn ChannelOutbound>,
    state: WidgetState,
    messages: Vec<ChatMessage>,
    draft: String,
    unread_badge: usize,
    peer_typing: bool,
    /// 送信に失敗した本文。ドラフトへは自動では戻さない。
    last_failed_text: Option<String>,
    /// 履歴取得の世代。古い応答はこの値の不一致で破棄される。
    history_generation: u64,
    typing_cancel: Option<oneshot::Sender<()>>,
}

impl ChatWidget {
    /// 新しいウィジェットを作成する（初期状態は `Closed`）
    pub fn new(
        identity: SessionIdentity,
        api: Arc<dyn StoreApi>,
        channel: Arc<dyn ChannelOutbound>,
    ) -> Self {
        Self {
            identity,
            api,
            channel,
            state: WidgetState::Closed,
            messages: Vec::new(),
            draft: String::new(),
            unread_badge: 0,
            peer_typing: false,
            last_failed_text: None,
            history_generation: 0,
            typing_cancel: None,
        }
    }

    /// ウィジェットを開く。バッジをリセットし、部屋に参加して履歴を取得する。
    pub async fn open(&mut self) -> ShopdeskResult<()> {
        self.unread_badge = 0;
        self.state = WidgetState::LoadingHistory;
        self.channel.join_room(&self.identity)?;

        self.history_generation += 1;
        let generation = self.history_generation;

        match self.api.fetch_history(&self.identity).await {
            Ok(history) => self.apply_history(generation, history),
            Err(e) => {
                // 履歴は空のまま入力を許可する
                tracing::warn!("Failed to fetch chat history: {}", e);
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
        self.state = WidgetState::Ready;
    }

    /// ウィジェットを閉じる。進行中の履歴取得は世代更新で破棄される。
    pub fn close(&mut self) {
        self.state = WidgetState::Closed;
        self.peer_typing = false;
        self.history_generation += 1;
        self.cancel_typing_timer();
    }

    /// 入力中テキストを更新し、タイピング状態を通知する
    pub fn update_draft(&mut self, text: impl Into<String>) {
        self.draft = text.into();
        self.notify_typing();
    }

    /// タイピング中イベントを送信し、停止イベントをデバウンス予約する
    fn notify_typing(&mut self) {
        let typing = TypingState::new(&self.identity, true, false);
        if let Err(e) = self.channel.send_typing(typing) {
            tracing::debug!("Failed to send typing event: {}", e);
        }

        self.cancel_typing_timer();
        let (cancel_tx, mut cancel_rx) = oneshot::channel();
        self.typing_cancel = Some(cancel_tx);

        let channel = Arc::clone(&self.channel);
        let identity = self.identity.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(TYPING_STOP_DELAY) => {
                    let stopped = TypingState::new(&identity, false, false);
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

    /// ドラフトを送信する。
    ///
    /// 送信リクエストの前にドラフトは消去され、メッセージ自体はローカルに
    /// 挿入しない（サーバーが部屋にエコーする前提）。失敗時もドラフトは
    /// 復元されず、`last_failed_text` に本文が残る。
    pub async fn send(&mut self) -> ShopdeskResult<()> {
        let text = std::mem::take(&mut self.draft);
        if text.is_empty() {
            return Ok(());
        }
        self.cancel_typing_timer();

        let message = ChatMessage {
            id: None,
            direction: Direction::User,
            text: text.clone(),
            time: Utc::now(),
            email: self.identity.email().map(|s| s.to_string()),
            guest_token: self.identity.guest_token().map(|s| s.to_string()),
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
            // 在庫アラートは管理者側の関心事
            ServerEvent::StockNotification(_) => {}
        }
    }

    fn handle_message(&mut self, msg: &ChatMessage) {
        if msg.identity().as_ref() != Some(&self.identity) {
            return;
        }

        // 相手からの実メッセージ受信でタイピング表示は即時クリア
        if msg.direction == Direction::Admin {
            self.peer_typing = false;
        }

        if self.state == WidgetState::Closed {
            if msg.direction == Direction::Admin {
                self.unread_badge += 1;
            }
            // 表示リストは次回openの履歴取得で再構築される
            return;
        }

        // サーバーIDによる重複排除。IDの無いメッセージはローカル発では
        // ないと仮定できるため検査をスキップする。
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
        if typing.is_admin && typing.identity().as_ref() == Some(&self.identity) {
            self.peer_typing = typing.is_typing;
        }
    }

    pub fn state(&self) -> WidgetState {
        self.state
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    pub fn draft(&self) -> &str {
        &self.draft
    }

    pub fn unread_badge(&self) -> usize {
        self.unread_badge
    }

    pub fn peer_typing(&self) -> bool {
        self.peer_typing
    }

    /// 直近の送信失敗本文（ホストが復元UIを出す場合に使う）
    pub fn last_failed_text(&self) -> Option<&str> {
        self.last_failed_text.as_deref()
    }

    pub fn identity(&self) -> &SessionIdentity {
        &self.identity
    }
}

impl Drop for ChatWidget {
    fn drop(&mut self) {
        self.cancel_typing_timer();
    }
}
