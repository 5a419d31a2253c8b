//! 管理者向けチャットセッション一覧
//!
//! サーバーのロースターを正とし、全セッションの部屋に参加して
//! 未読数と最新メッセージを横断的に集計する。

use std::sync::Arc;

use crate::alert::{Alert, AlertSink};
use crate::api::channel::{ChannelOutbound, ServerEvent};
use crate::api::rest::StoreApi;
use crate::models::{ChatMessage, Direction, SessionIdentity};
use crate::ShopdeskResult;

/// 一覧の1行分
#[derive(Debug, Clone)]
pub struct ChatSessionEntry {
    pub identity: SessionIdentity,
    pub last_message: Option<String>,
    pub unread_count: usize,
}

impl ChatSessionEntry {
    fn new(identity: SessionIdentity) -> Self {
        Self {
            identity,
            last_message: None,
            unread_count: 0,
        }
    }

    /// 一覧に表示するラベル（ゲストはトークンをマスクする）
    pub fn label(&self) -> String {
        self.identity.display_label()
    }
}

/// 管理者向けチャットセッション一覧
pub struct AdminChatList {
    api: Arc<dyn StoreApi>,
    channel: Arc<dyn ChannelOutbound>,
    alerts: Arc<dyn AlertSink>,
    sessions: Vec<ChatSessionEntry>,
    selected: Option<SessionIdentity>,
}

impl AdminChatList {
    pub fn new(
        api: Arc<dyn StoreApi>,
        channel: Arc<dyn ChannelOutbound>,
        alerts: Arc<dyn AlertSink>,
    ) -> Self {
        Self {
            api,
            channel,
            alerts,
            sessions: Vec::new(),
            selected: None,
        }
    }

    /// 一覧を有効化する。ロースターを取得し、全セッションの部屋に参加する。
    pub async fn activate(&mut self) -> ShopdeskResult<()> {
        tracing::info!("📜 Activating admin chat list");
        self.refresh_roster().await
    }

    /// サーバーのロースターで一覧を再構築する。
    ///
    /// 並び順はサーバーの返却順に従い、既存エントリの未読数と
    /// 最新メッセージは持ち越す。
    pub async fn refresh_roster(&mut self) -> ShopdeskResult<()> {
        let roster = self.api.fetch_roster().await?;

        let previous = std::mem::take(&mut self.sessions);
        for entry in roster {
            let Some(identity) = entry.identity() else {
                tracing::debug!("Skipping roster entry without identity");
                continue;
            };
            let mut session = previous
                .iter()
                .find(|s| s.identity == identity)
                .cloned()
                .unwrap_or_else(|| ChatSessionEntry::new(identity.clone()));
            if let Some(text) = entry.last_message {
                session.last_message = Some(text);
            }
            self.sessions.push(session);

            self.channel.join_room(&identity)?;
        }

        tracing::debug!("📜 Roster refreshed: {} sessions", self.sessions.len());
        Ok(())
    }

    /// チャネルからの受信イベントを処理する。
    ///
    /// 顧客発のメッセージを受けた後は `refresh_roster` の呼び出しが
    /// 推奨される（新規セッションの出現を補足するため）。戻り値は
    /// 再取得が推奨されるかどうか。
    pub fn handle_event(&mut self, event: &ServerEvent) -> bool {
        match event {
            ServerEvent::ReceiveMessage(msg) => self.handle_message(msg),
            _ => false,
        }
    }

    fn handle_message(&mut self, msg: &ChatMessage) -> bool {
        let Some(identity) = msg.identity() else {
            return false;
        };

        let quiet = self.selected.as_ref() == Some(&identity);

        match self.sessions.iter_mut().find(|s| s.identity == identity) {
            Some(entry) => {
                entry.last_message = Some(msg.text.clone());
                if !quiet {
                    entry.unread_count += 1;
                }
            }
            None => {
                let mut entry = ChatSessionEntry::new(identity.clone());
                entry.last_message = Some(msg.text.clone());
                if !quiet {
                    entry.unread_count = 1;
                }
                self.sessions.push(entry);
            }
        }

        if !quiet && msg.direction == Direction::User {
            self.alerts
                .raise(Alert::chat(msg.sender_label(), Some(identity)));
        }

        msg.direction == Direction::User
    }

    /// セッションを選択し、その行の未読数をゼロにする
    pub fn select_session(&mut self, identity: &SessionIdentity) {
        self.selected = Some(identity.clone());
        if let Some(entry) = self.sessions.iter_mut().find(|s| &s.identity == identity) {
            entry.unread_count = 0;
        }
    }

    /// 選択を解除する（ウィンドウを閉じた時）
    pub fn clear_selection(&mut self) {
        self.selected = None;
    }

    pub fn sessions(&self) -> &[ChatSessionEntry] {
        &self.sessions
    }

    pub fn selected(&self) -> Option<&SessionIdentity> {
        self.selected.as_ref()
    }

    /// 全セッションの未読数合計
    pub fn total_unread(&self) -> usize {
        self.sessions.iter().map(|s| s.unread_count).sum()
    }
}
