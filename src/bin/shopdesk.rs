//! shopdesk 管理コンソール（ヘッドレス）
//!
//! ストアサーバーに接続し、チャット・在庫アラートを集約して
//! 構造化ログとして出力する常駐プロセス。

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use shopdesk::api::channel::ServerEvent;
use shopdesk::chat::AdminChatList;
use shopdesk::config::{AppConfig, ConfigManager};
use shopdesk::notify::{FilePersistence, NotificationStore, StockPoller};
use shopdesk::{ChannelClient, RestClient, ShopdeskResult, TracingAlertSink};

/// ストア管理コンソール
#[derive(Debug, Parser)]
#[command(name = "shopdesk", version, about = "Realtime store support desk console")]
struct Args {
    /// ストアサーバーのベースURL（設定より優先）
    #[arg(long)]
    server_url: Option<String>,

    /// 在庫ポーリング間隔（秒）
    #[arg(long)]
    poll_interval: Option<u64>,

    /// 通知の永続化ディレクトリ（既定はXDGデータディレクトリ）
    #[arg(long)]
    data_dir: Option<std::path::PathBuf>,
}

#[tokio::main]
async fn main() -> ShopdeskResult<()> {
    let args = Args::parse();

    // 設定の読み込み（失敗時はデフォルトで続行）
    let config_manager = ConfigManager::new().map_err(|e| {
        shopdesk::ShopdeskError::config(format!("Failed to initialize config: {}", e))
    })?;
    let loaded = config_manager.load_config();
    let mut config = match &loaded {
        Ok(config) => config.clone(),
        Err(_) => AppConfig::default(),
    };

    if let Some(url) = args.server_url {
        config.server.base_url = url;
    }
    if let Some(secs) = args.poll_interval {
        config.stock.poll_interval_secs = secs;
    }

    let _log_guard = shopdesk::utils::init_logging(&config.log).map_err(|e| {
        shopdesk::ShopdeskError::config(format!("Failed to initialize logging: {}", e))
    })?;
    if let Err(e) = loaded {
        tracing::warn!("Failed to load config, using defaults: {}", e);
    }

    tracing::info!("🎬 Starting shopdesk admin console");
    tracing::info!("🌐 Store server: {}", config.server.base_url);

    // 通知ストア（書き込み同期の永続化ミラー付き）
    let data_dir = match args.data_dir.or_else(|| config.data_dir.clone()) {
        Some(dir) => dir,
        None => ConfigManager::default_data_dir().map_err(|e| {
            shopdesk::ShopdeskError::config(format!("Failed to resolve data dir: {}", e))
        })?,
    };
    let persistence = Arc::new(FilePersistence::new(data_dir));
    let alerts = Arc::new(TracingAlertSink);
    let store = Arc::new(NotificationStore::load(persistence, alerts.clone()));

    // REST / チャネルクライアント
    let rest = Arc::new(RestClient::new(&config.server)?);
    let channel = Arc::new(ChannelClient::new(config.server.resolved_channel_url()));
    let mut events = channel.subscribe();
    channel.clone().start();

    // 在庫ポーラー
    let poller = StockPoller::new(
        store.clone(),
        rest.clone(),
        Duration::from_secs(config.stock.poll_interval_secs),
    );
    poller.start();

    // チャットセッション一覧
    let mut chat_list = AdminChatList::new(rest.clone(), channel.clone(), alerts);
    if let Err(e) = chat_list.activate().await {
        tracing::warn!("Failed to load chat roster: {}", e);
    }

    // Ctrl+Cシグナルハンドラー
    let (shutdown_tx, mut shutdown_rx) = tokio::sync::watch::channel(false);
    ctrlc::set_handler(move || {
        tracing::info!("🛑 Shutdown signal received");
        let _ = shutdown_tx.send(true);
    })
    .map_err(|e| {
        shopdesk::ShopdeskError::config(format!("Failed to set signal handler: {}", e))
    })?;

    // イベントループ
    loop {
        tokio::select! {
            event = events.recv() => {
                match event {
                    Ok(event) => {
                        handle_event(&store, &mut chat_list, &event).await;
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                        tracing::warn!("Event stream lagged, {} events dropped", n);
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => {
                        tracing::error!("Event stream closed");
                        break;
                    }
                }
            }
            _ = shutdown_rx.changed() => {
                break;
            }
        }
    }

    poller.stop();
    channel.stop();
    tracing::info!("👋 shopdesk shutting down");
    Ok(())
}

/// 受信イベントを通知ストアとチャット一覧へ配送する
async fn handle_event(
    store: &Arc<NotificationStore>,
    chat_list: &mut AdminChatList,
    event: &ServerEvent,
) {
    match event {
        ServerEvent::ReceiveMessage(msg) => {
            if let Err(e) = store.record_message(msg) {
                tracing::error!("Failed to record message notification: {}", e);
            }
            if chat_list.handle_event(event) {
                if let Err(e) = chat_list.refresh_roster().await {
                    tracing::debug!("Roster refresh failed: {}", e);
                }
            }
        }
        ServerEvent::StockNotification(evt) => {
            if let Err(e) = store.record_stock_event(evt) {
                tracing::error!("Failed to record stock notification: {}", e);
            }
        }
        ServerEvent::UserTyping(_) => {}
    }
}
