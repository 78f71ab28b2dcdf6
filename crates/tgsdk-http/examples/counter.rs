//! Minimal polling bot: logs every message and counts messages per
//! (sender, chat) pair in the session store.
//!
//! Run with `TELEGRAM_BOT_TOKEN=... cargo run --example counter`.

use std::sync::Arc;
use std::time::Duration;

use tgsdk_core::{Config, Dispatcher, FileStore, Sessions, Update};
use tgsdk_http::HttpTransport;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tgsdk_core::logging::init("counter")?;

    let mut cfg = Config::load()?;
    cfg.worker_count = 4;

    let transport = Arc::new(HttpTransport::new(&cfg)?);
    let sessions = Arc::new(Sessions::new(Arc::new(FileStore::new(
        cfg.session_file.clone(),
    ))));

    let dispatcher = Dispatcher::new(cfg, transport);
    dispatcher
        .run(move |update: Update| {
            let sessions = sessions.clone();
            async move {
                let Some(msg) = update.message.as_ref() else {
                    return Ok(());
                };
                let count = sessions
                    .get(&update)
                    .await?
                    .and_then(|v| v.as_i64())
                    .unwrap_or(0)
                    + 1;
                sessions
                    .set(&update, count.into(), Duration::from_secs(3600))
                    .await?;
                tracing::info!(
                    chat = msg.chat.id,
                    text = msg.text.as_deref().unwrap_or(""),
                    count,
                    "message received"
                );
                Ok(())
            }
        })
        .await?;
    Ok(())
}
