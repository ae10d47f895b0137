//! Stream follower command: `relaycode watch`.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use anyhow::{Result, bail};
use tracing::{debug, info};

use relaycode::config::RelayConfig;
use relaycode::relay::client::{
    ApiClient, ConnectionState, HttpConnector, LocalTransactionView, StreamHandler, connect,
};
use relaycode::relay::models::RelayEvent;

struct WatchHandler {
    view: Mutex<LocalTransactionView>,
}

impl WatchHandler {
    fn status_counts(&self) -> BTreeMap<String, usize> {
        let mut counts = BTreeMap::new();
        if let Ok(view) = self.view.lock() {
            for tx in view.transactions() {
                *counts.entry(tx.status.to_string()).or_insert(0) += 1;
            }
        }
        counts
    }
}

impl StreamHandler for WatchHandler {
    fn on_event(&self, event: RelayEvent) {
        match &event {
            RelayEvent::Connected => info!("stream handshake received"),
            RelayEvent::Transaction(e) => {
                info!(transaction_id = %e.transaction_id, status = %e.status, "transaction")
            }
            RelayEvent::File(e) => info!(
                transaction_id = %e.transaction_id,
                file = %e.file_path,
                apply_status = %e.apply_status,
                error = e.error_message.as_deref().unwrap_or(""),
                "file"
            ),
        }
        let known = match self.view.lock() {
            Ok(mut view) => view.apply(&event),
            Err(_) => false,
        };
        if !known && event.transaction_id().is_some() {
            debug!("event for a transaction not in the local view");
        }
    }

    fn on_connection_change(&self, state: ConnectionState) {
        match state {
            ConnectionState::Connected => info!("connected"),
            ConnectionState::Disconnected => info!("disconnected"),
        }
    }
}

pub async fn cmd_watch(settings: RelayConfig, url: Option<String>) -> Result<()> {
    let base_url = url.unwrap_or(settings.client.base_url);
    let http = reqwest::Client::new();

    let initial = ApiClient::new(http.clone(), &base_url)
        .all_transactions()
        .await?;
    println!("Watching {} ({} transactions)", base_url, initial.len());

    let handler = Arc::new(WatchHandler {
        view: Mutex::new(LocalTransactionView::new(initial)),
    });
    let teardown = connect(
        HttpConnector::new(http, &base_url),
        Arc::clone(&handler),
        settings.client.reconnect.clone(),
    );

    let exhausted = tokio::select! {
        _ = tokio::signal::ctrl_c() => false,
        _ = teardown.join() => true,
    };
    teardown.close();

    println!();
    for (status, count) in handler.status_counts() {
        println!("{:<18} {}", status, count);
    }

    if exhausted {
        bail!(
            "Lost the event stream at {} after {} reconnect attempts",
            base_url,
            settings.client.reconnect.max_attempts
        );
    }
    Ok(())
}
