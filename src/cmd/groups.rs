//! Grouped listing command: `relaycode groups`.

use anyhow::{Context, Result};

use relaycode::config::RelayConfig;
use relaycode::relay::chain::{GroupBy, GroupedData, group_transactions};
use relaycode::relay::client::ApiClient;

pub async fn cmd_groups(
    settings: RelayConfig,
    url: Option<String>,
    by: GroupBy,
    json: bool,
) -> Result<()> {
    let base_url = url.unwrap_or(settings.client.base_url);
    let api = ApiClient::new(reqwest::Client::new(), &base_url);

    let transactions = api.all_transactions().await?;
    let prompts = api.prompts().await?;
    let groups = group_transactions(&transactions, &prompts, by);

    if json {
        let out = serde_json::to_string_pretty(&groups).context("Failed to serialize groups")?;
        println!("{}", out);
    } else {
        print!("{}", render_groups(&groups));
    }
    Ok(())
}

/// Indented tree, one line per transaction.
pub fn render_groups(groups: &[GroupedData]) -> String {
    let mut out = String::new();
    for group in groups {
        out.push_str(&format!("{} ({})\n", group.label, group.count));
        for entry in &group.transactions {
            let tx = &entry.transaction;
            let indent = "  ".repeat(entry.depth + 1);
            let marker = if entry.depth == 0 { "•" } else { "└─" };
            out.push_str(&format!(
                "{}{} {} [{}] {}\n",
                indent, marker, tx.id, tx.status, tx.description
            ));
        }
        out.push('\n');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use relaycode::relay::chain::group;
    use relaycode::relay::models::Transaction;

    fn tx(id: &str, parent: Option<&str>, created_at: &str) -> Transaction {
        serde_json::from_value(serde_json::json!({
            "id": id,
            "status": "PENDING",
            "description": format!("change {}", id),
            "createdAt": created_at,
            "promptId": "p-1",
            "parentId": parent,
            "author": "maria",
        }))
        .unwrap()
    }

    #[test]
    fn test_render_indents_children() {
        let txs = vec![
            tx("tx-1", None, "2024-06-01T10:00:00Z"),
            tx("tx-2", Some("tx-1"), "2024-06-01T11:00:00Z"),
        ];
        let groups = group(&txs, &[], GroupBy::Prompt, chrono::Utc::now());
        let rendered = render_groups(&groups);
        assert_eq!(
            rendered,
            "Orphaned (2)\n  • tx-1 [PENDING] change tx-1\n    └─ tx-2 [PENDING] change tx-2\n\n"
        );
    }
}
