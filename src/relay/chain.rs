//! Presentation grouping and parent/child threading of transactions.
//!
//! Pure functions over snapshots; nothing here touches the store or the
//! stream. Every input transaction appears in exactly one group, exactly
//! once.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::models::{Prompt, Transaction};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GroupBy {
    #[default]
    Prompt,
    Date,
    Author,
    Status,
    Files,
    None,
}

impl fmt::Display for GroupBy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            GroupBy::Prompt => "prompt",
            GroupBy::Date => "date",
            GroupBy::Author => "author",
            GroupBy::Status => "status",
            GroupBy::Files => "files",
            GroupBy::None => "none",
        };
        f.write_str(s)
    }
}

impl FromStr for GroupBy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "prompt" => Ok(GroupBy::Prompt),
            "date" => Ok(GroupBy::Date),
            "author" => Ok(GroupBy::Author),
            "status" => Ok(GroupBy::Status),
            "files" | "file" => Ok(GroupBy::Files),
            "none" => Ok(GroupBy::None),
            _ => Err(format!(
                "Invalid grouping '{}': expected prompt, date, author, status, files or none",
                s
            )),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct GroupedTransaction {
    #[serde(flatten)]
    pub transaction: Transaction,
    /// Indentation level within the group's thread view.
    pub depth: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct GroupedData {
    pub id: String,
    pub label: String,
    pub count: usize,
    pub transactions: Vec<GroupedTransaction>,
}

const DAY_MS: i64 = 24 * 60 * 60 * 1000;

/// Relative date bucket for `created_at` as seen from `now`.
///
/// Whole days are floored, so a timestamp in the future counts as day -1
/// and lands in "This Week".
pub fn date_bucket(created_at: DateTime<Utc>, now: DateTime<Utc>) -> &'static str {
    match (now - created_at).num_milliseconds().div_euclid(DAY_MS) {
        0 => "Today",
        1 => "Yesterday",
        d if d < 7 => "This Week",
        d if d < 30 => "This Month",
        _ => "Older",
    }
}

fn group_key(
    tx: &Transaction,
    titles: &HashMap<&str, &str>,
    strategy: GroupBy,
    now: DateTime<Utc>,
) -> (String, String) {
    match strategy {
        GroupBy::Prompt => {
            let label = titles
                .get(tx.prompt_id.as_str())
                .filter(|t| !t.is_empty())
                .map(|t| t.to_string())
                .unwrap_or_else(|| "Orphaned".to_string());
            (tx.prompt_id.clone(), label)
        }
        GroupBy::Date => {
            let bucket = date_bucket(tx.created_at, now);
            (bucket.to_string(), bucket.to_string())
        }
        GroupBy::Author if tx.author.is_empty() => ("?".to_string(), "Unknown".to_string()),
        GroupBy::Author => (tx.author.clone(), format!("@{}", tx.author)),
        GroupBy::Status => {
            let raw = tx.status.as_str();
            let mut label = raw[..1].to_string();
            label.push_str(&raw[1..].to_lowercase());
            (raw.to_string(), label)
        }
        GroupBy::Files => match tx.file_set().first() {
            Some(f) => (f.path.clone(), f.path.clone()),
            None => ("?".to_string(), "No Files".to_string()),
        },
        GroupBy::None => ("all".to_string(), "All Transactions".to_string()),
    }
}

/// Group with the wall clock as the reference for date buckets.
pub fn group_transactions(
    transactions: &[Transaction],
    prompts: &[Prompt],
    strategy: GroupBy,
) -> Vec<GroupedData> {
    group(transactions, prompts, strategy, Utc::now())
}

pub fn group(
    transactions: &[Transaction],
    prompts: &[Prompt],
    strategy: GroupBy,
    now: DateTime<Utc>,
) -> Vec<GroupedData> {
    if strategy == GroupBy::None || transactions.is_empty() {
        return vec![GroupedData {
            id: "all".to_string(),
            label: "All Transactions".to_string(),
            count: transactions.len(),
            transactions: transactions
                .iter()
                .map(|t| GroupedTransaction {
                    transaction: t.clone(),
                    depth: 0,
                })
                .collect(),
        }];
    }

    let titles: HashMap<&str, &str> = prompts
        .iter()
        .map(|p| (p.id.as_str(), p.title.as_str()))
        .collect();

    // Stable sort keeps input order among equal timestamps.
    let mut sorted: Vec<&Transaction> = transactions.iter().collect();
    sorted.sort_by(|a, b| b.created_at.cmp(&a.created_at));

    let mut order: Vec<(String, String)> = Vec::new();
    let mut members: HashMap<String, Vec<&Transaction>> = HashMap::new();
    for tx in sorted {
        let (key, label) = group_key(tx, &titles, strategy, now);
        members
            .entry(key.clone())
            .or_insert_with(|| {
                order.push((key, label));
                Vec::new()
            })
            .push(tx);
    }

    order
        .into_iter()
        .map(|(key, label)| {
            let pool = members.remove(&key).unwrap_or_default();
            let threaded = thread(&pool);
            GroupedData {
                id: key,
                label,
                count: threaded.len(),
                transactions: threaded,
            }
        })
        .collect()
}

/// Order `pool` as parent/child threads restricted to the pool itself.
///
/// Roots are entries whose parent is missing or outside the pool. Anything
/// no root walk reaches (cycles, self-parents) is appended afterwards as a
/// depth-0 root, in pool order.
pub fn thread(pool: &[&Transaction]) -> Vec<GroupedTransaction> {
    let in_pool: HashSet<&str> = pool.iter().map(|t| t.id.as_str()).collect();

    let mut children: HashMap<&str, Vec<usize>> = HashMap::new();
    let mut roots = Vec::new();
    for (idx, tx) in pool.iter().enumerate() {
        match tx.parent_id.as_deref() {
            Some(parent) if in_pool.contains(parent) => {
                children.entry(parent).or_default().push(idx);
            }
            _ => roots.push(idx),
        }
    }

    let mut visited = vec![false; pool.len()];
    let mut out = Vec::with_capacity(pool.len());
    for root in roots {
        let mut stack = vec![(root, 0usize)];
        while let Some((idx, depth)) = stack.pop() {
            if visited[idx] {
                continue;
            }
            visited[idx] = true;
            out.push(GroupedTransaction {
                transaction: pool[idx].clone(),
                depth,
            });
            if let Some(kids) = children.get(pool[idx].id.as_str()) {
                for &kid in kids.iter().rev() {
                    if !visited[kid] {
                        stack.push((kid, depth + 1));
                    }
                }
            }
        }
    }

    // Safety net
    out.extend(
        pool.iter()
            .zip(&visited)
            .filter(|(_, seen)| !**seen)
            .map(|(tx, _)| GroupedTransaction {
                transaction: (*tx).clone(),
                depth: 0,
            }),
    );
    out
}
