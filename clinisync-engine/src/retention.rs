//! Backup retention policy.
//!
//! A pure function from the remote backup inventory and the current time to
//! the set of blob ids to delete. Day buckets keep the `max_daily`
//! most-recent days; older backups thin to one per month, then one per year;
//! anything beyond `max_age_days` goes regardless of bucket membership.

use chrono::{DateTime, Datelike, Duration, NaiveDate, Utc};
use clinisync_types::BackupDescriptor;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetentionPolicy {
    /// Daily buckets to keep (each keeps its most recent backup).
    pub max_daily: usize,
    /// Monthly buckets to keep for backups older than the daily window.
    pub max_monthly: usize,
    /// Yearly buckets to keep for backups older than the monthly window.
    pub max_yearly: usize,
    /// Hard age limit in days; `None` disables it.
    pub max_age_days: Option<i64>,
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self {
            max_daily: 7,
            max_monthly: 12,
            max_yearly: 3,
            max_age_days: None,
        }
    }
}

/// Computes the delete-set for the given inventory.
///
/// A descriptor survives only as the single most-recent member of a bucket
/// some rule keeps, and never past the age limit.
pub fn prune(
    descriptors: &[BackupDescriptor],
    policy: &RetentionPolicy,
    now: DateTime<Utc>,
) -> HashSet<String> {
    let mut keep: HashSet<&str> = HashSet::new();

    // Daily window: the most recent backup of each of the N newest days
    let days: BTreeSet<NaiveDate> = descriptors.iter().map(|d| d.created_at.date_naive()).collect();
    let daily_days: HashSet<NaiveDate> =
        days.iter().rev().take(policy.max_daily).copied().collect();
    for day in &daily_days {
        if let Some(winner) = newest_in(descriptors, |d| d.created_at.date_naive() == *day) {
            keep.insert(&winner.id);
        }
    }

    // Monthly window over everything older than the daily days
    let older: Vec<&BackupDescriptor> = descriptors
        .iter()
        .filter(|d| !daily_days.contains(&d.created_at.date_naive()))
        .collect();
    let months: BTreeSet<(i32, u32)> = older
        .iter()
        .map(|d| (d.created_at.year(), d.created_at.month()))
        .collect();
    let monthly_months: HashSet<(i32, u32)> = months
        .iter()
        .rev()
        .take(policy.max_monthly)
        .copied()
        .collect();
    for month in &monthly_months {
        let winner = older
            .iter()
            .filter(|d| (d.created_at.year(), d.created_at.month()) == *month)
            .max_by_key(|d| d.created_at);
        if let Some(winner) = winner {
            keep.insert(&winner.id);
        }
    }

    // Yearly window over what both previous windows passed over
    let oldest: Vec<&BackupDescriptor> = older
        .iter()
        .filter(|d| !monthly_months.contains(&(d.created_at.year(), d.created_at.month())))
        .copied()
        .collect();
    let years: BTreeSet<i32> = oldest.iter().map(|d| d.created_at.year()).collect();
    let yearly_years: HashSet<i32> = years.iter().rev().take(policy.max_yearly).copied().collect();
    for year in &yearly_years {
        let winner = oldest
            .iter()
            .filter(|d| d.created_at.year() == *year)
            .max_by_key(|d| d.created_at);
        if let Some(winner) = winner {
            keep.insert(&winner.id);
        }
    }

    // Age limit overrides every keep
    if let Some(max_age_days) = policy.max_age_days {
        let cutoff = now - Duration::days(max_age_days);
        keep.retain(|id| {
            descriptors
                .iter()
                .find(|d| d.id == *id)
                .is_some_and(|d| d.created_at >= cutoff)
        });
    }

    descriptors
        .iter()
        .filter(|d| !keep.contains(d.id.as_str()))
        .map(|d| d.id.clone())
        .collect()
}

fn newest_in<'a>(
    descriptors: &'a [BackupDescriptor],
    predicate: impl Fn(&BackupDescriptor) -> bool,
) -> Option<&'a BackupDescriptor> {
    descriptors
        .iter()
        .filter(|d| predicate(d))
        .max_by_key(|d| d.created_at)
}
