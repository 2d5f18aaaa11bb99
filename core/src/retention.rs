use crate::types::BackupArtifact;
use chrono::{DateTime, Datelike, Duration, Months, Utc, Weekday};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetentionPolicy {
    pub daily_days: u32,
    pub weekly_weeks: u32,
    pub monthly_months: u32,
    pub yearly_years: u32,
    pub weekly_anchor: Weekday,
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self {
            daily_days: 7,
            weekly_weeks: 4,
            monthly_months: 12,
            yearly_years: 3,
            weekly_anchor: Weekday::Sun,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RetentionPlan {
    pub keep: BTreeSet<String>,
    pub delete: Vec<BackupArtifact>,
}

/// Splits `artifacts` into the filenames to keep and the artifacts to delete.
///
/// The daily tier keeps everything inside its window. The weekly, monthly and
/// yearly tiers each keep the newest N anchor-day artifacts inside their
/// window, where N is the tier's own window length. The keep set is the union
/// of the tiers.
pub fn plan(artifacts: &[BackupArtifact], policy: &RetentionPolicy, now: DateTime<Utc>) -> RetentionPlan {
    let mut keep = BTreeSet::new();

    let daily_cutoff = before(now, Duration::try_days(i64::from(policy.daily_days)));
    for artifact in artifacts.iter().filter(|a| a.created_at > daily_cutoff) {
        keep.insert(artifact.filename.clone());
    }

    let weekly_cutoff = before(now, Duration::try_weeks(i64::from(policy.weekly_weeks)));
    keep_newest(artifacts, &mut keep, policy.weekly_weeks, weekly_cutoff, |a| {
        a.created_at.weekday() == policy.weekly_anchor
    });

    let monthly_cutoff = months_before(now, policy.monthly_months);
    keep_newest(artifacts, &mut keep, policy.monthly_months, monthly_cutoff, |a| {
        a.created_at.day() == 1
    });

    let yearly_cutoff = months_before(now, policy.yearly_years.saturating_mul(12));
    keep_newest(artifacts, &mut keep, policy.yearly_years, yearly_cutoff, |a| {
        a.created_at.ordinal() == 1
    });

    let delete = artifacts
        .iter()
        .filter(|a| !keep.contains(&a.filename))
        .cloned()
        .collect();

    RetentionPlan { keep, delete }
}

fn keep_newest<F>(artifacts: &[BackupArtifact], keep: &mut BTreeSet<String>, count: u32, cutoff: DateTime<Utc>, anchored: F)
where
    F: Fn(&BackupArtifact) -> bool,
{
    if count == 0 {
        return;
    }

    let mut candidates: Vec<&BackupArtifact> = artifacts
        .iter()
        .filter(|a| a.created_at > cutoff && anchored(a))
        .collect();
    candidates.sort_by(|a, b| {
        b.created_at
            .cmp(&a.created_at)
            .then_with(|| b.filename.cmp(&a.filename))
    });

    for artifact in candidates.into_iter().take(count as usize) {
        keep.insert(artifact.filename.clone());
    }
}

fn before(now: DateTime<Utc>, window: Option<Duration>) -> DateTime<Utc> {
    window
        .and_then(|w| now.checked_sub_signed(w))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

fn months_before(now: DateTime<Utc>, months: u32) -> DateTime<Utc> {
    now.checked_sub_months(Months::new(months))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}
