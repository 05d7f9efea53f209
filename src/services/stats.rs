//! Daily visitor and order statistics, keyed by local date and hour.

use chrono::{Local, NaiveDate, NaiveDateTime, Timelike};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::error::AppResult;
use crate::models::{AllTimeStats, DailyStats, DailyStatsSummary};
use crate::repositories::StatsStore;

/// Payload of the admin visitor-stats endpoint.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VisitorReport {
    pub today: DailyStatsSummary,
    /// Previous days, newest first, today excluded.
    pub history: Vec<DailyStatsSummary>,
    pub all_time: AllTimeStats,
    pub active_visitors: usize,
}

#[derive(Clone)]
pub struct StatsService {
    store: Arc<dyn StatsStore>,
}

impl StatsService {
    pub fn new(store: Arc<dyn StatsStore>) -> Self {
        Self { store }
    }

    fn now() -> NaiveDateTime {
        Local::now().naive_local()
    }

    /// Count one visit by `visitor_key` today. Failures are logged, never raised.
    pub async fn record_visitor_event(&self, visitor_key: &str) {
        self.record_visitor_event_at(visitor_key, Self::now()).await
    }

    pub async fn record_visitor_event_at(&self, visitor_key: &str, at: NaiveDateTime) {
        match self
            .store
            .record_visitor(at.date(), at.hour(), visitor_key)
            .await
        {
            Ok(()) => debug!(visitor = %visitor_key, "visitor recorded"),
            Err(e) => warn!(error = %e, "visitor stats update failed"),
        }
    }

    pub async fn record_order_event(&self) -> AppResult<()> {
        self.record_order_event_at(Self::now()).await
    }

    pub async fn record_order_event_at(&self, at: NaiveDateTime) -> AppResult<()> {
        self.store.record_order(at.date(), at.hour()).await
    }

    /// Raise today's peak to `active` if higher. Failures are logged, never raised.
    pub async fn update_peak(&self, active: usize) {
        self.update_peak_at(active, Self::now()).await
    }

    pub async fn update_peak_at(&self, active: usize, at: NaiveDateTime) {
        if let Err(e) = self.store.update_peak(at.date(), active as u64).await {
            warn!(error = %e, "peak visitor update failed");
        }
    }

    /// Today plus the `days - 1` days before it, and all-time totals.
    pub async fn report(&self, days: u32, active_visitors: usize) -> AppResult<VisitorReport> {
        self.report_on(Self::now().date(), days, active_visitors).await
    }

    pub async fn report_on(
        &self,
        today: NaiveDate,
        days: u32,
        active_visitors: usize,
    ) -> AppResult<VisitorReport> {
        let today_stats = self
            .store
            .day(today)
            .await?
            .unwrap_or_else(|| DailyStats::empty(today));
        let history = match (days.max(1) - 1, today.pred_opt()) {
            (0, _) | (_, None) => Vec::new(),
            (n, Some(yesterday)) => {
                let from = today - chrono::Duration::days(i64::from(n));
                self.store
                    .range(from, yesterday)
                    .await?
                    .iter()
                    .map(DailyStats::summary)
                    .collect()
            }
        };
        let all_days = self.store.all_days().await?;
        Ok(VisitorReport {
            today: today_stats.summary(),
            history,
            all_time: AllTimeStats::from_days(&all_days),
            active_visitors,
        })
    }
}
