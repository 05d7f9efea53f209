//! Daily visitor and order statistics.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

pub const HOURS_PER_DAY: usize = 24;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HourlySlot {
    pub hour: u8,
    pub visitors: u64,
    pub orders: u64,
}

/// Counters for one server-local calendar day.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DailyStats {
    pub date: NaiveDate,
    pub total_visitors: u64,
    pub unique_visitors: BTreeSet<String>,
    pub peak_visitors: u64,
    pub orders_received: u64,
    /// Always 24 entries, index = hour of day.
    pub hourly: Vec<HourlySlot>,
}

impl DailyStats {
    /// Zeroed record with all 24 hourly slots present.
    pub fn empty(date: NaiveDate) -> Self {
        Self {
            date,
            total_visitors: 0,
            unique_visitors: BTreeSet::new(),
            peak_visitors: 0,
            orders_received: 0,
            hourly: (0..HOURS_PER_DAY as u8)
                .map(|hour| HourlySlot {
                    hour,
                    ..HourlySlot::default()
                })
                .collect(),
        }
    }

    pub fn record_visitor(&mut self, hour: u32, visitor_key: &str) {
        self.total_visitors += 1;
        if !self.unique_visitors.contains(visitor_key) {
            self.unique_visitors.insert(visitor_key.to_string());
        }
        if let Some(slot) = self.hourly.get_mut(hour as usize) {
            slot.visitors += 1;
        }
    }

    pub fn record_order(&mut self, hour: u32) {
        self.orders_received += 1;
        if let Some(slot) = self.hourly.get_mut(hour as usize) {
            slot.orders += 1;
        }
    }

    /// Running maximum; never decreases.
    pub fn update_peak(&mut self, current_active: u64) {
        self.peak_visitors = self.peak_visitors.max(current_active);
    }

    pub fn summary(&self) -> DailyStatsSummary {
        DailyStatsSummary {
            date: self.date,
            total_visitors: self.total_visitors,
            unique_visitors: self.unique_visitors.len() as u64,
            peak_visitors: self.peak_visitors,
            orders_received: self.orders_received,
            hourly_stats: self.hourly.clone(),
        }
    }
}

/// API shape of a day: the distinct-visitor set is reported as a count.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DailyStatsSummary {
    pub date: NaiveDate,
    pub total_visitors: u64,
    pub unique_visitors: u64,
    pub peak_visitors: u64,
    pub orders_received: u64,
    pub hourly_stats: Vec<HourlySlot>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AllTimeStats {
    pub total_visitors: u64,
    pub total_orders: u64,
    pub total_unique_visitors: u64,
    pub max_peak_visitors: u64,
}

impl AllTimeStats {
    pub fn from_days<'a>(days: impl IntoIterator<Item = &'a DailyStats>) -> Self {
        days.into_iter().fold(Self::default(), |mut acc, day| {
            acc.total_visitors += day.total_visitors;
            acc.total_orders += day.orders_received;
            acc.total_unique_visitors += day.unique_visitors.len() as u64;
            acc.max_peak_visitors = acc.max_peak_visitors.max(day.peak_visitors);
            acc
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day() -> DailyStats {
        DailyStats::empty(NaiveDate::from_ymd_opt(2026, 10, 16).unwrap())
    }

    #[test]
    fn empty_day_has_24_zeroed_slots() {
        let d = day();
        assert_eq!(d.hourly.len(), HOURS_PER_DAY);
        assert!(d.hourly.iter().enumerate().all(|(i, s)| s.hour as usize == i
            && s.visitors == 0
            && s.orders == 0));
    }

    #[test]
    fn visitor_events_count_total_and_distinct() {
        let mut d = day();
        d.record_visitor(9, "c1");
        d.record_visitor(9, "c1");
        d.record_visitor(14, "c2");
        assert_eq!(d.total_visitors, 3);
        assert_eq!(d.unique_visitors.len(), 2);
        assert_eq!(d.hourly[9].visitors, 2);
        assert_eq!(d.hourly[14].visitors, 1);
    }

    #[test]
    fn orders_land_in_their_hour() {
        let mut d = day();
        d.record_order(23);
        assert_eq!(d.orders_received, 1);
        assert_eq!(d.hourly[23].orders, 1);
    }

    #[test]
    fn peak_is_running_max() {
        let mut d = day();
        d.update_peak(4);
        d.update_peak(2);
        assert_eq!(d.peak_visitors, 4);
        d.update_peak(5);
        assert_eq!(d.peak_visitors, 5);
    }

    #[test]
    fn all_time_aggregates_days() {
        let mut a = day();
        a.record_visitor(1, "x");
        a.update_peak(3);
        let mut b = DailyStats::empty(NaiveDate::from_ymd_opt(2026, 10, 15).unwrap());
        b.record_visitor(2, "y");
        b.record_visitor(2, "z");
        b.record_order(2);
        b.update_peak(7);
        let all = AllTimeStats::from_days([&a, &b]);
        assert_eq!(all.total_visitors, 3);
        assert_eq!(all.total_unique_visitors, 3);
        assert_eq!(all.total_orders, 1);
        assert_eq!(all.max_peak_visitors, 7);
    }
}
