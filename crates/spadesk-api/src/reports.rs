//! Derived views: live dashboard stats and closing reports

use chrono::{DateTime, Local, NaiveDate};
use serde::{Deserialize, Serialize};
use spadesk_util::{Money, ServiceId, TherapistId};
use std::time::Duration;

use crate::WalkOutReason;

/// Flat summary recomputed from the current collections
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DashboardStats {
    /// Σ total_price over billable sessions (post discount)
    pub total_revenue: Money,
    /// Σ fixed lady payout, unaffected by discounts
    pub total_payouts: Money,
    pub total_discounts: Money,
    /// Shop share net of discounts plus therapist purchases, never negative
    pub shop_revenue: Money,
    /// Therapist purchases from the shop
    pub total_expenses: Money,
    pub completed_sessions: u32,
    pub active_sessions: u32,
    /// Σ walk-out counts (batched entries count individually)
    pub walk_out_count: u32,
    pub therapists_on_duty: u32,
}

/// One therapist's line on the closing sheet
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TherapistLine {
    pub therapist_id: TherapistId,
    pub name: String,
    pub sessions: u32,
    pub gross_payout: Money,
    pub expenses: Money,
    /// Payout after shop purchases; negative means the therapist owes the shop
    pub net_payout: Money,
    pub working_time: Duration,
}

/// Sales of one catalog entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceLine {
    pub service_id: ServiceId,
    pub name: String,
    pub sessions: u32,
    pub revenue: Money,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalkOutLine {
    pub reason: WalkOutReason,
    pub count: u32,
}

/// End-of-day closing report
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClosingReport {
    pub business_day: NaiveDate,
    pub closed_at: DateTime<Local>,
    pub totals: DashboardStats,
    pub cancelled_sessions: u32,
    pub no_show_sessions: u32,
    pub therapists: Vec<TherapistLine>,
    pub services: Vec<ServiceLine>,
    pub walk_outs: Vec<WalkOutLine>,
    /// Sessions still running when the report was generated
    pub unfinished_sessions: u32,
}

/// One day's line in a monthly report
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DayLine {
    pub business_day: NaiveDate,
    pub total_revenue: Money,
    pub total_payouts: Money,
    pub shop_revenue: Money,
    pub sessions: u32,
    pub walk_outs: u32,
}

/// Month-to-date roll-up of saved closing reports
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonthlyReport {
    pub year: i32,
    pub month: u32,
    pub days: Vec<DayLine>,
    pub total_revenue: Money,
    pub total_payouts: Money,
    pub total_discounts: Money,
    pub shop_revenue: Money,
    pub total_expenses: Money,
    pub sessions: u32,
    pub walk_outs: u32,
}
