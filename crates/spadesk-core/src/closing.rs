//! End-of-day and monthly reports

use chrono::{DateTime, Datelike, Local, NaiveDate};
use spadesk_api::{
    ClosingReport, DayLine, MonthlyReport, ServiceLine, SessionStatus, TherapistLine, WalkOutLine,
};
use spadesk_util::{AppError, Money, Result, ServiceId, TherapistId};
use std::collections::BTreeMap;

use crate::{DeskState, compute_stats, payout_shares};

/// Closing sheet for the state's business day.
///
/// Therapists appear if they checked in, served a session or bought from
/// the shop, in roster order. Services are listed by revenue.
pub fn closing_report(state: &DeskState, now: DateTime<Local>) -> ClosingReport {
    let totals = compute_stats(&state.sessions, &state.therapists, &state.walk_outs);
    let billable: Vec<_> = state.sessions.iter().filter(|s| s.is_billable()).collect();

    let mut payouts: BTreeMap<TherapistId, (u32, Money)> = BTreeMap::new();
    for session in &billable {
        for (id, share) in payout_shares(session) {
            let entry = payouts.entry(id).or_insert((0, Money::ZERO));
            entry.0 += 1;
            entry.1 += share;
        }
    }

    let therapists = state
        .therapists
        .iter()
        .filter(|t| {
            t.check_in_at.is_some() || !t.expenses.is_empty() || payouts.contains_key(&t.id)
        })
        .map(|t| {
            let (sessions, gross_payout) = payouts.get(&t.id).copied().unwrap_or((0, Money::ZERO));
            let expenses = t.total_expenses();
            TherapistLine {
                therapist_id: t.id.clone(),
                name: t.name.clone(),
                sessions,
                gross_payout,
                expenses,
                net_payout: gross_payout - expenses,
                working_time: t.working_time(&now),
            }
        })
        .collect();

    let mut by_service: BTreeMap<ServiceId, (u32, Money)> = BTreeMap::new();
    for session in &billable {
        let entry = by_service
            .entry(session.service_id.clone())
            .or_insert((0, Money::ZERO));
        entry.0 += 1;
        entry.1 += session.total_price;
    }
    let mut services: Vec<ServiceLine> = by_service
        .into_iter()
        .map(|(service_id, (sessions, revenue))| ServiceLine {
            name: state
                .service(&service_id)
                .map(|s| s.name.clone())
                .unwrap_or_else(|| service_id.to_string()),
            service_id,
            sessions,
            revenue,
        })
        .collect();
    services.sort_by(|a, b| b.revenue.cmp(&a.revenue).then_with(|| a.name.cmp(&b.name)));

    let mut by_reason = BTreeMap::new();
    for walk_out in &state.walk_outs {
        let count = by_reason.entry(walk_out.reason).or_insert(0u32);
        *count = count.saturating_add(walk_out.customers());
    }
    let walk_outs = by_reason
        .into_iter()
        .map(|(reason, count)| WalkOutLine { reason, count })
        .collect();

    let count_status = |status: SessionStatus| {
        state.sessions.iter().filter(|s| s.status == status).count() as u32
    };

    ClosingReport {
        business_day: state.business_day,
        closed_at: now,
        cancelled_sessions: count_status(SessionStatus::Cancelled),
        no_show_sessions: count_status(SessionStatus::NoShow),
        unfinished_sessions: totals.active_sessions,
        totals,
        therapists,
        services,
        walk_outs,
    }
}

/// First and last day of a calendar month
pub fn month_bounds(year: i32, month: u32) -> Result<(NaiveDate, NaiveDate)> {
    let first = NaiveDate::from_ymd_opt(year, month, 1)
        .ok_or_else(|| AppError::validation(format!("Invalid month: {}-{:02}", year, month)))?;
    let next = if month == 12 {
        NaiveDate::from_ymd_opt(year + 1, 1, 1)
    } else {
        NaiveDate::from_ymd_opt(year, month + 1, 1)
    }
    .ok_or_else(|| AppError::validation(format!("Invalid month: {}-{:02}", year, month)))?;

    let last = next.pred_opt().unwrap_or(first);
    Ok((first, last))
}

/// Roll daily closing reports up into a month. Reports outside the month
/// are ignored; a day reported twice keeps the later report.
pub fn monthly_report(year: i32, month: u32, reports: &[ClosingReport]) -> MonthlyReport {
    let mut days: BTreeMap<NaiveDate, &ClosingReport> = BTreeMap::new();
    for report in reports
        .iter()
        .filter(|r| r.business_day.year() == year && r.business_day.month() == month)
    {
        match days.get(&report.business_day) {
            Some(existing) if existing.closed_at > report.closed_at => {}
            _ => {
                days.insert(report.business_day, report);
            }
        }
    }

    let mut monthly = MonthlyReport {
        year,
        month,
        days: Vec::with_capacity(days.len()),
        total_revenue: Money::ZERO,
        total_payouts: Money::ZERO,
        total_discounts: Money::ZERO,
        shop_revenue: Money::ZERO,
        total_expenses: Money::ZERO,
        sessions: 0,
        walk_outs: 0,
    };

    for (business_day, report) in days {
        let t = &report.totals;
        let sessions = t.completed_sessions + t.active_sessions;

        monthly.total_revenue += t.total_revenue;
        monthly.total_payouts += t.total_payouts;
        monthly.total_discounts += t.total_discounts;
        monthly.shop_revenue += t.shop_revenue;
        monthly.total_expenses += t.total_expenses;
        monthly.sessions += sessions;
        monthly.walk_outs = monthly.walk_outs.saturating_add(t.walk_out_count);

        monthly.days.push(DayLine {
            business_day,
            total_revenue: t.total_revenue,
            total_payouts: t.total_payouts,
            shop_revenue: t.shop_revenue,
            sessions,
            walk_outs: t.walk_out_count,
        });
    }

    monthly
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests_support::{book, desk, noon};
    use crate::Action;
    use spadesk_api::{CompletionSource, ExpenseType, WalkOutReason, WalkOutRequest};
    use spadesk_util::{ExpenseId, WalkOutId};

    fn completed_day() -> DeskState {
        let mut state = desk();
        for (therapists, room, discount) in [(&["mai"][..], "room-1", 200), (&["noi"][..], "room-2", 0)] {
            let id = book(&mut state, "thai-60", therapists, room, discount);
            state
                .apply(Action::StartSession { session_id: id.clone() }, noon(), true)
                .unwrap();
            state
                .apply(
                    Action::CompleteSession {
                        session_id: id,
                        source: CompletionSource::Manual,
                    },
                    noon(),
                    true,
                )
                .unwrap();
        }

        state
            .apply(
                Action::AddExpense {
                    expense_id: ExpenseId::new(),
                    therapist_id: TherapistId::new("mai"),
                    amount: Money::major(50),
                    expense_type: ExpenseType::Drinks,
                    description: None,
                },
                noon(),
                true,
            )
            .unwrap();

        for (reason, count) in [(WalkOutReason::NoRooms, Some(2)), (WalkOutReason::NoRooms, None)] {
            state
                .apply(
                    Action::RecordWalkOut {
                        walk_out_id: WalkOutId::new(),
                        request: WalkOutRequest {
                            reason,
                            count,
                            therapist_ids: vec![],
                            service_id: None,
                            notes: None,
                        },
                    },
                    noon(),
                    true,
                )
                .unwrap();
        }
        state
    }

    #[test]
    fn closing_report_lines() {
        let state = completed_day();
        let report = closing_report(&state, noon());

        assert_eq!(report.totals.total_revenue, Money::major(1800));
        assert_eq!(report.totals.total_payouts, Money::major(800));
        // (600 - 200) + 600 + 50
        assert_eq!(report.totals.shop_revenue, Money::major(1050));
        assert_eq!(report.unfinished_sessions, 0);

        let mai = &report.therapists[0];
        assert_eq!(mai.name, "Mai");
        assert_eq!(mai.sessions, 1);
        assert_eq!(mai.gross_payout, Money::major(400));
        assert_eq!(mai.net_payout, Money::major(350));

        // Ploy never checked in
        assert_eq!(report.therapists.len(), 2);

        assert_eq!(report.services.len(), 1);
        assert_eq!(report.services[0].sessions, 2);
        assert_eq!(report.services[0].revenue, Money::major(1800));

        assert_eq!(
            report.walk_outs,
            vec![WalkOutLine {
                reason: WalkOutReason::NoRooms,
                count: 3
            }]
        );
    }

    #[test]
    fn month_bounds_handle_december() {
        let (first, last) = month_bounds(2025, 12).unwrap();
        assert_eq!(first, NaiveDate::from_ymd_opt(2025, 12, 1).unwrap());
        assert_eq!(last, NaiveDate::from_ymd_opt(2025, 12, 31).unwrap());

        let (_, feb) = month_bounds(2024, 2).unwrap();
        assert_eq!(feb.day(), 29);

        assert!(month_bounds(2025, 13).is_err());
    }

    #[test]
    fn monthly_rolls_up_days() {
        let state = completed_day();
        let day_one = closing_report(&state, noon());
        let mut day_two = day_one.clone();
        day_two.business_day = day_one.business_day.succ_opt().unwrap();

        let mut other_month = day_one.clone();
        other_month.business_day = NaiveDate::from_ymd_opt(2025, 4, 1).unwrap();

        let monthly = monthly_report(2025, 3, &[day_one, day_two, other_month]);
        assert_eq!(monthly.days.len(), 2);
        assert_eq!(monthly.total_revenue, Money::major(3600));
        assert_eq!(monthly.sessions, 4);
        assert_eq!(monthly.walk_outs, 6);
        assert!(monthly.days[0].business_day < monthly.days[1].business_day);
    }
}
