//! Live dashboard statistics
//!
//! Recomputed from the current collections after every change. Day-sized
//! data keeps a full fold cheap, so nothing is cached incrementally.

use spadesk_api::{DashboardStats, Session, SessionStatus, Therapist, WalkOut};
use spadesk_util::{Money, TherapistId};

/// Fold sessions, roster expenses and walk-outs into the dashboard summary.
///
/// Billable sessions (in progress or completed) contribute their price,
/// payout and discount independently. Each session's shop share is clamped
/// at zero before summing, therapist purchases are added on top, and the
/// total is clamped again.
pub fn compute_stats(
    sessions: &[Session],
    therapists: &[Therapist],
    walk_outs: &[WalkOut],
) -> DashboardStats {
    let mut stats = DashboardStats::default();
    let mut shop_share = Money::ZERO;

    for session in sessions.iter().filter(|s| s.is_billable()) {
        stats.total_revenue += session.total_price;
        stats.total_payouts += session.lady_payout;
        stats.total_discounts += session.discount;
        shop_share += session.shop_share_after_discount();

        match session.status {
            SessionStatus::Completed => stats.completed_sessions += 1,
            SessionStatus::InProgress => stats.active_sessions += 1,
            _ => {}
        }
    }

    stats.total_expenses = therapists.iter().map(Therapist::total_expenses).sum();
    stats.shop_revenue = (shop_share + stats.total_expenses).clamp_zero();
    // Hydrated rows are not bounded like desk entries
    stats.walk_out_count = walk_outs
        .iter()
        .map(WalkOut::customers)
        .fold(0u32, u32::saturating_add);
    stats.therapists_on_duty = therapists
        .iter()
        .filter(|t| t.status.is_on_duty())
        .count() as u32;

    stats
}

/// Split a session's payout between its therapists. Shares are equal in
/// minor units; the remainder goes to the first therapist.
pub fn payout_shares(session: &Session) -> Vec<(TherapistId, Money)> {
    let n = session.therapist_ids.len() as i64;
    if n == 0 {
        return Vec::new();
    }

    let total = session.lady_payout.minor();
    let share = total / n;
    let remainder = total - share * n;

    session
        .therapist_ids
        .iter()
        .enumerate()
        .map(|(i, id)| {
            let amount = if i == 0 { share + remainder } else { share };
            (id.clone(), Money::from_minor(amount))
        })
        .collect()
}
