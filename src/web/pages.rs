use std::collections::HashSet;

use serde::Serialize;

use crate::core::donation::Donation;
use crate::core::participant::{Participant, PaymentStatus};

/// Trip cost per guest, in KSh.
pub const TRIP_COST_KSH: f64 = 1500.0;

/// Headline numbers for the roster page.
#[derive(PartialEq, Debug, Serialize)]
pub struct RosterStats {
    pub participant_count: usize,
    pub total_guests: u32,
    /// KSh collected across all registrations.
    pub amount_collected: f64,
    /// KSh due if every registered guest pays the full trip cost.
    pub expected_amount: f64,
    pub paid: usize,
    pub partial: usize,
    pub pending: usize,
}

pub fn roster_stats(participants: &[Participant]) -> RosterStats {
    let mut stats = RosterStats {
        participant_count: participants.len(),
        total_guests: 0,
        amount_collected: 0.0,
        expected_amount: 0.0,
        paid: 0,
        partial: 0,
        pending: 0,
    };

    for participant in participants {
        stats.total_guests += participant.number_of_guests;
        stats.amount_collected += participant.amount_paid;
        stats.expected_amount += participant.number_of_guests as f64 * TRIP_COST_KSH;
        match participant.payment_status {
            PaymentStatus::Paid => stats.paid += 1,
            PaymentStatus::Partial => stats.partial += 1,
            PaymentStatus::Pending => stats.pending += 1,
        }
    }

    stats
}

/// Headline numbers for the donations page.
#[derive(PartialEq, Debug, Serialize)]
pub struct DonationStats {
    pub total_donations: usize,
    pub unique_donors: usize,
}

pub fn donation_stats(donations: &[Donation]) -> DonationStats {
    let donors: HashSet<&str> = donations
        .iter()
        .map(|d| d.participant_id.as_str())
        .collect();

    DonationStats {
        total_donations: donations.len(),
        unique_donors: donors.len(),
    }
}

/// The roster page: list plus stats, with the last fetch error (if any)
/// rendered next to the retained list.
#[derive(Serialize)]
pub struct RosterPage {
    pub participants: Vec<Participant>,
    pub stats: RosterStats,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// The donations page: donation list (newest first), the roster for the
/// donor picker, and stats.
#[derive(Serialize)]
pub struct DonationsPage {
    pub donations: Vec<Donation>,
    pub participants: Vec<Participant>,
    pub stats: DonationStats,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}
