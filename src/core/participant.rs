use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Payment state of a registration.
///
/// Stored in lowercase in the `participants` table; every consumer matches
/// exhaustively so a new state cannot be half-handled.
#[derive(PartialEq, Eq, Debug, Clone, Copy, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    #[default]
    Pending,
    Partial,
    Paid,
}

impl PaymentStatus {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(PaymentStatus::Pending),
            "partial" => Some(PaymentStatus::Partial),
            "paid" => Some(PaymentStatus::Paid),
            _ => None,
        }
    }
}

/// A struct representing a registered trip attendee
#[derive(PartialEq, Debug, Clone, Serialize, Deserialize)]
pub struct Participant {
    /// Unique participant ID, assigned by the backend
    pub id: String,

    /// The name this participant registered under
    pub full_name: String,

    /// Kenyan mobile number used for trip updates
    pub phone_number: String,

    pub email: String,

    /// Group size including the registrant, 1..=10
    pub number_of_guests: u32,

    pub payment_status: PaymentStatus,

    /// Amount collected so far, in KSh. Always 0 while payment is pending.
    #[serde(default)]
    pub amount_paid: f64,

    /// Public photo URL; filled lazily with a generated placeholder when the
    /// registrant did not upload one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar_url: Option<String>,

    pub created_at: DateTime<Utc>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

/// An accepted registration, produced by validation and inserted as one row.
/// The backend assigns `id` and `created_at`.
#[derive(PartialEq, Debug, Clone, Serialize)]
pub struct Registration {
    pub full_name: String,
    pub phone_number: String,
    pub email: String,
    pub number_of_guests: u32,
    pub payment_status: PaymentStatus,
    pub amount_paid: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avatar_url: Option<String>,
}
