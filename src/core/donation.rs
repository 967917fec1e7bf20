use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A struct representing an in-kind donation pledged for the trip
#[derive(PartialEq, Debug, Clone, Serialize, Deserialize)]
pub struct Donation {
    /// Unique donation ID, assigned by the backend
    pub id: String,

    /// The participant this donation came from
    pub participant_id: String,

    /// Copy of the participant's name at submission time, so the list
    /// renders without a join
    pub participant_name: String,

    pub item_name: String,

    /// Number of items pledged, 1..=100
    pub quantity: u32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    pub created_at: DateTime<Utc>,
}

/// An accepted donation form, produced by validation. The identifying
/// participant pair is attached by the store at insert time.
#[derive(PartialEq, Debug, Clone, Serialize)]
pub struct DonationForm {
    pub item_name: String,
    pub quantity: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}
