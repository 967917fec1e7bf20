use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::core::donation::{Donation, DonationForm};
use crate::core::participant::{Participant, Registration};
use crate::error::Error;

/// The two tables TripDesk watches.
#[derive(PartialEq, Eq, Hash, Debug, Clone, Copy)]
pub enum Table {
    Participants,
    Donations,
}

impl Table {
    pub fn name(&self) -> &'static str {
        match self {
            Table::Participants => "participants",
            Table::Donations => "donations",
        }
    }
}

/// Sort order for a select.
#[derive(Debug, Clone, Copy)]
pub struct Order {
    pub column: &'static str,
    pub ascending: bool,
}

/// Row operations of the hosted backend. Injected into [`TripStore`] so the
/// data layer can be exercised without a network.
#[async_trait]
pub trait RowBackend: Send + Sync {
    async fn insert(&self, table: Table, row: Value) -> Result<(), Error>;

    async fn select(&self, table: Table, columns: &str, order: Order) -> Result<Vec<Value>, Error>;

    /// Patch the row matched by `id`; fields absent from `patch` are left
    /// untouched.
    async fn update(&self, table: Table, id: &str, patch: Value) -> Result<(), Error>;
}

/// Object storage side of the backend, used for participant photos.
#[async_trait]
pub trait BlobBackend: Send + Sync {
    async fn upload(&self, path: &str, bytes: Vec<u8>, content_type: &str) -> Result<(), Error>;

    /// Publicly fetchable URL for an uploaded path.
    fn public_url(&self, path: &str) -> String;
}

/// Column list fetched for the roster, matching what the pages render.
const PARTICIPANT_COLUMNS: &str =
    "id,full_name,number_of_guests,payment_status,amount_paid,created_at,avatar_url,email,phone_number";

/// The data access layer: five independent row operations over two tables.
/// No batching, no transactions, no retries; each call is one request and
/// each failure carries the backend's message verbatim.
#[derive(Clone)]
pub struct TripStore {
    rows: Arc<dyn RowBackend>,
}

impl TripStore {
    pub fn new(rows: Arc<dyn RowBackend>) -> Self {
        TripStore { rows }
    }

    /// Insert one participant row from an accepted registration.
    pub async fn register_participant(&self, registration: &Registration) -> Result<(), Error> {
        log::debug!("Registering participant {}", registration.full_name);
        self.rows
            .insert(Table::Participants, serde_json::to_value(registration)?)
            .await
    }

    /// All participants, oldest registration first.
    pub async fn participants(&self) -> Result<Vec<Participant>, Error> {
        let rows = self
            .rows
            .select(
                Table::Participants,
                PARTICIPANT_COLUMNS,
                Order {
                    column: "created_at",
                    ascending: true,
                },
            )
            .await?;

        serde_json::from_value(Value::Array(rows))
            .map_err(|e| Error::BadRow(Table::Participants.name().to_string(), e))
    }

    /// Insert one donation row, attaching the chosen participant's id and
    /// denormalized name to the validated form.
    pub async fn add_donation(
        &self,
        participant_id: &str,
        participant_name: &str,
        form: &DonationForm,
    ) -> Result<(), Error> {
        log::debug!(
            "Adding donation of {} {} from {}",
            form.quantity,
            form.item_name,
            participant_name
        );

        let mut row = serde_json::to_value(form)?;
        let fields = row.as_object_mut().expect("donation form is an object");
        fields.insert("participant_id".to_string(), participant_id.into());
        fields.insert("participant_name".to_string(), participant_name.into());

        self.rows.insert(Table::Donations, row).await
    }

    /// All donations, newest first.
    pub async fn donations(&self) -> Result<Vec<Donation>, Error> {
        let rows = self
            .rows
            .select(
                Table::Donations,
                "*",
                Order {
                    column: "created_at",
                    ascending: false,
                },
            )
            .await?;

        serde_json::from_value(Value::Array(rows))
            .map_err(|e| Error::BadRow(Table::Donations.name().to_string(), e))
    }

    /// Set the avatar URL of one participant. Re-applying the same URL is a
    /// no-op in effect, which the lazy backfill relies on.
    pub async fn update_participant_avatar(&self, id: &str, avatar_url: &str) -> Result<(), Error> {
        self.rows
            .update(
                Table::Participants,
                id,
                serde_json::json!({ "avatar_url": avatar_url }),
            )
            .await
    }
}
