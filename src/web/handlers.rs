use std::convert::Infallible;

use serde::{Deserialize, Serialize};
use warp::hyper::body::Bytes;
use warp::reply::{Json, WithStatus};

use crate::core::avatar::{self, AvatarUpload, REGISTRATION_AVATAR_SIZE};
use crate::core::validate::{validate_donation, validate_registration, DonationInput, RegistrationInput};
use crate::web::pages::{donation_stats, roster_stats, DonationsPage, RosterPage};
use crate::AppContext;

/// Notice shown by every data endpoint while the backend is unconfigured.
const SETUP_REQUIRED: &str = "Database connection not configured. Please contact the organizer.";

fn json_reply<T: Serialize>(value: &T, status: warp::http::StatusCode) -> WithStatus<Json> {
    warp::reply::with_status(warp::reply::json(value), status)
}

fn setup_required() -> WithStatus<Json> {
    json_reply(
        &serde_json::json!({ "success": false, "error": SETUP_REQUIRED }),
        warp::http::StatusCode::SERVICE_UNAVAILABLE,
    )
}

fn submit_ok() -> WithStatus<Json> {
    json_reply(
        &serde_json::json!({ "success": true }),
        warp::http::StatusCode::OK,
    )
}

/// One failed backend call: the message is surfaced verbatim next to the
/// triggering form, nothing is retried.
fn submit_failed(error: &crate::error::Error) -> WithStatus<Json> {
    log::warn!("{}", error);
    json_reply(
        &serde_json::json!({ "success": false, "error": error.to_string() }),
        warp::http::StatusCode::INTERNAL_SERVER_ERROR,
    )
}

fn field_errors(errors: &crate::core::validate::FieldErrors) -> WithStatus<Json> {
    json_reply(
        &serde_json::json!({ "success": false, "errors": errors }),
        warp::http::StatusCode::UNPROCESSABLE_ENTITY,
    )
}

/// Handle a registration submission: validate, apply the avatar policy,
/// insert one row.
pub async fn register(
    input: RegistrationInput,
    ctx: AppContext,
) -> Result<WithStatus<Json>, Infallible> {
    let Some(store) = &ctx.store else {
        return Ok(setup_required());
    };

    let mut registration = match validate_registration(&input) {
        Ok(registration) => registration,
        Err(errors) => return Ok(field_errors(&errors)),
    };

    // No uploaded photo: fall back to the generated placeholder.
    if registration.avatar_url.is_none() {
        registration.avatar_url = Some(avatar::placeholder_url(
            &registration.full_name,
            REGISTRATION_AVATAR_SIZE,
        ));
    }

    match store.register_participant(&registration).await {
        Ok(()) => {
            log::info!("Registered participant {}", registration.full_name);
            Ok(submit_ok())
        }
        Err(e) => Ok(submit_failed(&e)),
    }
}

/// A donation submission: the donor pair picked from the loaded roster plus
/// the raw form fields.
#[derive(Debug, Deserialize)]
pub struct DonationRequest {
    pub participant_id: String,
    pub participant_name: String,
    #[serde(flatten)]
    pub form: DonationInput,
}

pub async fn add_donation(
    request: DonationRequest,
    ctx: AppContext,
) -> Result<WithStatus<Json>, Infallible> {
    let Some(store) = &ctx.store else {
        return Ok(setup_required());
    };

    let form = match validate_donation(&request.form) {
        Ok(form) => form,
        Err(errors) => return Ok(field_errors(&errors)),
    };

    match store
        .add_donation(&request.participant_id, &request.participant_name, &form)
        .await
    {
        Ok(()) => Ok(submit_ok()),
        Err(e) => Ok(submit_failed(&e)),
    }
}

/// The roster page. Served from the bridge's last-good list; participants
/// without a stored photo render the generated URL, which is persisted in
/// the background.
pub async fn roster_page(ctx: AppContext) -> Result<WithStatus<Json>, Infallible> {
    if ctx.store.is_none() {
        return Ok(setup_required());
    }

    let participants = ctx.feeds.participants.borrow().clone();
    let error = ctx.feeds.errors.borrow().participants.clone();

    let (participants, pending) = avatar::resolve_display_avatars(participants);
    if let Some(store) = &ctx.store {
        avatar::spawn_backfill(store.clone(), pending);
    }

    let page = RosterPage {
        stats: roster_stats(&participants),
        participants,
        error,
    };
    Ok(json_reply(&page, warp::http::StatusCode::OK))
}

/// The donations page: newest-first donations plus the roster for the donor
/// picker.
pub async fn donations_page(ctx: AppContext) -> Result<WithStatus<Json>, Infallible> {
    if ctx.store.is_none() {
        return Ok(setup_required());
    }

    let donations = ctx.feeds.donations.borrow().clone();
    let participants = ctx.feeds.participants.borrow().clone();
    let errors = ctx.feeds.errors.borrow().clone();

    let page = DonationsPage {
        stats: donation_stats(&donations),
        donations,
        participants,
        error: errors.donations.or(errors.participants),
    };
    Ok(json_reply(&page, warp::http::StatusCode::OK))
}

/// Run the upload sub-flow for a photo: validate the file, push it to
/// object storage, answer with the public URL.
pub async fn upload_avatar(
    content_type: Option<String>,
    body: Bytes,
    ctx: AppContext,
) -> Result<WithStatus<Json>, Infallible> {
    let Some(blobs) = &ctx.blobs else {
        return Ok(setup_required());
    };

    let content_type = content_type.unwrap_or_default();
    let mut upload = AvatarUpload::new();

    if let Err(message) = upload.select_file(&content_type, body.to_vec()) {
        return Ok(json_reply(
            &serde_json::json!({ "error": message }),
            warp::http::StatusCode::BAD_REQUEST,
        ));
    }

    match upload.upload(blobs.as_ref()).await {
        Ok(url) => Ok(json_reply(
            &serde_json::json!({ "url": url }),
            warp::http::StatusCode::OK,
        )),
        Err(_) => Ok(json_reply(
            &serde_json::json!({ "error": "Failed to upload avatar. Please try again." }),
            warp::http::StatusCode::INTERNAL_SERVER_ERROR,
        )),
    }
}

/// A Json struct to point a participant at a new photo URL
#[derive(Debug, Deserialize)]
pub struct AvatarUpdate {
    pub id: String,
    pub avatar_url: String,
}

pub async fn update_avatar(
    update: AvatarUpdate,
    ctx: AppContext,
) -> Result<WithStatus<Json>, Infallible> {
    let Some(store) = &ctx.store else {
        return Ok(setup_required());
    };

    match store
        .update_participant_avatar(&update.id, &update.avatar_url)
        .await
    {
        Ok(()) => Ok(submit_ok()),
        Err(e) => Ok(submit_failed(&e)),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use serde_json::Value;
    use warp::Reply;

    use super::*;
    use crate::core::store::memory::MemoryBackend;
    use crate::core::store::{Table, TripStore};
    use crate::core::sync::SyncBridge;
    use crate::core::settings::Settings;

    async fn reply_json(reply: WithStatus<Json>) -> (u16, Value) {
        let response = reply.into_response();
        let status = response.status().as_u16();
        let bytes = warp::hyper::body::to_bytes(response.into_body()).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    fn context(backend: Arc<MemoryBackend>) -> (AppContext, SyncBridge) {
        let store = TripStore::new(backend.clone());
        let (bridge, feeds) = SyncBridge::new(store.clone());
        (
            AppContext {
                settings: Arc::new(Settings::default()),
                store: Some(store),
                blobs: Some(backend),
                feeds,
            },
            bridge,
        )
    }

    fn unconfigured_context() -> AppContext {
        let (_bridge, feeds) = SyncBridge::new(TripStore::new(Arc::new(MemoryBackend::default())));
        AppContext {
            settings: Arc::new(Settings::default()),
            store: None,
            blobs: None,
            feeds,
        }
    }

    fn registration_input(name: &str) -> RegistrationInput {
        RegistrationInput {
            full_name: name.to_string(),
            phone_number: "0712345678".to_string(),
            email: "jane@example.com".to_string(),
            number_of_guests: Some(2),
            payment_status: Some("pending".to_string()),
            amount_paid: Some(500.0),
            avatar_url: None,
        }
    }

    #[tokio::test]
    async fn test_register_without_photo_stores_placeholder() {
        let backend = Arc::new(MemoryBackend::default());
        let (ctx, _bridge) = context(backend.clone());

        let (status, body) = reply_json(
            register(registration_input("Jane Doe"), ctx).await.unwrap(),
        )
        .await;
        assert_eq!(status, 200);
        assert_eq!(body["success"], true);

        let rows = backend.rows(Table::Participants);
        assert_eq!(rows.len(), 1);
        assert_eq!(
            rows[0]["avatar_url"].as_str().unwrap(),
            avatar::placeholder_url("Jane Doe", REGISTRATION_AVATAR_SIZE)
        );
        // pending registration: submitted amount is discarded
        assert_eq!(rows[0]["amount_paid"], 0.0);
    }

    #[tokio::test]
    async fn test_register_rejects_invalid_input_before_the_network() {
        let backend = Arc::new(MemoryBackend::default());
        let (ctx, _bridge) = context(backend.clone());

        let mut input = registration_input("Jane Doe");
        input.phone_number = "12345".to_string();

        let (status, body) = reply_json(register(input, ctx).await.unwrap()).await;
        assert_eq!(status, 422);
        assert_eq!(
            body["errors"]["phone_number"],
            "Please enter a valid Kenyan phone number"
        );
        assert!(backend.rows(Table::Participants).is_empty());
    }

    #[tokio::test]
    async fn test_unconfigured_backend_yields_setup_notice() {
        let ctx = unconfigured_context();

        let (status, body) =
            reply_json(register(registration_input("Jane Doe"), ctx.clone()).await.unwrap()).await;
        assert_eq!(status, 503);
        assert_eq!(body["error"], SETUP_REQUIRED);

        let (status, _) = reply_json(roster_page(ctx).await.unwrap()).await;
        assert_eq!(status, 503);
    }

    #[tokio::test]
    async fn test_donation_flow_lands_newest_first() {
        let backend = Arc::new(MemoryBackend::default());
        let (ctx, bridge) = context(backend.clone());

        reply_json(register(registration_input("Jane Doe"), ctx.clone()).await.unwrap()).await;
        bridge.mark_stale(Table::Participants);
        bridge.reconcile().await;
        let donor = ctx.feeds.participants.borrow()[0].clone();

        for item in ["First aid kit", "Water bottles"] {
            let request = DonationRequest {
                participant_id: donor.id.clone(),
                participant_name: donor.full_name.clone(),
                form: DonationInput {
                    item_name: item.to_string(),
                    quantity: Some(24),
                    description: Some(String::new()),
                },
            };
            let (status, _) = reply_json(add_donation(request, ctx.clone()).await.unwrap()).await;
            assert_eq!(status, 200);
        }

        bridge.mark_stale(Table::Donations);
        bridge.reconcile().await;

        let (status, body) = reply_json(donations_page(ctx).await.unwrap()).await;
        assert_eq!(status, 200);
        assert_eq!(body["donations"][0]["item_name"], "Water bottles");
        assert_eq!(body["donations"][0]["participant_name"], "Jane Doe");
        assert_eq!(body["stats"]["total_donations"], 2);
        assert_eq!(body["stats"]["unique_donors"], 1);
    }

    #[tokio::test]
    async fn test_roster_page_backfills_missing_avatars() {
        let backend = Arc::new(MemoryBackend::default());
        let (ctx, bridge) = context(backend.clone());

        // Row inserted without any avatar, as if it predated the policy.
        let store = ctx.store.clone().unwrap();
        store
            .register_participant(&crate::core::participant::Registration {
                full_name: "John Doe".to_string(),
                phone_number: "0712345678".to_string(),
                email: "john@example.com".to_string(),
                number_of_guests: 1,
                payment_status: Default::default(),
                amount_paid: 0.0,
                avatar_url: None,
            })
            .await
            .unwrap();
        bridge.mark_stale(Table::Participants);
        bridge.reconcile().await;

        let expected = avatar::placeholder_url("John Doe", avatar::LIST_AVATAR_SIZE);
        let (status, body) = reply_json(roster_page(ctx).await.unwrap()).await;
        assert_eq!(status, 200);
        assert_eq!(body["participants"][0]["avatar_url"], expected.as_str());

        // The computed URL is persisted in the background.
        let mut persisted = false;
        for _ in 0..50 {
            tokio::time::sleep(Duration::from_millis(10)).await;
            let rows = backend.rows(Table::Participants);
            if rows[0]["avatar_url"].as_str() == Some(expected.as_str()) {
                persisted = true;
                break;
            }
        }
        assert!(persisted, "backfill did not persist the placeholder URL");
    }

    #[tokio::test]
    async fn test_upload_avatar_rejects_wrong_type_without_network() {
        let backend = Arc::new(MemoryBackend::default());
        let (ctx, _bridge) = context(backend.clone());

        let (status, body) = reply_json(
            upload_avatar(
                Some("application/pdf".to_string()),
                Bytes::from_static(b"%PDF"),
                ctx,
            )
            .await
            .unwrap(),
        )
        .await;
        assert_eq!(status, 400);
        assert_eq!(body["error"], "Please upload an image file");
        assert!(backend.uploads.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_upload_avatar_returns_public_url() {
        let backend = Arc::new(MemoryBackend::default());
        let (ctx, _bridge) = context(backend.clone());

        let (status, body) = reply_json(
            upload_avatar(
                Some("image/png".to_string()),
                Bytes::from_static(&[1, 2, 3]),
                ctx,
            )
            .await
            .unwrap(),
        )
        .await;
        assert_eq!(status, 200);
        assert!(body["url"]
            .as_str()
            .unwrap()
            .starts_with("https://storage.test/public/avatars/"));
    }
}
