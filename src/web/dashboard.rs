use futures::{SinkExt, StreamExt};
use serde::Serialize;
use warp::{reject::Rejection, Filter};

use crate::core::avatar;
use crate::core::donation::Donation;
use crate::core::participant::Participant;
use crate::core::sync::SyncErrors;
use crate::web::filters::with_context;
use crate::web::pages::{donation_stats, roster_stats, DonationStats, RosterStats};
use crate::AppContext;

/// Struct for the page state that is sent over the state websocket
#[derive(Serialize, Debug)]
struct StateUpdate {
    participants: Vec<Participant>,
    roster: RosterStats,
    donations: Vec<Donation>,
    donation_summary: DonationStats,
    errors: SyncErrors,
}

/// Snapshot the current lists for one push. Rendering counts as a list
/// view, so missing photos get the generated URL and a background persist.
fn assemble_state_update(ctx: &AppContext) -> StateUpdate {
    let participants = ctx.feeds.participants.borrow().clone();
    let donations = ctx.feeds.donations.borrow().clone();
    let errors = ctx.feeds.errors.borrow().clone();

    let (participants, pending) = avatar::resolve_display_avatars(participants);
    if let Some(store) = &ctx.store {
        avatar::spawn_backfill(store.clone(), pending);
    }

    StateUpdate {
        roster: roster_stats(&participants),
        donation_summary: donation_stats(&donations),
        participants,
        donations,
        errors,
    }
}

/// Run the state websocket for a single client: one snapshot up front, then
/// a fresh snapshot whenever a watched list or the error state changes.
/// Clients replace their state wholesale; nothing is merged.
async fn run_state_websocket(socket: warp::ws::WebSocket, ctx: AppContext) {
    log::debug!("New state websocket connection opened");

    let (mut tx, _) = socket.split();
    let mut changes = crate::core::sync::change_stream(&ctx.feeds);

    loop {
        let update = assemble_state_update(&ctx);
        match serde_json::to_string(&update) {
            Ok(update) => {
                if let Err(e) = tx.send(warp::ws::Message::text(update)).await {
                    log::debug!("State websocket client went away: {}", e);
                    break;
                }
            }
            Err(e) => {
                log::error!("Failed to serialize state update: {}", e);
                break;
            }
        }

        if changes.next().await.is_none() {
            log::debug!("List feeds closed, ending state websocket");
            break;
        }
    }
}

pub fn websocket_filters(
    ctx: AppContext,
) -> impl Filter<Extract = (impl warp::Reply,), Error = Rejection> + Clone {
    warp::path!("api" / "state")
        .and(warp::ws())
        .and(with_context(ctx))
        .map(|ws: warp::ws::Ws, ctx: AppContext| {
            ws.on_upgrade(move |socket| run_state_websocket(socket, ctx))
        })
}
