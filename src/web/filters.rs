use std::convert::Infallible;

use warp::{reject::Rejection, Filter};

use crate::core::avatar::MAX_AVATAR_BYTES;
use crate::web::handlers;
use crate::AppContext;

pub fn with_context(
    ctx: AppContext,
) -> impl Filter<Extract = (AppContext,), Error = Infallible> + Clone {
    warp::any().map(move || ctx.clone())
}

fn registration_filters(
    ctx: AppContext,
) -> impl Filter<Extract = (impl warp::Reply,), Error = Rejection> + Clone {
    let register = warp::path!("api" / "register")
        .and(warp::post())
        .and(warp::body::json())
        .and(with_context(ctx.clone()))
        .and_then(handlers::register);

    let roster = warp::path!("api" / "participants")
        .and(warp::get())
        .and(with_context(ctx))
        .and_then(handlers::roster_page);

    register.or(roster)
}

fn donation_filters(
    ctx: AppContext,
) -> impl Filter<Extract = (impl warp::Reply,), Error = Rejection> + Clone {
    let add_donation = warp::path!("api" / "donations")
        .and(warp::post())
        .and(warp::body::json())
        .and(with_context(ctx.clone()))
        .and_then(handlers::add_donation);

    let donations = warp::path!("api" / "donations")
        .and(warp::get())
        .and(with_context(ctx))
        .and_then(handlers::donations_page);

    add_donation.or(donations)
}

fn avatar_filters(
    ctx: AppContext,
) -> impl Filter<Extract = (impl warp::Reply,), Error = Rejection> + Clone {
    // The size gate lives in the upload state machine; the body limit just
    // keeps abusive payloads from being buffered whole.
    let upload = warp::path!("api" / "avatar")
        .and(warp::post())
        .and(warp::header::optional::<String>("content-type"))
        .and(warp::body::content_length_limit(
            MAX_AVATAR_BYTES as u64 + 1024,
        ))
        .and(warp::body::bytes())
        .and(with_context(ctx.clone()))
        .and_then(handlers::upload_avatar);

    let update = warp::path!("api" / "avatar")
        .and(warp::put())
        .and(warp::body::json())
        .and(with_context(ctx))
        .and_then(handlers::update_avatar);

    upload.or(update)
}

pub fn api_filters(
    ctx: AppContext,
) -> impl Filter<Extract = (impl warp::Reply,), Error = Rejection> + Clone {
    registration_filters(ctx.clone())
        .or(donation_filters(ctx.clone()))
        .or(avatar_filters(ctx))
}
