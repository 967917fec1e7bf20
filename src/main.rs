use std::sync::Arc;

use clap::Parser;
use tokio::sync::mpsc;

use crate::core::settings::Settings;
use crate::core::store::{BlobBackend, TripStore};
use crate::core::sync::{self, ListFeeds};
use crate::integrations::supabase::{run_realtime_feed, SupabaseClient};

mod core;
mod error;
mod integrations;
mod web;

#[derive(Parser, Debug)]
#[command(name = "TripDesk")]
#[command(version = "0.1")]
#[command(about = "A registration and donation tracker for group trips.", long_about = None)]
struct Args {
    /// Port for the web interface, overriding TRIPDESK_PORT.
    #[arg(short, long)]
    port: Option<u16>,
}

/// Handles shared across the web layer.
///
/// Constructed once at process start and never torn down before shutdown.
/// `store` and `blobs` are `None` while the backend connection is
/// unconfigured, which flips every data endpoint into setup-required mode.
#[derive(Clone)]
pub struct AppContext {
    pub settings: Arc<Settings>,
    pub store: Option<TripStore>,
    pub blobs: Option<Arc<dyn BlobBackend>>,
    pub feeds: ListFeeds,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();

    let args = Args::parse();
    let mut settings = Settings::from_env();
    if args.port.is_some() {
        settings.web_port = args.port;
    }
    let settings = Arc::new(settings);

    let (event_tx, event_rx) = mpsc::unbounded_channel();

    let (store, blobs) = if settings.is_configured() {
        let client = Arc::new(SupabaseClient::new(&settings)?);
        tokio::spawn(run_realtime_feed(settings.clone(), event_tx));
        (
            Some(TripStore::new(client.clone())),
            Some(client as Arc<dyn BlobBackend>),
        )
    } else {
        log::warn!(
            "SUPABASE_URL / SUPABASE_ANON_KEY are not set, running in setup-required mode"
        );
        (None, None)
    };

    let feeds = sync::spawn(store.clone(), event_rx);

    log::info!("TripDesk initialized");
    web::run_http_server(AppContext {
        settings,
        store,
        blobs,
        feeds,
    })
    .await
}
