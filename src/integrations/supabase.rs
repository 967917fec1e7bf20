use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use serde_json::Value;
use tokio::sync::mpsc::UnboundedSender;
use tokio::time::sleep;
use tokio_tungstenite::tungstenite::Message;
use url::Url;

use crate::core::settings::Settings;
use crate::core::store::{BlobBackend, Order, RowBackend, Table};
use crate::core::sync::{ChangeEvent, ChangeKind};
use crate::error::Error;

/// Storage bucket holding participant photos.
const AVATAR_BUCKET: &str = "participant-avatars";

/// Client for the hosted backend: PostgREST rows, object storage, and the
/// realtime change feed. Constructed once at startup and shared.
pub struct SupabaseClient {
    http: reqwest::Client,
    base_url: String,
}

impl SupabaseClient {
    pub fn new(settings: &Settings) -> Result<Self, Error> {
        let (Some(base_url), Some(api_key)) =
            (&settings.supabase_url, &settings.supabase_anon_key)
        else {
            return Err(Error::NotConfigured);
        };

        Url::parse(base_url)
            .map_err(|e| Error::Backend(format!("Invalid backend URL {}: {}", base_url, e)))?;

        let mut headers = HeaderMap::new();
        let key_value = HeaderValue::from_str(api_key)
            .map_err(|e| Error::Backend(format!("Invalid API key: {}", e)))?;
        headers.insert("apikey", key_value);
        let auth_value = HeaderValue::from_str(&format!("Bearer {}", api_key))
            .map_err(|e| Error::Backend(format!("Invalid API key: {}", e)))?;
        headers.insert(AUTHORIZATION, auth_value);

        let http = reqwest::Client::builder()
            .default_headers(headers)
            .build()?;

        Ok(SupabaseClient {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn rest_url(&self, table: Table) -> String {
        format!("{}/rest/v1/{}", self.base_url, table.name())
    }
}

/// Turn a non-success response into a backend error, preferring the
/// service's own `message` field so forms can show it verbatim.
fn response_error(status: reqwest::StatusCode, body: &str) -> Error {
    if let Ok(value) = serde_json::from_str::<Value>(body) {
        if let Some(message) = value.get("message").and_then(Value::as_str) {
            return Error::Backend(message.to_string());
        }
    }
    Error::Backend(format!("{}: {}", status, body))
}

async fn check_response(response: reqwest::Response) -> Result<reqwest::Response, Error> {
    let status = response.status();
    if status.is_success() {
        Ok(response)
    } else {
        let body = response.text().await.unwrap_or_default();
        Err(response_error(status, &body))
    }
}

#[async_trait]
impl RowBackend for SupabaseClient {
    async fn insert(&self, table: Table, row: Value) -> Result<(), Error> {
        let response = self
            .http
            .post(self.rest_url(table))
            .header("Prefer", "return=minimal")
            .json(&row)
            .send()
            .await?;

        check_response(response).await.map(|_| ())
    }

    async fn select(&self, table: Table, columns: &str, order: Order) -> Result<Vec<Value>, Error> {
        let direction = if order.ascending { "asc" } else { "desc" };
        let order_by = format!("{}.{}", order.column, direction);
        let response = self
            .http
            .get(self.rest_url(table))
            .query(&[("select", columns), ("order", order_by.as_str())])
            .send()
            .await?;

        Ok(check_response(response).await?.json().await?)
    }

    async fn update(&self, table: Table, id: &str, patch: Value) -> Result<(), Error> {
        let response = self
            .http
            .patch(self.rest_url(table))
            .query(&[("id", &format!("eq.{}", id))])
            .header("Prefer", "return=minimal")
            .json(&patch)
            .send()
            .await?;

        check_response(response).await.map(|_| ())
    }
}

#[async_trait]
impl BlobBackend for SupabaseClient {
    async fn upload(&self, path: &str, bytes: Vec<u8>, content_type: &str) -> Result<(), Error> {
        let response = self
            .http
            .post(format!(
                "{}/storage/v1/object/{}/{}",
                self.base_url, AVATAR_BUCKET, path
            ))
            .header(CONTENT_TYPE, content_type)
            .body(bytes)
            .send()
            .await?;

        check_response(response).await.map(|_| ())
    }

    fn public_url(&self, path: &str) -> String {
        format!(
            "{}/storage/v1/object/public/{}/{}",
            self.base_url, AVATAR_BUCKET, path
        )
    }
}

fn join_message(table: Table, msg_ref: u64) -> String {
    serde_json::json!({
        "topic": format!("realtime:public:{}", table.name()),
        "event": "phx_join",
        "payload": {
            "config": {
                "postgres_changes": [
                    { "event": "*", "schema": "public", "table": table.name() }
                ]
            }
        },
        "ref": msg_ref.to_string(),
    })
    .to_string()
}

fn heartbeat_message(msg_ref: u64) -> String {
    serde_json::json!({
        "topic": "phoenix",
        "event": "heartbeat",
        "payload": {},
        "ref": msg_ref.to_string(),
    })
    .to_string()
}

/// Map one websocket frame to a change event, if it is one.
///
/// Heartbeat acks arrive on the `phoenix` topic and fall through the prefix
/// check; a join ack on a table topic becomes a `Resync` so the bridge
/// reloads anything missed while no subscription was open.
fn parse_change(text: &str) -> Option<ChangeEvent> {
    let value: Value = serde_json::from_str(text).ok()?;
    let topic = value.get("topic")?.as_str()?;

    let table = match topic.strip_prefix("realtime:public:") {
        Some("participants") => Table::Participants,
        Some("donations") => Table::Donations,
        _ => return None,
    };

    let kind = match value.get("event")?.as_str()? {
        "INSERT" => ChangeKind::Insert,
        "UPDATE" => ChangeKind::Update,
        "DELETE" => ChangeKind::Delete,
        "postgres_changes" => {
            match value["payload"]["data"]["type"].as_str() {
                Some("INSERT") => ChangeKind::Insert,
                Some("UPDATE") => ChangeKind::Update,
                Some("DELETE") => ChangeKind::Delete,
                _ => ChangeKind::Resync,
            }
        }
        "phx_reply" => ChangeKind::Resync,
        _ => return None,
    };

    Some(ChangeEvent { table, kind })
}

/// Keeps the realtime change feed open, restarting it on failure.
pub async fn run_realtime_feed(settings: Arc<Settings>, events: UnboundedSender<ChangeEvent>) {
    let (Some(base_url), Some(api_key)) =
        (settings.supabase_url.clone(), settings.supabase_anon_key.clone())
    else {
        log::warn!("Realtime feed not started, backend is unconfigured");
        return;
    };

    loop {
        match run_realtime_socket(&base_url, &api_key, &events).await {
            Ok(()) => log::warn!("Realtime socket closed, reconnecting in 30 seconds..."),
            Err(e) => log::warn!("Realtime socket failed ({}), reconnecting in 30 seconds...", e),
        }

        if events.is_closed() {
            log::debug!("Change event receiver dropped, stopping realtime feed");
            return;
        }

        sleep(Duration::from_secs(30)).await;
    }
}

async fn run_realtime_socket(
    base_url: &str,
    api_key: &str,
    events: &UnboundedSender<ChangeEvent>,
) -> anyhow::Result<()> {
    Url::parse(base_url)?;
    // http -> ws, https -> wss
    let ws_base = base_url.replacen("http", "ws", 1);
    let endpoint = format!(
        "{}/realtime/v1/websocket?apikey={}&vsn=1.0.0",
        ws_base, api_key
    );

    let (mut stream, _) = tokio_tungstenite::connect_async(endpoint.as_str()).await?;
    log::info!("Realtime change feed connected");

    let mut msg_ref: u64 = 0;
    for table in [Table::Participants, Table::Donations] {
        msg_ref += 1;
        stream.send(Message::text(join_message(table, msg_ref))).await?;
    }

    let mut heartbeat = tokio::time::interval(Duration::from_secs(30));

    loop {
        tokio::select! {
            _ = heartbeat.tick() => {
                msg_ref += 1;
                stream.send(Message::text(heartbeat_message(msg_ref))).await?;
            }
            message = stream.next() => match message {
                Some(Ok(message)) => {
                    if message.is_close() {
                        return Ok(());
                    }

                    if let Ok(text) = message.to_text() {
                        if let Some(event) = parse_change(text) {
                            if events.send(event).is_err() {
                                return Ok(());
                            }
                        }
                    }
                }
                Some(Err(e)) => return Err(e.into()),
                None => return Ok(()),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_join_message_targets_table_topic() {
        let value: Value = serde_json::from_str(&join_message(Table::Donations, 7)).unwrap();
        assert_eq!(value["topic"], "realtime:public:donations");
        assert_eq!(value["event"], "phx_join");
        assert_eq!(value["ref"], "7");
        assert_eq!(
            value["payload"]["config"]["postgres_changes"][0]["table"],
            "donations"
        );
        assert_eq!(value["payload"]["config"]["postgres_changes"][0]["event"], "*");
    }

    #[test]
    fn test_parse_change_maps_events() {
        let insert = parse_change(
            r#"{"topic":"realtime:public:participants","event":"INSERT","payload":{}}"#,
        )
        .unwrap();
        assert_eq!(insert.table, Table::Participants);
        assert_eq!(insert.kind, ChangeKind::Insert);

        let pg_change = parse_change(
            r#"{"topic":"realtime:public:donations","event":"postgres_changes",
                "payload":{"data":{"type":"UPDATE"}}}"#,
        )
        .unwrap();
        assert_eq!(pg_change.table, Table::Donations);
        assert_eq!(pg_change.kind, ChangeKind::Update);

        let join_ack = parse_change(
            r#"{"topic":"realtime:public:participants","event":"phx_reply",
                "payload":{"status":"ok"}}"#,
        )
        .unwrap();
        assert_eq!(join_ack.kind, ChangeKind::Resync);
    }

    #[test]
    fn test_parse_change_ignores_other_traffic() {
        assert!(parse_change(
            r#"{"topic":"phoenix","event":"phx_reply","payload":{"status":"ok"}}"#
        )
        .is_none());
        assert!(parse_change(r#"{"topic":"realtime:public:unknown","event":"INSERT"}"#).is_none());
        assert!(parse_change("not json").is_none());
    }

    #[test]
    fn test_public_url_shape() {
        let settings = Settings {
            supabase_url: Some("https://example.supabase.co".to_string()),
            supabase_anon_key: Some("anon-key".to_string()),
            web_port: None,
        };
        let client = SupabaseClient::new(&settings).unwrap();
        assert_eq!(
            client.public_url("avatars/123-abc.png"),
            "https://example.supabase.co/storage/v1/object/public/participant-avatars/avatars/123-abc.png"
        );
    }

    #[test]
    fn test_unconfigured_client_is_rejected() {
        assert!(matches!(
            SupabaseClient::new(&Settings::default()),
            Err(Error::NotConfigured)
        ));
    }
}
