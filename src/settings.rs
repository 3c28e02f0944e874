//! Per-user formatting overrides and the stores that hold them

use crate::error::{Error, Result};
use parking_lot::Mutex;
use schemars::JsonSchema;
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

/// Optional overrides applied to one pipeline run.
///
/// Absent fields leave the computed value alone; `Some(0.0)` is a real value.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct OverrideSettings {
    /// Font family replacing every text block's family
    #[serde(
        default,
        deserialize_with = "lenient_string",
        skip_serializing_if = "Option::is_none"
    )]
    pub font_select: Option<String>,
    /// Added to every text block's base size
    #[serde(
        default,
        deserialize_with = "lenient_number",
        skip_serializing_if = "Option::is_none"
    )]
    pub font_size: Option<f32>,
    /// Multiplier on the vertical gap between elements
    #[serde(
        default,
        deserialize_with = "lenient_number",
        skip_serializing_if = "Option::is_none"
    )]
    pub line_height: Option<f32>,
}

impl OverrideSettings {
    pub fn is_empty(&self) -> bool {
        self.font_select.is_none() && self.font_size.is_none() && self.line_height.is_none()
    }

    /// Parse a stored document: either the flat record or a Firestore-style
    /// `{"fields": {"fontSize": {"integerValue": "2"}, ...}}` envelope
    pub fn from_document(value: serde_json::Value) -> Result<Self> {
        let flat = match value.get("fields").and_then(|fields| fields.as_object()) {
            Some(fields) => serde_json::Value::Object(
                fields
                    .iter()
                    .map(|(key, typed)| (key.clone(), unwrap_typed_value(typed)))
                    .collect(),
            ),
            None => value,
        };
        Ok(serde_json::from_value(flat)?)
    }
}

/// `{"stringValue": "x"}` -> `"x"`; anything else is returned as-is
fn unwrap_typed_value(typed: &serde_json::Value) -> serde_json::Value {
    match typed.as_object() {
        Some(map) if map.len() == 1 => map.values().next().cloned().unwrap_or_default(),
        _ => typed.clone(),
    }
}

fn lenient_string<'de, D>(deserializer: D) -> std::result::Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(serde_json::Value::String(s)) if !s.trim().is_empty() => Some(s.trim().to_string()),
        _ => None,
    })
}

/// Numbers may arrive as JSON numbers or numeric strings
fn lenient_number<'de, D>(deserializer: D) -> std::result::Result<Option<f32>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    let number = match value {
        Some(serde_json::Value::Number(n)) => n.as_f64().map(|n| n as f32),
        Some(serde_json::Value::String(s)) => s.trim().parse::<f32>().ok(),
        _ => None,
    };
    Ok(number.filter(|n| n.is_finite()))
}

pub type SettingsFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + Send + 'a>>;

/// Read/write access to override records keyed by user id
pub trait SettingsProvider: Send + Sync {
    /// `Ok(None)` when no record exists for `id`
    fn get<'a>(&'a self, id: &'a str) -> SettingsFuture<'a, Option<OverrideSettings>>;

    fn put<'a>(&'a self, id: &'a str, settings: &'a OverrideSettings) -> SettingsFuture<'a, ()>;
}

/// Settings store behind a JSON document API: `{base}/{collection}/{id}`
pub struct HttpSettingsStore {
    client: reqwest::Client,
    base_url: url::Url,
    collection: String,
}

impl HttpSettingsStore {
    pub fn new(base_url: &str, collection: impl Into<String>) -> Result<Self> {
        let base_url = url::Url::parse(base_url).map_err(|e| Error::InvalidConfig {
            reason: format!("invalid settings URL: {}", e),
        })?;
        if base_url.cannot_be_a_base() {
            return Err(Error::InvalidConfig {
                reason: "settings URL cannot be a base".to_string(),
            });
        }

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(Error::HttpRequest)?;

        Ok(Self {
            client,
            base_url,
            collection: collection.into(),
        })
    }

    /// URL of one record; segments are percent-encoded
    pub fn document_url(&self, id: &str) -> Result<url::Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| Error::InvalidConfig {
                reason: "settings URL cannot be a base".to_string(),
            })?
            .pop_if_empty()
            .push(&self.collection)
            .push(id);
        Ok(url)
    }

    async fn fetch(&self, id: &str) -> Result<Option<OverrideSettings>> {
        let response = self.client.get(self.document_url(id)?).send().await?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(Error::Settings {
                reason: format!("lookup failed with status: {}", response.status()),
            });
        }

        let document: serde_json::Value = response.json().await?;
        OverrideSettings::from_document(document).map(Some)
    }

    async fn store(&self, id: &str, settings: &OverrideSettings) -> Result<()> {
        let response = self
            .client
            .put(self.document_url(id)?)
            .json(settings)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(Error::Settings {
                reason: format!("save failed with status: {}", response.status()),
            });
        }
        Ok(())
    }
}

impl SettingsProvider for HttpSettingsStore {
    fn get<'a>(&'a self, id: &'a str) -> SettingsFuture<'a, Option<OverrideSettings>> {
        Box::pin(self.fetch(id))
    }

    fn put<'a>(&'a self, id: &'a str, settings: &'a OverrideSettings) -> SettingsFuture<'a, ()> {
        Box::pin(async move {
            require_id(id)?;
            self.store(id, settings).await
        })
    }
}

/// Process-local store, used when no remote store is configured
#[derive(Default)]
pub struct MemorySettingsStore {
    records: Mutex<HashMap<String, OverrideSettings>>,
}

impl MemorySettingsStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SettingsProvider for MemorySettingsStore {
    fn get<'a>(&'a self, id: &'a str) -> SettingsFuture<'a, Option<OverrideSettings>> {
        let record = self.records.lock().get(id).cloned();
        Box::pin(async move { Ok(record) })
    }

    fn put<'a>(&'a self, id: &'a str, settings: &'a OverrideSettings) -> SettingsFuture<'a, ()> {
        Box::pin(async move {
            require_id(id)?;
            self.records.lock().insert(id.to_string(), settings.clone());
            Ok(())
        })
    }
}

fn require_id(id: &str) -> Result<()> {
    if id.trim().is_empty() {
        return Err(Error::Settings {
            reason: "missing identifier".to_string(),
        });
    }
    Ok(())
}

/// Fetch overrides for a run. Lookup failures degrade to "no overrides".
pub async fn lookup_overrides(
    provider: &dyn SettingsProvider,
    user_id: Option<&str>,
) -> Option<OverrideSettings> {
    let id = user_id.map(str::trim).filter(|id| !id.is_empty())?;

    match provider.get(id).await {
        Ok(Some(settings)) => {
            tracing::info!(user_id = id, ?settings, "applying user settings");
            Some(settings)
        }
        Ok(None) => {
            tracing::info!(user_id = id, "no settings found, using defaults");
            None
        }
        Err(e) => {
            tracing::warn!(user_id = id, error = %e, "settings lookup failed, using defaults");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_absent_is_not_zero() {
        let settings: OverrideSettings = serde_json::from_value(json!({ "fontSize": 0 })).unwrap();
        assert_eq!(settings.font_size, Some(0.0));
        assert_eq!(settings.line_height, None);
        assert_eq!(settings.font_select, None);
    }

    #[test]
    fn test_lenient_values() {
        let settings: OverrideSettings = serde_json::from_value(json!({
            "fontSelect": "  ",
            "fontSize": "2.5",
            "lineHeight": "wide"
        }))
        .unwrap();
        assert_eq!(settings.font_select, None);
        assert_eq!(settings.font_size, Some(2.5));
        assert_eq!(settings.line_height, None);
    }

    #[test]
    fn test_firestore_envelope() {
        let settings = OverrideSettings::from_document(json!({
            "name": "projects/p/databases/(default)/documents/messages/s1",
            "fields": {
                "fontSelect": { "stringValue": "Noto Sans JP" },
                "fontSize": { "integerValue": "4" },
                "lineHeight": { "doubleValue": 1.5 }
            }
        }))
        .unwrap();
        assert_eq!(
            settings,
            OverrideSettings {
                font_select: Some("Noto Sans JP".to_string()),
                font_size: Some(4.0),
                line_height: Some(1.5),
            }
        );
    }

    #[test]
    fn test_serialize_skips_absent() {
        let settings = OverrideSettings {
            font_size: Some(2.0),
            ..Default::default()
        };
        assert_eq!(serde_json::to_value(&settings).unwrap(), json!({ "fontSize": 2.0 }));
    }

    #[test]
    fn test_document_url_escapes_id() {
        let store = HttpSettingsStore::new("https://store.example.com/v1/", "messages").unwrap();
        let url = store.document_url("a b/c").unwrap();
        assert_eq!(url.as_str(), "https://store.example.com/v1/messages/a%20b%2Fc");
    }

    #[test]
    fn test_invalid_settings_url() {
        assert!(matches!(
            HttpSettingsStore::new("not a url", "messages"),
            Err(Error::InvalidConfig { .. })
        ));
    }

    #[tokio::test]
    async fn test_memory_store_roundtrip() {
        let store = MemorySettingsStore::new();
        let settings = OverrideSettings {
            font_select: Some("MS Gothic".to_string()),
            font_size: Some(2.0),
            line_height: None,
        };
        store.put("student-1", &settings).await.unwrap();
        assert_eq!(store.get("student-1").await.unwrap(), Some(settings));
        assert_eq!(store.get("student-2").await.unwrap(), None);
        assert!(store.put(" ", &OverrideSettings::default()).await.is_err());
    }

    #[test]
    fn test_memory_store_overwrites() {
        let store = MemorySettingsStore::new();
        let first = OverrideSettings {
            font_size: Some(2.0),
            ..Default::default()
        };
        let second = OverrideSettings {
            line_height: Some(1.5),
            ..Default::default()
        };

        tokio_test::block_on(async {
            store.put("s1", &first).await.unwrap();
            store.put("s1", &second).await.unwrap();
            assert_eq!(store.get("s1").await.unwrap(), Some(second.clone()));
        });
    }

    #[tokio::test]
    async fn test_lookup_overrides_degrades() {
        struct Broken;
        impl SettingsProvider for Broken {
            fn get<'a>(&'a self, _id: &'a str) -> SettingsFuture<'a, Option<OverrideSettings>> {
                Box::pin(async {
                    Err(Error::Settings {
                        reason: "unreachable".to_string(),
                    })
                })
            }
            fn put<'a>(
                &'a self,
                _id: &'a str,
                _settings: &'a OverrideSettings,
            ) -> SettingsFuture<'a, ()> {
                Box::pin(async { Ok(()) })
            }
        }

        assert_eq!(lookup_overrides(&Broken, Some("s1")).await, None);
        assert_eq!(lookup_overrides(&MemorySettingsStore::new(), None).await, None);
        assert_eq!(lookup_overrides(&MemorySettingsStore::new(), Some("  ")).await, None);
    }

    /// One-shot HTTP responder on a loopback port; yields the raw request
    async fn serve_once(
        status: &'static str,
        body: &'static str,
    ) -> (String, tokio::task::JoinHandle<String>) {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base_url = format!("http://{}/v1/", listener.local_addr().unwrap());

        let handle = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request = Vec::new();
            let mut chunk = [0u8; 1024];
            loop {
                let n = socket.read(&mut chunk).await.unwrap();
                request.extend_from_slice(&chunk[..n]);
                let text = String::from_utf8_lossy(&request).to_string();
                if let Some(head_end) = text.find("\r\n\r\n") {
                    let content_length = text[..head_end]
                        .lines()
                        .find_map(|line| {
                            let (name, value) = line.split_once(':')?;
                            name.eq_ignore_ascii_case("content-length")
                                .then(|| value.trim().parse::<usize>().ok())
                                .flatten()
                        })
                        .unwrap_or(0);
                    if request.len() >= head_end + 4 + content_length {
                        break;
                    }
                }
                if n == 0 {
                    break;
                }
            }

            let response = format!(
                "HTTP/1.1 {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                status,
                body.len(),
                body
            );
            socket.write_all(response.as_bytes()).await.unwrap();
            socket.shutdown().await.unwrap();
            String::from_utf8_lossy(&request).to_string()
        });

        (base_url, handle)
    }

    #[tokio::test]
    async fn test_http_missing_record_is_none() {
        let (base_url, server) = serve_once("404 Not Found", "{}").await;
        let store = HttpSettingsStore::new(&base_url, "messages").unwrap();

        assert_eq!(store.get("s1").await.unwrap(), None);
        let request = server.await.unwrap();
        assert!(request.starts_with("GET /v1/messages/s1 HTTP/1.1"));
    }

    #[tokio::test]
    async fn test_http_error_status_is_settings_error() {
        let (base_url, server) = serve_once("500 Internal Server Error", "{}").await;
        let store = HttpSettingsStore::new(&base_url, "messages").unwrap();

        let result = store.get("s1").await;
        assert!(matches!(result, Err(Error::Settings { .. })));
        server.await.unwrap();

        let (base_url, server) = serve_once("503 Service Unavailable", "{}").await;
        let store = HttpSettingsStore::new(&base_url, "messages").unwrap();
        assert_eq!(lookup_overrides(&store, Some("s1")).await, None);
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_http_flat_record() {
        let (base_url, server) =
            serve_once("200 OK", r#"{"fontSelect": "MS Gothic", "fontSize": "2"}"#).await;
        let store = HttpSettingsStore::new(&base_url, "messages").unwrap();

        assert_eq!(
            store.get("s1").await.unwrap(),
            Some(OverrideSettings {
                font_select: Some("MS Gothic".to_string()),
                font_size: Some(2.0),
                line_height: None,
            })
        );
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_http_firestore_record() {
        let (base_url, server) = serve_once(
            "200 OK",
            r#"{"name": "messages/s1", "fields": {"lineHeight": {"doubleValue": 1.5}}}"#,
        )
        .await;
        let store = HttpSettingsStore::new(&base_url, "messages").unwrap();

        let settings = store.get("s1").await.unwrap().unwrap();
        assert_eq!(settings.line_height, Some(1.5));
        assert_eq!(settings.font_select, None);
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_http_put_sends_record() {
        let (base_url, server) = serve_once("200 OK", "{}").await;
        let store = HttpSettingsStore::new(&base_url, "messages").unwrap();
        let settings = OverrideSettings {
            font_size: Some(3.0),
            ..Default::default()
        };

        store.put("s1", &settings).await.unwrap();
        let request = server.await.unwrap();
        assert!(request.starts_with("PUT /v1/messages/s1 HTTP/1.1"));
        assert!(request.ends_with(r#"{"fontSize":3.0}"#));
    }
}
