//! Firestore audit store over the REST API.
//!
//! Records are created with `documents.createDocument`, which fails with
//! `409 ALREADY_EXISTS` when the document id is taken. That gives the
//! create-only semantics the audit trail relies on without a read first.
//! Writes authenticate with a bearer token from [`Credentials`].

use std::time::Duration;

use async_trait::async_trait;
use chrono::SecondsFormat;
use reqwest::StatusCode;
use serde_json::{json, Map, Value};

use super::credentials::{Credentials, MetadataTokenSource};
use super::{AuditError, AuditRecord, AuditStore};
use crate::config::{AuditConfig, CredentialSource};
use crate::error::{ProxyError, Result};

/// Writes audit records as Firestore documents, one per fingerprint.
#[derive(Debug)]
pub struct FirestoreAuditStore {
    client: reqwest::Client,
    collection_url: String,
    credentials: Credentials,
}

impl FirestoreAuditStore {
    pub fn new(
        client: reqwest::Client,
        base_url: &str,
        project_id: &str,
        database: &str,
        collection: &str,
        credentials: Credentials,
    ) -> Self {
        let collection_url = format!(
            "{}/v1/projects/{project_id}/databases/{database}/documents/{collection}",
            base_url.trim_end_matches('/')
        );
        Self {
            client,
            collection_url,
            credentials,
        }
    }

    /// Build the store and its pooled HTTP client from configuration.
    pub fn from_config(config: &AuditConfig) -> Result<Self> {
        let project_id = config
            .project_id
            .as_deref()
            .filter(|p| !p.is_empty())
            .ok_or_else(|| ProxyError::InvalidConfig("audit project id is not set".into()))?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| ProxyError::InvalidConfig(format!("audit client: {e}")))?;
        let credentials = match config.access_token.as_deref().filter(|t| !t.is_empty()) {
            Some(token) => Credentials::Static(token.to_string()),
            None => match config.credentials {
                CredentialSource::Metadata => Credentials::Metadata(MetadataTokenSource::new(
                    client.clone(),
                    &config.metadata_url,
                )),
                CredentialSource::None => Credentials::Anonymous,
            },
        };
        Ok(Self::new(
            client,
            &config.base_url,
            project_id,
            &config.database,
            &config.collection,
            credentials,
        ))
    }

    pub fn collection_url(&self) -> &str {
        &self.collection_url
    }

    pub fn credentials(&self) -> &Credentials {
        &self.credentials
    }
}

#[async_trait]
impl AuditStore for FirestoreAuditStore {
    async fn create(&self, record: &AuditRecord) -> Result<(), AuditError> {
        let key = record.key();
        let mut request = self
            .client
            .post(&self.collection_url)
            .query(&[("documentId", key.as_str())])
            .json(&json!({ "fields": document_fields(record) }));
        if let Some(token) = self.credentials.token().await? {
            request = request.bearer_auth(token);
        }

        let response = request.send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        if status == StatusCode::CONFLICT {
            return Err(AuditError::AlreadyExists { key });
        }
        let message = response.text().await.unwrap_or_default();
        Err(AuditError::Rejected {
            status: status.as_u16(),
            message,
        })
    }
}

/// Document body for a record: `payload`, `auctionState`, `createdAt`.
/// The fingerprint is the document id, not a field.
pub fn document_fields(record: &AuditRecord) -> Value {
    json!({
        "payload": encode_map(record.payload()),
        "auctionState": { "stringValue": record.auction_state().as_str() },
        "createdAt": {
            "timestampValue": record.created_at().to_rfc3339_opts(SecondsFormat::Micros, true)
        },
    })
}

/// Encode a JSON value as a Firestore typed `Value`.
pub fn encode_value(value: &Value) -> Value {
    match value {
        Value::Null => json!({ "nullValue": null }),
        Value::Bool(b) => json!({ "booleanValue": b }),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                // Firestore integers are int64, sent as decimal strings.
                json!({ "integerValue": i.to_string() })
            } else if n.is_u64() {
                // Beyond int64: kept exact as a string rather than a lossy double.
                json!({ "stringValue": n.to_string() })
            } else {
                json!({ "doubleValue": n.as_f64() })
            }
        }
        Value::String(s) => json!({ "stringValue": s }),
        Value::Array(items) => json!({
            "arrayValue": { "values": items.iter().map(encode_value).collect::<Vec<_>>() }
        }),
        Value::Object(map) => encode_map(map),
    }
}

fn encode_map(map: &Map<String, Value>) -> Value {
    let fields: Map<String, Value> = map
        .iter()
        .map(|(k, v)| (k.clone(), encode_value(v)))
        .collect();
    json!({ "mapValue": { "fields": fields } })
}

#[cfg(test)]
mod tests {
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;
    use crate::fingerprint::Fingerprint;

    fn record() -> AuditRecord {
        let payload = match json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": "eth_sendTransaction",
            "params": [{"from": "0x1", "gas": 21000, "value": 1.5, "data": null}]
        }) {
            Value::Object(map) => map,
            _ => unreachable!(),
        };
        AuditRecord::open(Fingerprint::from(1234), payload)
    }

    const DOCS_PATH: &str = "/v1/projects/choice/databases/(default)/documents/txs";

    fn store(server: &MockServer, token: Option<&str>) -> FirestoreAuditStore {
        let credentials = match token {
            Some(token) => Credentials::Static(token.to_string()),
            None => Credentials::Anonymous,
        };
        FirestoreAuditStore::new(
            reqwest::Client::new(),
            &server.uri(),
            "choice",
            "(default)",
            "txs",
            credentials,
        )
    }

    fn firestore_config(server: &MockServer) -> AuditConfig {
        AuditConfig {
            project_id: Some("choice".into()),
            base_url: server.uri(),
            metadata_url: server.uri(),
            ..AuditConfig::default()
        }
    }

    #[test]
    fn test_scalar_encoding() {
        assert_eq!(encode_value(&json!(null)), json!({"nullValue": null}));
        assert_eq!(encode_value(&json!(true)), json!({"booleanValue": true}));
        assert_eq!(encode_value(&json!(21000)), json!({"integerValue": "21000"}));
        assert_eq!(encode_value(&json!(1.5)), json!({"doubleValue": 1.5}));
        assert_eq!(encode_value(&json!("0xabc")), json!({"stringValue": "0xabc"}));
    }

    #[test]
    fn test_nested_encoding() {
        let encoded = encode_value(&json!({"params": ["0x1", {"nonce": 3}]}));
        assert_eq!(
            encoded,
            json!({"mapValue": {"fields": {"params": {"arrayValue": {"values": [
                {"stringValue": "0x1"},
                {"mapValue": {"fields": {"nonce": {"integerValue": "3"}}}}
            ]}}}}})
        );
    }

    #[test]
    fn test_document_has_no_fingerprint_field() {
        let fields = document_fields(&record());
        let fields = fields.as_object().unwrap();
        assert_eq!(fields.len(), 3);
        assert_eq!(fields["auctionState"], json!({"stringValue": "open"}));
        assert!(fields["createdAt"]["timestampValue"]
            .as_str()
            .unwrap()
            .ends_with('Z'));
        assert_eq!(
            fields["payload"]["mapValue"]["fields"]["method"],
            json!({"stringValue": "eth_sendTransaction"})
        );
    }

    #[test]
    fn test_collection_url_trims_trailing_slash() {
        let store = FirestoreAuditStore::new(
            reqwest::Client::new(),
            "https://firestore.googleapis.com/",
            "p",
            "(default)",
            "txs",
            Credentials::Anonymous,
        );
        assert_eq!(
            store.collection_url(),
            "https://firestore.googleapis.com/v1/projects/p/databases/(default)/documents/txs"
        );
    }

    #[test]
    fn test_large_unsigned_kept_exact() {
        let big = json!(u64::MAX);
        assert_eq!(
            encode_value(&big),
            json!({"stringValue": "18446744073709551615"})
        );
    }

    #[test]
    fn test_credentials_from_config() {
        let mut config = AuditConfig {
            project_id: Some("choice".into()),
            ..AuditConfig::default()
        };
        let store = FirestoreAuditStore::from_config(&config).unwrap();
        assert!(matches!(store.credentials(), Credentials::Metadata(_)));

        config.credentials = CredentialSource::None;
        let store = FirestoreAuditStore::from_config(&config).unwrap();
        assert!(matches!(store.credentials(), Credentials::Anonymous));

        config.access_token = Some("static-token".into());
        let store = FirestoreAuditStore::from_config(&config).unwrap();
        assert!(matches!(store.credentials(), Credentials::Static(t) if t == "static-token"));

        config.access_token = Some(String::new());
        let store = FirestoreAuditStore::from_config(&config).unwrap();
        assert!(matches!(store.credentials(), Credentials::Anonymous));
    }

    #[tokio::test]
    async fn test_metadata_token_is_sent_with_write() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/computeMetadata/v1/instance/service-accounts/default/token"))
            .and(header("Metadata-Flavor", "Google"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "access_token": "ya29.instance",
                "expires_in": 3599,
                "token_type": "Bearer"
            })))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path(DOCS_PATH))
            .and(header("authorization", "Bearer ya29.instance"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"name": "doc"})))
            .expect(2)
            .mount(&server)
            .await;

        let store = FirestoreAuditStore::from_config(&firestore_config(&server)).unwrap();
        store.create(&record()).await.unwrap();
        let second = AuditRecord::open(Fingerprint::from(5678), record().payload().clone());
        store.create(&second).await.unwrap();
    }

    #[tokio::test]
    async fn test_metadata_failure_fails_write() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let store = FirestoreAuditStore::from_config(&firestore_config(&server)).unwrap();
        let err = store.create(&record()).await.unwrap_err();
        assert!(matches!(err, AuditError::Credentials(_)));
    }

    #[tokio::test]
    async fn test_create_posts_document_with_id() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(DOCS_PATH))
            .and(query_param("documentId", "1234"))
            .and(header("authorization", "Bearer token-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"name": "doc"})))
            .expect(1)
            .mount(&server)
            .await;

        store(&server, Some("token-1")).create(&record()).await.unwrap();
    }

    #[tokio::test]
    async fn test_conflict_maps_to_already_exists() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(DOCS_PATH))
            .respond_with(ResponseTemplate::new(409).set_body_json(json!({
                "error": {"code": 409, "status": "ALREADY_EXISTS"}
            })))
            .mount(&server)
            .await;

        let err = store(&server, None).create(&record()).await.unwrap_err();
        assert!(matches!(err, AuditError::AlreadyExists { ref key } if key == "1234"));
    }

    #[tokio::test]
    async fn test_server_error_maps_to_rejected() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(DOCS_PATH))
            .respond_with(ResponseTemplate::new(403).set_body_string("permission denied"))
            .mount(&server)
            .await;

        let err = store(&server, None).create(&record()).await.unwrap_err();
        match err {
            AuditError::Rejected { status, message } => {
                assert_eq!(status, 403);
                assert_eq!(message, "permission denied");
            }
            other => panic!("expected Rejected, got {other:?}"),
        }
    }
}
