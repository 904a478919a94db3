// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! InfluxDB 1.x HTTP client.
//!
//! Points are written with the line protocol:
//!
//! ```text
//! key,tag1=v1,tag2=v2 field1=1i,field2=2.5,field3="text" 1704164645000000000
//! ```

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::fmt::Write as _;
use std::time::Duration;
use tracing::{debug, trace, warn};

use crate::batch::Batch;
use crate::config::InfluxConfig;
use crate::constants::PING_TIMEOUT_SECS;
use crate::errors::StoreError;
use crate::point::{FieldValue, Point};
use crate::store::StoreClient;

/// Timestamp precision of written points.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
pub enum Precision {
    #[default]
    #[serde(rename = "ns")]
    Nanoseconds,
    #[serde(rename = "us")]
    Microseconds,
    #[serde(rename = "ms")]
    Milliseconds,
    #[serde(rename = "s")]
    Seconds,
}

impl Precision {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Precision::Nanoseconds => "ns",
            Precision::Microseconds => "us",
            Precision::Milliseconds => "ms",
            Precision::Seconds => "s",
        }
    }

    /// `timestamp` truncated to this precision.
    #[must_use]
    pub fn timestamp(&self, timestamp: &DateTime<Utc>) -> i64 {
        match self {
            Precision::Nanoseconds => timestamp
                .timestamp_nanos_opt()
                .unwrap_or_else(|| timestamp.timestamp_micros().saturating_mul(1_000)),
            Precision::Microseconds => timestamp.timestamp_micros(),
            Precision::Milliseconds => timestamp.timestamp_millis(),
            Precision::Seconds => timestamp.timestamp(),
        }
    }
}

/// Encodes one point as a line protocol line.
///
/// Tags with an empty value and non-finite floats are dropped since the store rejects them.
/// Returns `None` when no field is left to write.
#[must_use]
pub fn encode_point(point: &Point, precision: Precision) -> Option<String> {
    let mut fields = String::new();
    for (name, value) in &point.fields {
        let encoded = match value {
            FieldValue::Integer(v) => format!("{v}i"),
            FieldValue::Float(v) if v.is_finite() => v.to_string(),
            FieldValue::Float(v) => {
                trace!("Dropping non-finite field {}={} of {}", name, v, point.key);
                continue;
            }
            FieldValue::String(v) => format!("\"{}\"", escape_string_field(v)),
        };
        if !fields.is_empty() {
            fields.push(',');
        }
        fields.push_str(&escape_key(name));
        fields.push('=');
        fields.push_str(&encoded);
    }
    if fields.is_empty() {
        return None;
    }

    let mut line = escape_measurement(&point.key);
    // BTreeMap iteration keeps tags sorted by key
    for (key, value) in point.tags.iter().filter(|(_, v)| !v.is_empty()) {
        let _ = write!(line, ",{}={}", escape_key(key), escape_key(value));
    }
    let _ = write!(
        line,
        " {} {}",
        fields,
        precision.timestamp(&point.timestamp)
    );
    Some(line)
}

/// Encodes a batch into a request body, skipping points without fields.
#[must_use]
pub fn encode_batch(batch: &Batch, precision: Precision) -> String {
    let mut lines = Vec::with_capacity(batch.len());
    for point in batch.points() {
        match encode_point(point, precision) {
            Some(line) => lines.push(line),
            None => warn!("Skipping point {} with no fields", point.key),
        }
    }
    lines.join("\n")
}

fn escape_measurement(s: &str) -> String {
    s.replace(',', "\\,").replace(' ', "\\ ")
}

// Tag keys, tag values and field keys share the same escaping rules.
fn escape_key(s: &str) -> String {
    s.replace(',', "\\,")
        .replace('=', "\\=")
        .replace(' ', "\\ ")
}

fn escape_string_field(s: &str) -> String {
    s.replace('\\', "\\\\").replace('"', "\\\"")
}

#[derive(Debug, Deserialize)]
struct QueryResponse {
    #[serde(default)]
    results: Vec<StatementResult>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StatementResult {
    #[serde(default)]
    series: Vec<Series>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Series {
    #[serde(default)]
    values: Vec<Vec<serde_json::Value>>,
}

impl QueryResponse {
    fn database_names(self) -> Result<Vec<String>, StoreError> {
        if let Some(error) = self.error {
            return Err(StoreError::InvalidResponse(error));
        }
        let mut names = Vec::new();
        for result in self.results {
            if let Some(error) = result.error {
                return Err(StoreError::InvalidResponse(error));
            }
            for series in result.series {
                names.extend(
                    series
                        .values
                        .iter()
                        .filter_map(|row| row.first())
                        .filter_map(|name| name.as_str().map(str::to_string)),
                );
            }
        }
        Ok(names)
    }
}

pub struct InfluxClient {
    client: reqwest::Client,
    base_url: String,
    address: String,
    username: Option<String>,
    password: Option<String>,
    database: String,
    retention_policy: Option<String>,
    precision: Precision,
}

impl InfluxClient {
    pub fn new(config: &InfluxConfig) -> Result<Self, StoreError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        let address = format!("{}:{}", config.host, config.port);
        Ok(InfluxClient {
            client,
            base_url: format!("http://{address}"),
            address,
            username: config.username.clone(),
            password: config.password.clone(),
            database: config.database.clone(),
            retention_policy: config.retention_policy.clone(),
            precision: config.precision,
        })
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        let builder = self
            .client
            .request(method, format!("{}{}", self.base_url, path));
        match &self.username {
            Some(username) => builder.basic_auth(username, self.password.as_ref()),
            None => builder,
        }
    }
}

async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, StoreError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(StoreError::Status {
        status: status.as_u16(),
        body,
    })
}

#[async_trait]
impl StoreClient for InfluxClient {
    async fn ping(&self) -> Result<(), StoreError> {
        let response = self
            .request(reqwest::Method::GET, "/ping")
            .timeout(Duration::from_secs(PING_TIMEOUT_SECS))
            .send()
            .await?;
        check_status(response).await?;
        Ok(())
    }

    async fn verify_database(&self, database: &str) -> Result<(), StoreError> {
        let response = self
            .request(reqwest::Method::GET, "/query")
            .query(&[("q", "SHOW DATABASES")])
            .send()
            .await?;
        let response: QueryResponse = check_status(response).await?.json().await?;
        let names = response.database_names()?;
        debug!("Databases on {}: {:?}", self.address, names);

        if names.iter().any(|name| name == database) {
            Ok(())
        } else {
            Err(StoreError::DatabaseNotFound(database.to_string()))
        }
    }

    async fn write(&self, batch: &Batch) -> Result<(), StoreError> {
        let body = encode_batch(batch, self.precision);
        if body.is_empty() {
            debug!("Nothing to write, batch of {} points had no fields", batch.len());
            return Ok(());
        }

        let mut query = vec![
            ("db", self.database.as_str()),
            ("precision", self.precision.as_str()),
        ];
        if let Some(rp) = &self.retention_policy {
            query.push(("rp", rp.as_str()));
        }

        let response = self
            .request(reqwest::Method::POST, "/write")
            .query(&query)
            .body(body)
            .send()
            .await?;
        check_status(response).await?;
        Ok(())
    }

    fn address(&self) -> String {
        self.address.clone()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use mockito::{Matcher, Server};
    use std::collections::BTreeMap;

    fn point(
        key: &str,
        tags: &[(&str, &str)],
        fields: Vec<(&str, FieldValue)>,
        secs: i64,
    ) -> Point {
        Point::new(
            key,
            tags.iter()
                .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
                .collect(),
            fields
                .into_iter()
                .map(|(k, v)| (k.to_string(), v))
                .collect(),
            Utc.timestamp_opt(secs, 0).unwrap(),
        )
        .unwrap()
    }

    fn config_for(server: &Server) -> InfluxConfig {
        let address = server.socket_address();
        InfluxConfig {
            host: address.ip().to_string(),
            port: address.port(),
            database: "metrics".to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_encode_point_sorts_tags_and_types_fields() {
        let p = point(
            "requests",
            &[("region", "eu"), ("host", "web-1")],
            vec![
                ("count", FieldValue::Integer(42)),
                ("latency", FieldValue::Float(0.25)),
                ("method", FieldValue::String("GET".to_string())),
            ],
            1_704_164_645,
        );
        assert_eq!(
            encode_point(&p, Precision::Nanoseconds).unwrap(),
            "requests,host=web-1,region=eu count=42i,latency=0.25,method=\"GET\" 1704164645000000000"
        );
    }

    #[test]
    fn test_encode_point_escapes_special_characters() {
        let p = point(
            "disk usage,total",
            &[("mount point", "/var,log=x")],
            vec![("msg", FieldValue::String("say \"hi\" \\o/".to_string()))],
            0,
        );
        assert_eq!(
            encode_point(&p, Precision::Seconds).unwrap(),
            "disk\\ usage\\,total,mount\\ point=/var\\,log\\=x msg=\"say \\\"hi\\\" \\\\o/\" 0"
        );
    }

    #[test]
    fn test_encode_point_without_fields() {
        let p = point("empty", &[("host", "a")], vec![], 0);
        assert_eq!(encode_point(&p, Precision::Nanoseconds), None);

        let only_nan = point("nan", &[], vec![("v", FieldValue::Float(f64::NAN))], 0);
        assert_eq!(encode_point(&only_nan, Precision::Nanoseconds), None);
    }

    #[test]
    fn test_encode_point_drops_empty_tag_values() {
        let p = point(
            "k",
            &[("empty", ""), ("host", "a")],
            vec![("v", FieldValue::Integer(1))],
            1,
        );
        assert_eq!(
            encode_point(&p, Precision::Milliseconds).unwrap(),
            "k,host=a v=1i 1000"
        );
    }

    #[test]
    fn test_precision_timestamps() {
        let ts = Utc.timestamp_opt(1, 500_000_000).unwrap();
        assert_eq!(Precision::Nanoseconds.timestamp(&ts), 1_500_000_000);
        assert_eq!(Precision::Microseconds.timestamp(&ts), 1_500_000);
        assert_eq!(Precision::Milliseconds.timestamp(&ts), 1_500);
        assert_eq!(Precision::Seconds.timestamp(&ts), 1);
    }

    #[test]
    fn test_encode_batch_skips_points_without_fields() {
        let batch: Batch = vec![
            point("a", &[], vec![("v", FieldValue::Integer(1))], 1),
            point("b", &[], vec![], 1),
            point("c", &[], vec![("v", FieldValue::Integer(3))], 1),
        ]
        .into_iter()
        .collect();
        assert_eq!(
            encode_batch(&batch, Precision::Seconds),
            "a v=1i 1\nc v=3i 1"
        );
    }

    #[tokio::test]
    async fn test_ping() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("GET", "/ping")
            .with_status(204)
            .create_async()
            .await;

        let client = InfluxClient::new(&config_for(&server)).unwrap();
        client.ping().await.unwrap();
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_ping_sends_basic_auth() {
        let mut server = Server::new_async().await;
        // admin:secret
        let mock = server
            .mock("GET", "/ping")
            .match_header("authorization", "Basic YWRtaW46c2VjcmV0")
            .with_status(204)
            .create_async()
            .await;

        let config = InfluxConfig {
            username: Some("admin".to_string()),
            password: Some("secret".to_string()),
            ..config_for(&server)
        };
        InfluxClient::new(&config).unwrap().ping().await.unwrap();
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_ping_failure_status() {
        let mut server = Server::new_async().await;
        server
            .mock("GET", "/ping")
            .with_status(503)
            .with_body("unavailable")
            .create_async()
            .await;

        let client = InfluxClient::new(&config_for(&server)).unwrap();
        let err = client.ping().await.unwrap_err();
        assert!(matches!(
            err,
            StoreError::Status { status: 503, ref body } if body == "unavailable"
        ));
    }

    #[tokio::test]
    async fn test_verify_database() {
        let mut server = Server::new_async().await;
        server
            .mock("GET", "/query")
            .match_query(Matcher::UrlEncoded("q".into(), "SHOW DATABASES".into()))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                r#"{"results":[{"statement_id":0,"series":[{"name":"databases","columns":["name"],"values":[["_internal"],["metrics"]]}]}]}"#,
            )
            .create_async()
            .await;

        let client = InfluxClient::new(&config_for(&server)).unwrap();
        client.verify_database("metrics").await.unwrap();
        let err = client.verify_database("missing").await.unwrap_err();
        assert!(matches!(err, StoreError::DatabaseNotFound(ref name) if name == "missing"));
    }

    #[tokio::test]
    async fn test_verify_database_query_error() {
        let mut server = Server::new_async().await;
        server
            .mock("GET", "/query")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body(r#"{"results":[{"statement_id":0,"error":"authorization failed"}]}"#)
            .create_async()
            .await;

        let client = InfluxClient::new(&config_for(&server)).unwrap();
        let err = client.verify_database("metrics").await.unwrap_err();
        assert!(matches!(err, StoreError::InvalidResponse(ref e) if e == "authorization failed"));
    }

    #[tokio::test]
    async fn test_write_sends_line_protocol() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/write")
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("db".into(), "metrics".into()),
                Matcher::UrlEncoded("precision".into(), "s".into()),
                Matcher::UrlEncoded("rp".into(), "week".into()),
            ]))
            .match_body("cpu,host=a usage=0.5 10\nmem,host=a used=1024i 10")
            .with_status(204)
            .create_async()
            .await;

        let config = InfluxConfig {
            precision: Precision::Seconds,
            retention_policy: Some("week".to_string()),
            ..config_for(&server)
        };
        let client = InfluxClient::new(&config).unwrap();
        let batch: Batch = vec![
            point("cpu", &[("host", "a")], vec![("usage", FieldValue::Float(0.5))], 10),
            point("mem", &[("host", "a")], vec![("used", FieldValue::Integer(1024))], 10),
        ]
        .into_iter()
        .collect();

        client.write(&batch).await.unwrap();
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_write_rejected() {
        let mut server = Server::new_async().await;
        server
            .mock("POST", "/write")
            .match_query(Matcher::Any)
            .with_status(400)
            .with_body(r#"{"error":"unable to parse"}"#)
            .create_async()
            .await;

        let client = InfluxClient::new(&config_for(&server)).unwrap();
        let batch: Batch = vec![point("k", &[], vec![("v", FieldValue::Integer(1))], 1)]
            .into_iter()
            .collect();
        let err = client.write(&batch).await.unwrap_err();
        assert!(matches!(err, StoreError::Status { status: 400, .. }));
    }

    #[tokio::test]
    async fn test_write_batch_without_fields_sends_nothing() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/write")
            .match_query(Matcher::Any)
            .expect(0)
            .create_async()
            .await;

        let client = InfluxClient::new(&config_for(&server)).unwrap();
        let batch: Batch = vec![Point::new("k", BTreeMap::new(), BTreeMap::new(), Utc::now())
            .unwrap()]
        .into_iter()
        .collect();
        client.write(&batch).await.unwrap();
        mock.assert_async().await;
    }

    #[test]
    fn test_precision_deserialize() {
        let p: Precision = serde_json::from_str("\"us\"").unwrap();
        assert_eq!(p, Precision::Microseconds);
        assert!(serde_json::from_str::<Precision>("\"minutes\"").is_err());
    }
}
