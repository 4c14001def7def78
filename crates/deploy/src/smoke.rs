//! Conformance check of a deployed stage against the handler contract.
//!
//! The runner drives a create, read, delete sequence through the live API and
//! replays every request against [`contract::dispatch`] on an in-memory store.
//! A check passes when the live status matches the modelled one and, for
//! bodies the model fully determines, the JSON bodies are equal.

use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use comfy_table::{Cell, Color, Table};
use reqwest::Method;
use serde::Serialize;
use serde_json::{Value, json};
use url::Url;

use crate::handler::contract::{self, COLLECTION_PATH, MemoryStore, ProxyEvent, ProxyResponse};

/// Timeout for every smoke request.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(15);

/// Outcome of one request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SmokeCheck {
    pub name: String,
    pub expected_status: u16,
    pub actual_status: u16,
    pub passed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SmokeReport {
    pub base_url: Url,
    pub checks: Vec<SmokeCheck>,
}

impl SmokeReport {
    pub fn passed(&self) -> bool {
        self.checks.iter().all(|check| check.passed)
    }

    pub fn to_table(&self) -> Table {
        let mut table = Table::new();
        table.set_header(vec!["Check", "Expected", "Actual", "Result"]);
        for check in &self.checks {
            let result = if check.passed {
                Cell::new("pass").fg(Color::Green)
            } else {
                Cell::new(check.detail.as_deref().unwrap_or("fail")).fg(Color::Red)
            };
            table.add_row(vec![
                Cell::new(&check.name),
                Cell::new(check.expected_status),
                Cell::new(check.actual_status),
                result,
            ]);
        }
        table
    }
}

/// How a live body is compared with the modelled one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BodyCheck {
    /// Bodies must be equal JSON, or both empty.
    Exact,
    /// The live list must contain every modelled record; other clients may
    /// have stored more.
    Superset,
}

struct Exchange {
    name: &'static str,
    event: ProxyEvent,
    body: BodyCheck,
}

pub struct SmokeRunner {
    client: reqwest::Client,
    base_url: Url,
}

impl SmokeRunner {
    /// Runner against a stage base URL such as
    /// `https://{api}.execute-api.{region}.amazonaws.com/prod/`.
    pub fn new(base_url: &Url) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(DEFAULT_TIMEOUT)
            .build()
            .context("Failed to create HTTP client")?;

        let mut base_url = base_url.clone();
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }
        Ok(Self { client, base_url })
    }

    fn exchanges(id: &str) -> Vec<Exchange> {
        let item_path = format!("{}/{}", COLLECTION_PATH, id);
        let record = json!({ "id": id, "source": "crudforge-smoke" });
        vec![
            Exchange {
                name: "create item",
                event: ProxyEvent::new("POST", COLLECTION_PATH).with_body(record.to_string()),
                body: BodyCheck::Exact,
            },
            Exchange {
                name: "get item",
                event: ProxyEvent::new("GET", &item_path).with_id(id),
                body: BodyCheck::Exact,
            },
            Exchange {
                name: "list items",
                event: ProxyEvent::new("GET", COLLECTION_PATH),
                body: BodyCheck::Superset,
            },
            Exchange {
                name: "reject non-object body",
                event: ProxyEvent::new("POST", COLLECTION_PATH).with_body("[1, 2]"),
                body: BodyCheck::Exact,
            },
            Exchange {
                name: "delete item",
                event: ProxyEvent::new("DELETE", &item_path).with_id(id),
                body: BodyCheck::Exact,
            },
            Exchange {
                name: "get deleted item",
                event: ProxyEvent::new("GET", &item_path).with_id(id),
                body: BodyCheck::Exact,
            },
        ]
    }

    /// Run every exchange in order. Transport failures abort the run; contract
    /// mismatches are reported per check.
    pub async fn run(&self) -> Result<SmokeReport> {
        let id = format!("smoke-{}", Utc::now().timestamp_millis());
        let mut model = MemoryStore::default();
        let mut checks = Vec::new();

        for exchange in Self::exchanges(&id) {
            let expected = contract::dispatch(&mut model, &exchange.event);
            let actual = self.send(&exchange.event).await?;
            let check = Self::compare(&exchange, &expected, &actual);
            tracing::info!(
                check = %check.name,
                expected = check.expected_status,
                actual = check.actual_status,
                passed = check.passed,
                "Smoke check"
            );
            checks.push(check);
        }

        Ok(SmokeReport {
            base_url: self.base_url.clone(),
            checks,
        })
    }

    async fn send(&self, event: &ProxyEvent) -> Result<ProxyResponse> {
        let url = self
            .base_url
            .join(event.path.trim_start_matches('/'))
            .with_context(|| format!("Invalid request path {}", event.path))?;
        let method = Method::from_bytes(event.http_method.as_bytes())
            .with_context(|| format!("Invalid method {}", event.http_method))?;

        let mut request = self.client.request(method, url);
        if let Some(body) = &event.body {
            request = request
                .header(reqwest::header::CONTENT_TYPE, "application/json")
                .body(body.clone());
        }
        let response = request
            .send()
            .await
            .with_context(|| format!("Failed to send {} {}", event.http_method, event.path))?;

        let status_code = response.status().as_u16();
        let body = response
            .text()
            .await
            .context("Failed to read response body")?;
        Ok(ProxyResponse { status_code, body })
    }

    fn compare(exchange: &Exchange, expected: &ProxyResponse, actual: &ProxyResponse) -> SmokeCheck {
        let detail = if expected.status_code != actual.status_code {
            Some(format!("status {}", actual.status_code))
        } else {
            match exchange.body {
                BodyCheck::Exact => match (expected.json_body(), actual.json_body()) {
                    (None, _) if expected.body.is_empty() && actual.body.trim().is_empty() => None,
                    (Some(want), Some(got)) if want == got => None,
                    _ => Some("unexpected body".to_string()),
                },
                BodyCheck::Superset => match (expected.json_body(), actual.json_body()) {
                    (Some(Value::Array(want)), Some(Value::Array(got)))
                        if want.iter().all(|item| got.contains(item)) =>
                    {
                        None
                    }
                    _ => Some("missing records".to_string()),
                },
            }
        };

        SmokeCheck {
            name: exchange.name.to_string(),
            expected_status: expected.status_code,
            actual_status: actual.status_code,
            passed: detail.is_none(),
            detail,
        }
    }
}
