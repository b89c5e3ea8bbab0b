//! Requests made to the backend API. Everything goes through [ApiTransport] so the request
//! shapes can be checked without a server.

use std::time::Duration;

use anyhow::{Context, Result};

use crate::related_errors::{ErrorEventRow, RelatedErrors, RelatedErrorsQuery};
use crate::task_timer::TaskTimer;

/// Number of related error rows requested from the backend.
pub const RELATED_ERRORS_PER_PAGE: usize = 50;

/// Response header carrying the number of rows matched across all pages.
pub const HITS_HEADER: &str = "X-Hits";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Put,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ApiRequest {
    pub method: Method,
    /// Relative to the API base url, e.g. `/promptsactivity/`
    pub path: String,
    pub query: Vec<(String, String)>,
    pub body: Option<serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct ApiResponse {
    pub body: serde_json::Value,
    /// Total number of matching rows, when the backend reports it. The body only holds one page.
    pub total_hits: Option<usize>,
}

impl ApiResponse {
    pub fn new(body: serde_json::Value) -> ApiResponse {
        ApiResponse {
            body,
            total_hits: None,
        }
    }
}

pub trait ApiTransport {
    fn send(&self, request: ApiRequest) -> Result<ApiResponse>;
}

pub struct ReqwestTransport {
    client: reqwest::blocking::Client,
    base_url: String,
}

impl ReqwestTransport {
    pub fn new(base_url: &str, auth_token: Option<&str>) -> Result<ReqwestTransport> {
        let mut headers = reqwest::header::HeaderMap::new();
        if let Some(token) = auth_token {
            headers.insert(
                reqwest::header::AUTHORIZATION,
                reqwest::header::HeaderValue::from_str(&format!("Bearer {token}"))
                    .context("creating authorization header")?,
            );
        }
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(10))
            .default_headers(headers)
            .build()
            .context("building reqwest client")?;
        Ok(ReqwestTransport {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }
}

impl ApiTransport for ReqwestTransport {
    fn send(&self, request: ApiRequest) -> Result<ApiResponse> {
        let url = format!("{}{}", self.base_url, request.path);
        let mut builder = match request.method {
            Method::Get => self.client.get(&url),
            Method::Put => self.client.put(&url),
        };
        builder = builder.query(&request.query);
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let response = builder
            .send()
            .with_context(|| format!("sending request to {url}"))?;
        let status = response.status();
        if !status.is_success() {
            let text = response.text().unwrap_or_default();
            anyhow::bail!("{url} responded with {status}: {text}");
        }

        let total_hits = response
            .headers()
            .get(HITS_HEADER)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.trim().parse::<usize>().ok());

        let text = response.text().context("reading response body")?;
        let body = if text.trim().is_empty() {
            serde_json::Value::Null
        } else {
            serde_json::from_str(&text)
                .with_context(|| format!("decoding response from {url}"))?
        };
        Ok(ApiResponse { body, total_hits })
    }
}

#[derive(Debug, serde::Deserialize)]
struct TableData {
    #[serde(default)]
    data: Vec<ErrorEventRow>,
}

pub fn related_errors_request(org_slug: &str, query: &RelatedErrorsQuery) -> ApiRequest {
    let mut params: Vec<(String, String)> = query
        .fields
        .iter()
        .map(|field| ("field".to_string(), field.clone()))
        .collect();
    params.push(("sort".to_string(), query.orderby.clone()));
    params.push(("query".to_string(), query.query_string()));
    params.push(("start".to_string(), query.start.clone()));
    params.push(("end".to_string(), query.end.clone()));
    params.push(("per_page".to_string(), RELATED_ERRORS_PER_PAGE.to_string()));

    ApiRequest {
        method: Method::Get,
        path: format!("/organizations/{org_slug}/eventsv2/"),
        query: params,
        body: None,
    }
}

/// Only the first page of rows is fetched, the total comes from the hits header.
pub fn fetch_related_errors(
    transport: &impl ApiTransport,
    org_slug: &str,
    query: &RelatedErrorsQuery,
) -> Result<RelatedErrors> {
    let t = TaskTimer::new("Fetching related errors");
    let response = transport.send(related_errors_request(org_slug, query))?;
    let table: TableData =
        serde_json::from_value(response.body).context("decoding related errors table")?;
    t.stop();

    let total = response
        .total_hits
        .map_or(table.data.len(), |hits| hits.max(table.data.len()));
    Ok(RelatedErrors {
        rows: table.data,
        total,
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PromptStatus {
    Snoozed,
    Dismissed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptsUpdateParams {
    /// The numeric organization ID
    pub organization_id: String,
    /// The numeric project ID
    pub project_id: Option<String>,
    pub feature: String,
    pub status: PromptStatus,
}

#[derive(Debug, serde::Serialize)]
struct PromptsUpdateBody<'a> {
    organization_id: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    project_id: Option<&'a str>,
    feature: &'a str,
    status: PromptStatus,
}

/// Records that the user snoozed or dismissed a prompt.
pub fn prompts_update(
    transport: &impl ApiTransport,
    params: &PromptsUpdateParams,
) -> Result<serde_json::Value> {
    let body = PromptsUpdateBody {
        organization_id: &params.organization_id,
        project_id: params.project_id.as_deref(),
        feature: &params.feature,
        status: params.status,
    };
    let response = transport.send(ApiRequest {
        method: Method::Put,
        path: "/promptsactivity/".to_string(),
        query: vec![],
        body: Some(serde_json::to_value(body)?),
    })?;
    Ok(response.body)
}
