//! Endpoint reachability and latency.

use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde_json::Value;

use super::{merge_options, scan_failed_issue, Agent, IssueCallback, MonitorHub};
use crate::config::{EndpointConfig, NetworkOptions};
use crate::issue::{Category, Issue, Severity};
use crate::logger::Logger;
use crate::probe::HttpProbe;

const NAME: &str = "network";

fn invalid_endpoint(endpoint: &EndpointConfig, reason: impl std::fmt::Display) -> Issue {
    Issue::new(
        format!("Invalid endpoint: {}", endpoint.name),
        format!("Endpoint '{}' cannot be probed: {}", endpoint.name, reason),
        Severity::Medium,
        Category::Network,
        "endpoint-config",
    )
    .with_metadata("url", Value::String(endpoint.url.clone()))
    .with_suggestion("Fix the endpoint entry in network.endpoints")
}

/// Issues for one probe outcome.
pub(crate) fn classify_response(
    endpoint: &EndpointConfig,
    status: u16,
    elapsed_ms: u64,
    slow_threshold_ms: u64,
) -> Vec<Issue> {
    let mut issues = Vec::new();
    let unexpected = match endpoint.expected_status {
        Some(expected) => status != expected,
        None => !(200..300).contains(&status),
    };

    if unexpected {
        let (severity, title) = if status >= 500 {
            (Severity::High, format!("Server error {} from {}", status, endpoint.name))
        } else {
            (Severity::Medium, format!("Unexpected status {} from {}", status, endpoint.name))
        };
        let expected = endpoint
            .expected_status
            .map(|s| s.to_string())
            .unwrap_or_else(|| "2xx".to_string());
        issues.push(
            Issue::new(
                title,
                format!(
                    "{} {} returned {} (expected {})",
                    endpoint.method, endpoint.url, status, expected
                ),
                severity,
                Category::Network,
                "endpoint",
            )
            .with_metadata("url", Value::String(endpoint.url.clone()))
            .with_metadata("status", status.into())
            .with_suggestion("Check the service logs for this endpoint"),
        );
    }

    if slow_threshold_ms > 0 && elapsed_ms > slow_threshold_ms {
        issues.push(
            Issue::new(
                format!("Slow endpoint: {}", endpoint.name),
                format!(
                    "{} {} took {}ms (threshold {}ms)",
                    endpoint.method, endpoint.url, elapsed_ms, slow_threshold_ms
                ),
                Severity::Medium,
                Category::Performance,
                "latency",
            )
            .with_metadata("url", Value::String(endpoint.url.clone()))
            .with_metadata("duration_ms", elapsed_ms.into())
            .with_suggestion("Profile the handler or add caching"),
        );
    }
    issues
}

struct NetworkChecks {
    logger: Arc<Logger>,
    options: Arc<RwLock<NetworkOptions>>,
}

impl NetworkChecks {
    fn options(&self) -> NetworkOptions {
        self.options.read().map(|o| o.clone()).unwrap_or_default()
    }

    async fn run(&self) -> Vec<Issue> {
        let options = self.options();
        if !options.enabled || options.endpoints.is_empty() {
            return Vec::new();
        }

        let client = match reqwest::Client::builder()
            .timeout(Duration::from_millis(options.timeout_ms))
            .build()
        {
            Ok(client) => client,
            Err(e) => return vec![scan_failed_issue(NAME, Category::Network, "endpoint", e)],
        };

        let probes = options
            .endpoints
            .iter()
            .map(|endpoint| self.probe(&client, endpoint, &options));
        futures::future::join_all(probes)
            .await
            .into_iter()
            .flatten()
            .collect()
    }

    async fn probe(
        &self,
        client: &reqwest::Client,
        endpoint: &EndpointConfig,
        options: &NetworkOptions,
    ) -> Vec<Issue> {
        let url = match url::Url::parse(&endpoint.url) {
            Ok(url) if matches!(url.scheme(), "http" | "https") => url,
            Ok(url) => return vec![invalid_endpoint(endpoint, format!("unsupported scheme '{}'", url.scheme()))],
            Err(e) => return vec![invalid_endpoint(endpoint, e)],
        };
        let method = match reqwest::Method::from_bytes(endpoint.method.to_uppercase().as_bytes()) {
            Ok(method) => method,
            Err(e) => return vec![invalid_endpoint(endpoint, e)],
        };

        let started = Instant::now();
        let result = client.request(method, url).send().await;
        let elapsed_ms = started.elapsed().as_millis() as u64;

        match result {
            Ok(response) => {
                let status = response.status().as_u16();
                self.logger.debug(
                    NAME,
                    format!("{} -> {} in {}ms", endpoint.name, status, elapsed_ms),
                );
                classify_response(endpoint, status, elapsed_ms, options.slow_threshold_ms)
            }
            Err(e) => {
                let (title, suggestion) = if e.is_timeout() {
                    (
                        format!("Endpoint timed out: {}", endpoint.name),
                        "Check whether the service is overloaded or raise network.timeout_ms",
                    )
                } else {
                    (
                        format!("Endpoint unreachable: {}", endpoint.name),
                        "Verify the service is running and the URL is correct",
                    )
                };
                vec![Issue::new(
                    title,
                    format!("{} {} failed after {}ms: {}", endpoint.method, endpoint.url, elapsed_ms, e),
                    Severity::High,
                    Category::Network,
                    "endpoint",
                )
                .with_metadata("url", Value::String(endpoint.url.clone()))
                .with_suggestion(suggestion)]
            }
        }
    }
}

/// Probes configured endpoints and receives observations from [`HttpProbe`].
pub struct NetworkAgent {
    checks: Arc<NetworkChecks>,
    hub: Arc<MonitorHub>,
}

impl NetworkAgent {
    pub fn new(logger: Arc<Logger>) -> Self {
        Self {
            checks: Arc::new(NetworkChecks {
                logger,
                options: Arc::new(RwLock::new(NetworkOptions::default())),
            }),
            hub: MonitorHub::new(NAME),
        }
    }

    pub fn options(&self) -> NetworkOptions {
        self.checks.options()
    }

    /// Probe the host routes its outgoing requests through.
    pub fn http_probe(&self) -> HttpProbe {
        HttpProbe::new(Arc::clone(&self.hub), Arc::clone(&self.checks.options))
    }
}

#[async_trait]
impl Agent for NetworkAgent {
    fn name(&self) -> &str {
        NAME
    }

    fn category(&self) -> Category {
        Category::Network
    }

    fn configure(&self, options: &Value) -> anyhow::Result<()> {
        let updated = merge_options(NAME, &self.checks.options(), options)?;
        if let Ok(mut current) = self.checks.options.write() {
            *current = updated;
        }
        Ok(())
    }

    async fn scan(&self) -> anyhow::Result<Vec<Issue>> {
        Ok(self.checks.run().await)
    }

    fn supports_monitoring(&self) -> bool {
        true
    }

    fn monitor(&self, callback: IssueCallback) -> anyhow::Result<()> {
        if !self.hub.register(callback) {
            return Ok(());
        }
        let interval = Duration::from_secs(self.checks.options().ping_interval_secs);
        let checks = Arc::clone(&self.checks);
        let spawned = self.hub.spawn_periodic(interval, move || {
            let checks = Arc::clone(&checks);
            async move { checks.run().await }
        });
        if let Err(e) = spawned {
            self.hub.stop();
            return Err(e);
        }
        self.checks.logger.info(NAME, "Monitoring started");
        Ok(())
    }

    fn stop(&self) {
        if self.hub.stop() {
            self.checks.logger.info(NAME, "Monitoring stopped");
        }
    }

    fn set_repeat_window(&self, window: Duration) {
        self.hub.set_repeat_window(window);
    }

    fn is_active(&self) -> bool {
        self.hub.is_active()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logger::LogLevel;
    use axum::http::StatusCode;
    use axum::routing::get;
    use axum::Router;
    use serde_json::json;

    fn agent() -> NetworkAgent {
        NetworkAgent::new(Arc::new(Logger::silent(LogLevel::Error)))
    }

    fn endpoint(name: &str, url: &str) -> EndpointConfig {
        EndpointConfig {
            name: name.to_string(),
            url: url.to_string(),
            method: "GET".to_string(),
            expected_status: None,
        }
    }

    async fn spawn_server() -> String {
        let app = Router::new()
            .route("/ok", get(|| async { "ok" }))
            .route("/fail", get(|| async { (StatusCode::INTERNAL_SERVER_ERROR, "boom") }))
            .route("/missing", get(|| async { (StatusCode::NOT_FOUND, "nope") }))
            .route(
                "/slow",
                get(|| async {
                    tokio::time::sleep(Duration::from_millis(600)).await;
                    "late"
                }),
            );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}", addr)
    }

    #[test]
    fn test_classify_response() {
        let ep = endpoint("api", "http://x");
        assert!(classify_response(&ep, 200, 10, 1000).is_empty());
        assert_eq!(classify_response(&ep, 503, 10, 1000)[0].severity, Severity::High);
        assert_eq!(classify_response(&ep, 404, 10, 1000)[0].severity, Severity::Medium);

        let slow = classify_response(&ep, 200, 1500, 1000);
        assert_eq!(slow.len(), 1);
        assert_eq!(slow[0].category, Category::Performance);

        let expecting_redirect = EndpointConfig {
            expected_status: Some(302),
            ..endpoint("login", "http://x/login")
        };
        assert!(classify_response(&expecting_redirect, 302, 10, 1000).is_empty());
        assert_eq!(classify_response(&expecting_redirect, 200, 10, 1000).len(), 1);
    }

    #[tokio::test]
    async fn test_no_endpoints_no_issues() {
        assert!(agent().scan().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_invalid_endpoint_config() {
        let a = agent();
        a.configure(&json!({ "endpoints": [
            { "name": "bad", "url": "not a url" },
            { "name": "ftp", "url": "ftp://example.com" }
        ]}))
        .unwrap();
        let issues = a.scan().await.unwrap();
        assert_eq!(issues.len(), 2);
        assert!(issues.iter().all(|i| i.source == "endpoint-config"));
    }

    #[tokio::test]
    async fn test_probes_live_server() {
        let base = spawn_server().await;
        let a = agent();
        a.configure(&json!({
            "slow_threshold_ms": 400,
            "timeout_ms": 3000,
            "endpoints": [
                { "name": "ok", "url": format!("{}/ok", base) },
                { "name": "fail", "url": format!("{}/fail", base) },
                { "name": "missing", "url": format!("{}/missing", base) },
                { "name": "slow", "url": format!("{}/slow", base) }
            ]
        }))
        .unwrap();

        let issues = a.scan().await.unwrap();
        assert_eq!(issues.len(), 3);
        assert!(issues.iter().any(|i| i.title == "Server error 500 from fail" && i.severity == Severity::High));
        assert!(issues.iter().any(|i| i.title == "Unexpected status 404 from missing"));
        assert!(issues.iter().any(|i| i.title == "Slow endpoint: slow"));
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_is_high() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let a = agent();
        a.configure(&json!({ "endpoints": [{ "name": "gone", "url": format!("http://{}/", addr) }] }))
            .unwrap();
        let issues = a.scan().await.unwrap();
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].severity, Severity::High);
        assert_eq!(issues[0].source, "endpoint");
    }

    #[tokio::test]
    async fn test_http_probe_shares_options() {
        let a = agent();
        let probe = a.http_probe();
        a.configure(&json!({ "slow_threshold_ms": 5 })).unwrap();

        let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
        let s = Arc::clone(&seen);
        a.monitor(Arc::new(move |issue: Issue| s.lock().unwrap().push(issue)))
            .unwrap();
        assert!(probe.record(&crate::probe::HttpCall::completed("GET", "/x", 200, 50)));
        a.stop();
        assert_eq!(seen.lock().unwrap()[0].category, Category::Performance);
    }
}
