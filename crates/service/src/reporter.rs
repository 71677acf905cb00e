use std::{
    error::Error as _,
    mem,
    sync::Mutex,
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use reqwest::Client;
use serde_json::{json, Value};
use storage_roots::{Error, Reporter};
use tokio::time;

/// Buffers error events and posts them to the error tracking endpoint on flush.
///
/// Without a report url, events are only logged.
#[derive(Debug, Default)]
pub struct ErrorReporter {
    client: Client,
    url: Option<String>,
    events: Mutex<Vec<Value>>,
}

impl ErrorReporter {
    pub fn new(url: Option<String>) -> Self {
        Self {
            client: Client::new(),
            url,
            events: Mutex::new(Vec::new()),
        }
    }

    #[cfg(test)]
    pub fn pending(&self) -> usize {
        self.events.lock().map(|e| e.len()).unwrap_or_default()
    }

    fn take(&self) -> Vec<Value> {
        match self.events.lock() {
            Ok(mut events) => mem::take(&mut *events),
            Err(poisoned) => mem::take(&mut *poisoned.into_inner()),
        }
    }
}

impl Reporter for ErrorReporter {
    fn capture(&self, error: &Error) {
        let mut chain = Vec::new();
        let mut source = error.source();

        while let Some(e) = source {
            chain.push(e.to_string());
            source = e.source();
        }

        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|t| t.as_secs())
            .unwrap_or_default();

        let event = json!({
            "message": error.to_string(),
            "chain": chain,
            "timestamp": timestamp,
        });

        tracing::debug!("captured error event {event}...");

        match self.events.lock() {
            Ok(mut events) => events.push(event),
            Err(poisoned) => poisoned.into_inner().push(event),
        }
    }

    async fn flush(&self, timeout: Duration) -> bool {
        let events = self.take();

        if events.is_empty() {
            return true;
        }

        let Some(url) = &self.url else {
            tracing::debug!("no report url; {} events dropped...", events.len());
            return true;
        };

        let count = events.len();
        let request = self
            .client
            .post(url)
            .json(&json!({ "events": events }))
            .send();

        match time::timeout(timeout, request).await {
            Ok(Ok(r)) if r.status().is_success() => {
                tracing::debug!("{count} error events reported...");
                true
            }
            Ok(Ok(r)) => {
                tracing::warn!("error report rejected with status {}", r.status());
                false
            }
            Ok(Err(e)) => {
                tracing::warn!("error posting the error report: {e}");
                false
            }
            Err(_) => false,
        }
    }
}

#[cfg(test)]
fn upstream_failure() -> Error {
    Error::upstream(
        "eth_getProof",
        anyhow::anyhow!("connection reset").context("sending request"),
    )
}

#[tokio::test]
async fn capture_records_the_error_chain() {
    let reporter = ErrorReporter::new(None);

    reporter.capture(&upstream_failure());
    reporter.capture(&Error::invalid_argument("missing `blockhash` parameter"));

    assert_eq!(reporter.pending(), 2);

    let events = reporter.take();

    assert_eq!(
        events[0]["message"],
        "upstream `eth_getProof` call failed: sending request: connection reset"
    );
    assert_eq!(events[0]["chain"][0], "sending request");
    assert!(events[0]["timestamp"].as_u64().unwrap() > 0);
    assert_eq!(events[1]["chain"], json!([]));
}

#[tokio::test]
async fn flush_without_url_drains() {
    let reporter = ErrorReporter::new(None);

    reporter.capture(&upstream_failure());

    assert!(reporter.flush(Duration::from_millis(10)).await);
    assert_eq!(reporter.pending(), 0);
}

#[cfg(test)]
static REPORTED: Mutex<Vec<Value>> = Mutex::new(Vec::new());

#[cfg(test)]
#[poem::handler]
fn collect(poem::web::Json(body): poem::web::Json<Value>) -> &'static str {
    REPORTED.lock().unwrap().push(body);
    "ok"
}

#[tokio::test]
async fn flush_posts_the_buffered_events() {
    let url = crate::spawn_mock(collect).await;
    let reporter = ErrorReporter::new(Some(url));

    reporter.capture(&upstream_failure());

    assert!(reporter.flush(Duration::from_secs(5)).await);
    assert_eq!(reporter.pending(), 0);

    let reported = REPORTED.lock().unwrap().clone();

    assert_eq!(reported.len(), 1);
    assert_eq!(reported[0]["events"].as_array().unwrap().len(), 1);
}

#[cfg(test)]
#[poem::handler]
async fn stall() -> &'static str {
    time::sleep(Duration::from_secs(30)).await;
    "ok"
}

#[tokio::test]
async fn flush_is_bounded() {
    let url = crate::spawn_mock(stall).await;
    let reporter = ErrorReporter::new(Some(url));

    reporter.capture(&upstream_failure());

    let flushed = time::timeout(
        Duration::from_secs(5),
        reporter.flush(Duration::from_millis(50)),
    )
    .await
    .expect("flush exceeded its timeout");

    assert!(!flushed);
}
