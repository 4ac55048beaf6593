/*!
Réseau HTTP simulé pour le cache résilient

Table de routes URL -> réponse, bascule hors-ligne et journal des appels.
*/

use atelier_kernel::cache::{CacheRequest, FetchError, FetchedResponse, Fetcher};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

#[derive(Clone, Default)]
pub struct MockFetcher {
    routes: Arc<Mutex<HashMap<String, FetchedResponse>>>,
    offline: Arc<AtomicBool>,
    calls: Arc<Mutex<Vec<String>>>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

impl MockFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sert `response` pour l'URL absolue `url`
    pub fn route(&self, url: &str, response: FetchedResponse) -> &Self {
        lock(&self.routes).insert(url.to_string(), response);
        self
    }

    pub fn route_text(&self, url: &str, content_type: &str, body: &str) -> &Self {
        self.route(url, FetchedResponse::ok(content_type, body))
    }

    pub fn route_json(&self, url: &str, body: &Value) -> &Self {
        self.route(url, FetchedResponse::ok("application/json", body.to_string()))
    }

    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
        log::info!("[mock-fetcher] network {}", if offline { "down" } else { "up" });
    }

    pub fn calls(&self) -> Vec<String> {
        lock(&self.calls).clone()
    }

    pub fn call_count(&self) -> usize {
        lock(&self.calls).len()
    }
}

impl Fetcher for MockFetcher {
    async fn fetch(&self, request: &CacheRequest) -> Result<FetchedResponse, FetchError> {
        lock(&self.calls).push(format!("{} {}", request.method, request.url));
        if self.offline.load(Ordering::SeqCst) {
            return Err(FetchError::Network("mock network offline".into()));
        }
        let found = lock(&self.routes).get(request.url.as_str()).cloned();
        Ok(found.unwrap_or(FetchedResponse { status: 404, headers: vec![], body: b"not found".to_vec() }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use atelier_kernel::cache::Url;

    #[tokio::test]
    async fn test_routes_offline_and_call_log() {
        let fetcher = MockFetcher::new();
        fetcher.route_text("http://factory.test/app.js", "text/javascript", "boot()");
        let request = CacheRequest::get(Url::parse("http://factory.test/app.js").unwrap());

        let response = fetcher.fetch(&request).await.unwrap();
        assert_eq!(response.body, b"boot()");

        let missing = CacheRequest::get(Url::parse("http://factory.test/none.css").unwrap());
        assert_eq!(fetcher.fetch(&missing).await.unwrap().status, 404);

        fetcher.set_offline(true);
        assert!(fetcher.fetch(&request).await.is_err());
        assert_eq!(fetcher.call_count(), 3);
        assert_eq!(fetcher.calls()[0], "GET http://factory.test/app.js");
    }
}
