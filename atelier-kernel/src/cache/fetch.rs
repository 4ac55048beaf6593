use serde::Serialize;
use std::future::Future;

pub use reqwest::{Method, Url};

/// En-têtes conservés dans une entrée de cache
pub const KEPT_HEADERS: [&str; 4] = ["content-type", "cache-control", "etag", "last-modified"];

/// Nature de la ressource demandée (équivalent de `request.destination`)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Destination {
    Document,
    Style,
    Script,
    Image,
    Font,
    Manifest,
    Other,
}

impl Destination {
    /// Devine la destination d'après l'extension du chemin
    pub fn from_url(url: &Url) -> Self {
        let ext = url
            .path()
            .rsplit('/')
            .next()
            .and_then(|file| file.rsplit_once('.'))
            .map(|(_, ext)| ext.to_ascii_lowercase());
        match ext.as_deref() {
            None | Some("html" | "htm") => Destination::Document,
            Some("css") => Destination::Style,
            Some("js" | "mjs") => Destination::Script,
            Some("png" | "jpg" | "jpeg" | "svg" | "ico" | "gif" | "webp") => Destination::Image,
            Some("woff" | "woff2" | "ttf" | "otf") => Destination::Font,
            Some("json" | "webmanifest") => Destination::Manifest,
            Some(_) => Destination::Other,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CacheRequest {
    pub method: Method,
    pub url: Url,
    pub destination: Destination,
}

/// Identité canonique d'une requête : méthode + URL sans fragment
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RequestKey {
    pub method: String,
    pub url: String,
}

impl CacheRequest {
    pub fn get(url: Url) -> Self {
        let destination = Destination::from_url(&url);
        Self { method: Method::GET, url, destination }
    }

    pub fn with_destination(mut self, destination: Destination) -> Self {
        self.destination = destination;
        self
    }

    pub fn key(&self) -> RequestKey {
        let mut url = self.url.clone();
        url.set_fragment(None);
        RequestKey { method: self.method.as_str().to_string(), url: url.to_string() }
    }
}

/// Réponse réseau brute
#[derive(Debug, Clone, PartialEq)]
pub struct FetchedResponse {
    /// 0 = réponse opaque (corps et statut illisibles)
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl FetchedResponse {
    pub fn ok(content_type: &str, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status: 200,
            headers: vec![("content-type".into(), content_type.into())],
            body: body.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum FetchError {
    #[error("network unreachable: {0}")]
    Network(String),
}

/// Accès réseau sortant
pub trait Fetcher: Send + Sync + 'static {
    fn fetch(
        &self,
        request: &CacheRequest,
    ) -> impl Future<Output = Result<FetchedResponse, FetchError>> + Send;
}

/// Fetcher de production basé sur reqwest
#[derive(Debug, Clone, Default)]
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

impl Fetcher for HttpFetcher {
    async fn fetch(&self, request: &CacheRequest) -> Result<FetchedResponse, FetchError> {
        let response = self
            .client
            .request(request.method.clone(), request.url.clone())
            .send()
            .await
            .map_err(|e| FetchError::Network(e.to_string()))?;

        let status = response.status().as_u16();
        let headers = KEPT_HEADERS
            .iter()
            .filter_map(|name| {
                let value = response.headers().get(*name)?.to_str().ok()?;
                Some((name.to_string(), value.to_string()))
            })
            .collect();
        let body = response
            .bytes()
            .await
            .map_err(|e| FetchError::Network(e.to_string()))?
            .to_vec();

        Ok(FetchedResponse { status, headers, body })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    #[test]
    fn test_destination_from_extension() {
        assert_eq!(Destination::from_url(&url("http://h/")), Destination::Document);
        assert_eq!(Destination::from_url(&url("http://h/index.html")), Destination::Document);
        assert_eq!(Destination::from_url(&url("http://h/styles.css")), Destination::Style);
        assert_eq!(Destination::from_url(&url("http://h/app.js")), Destination::Script);
        assert_eq!(Destination::from_url(&url("http://h/manifest.json")), Destination::Manifest);
        assert_eq!(Destination::from_url(&url("http://h/fonts/a.WOFF2")), Destination::Font);
        assert_eq!(Destination::from_url(&url("http://h/data.bin")), Destination::Other);
    }

    #[test]
    fn test_key_ignores_fragment() {
        let a = CacheRequest::get(url("http://h/index.html#panel"));
        let b = CacheRequest::get(url("http://h/index.html"));
        assert_eq!(a.key(), b.key());
        assert_eq!(a.key().method, "GET");
    }
}
