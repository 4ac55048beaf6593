/**
 * CACHE RESILIENCE MANAGER - Interception des lectures réseau avec cache versionné
 *
 * RÔLE : Garder le dashboard disponible quand le réseau tombe.
 *
 * FONCTIONNEMENT :
 * - install(manifest) : télécharge tout le manifest puis crée l'époque d'un bloc
 *   (un seul échec = rien n'est écrit, l'époque précédente continue de servir)
 * - activate() : l'époque installée devient active, toutes les autres sont purgées
 * - handle(request) :
 *     contenu statique local en cache  -> servi depuis le cache
 *     sinon réseau                      -> réponse + écriture cache en tâche de fond
 *     réseau KO                         -> cache, sinon page hors-ligne (documents),
 *                                          sinon erreur Offline
 * - hors GET ou hors http(s) : passe-plat, le cache n'est jamais consulté
 */

pub mod fetch;
pub mod storage;

pub use fetch::{
    CacheRequest, Destination, FetchError, FetchedResponse, Fetcher, HttpFetcher, Method, RequestKey, Url,
};
pub use storage::{CacheEntry, CacheStorage, EpochInfo, ResponseKind};

use futures::future::try_join_all;
use parking_lot::Mutex;
use std::sync::Arc;
use time::OffsetDateTime;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

const STATIC_EXTENSIONS: [&str; 13] = [
    "html", "css", "js", "mjs", "json", "webmanifest", "png", "jpg", "jpeg", "svg", "ico", "woff", "woff2",
];

pub const OFFLINE_PLACEHOLDER: &str = "<!DOCTYPE html>\n<html lang=\"en\">\n<head><meta charset=\"utf-8\"><title>Factory dashboard - offline</title></head>\n<body>\n<h1>Offline</h1>\n<p>The factory dashboard is not reachable right now. Cached data will be shown again as soon as the connection comes back.</p>\n</body>\n</html>\n";

#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("invalid URL {url}: {reason}")]
    InvalidUrl { url: String, reason: String },
    #[error("install of {url} failed: {reason}")]
    Install { url: String, reason: String },
    #[error("offline and no cached copy of {url}: {reason}")]
    Offline { url: String, reason: String },
    #[error("network error for {url}: {reason}")]
    Network { url: String, reason: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseSource {
    Cache,
    Network,
    Placeholder,
}

/// Réponse livrée à l'appelant
#[derive(Debug, Clone, PartialEq)]
pub struct ManagedResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
    pub source: ResponseSource,
}

impl ManagedResponse {
    fn from_network(response: FetchedResponse) -> Self {
        Self {
            status: response.status,
            headers: response.headers,
            body: response.body,
            source: ResponseSource::Network,
        }
    }

    fn from_cache(entry: CacheEntry) -> Self {
        Self {
            status: entry.status,
            headers: entry.headers,
            body: entry.body,
            source: ResponseSource::Cache,
        }
    }

    fn placeholder() -> Self {
        Self {
            status: 503,
            headers: vec![("content-type".into(), "text/html; charset=utf-8".into())],
            body: OFFLINE_PLACEHOLDER.as_bytes().to_vec(),
            source: ResponseSource::Placeholder,
        }
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

pub struct CacheResilienceManager<F: Fetcher> {
    storage: Arc<CacheStorage>,
    fetcher: Arc<F>,
    version: String,
    origin: Url,
    /// Époque installée en attente d'activation
    installed: Mutex<Option<String>>,
    writes: Mutex<JoinSet<()>>,
}

impl<F: Fetcher> CacheResilienceManager<F> {
    pub fn new(storage: Arc<CacheStorage>, fetcher: Arc<F>, version: impl Into<String>, origin: Url) -> Self {
        Self {
            storage,
            fetcher,
            version: version.into(),
            origin,
            installed: Mutex::new(None),
            writes: Mutex::new(JoinSet::new()),
        }
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn origin(&self) -> &Url {
        &self.origin
    }

    pub fn storage(&self) -> &Arc<CacheStorage> {
        &self.storage
    }

    pub fn active_epoch(&self) -> Option<String> {
        self.storage.active_epoch()
    }

    /// Résout un chemin local ("/app.js") ou une URL absolue contre l'origine
    pub fn resolve(&self, path_or_url: &str) -> Result<Url, CacheError> {
        self.origin.join(path_or_url).map_err(|e| CacheError::InvalidUrl {
            url: path_or_url.to_string(),
            reason: e.to_string(),
        })
    }

    pub fn is_same_origin(&self, url: &Url) -> bool {
        url.origin() == self.origin.origin()
    }

    /// Contenu statique local : même origine, hors /api/, extension connue ou racine
    pub fn is_static(&self, url: &Url) -> bool {
        if !self.is_same_origin(url) {
            return false;
        }
        let path = url.path();
        if path.starts_with("/api/") {
            return false;
        }
        if path == "/" {
            return true;
        }
        path.rsplit_once('.')
            .map(|(_, ext)| STATIC_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
            .unwrap_or(false)
    }

    fn classify(&self, url: &Url, status: u16) -> ResponseKind {
        if self.is_same_origin(url) {
            ResponseKind::Basic
        } else if status == 0 {
            ResponseKind::Opaque
        } else {
            ResponseKind::Cors
        }
    }

    fn entry(&self, key: RequestKey, epoch: &str, response: &FetchedResponse, kind: ResponseKind) -> CacheEntry {
        CacheEntry {
            key,
            epoch: epoch.to_string(),
            status: response.status,
            headers: response.headers.clone(),
            body: response.body.clone(),
            kind,
            stored_at: OffsetDateTime::now_utc(),
        }
    }

    /// Précache le manifest dans une nouvelle époque, tout ou rien
    pub async fn install(&self, manifest: &[String]) -> Result<(), CacheError> {
        let urls = manifest
            .iter()
            .map(|item| self.resolve(item))
            .collect::<Result<Vec<_>, _>>()?;

        let fetches = urls.into_iter().map(|url| async move {
            let request = CacheRequest::get(url);
            let response = self.fetcher.fetch(&request).await.map_err(|e| CacheError::Install {
                url: request.url.to_string(),
                reason: e.to_string(),
            })?;
            if !response.is_success() {
                return Err(CacheError::Install {
                    url: request.url.to_string(),
                    reason: format!("status {}", response.status),
                });
            }
            let kind = self.classify(&request.url, response.status);
            Ok(self.entry(request.key(), &self.version, &response, kind))
        });

        let entries = match try_join_all(fetches).await {
            Ok(entries) => entries,
            Err(e) => {
                warn!("[cache] install of {} aborted: {e}", self.version);
                return Err(e);
            }
        };

        let count = entries.len();
        self.storage.put_epoch(&self.version, entries);
        *self.installed.lock() = Some(self.version.clone());
        info!("[cache] installed epoch {} ({count} resources)", self.version);
        Ok(())
    }

    /// Active l'époque installée et purge toutes les autres
    pub fn activate(&self) {
        let Some(epoch) = self.installed.lock().take() else {
            warn!("[cache] activate called with no installed epoch");
            return;
        };
        match self.storage.activate(&epoch) {
            Some(purged) => {
                for old in &purged {
                    info!("[cache] deleted epoch {old}");
                }
                info!("[cache] epoch {epoch} active");
            }
            None => warn!("[cache] installed epoch {epoch} vanished before activation"),
        }
    }

    /// Lecture directe dans l'époque active, sans réseau
    pub fn lookup(&self, request: &CacheRequest) -> Option<CacheEntry> {
        self.storage.match_active(&request.key())
    }

    pub async fn handle(&self, request: &CacheRequest) -> Result<ManagedResponse, CacheError> {
        if request.method != Method::GET || !matches!(request.url.scheme(), "http" | "https") {
            return self
                .fetcher
                .fetch(request)
                .await
                .map(ManagedResponse::from_network)
                .map_err(|e| CacheError::Network { url: request.url.to_string(), reason: e.to_string() });
        }

        let key = request.key();
        if self.is_static(&request.url) {
            if let Some(entry) = self.storage.match_active(&key) {
                debug!("[cache] hit {}", key.url);
                return Ok(ManagedResponse::from_cache(entry));
            }
        }

        match self.fetcher.fetch(request).await {
            Ok(response) => {
                let kind = self.classify(&request.url, response.status);
                if response.is_success() && kind != ResponseKind::Opaque {
                    self.store_in_background(key, &response, kind);
                }
                Ok(ManagedResponse::from_network(response))
            }
            Err(e) => {
                if let Some(entry) = self.storage.match_active(&key) {
                    debug!("[cache] network down, serving cached {}", key.url);
                    return Ok(ManagedResponse::from_cache(entry));
                }
                if request.destination == Destination::Document {
                    debug!("[cache] network down, offline page for {}", key.url);
                    return Ok(ManagedResponse::placeholder());
                }
                Err(CacheError::Offline { url: key.url, reason: e.to_string() })
            }
        }
    }

    fn store_in_background(&self, key: RequestKey, response: &FetchedResponse, kind: ResponseKind) {
        let Some(epoch) = self.storage.active_epoch() else {
            return;
        };
        let entry = self.entry(key, &epoch, response, kind);
        let storage = self.storage.clone();

        let mut writes = self.writes.lock();
        while writes.try_join_next().is_some() {}
        writes.spawn(async move {
            let url = entry.key.url.clone();
            if !storage.store_if_active(entry) {
                debug!("[cache] dropped write of {url}: epoch {epoch} retired");
            }
        });
    }

    /// Attend la fin des écritures cache en tâche de fond
    pub async fn settle(&self) {
        let mut pending = std::mem::take(&mut *self.writes.lock());
        while pending.join_next().await.is_some() {}
    }
}
