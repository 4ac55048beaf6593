use super::fetch::RequestKey;
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use time::OffsetDateTime;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseKind {
    /// Même origine
    Basic,
    /// Origine externe, corps lisible
    Cors,
    /// Origine externe, statut/corps illisibles
    Opaque,
}

/// Réponse capturée, toujours écrite d'un bloc
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
    pub key: RequestKey,
    pub epoch: String,
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
    pub kind: ResponseKind,
    pub stored_at: OffsetDateTime,
}

type Epoch = HashMap<RequestKey, CacheEntry>;

#[derive(Debug, Default)]
struct Inner {
    epochs: BTreeMap<String, Epoch>,
    active: Option<String>,
}

/// Stockage partagé des époques de cache.
///
/// Toutes les opérations prennent le verrou une seule fois : un lecteur voit
/// l'ancienne ou la nouvelle époque, jamais un mélange.
#[derive(Debug, Default)]
pub struct CacheStorage {
    inner: RwLock<Inner>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EpochInfo {
    pub name: String,
    pub entries: usize,
    pub active: bool,
}

impl CacheStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Remplace (ou crée) une époque complète en une seule écriture
    pub fn put_epoch(&self, name: &str, entries: Vec<CacheEntry>) {
        let epoch: Epoch = entries.into_iter().map(|e| (e.key.clone(), e)).collect();
        self.inner.write().epochs.insert(name.to_string(), epoch);
    }

    /// Active `name` et supprime toutes les autres époques; retourne les purgées
    pub fn activate(&self, name: &str) -> Option<Vec<String>> {
        let mut inner = self.inner.write();
        if !inner.epochs.contains_key(name) {
            return None;
        }
        let purged: Vec<String> = inner.epochs.keys().filter(|k| *k != name).cloned().collect();
        inner.epochs.retain(|k, _| k == name);
        inner.active = Some(name.to_string());
        Some(purged)
    }

    pub fn active_epoch(&self) -> Option<String> {
        self.inner.read().active.clone()
    }

    pub fn match_active(&self, key: &RequestKey) -> Option<CacheEntry> {
        let inner = self.inner.read();
        let active = inner.active.as_ref()?;
        inner.epochs.get(active)?.get(key).cloned()
    }

    pub fn get(&self, epoch: &str, key: &RequestKey) -> Option<CacheEntry> {
        self.inner.read().epochs.get(epoch)?.get(key).cloned()
    }

    /// Écrit l'entrée seulement si son époque est toujours l'époque active
    pub fn store_if_active(&self, entry: CacheEntry) -> bool {
        let mut inner = self.inner.write();
        if inner.active.as_deref() != Some(entry.epoch.as_str()) {
            return false;
        }
        let epoch = entry.epoch.clone();
        match inner.epochs.get_mut(&epoch) {
            Some(entries) => {
                entries.insert(entry.key.clone(), entry);
                true
            }
            None => false,
        }
    }

    pub fn epochs(&self) -> Vec<EpochInfo> {
        let inner = self.inner.read();
        inner
            .epochs
            .iter()
            .map(|(name, entries)| EpochInfo {
                name: name.clone(),
                entries: entries.len(),
                active: inner.active.as_deref() == Some(name.as_str()),
            })
            .collect()
    }
}
