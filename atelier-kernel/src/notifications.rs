/**
 * NOTIFICATION GATEWAY - Remontée des alertes atelier vers l'opérateur
 *
 * RÔLE : Transformer une alerte télémétrie en notification et traiter
 * les actions de l'opérateur dessus.
 *
 * FONCTIONNEMENT :
 * - show_alert(message) : notification taggée "factory-alert", actions view/close.
 *   Une nouvelle alerte remplace la précédente (même tag).
 * - handle_action(action) : view -> ouvre "/" puis ferme, close -> ferme,
 *   le reste est ignoré.
 * - L'affichage réel est délégué à un NotificationSink.
 */

use serde::Serialize;
use std::collections::BTreeMap;
use time::OffsetDateTime;
use tracing::{debug, info};
use uuid::Uuid;

pub const ALERT_TAG: &str = "factory-alert";
pub const ALERT_TITLE: &str = "Factory alert";
pub const ROOT_DOCUMENT: &str = "/";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NotificationAction {
    pub action: String,
    pub title: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Notification {
    pub id: Uuid,
    pub title: String,
    pub body: String,
    pub tag: String,
    pub actions: Vec<NotificationAction>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

impl Notification {
    pub fn alert(message: impl Into<String>, now: OffsetDateTime) -> Self {
        Self {
            id: Uuid::new_v4(),
            title: ALERT_TITLE.to_string(),
            body: message.into(),
            tag: ALERT_TAG.to_string(),
            actions: vec![
                NotificationAction { action: "view".into(), title: "View dashboard".into() },
                NotificationAction { action: "close".into(), title: "Dismiss".into() },
            ],
            created_at: now,
        }
    }
}

/// Action reçue de l'opérateur
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AlertAction {
    View,
    Close,
    Other(String),
}

impl AlertAction {
    pub fn parse(action: &str) -> Self {
        match action {
            "view" => AlertAction::View,
            "close" => AlertAction::Close,
            other => AlertAction::Other(other.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", content = "path", rename_all = "snake_case")]
pub enum ActionOutcome {
    OpenedDocument(String),
    Dismissed,
    Ignored,
}

/// Surface d'affichage des notifications
pub trait NotificationSink: Send + 'static {
    /// Affiche `notification`, en remplaçant celle qui porte le même tag
    fn display(&mut self, notification: Notification);
    fn dismiss(&mut self, tag: &str) -> Option<Notification>;
    fn open_document(&mut self, path: &str);
    fn current(&self) -> Vec<Notification>;
}

/// Sink par défaut : garde la notification courante par tag et journalise
#[derive(Debug, Default)]
pub struct NotificationCenter {
    by_tag: BTreeMap<String, Notification>,
    last_opened: Option<String>,
}

impl NotificationCenter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Dernier document ouvert par une action "view"
    pub fn last_opened(&self) -> Option<&str> {
        self.last_opened.as_deref()
    }
}

impl NotificationSink for NotificationCenter {
    fn display(&mut self, notification: Notification) {
        info!("[notify] {}: {}", notification.title, notification.body);
        if let Some(previous) = self.by_tag.insert(notification.tag.clone(), notification) {
            debug!("[notify] replaced notification {}", previous.id);
        }
    }

    fn dismiss(&mut self, tag: &str) -> Option<Notification> {
        self.by_tag.remove(tag)
    }

    fn open_document(&mut self, path: &str) {
        info!("[notify] opening {path}");
        self.last_opened = Some(path.to_string());
    }

    fn current(&self) -> Vec<Notification> {
        self.by_tag.values().cloned().collect()
    }
}

pub struct NotificationGateway<S: NotificationSink = NotificationCenter> {
    sink: S,
}

impl Default for NotificationGateway<NotificationCenter> {
    fn default() -> Self {
        Self::new(NotificationCenter::new())
    }
}

impl<S: NotificationSink> NotificationGateway<S> {
    pub fn new(sink: S) -> Self {
        Self { sink }
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn show_alert(&mut self, message: &str, now: OffsetDateTime) -> Uuid {
        let notification = Notification::alert(message, now);
        let id = notification.id;
        self.sink.display(notification);
        id
    }

    pub fn handle_action(&mut self, action: &str) -> ActionOutcome {
        match AlertAction::parse(action) {
            AlertAction::View => {
                self.sink.open_document(ROOT_DOCUMENT);
                self.sink.dismiss(ALERT_TAG);
                ActionOutcome::OpenedDocument(ROOT_DOCUMENT.to_string())
            }
            AlertAction::Close => {
                self.sink.dismiss(ALERT_TAG);
                ActionOutcome::Dismissed
            }
            AlertAction::Other(other) => {
                debug!("[notify] ignoring action '{other}'");
                ActionOutcome::Ignored
            }
        }
    }

    pub fn current(&self) -> Vec<Notification> {
        self.sink.current()
    }
}
