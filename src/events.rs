use tokio::sync::broadcast;

/// Lifecycle event emitted by the grammar service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GrammarEvent {
    Initialized,
    Error(String),
    LanguageInstalled(String),
    LanguageUninstalled(String),
}

impl std::fmt::Display for GrammarEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GrammarEvent::Initialized => write!(f, "initialized"),
            GrammarEvent::Error(message) => write!(f, "error: {message}"),
            GrammarEvent::LanguageInstalled(id) => write!(f, "language-installed: {id}"),
            GrammarEvent::LanguageUninstalled(id) => write!(f, "language-uninstalled: {id}"),
        }
    }
}

/// Fan-out channel for [`GrammarEvent`]s. Sending never fails; events with no
/// subscriber are dropped.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<GrammarEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<GrammarEvent> {
        self.tx.subscribe()
    }

    pub fn emit(&self, event: GrammarEvent) {
        let _ = self.tx.send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(64)
    }
}
