//! Insert listeners keyed by database and collection
//!
//! Registration appends; nothing is ever removed. Lookups hand out a
//! snapshot of the handler list so a registration racing with a dispatch
//! never disturbs the iteration.

use std::collections::HashMap;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, warn};

use mongoproxy_protocol::document::Document;
use mongoproxy_protocol::query::COMMAND_NAMESPACE_SUFFIX;

/// Callback invoked with an intercepted inserted document
pub type InsertHandler = dyn Fn(&Document) + Send + Sync;

/// Dispatch key: `database + ".$cmd" + collection`
///
/// Registration and the relay both go through [`ListenerKey::new`], so the
/// two sides cannot drift apart.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerKey(String);

impl ListenerKey {
    pub fn new(database: &str, collection: &str) -> Self {
        Self(format!("{database}{COMMAND_NAMESPACE_SUFFIX}{collection}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ListenerKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Outcome of running the handlers for one document
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchReport {
    /// Handlers called
    pub invoked: usize,
    /// Handlers that panicked
    pub failed: usize,
}

/// Process-wide map from dispatch key to ordered handlers
pub struct ListenerRegistry {
    listeners: RwLock<HashMap<ListenerKey, Vec<Arc<InsertHandler>>>>,
}

impl ListenerRegistry {
    pub fn new() -> Self {
        Self {
            listeners: RwLock::new(HashMap::new()),
        }
    }

    /// Append a handler for inserts into `database.collection`
    pub fn register<F>(&self, database: &str, collection: &str, handler: F)
    where
        F: Fn(&Document) + Send + Sync + 'static,
    {
        let key = ListenerKey::new(database, collection);
        debug!("Registering listener for {}", key);
        self.listeners
            .write()
            .entry(key)
            .or_default()
            .push(Arc::new(handler));
    }

    /// Handlers for a key, in registration order; empty when none
    pub fn lookup(&self, key: &ListenerKey) -> Vec<Arc<InsertHandler>> {
        self.listeners.read().get(key).cloned().unwrap_or_default()
    }

    /// Run every handler for `key` on the calling thread
    pub fn notify(&self, key: &ListenerKey, document: &Document) -> DispatchReport {
        invoke_all(&self.lookup(key), key, document)
    }

    pub fn listener_count(&self, key: &ListenerKey) -> usize {
        self.listeners.read().get(key).map_or(0, Vec::len)
    }

    /// Number of distinct keys
    pub fn len(&self) -> usize {
        self.listeners.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.read().is_empty()
    }

    pub fn keys(&self) -> Vec<ListenerKey> {
        let mut keys: Vec<_> = self.listeners.read().keys().cloned().collect();
        keys.sort();
        keys
    }
}

impl Default for ListenerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ListenerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ListenerRegistry")
            .field("keys", &self.keys())
            .finish()
    }
}

/// Call each handler in order; a panicking handler is reported and skipped
pub fn invoke_all(
    handlers: &[Arc<InsertHandler>],
    key: &ListenerKey,
    document: &Document,
) -> DispatchReport {
    let mut report = DispatchReport::default();
    for (index, handler) in handlers.iter().enumerate() {
        debug!("Running listener {} for {}", index, key);
        report.invoked += 1;
        if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| handler(document))) {
            report.failed += 1;
            warn!(
                "Listener {} for {} panicked: {}",
                index,
                key,
                panic_message(payload.as_ref())
            );
        }
    }
    report
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s
    } else {
        "non-string panic payload"
    }
}
