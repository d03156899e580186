// Proxy registry: lazily created, shared named sub-channels

use crate::error::{HubError, HubResult};
use crate::transport::Transport;
use dashmap::DashMap;
use std::fmt;
use std::sync::{Arc, OnceLock};
use tracing::debug;

type Slot<P> = Arc<OnceLock<Arc<P>>>;

/// Concurrent get-or-create map from proxy name to proxy handle.
///
/// The map only ever holds its shard lock long enough to insert an empty slot;
/// the proxy itself is built inside the slot's `OnceLock`. Callers racing on the
/// same name wait for the single construction, callers on other names never do.
pub struct ProxyRegistry<T: Transport> {
    transport: Arc<T>,
    entries: DashMap<String, Slot<T::Proxy>>,
}

impl<T: Transport> ProxyRegistry<T> {
    pub fn new(transport: Arc<T>) -> Self {
        Self {
            transport,
            entries: DashMap::new(),
        }
    }

    /// Get the proxy for `name`, creating it on first use
    pub fn get_proxy(&self, name: &str) -> HubResult<Arc<T::Proxy>> {
        if name.is_empty() {
            return Err(HubError::invalid_proxy_name("proxy name must not be empty"));
        }

        let existing = self.entries.get(name).map(|slot| Arc::clone(slot.value()));
        let slot = match existing {
            Some(slot) => slot,
            None => Arc::clone(self.entries.entry(name.to_string()).or_default().value()),
        };

        let proxy = slot.get_or_init(|| {
            debug!(proxy = name, "Creating proxy");
            Arc::new(self.transport.create_proxy(name))
        });

        Ok(Arc::clone(proxy))
    }

    /// Whether a proxy for `name` has been fully created
    pub fn contains(&self, name: &str) -> bool {
        self.entries
            .get(name)
            .map_or(false, |slot| slot.get().is_some())
    }

    pub fn len(&self) -> usize {
        self.entries.iter().filter(|slot| slot.get().is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Names of every created proxy, sorted
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .entries
            .iter()
            .filter(|slot| slot.get().is_some())
            .map(|slot| slot.key().clone())
            .collect();
        names.sort();
        names
    }
}

impl<T: Transport> fmt::Debug for ProxyRegistry<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProxyRegistry")
            .field("proxies", &self.names())
            .finish()
    }
}
