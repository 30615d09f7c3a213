use super::{InMemorySessionStore, SessionStore};
use crate::handler::{ConnectionInfo, StreamHandler};
use crate::utils::error::{AppError, AppResult};
use std::sync::Arc;

/// Live connections, one [`StreamHandler`] per transport session
#[derive(Clone)]
pub struct ConnectionRegistry {
    store: Arc<dyn SessionStore<Arc<StreamHandler>>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::with_store(Arc::new(InMemorySessionStore::<Arc<StreamHandler>>::new()))
    }

    pub fn with_store(store: Arc<dyn SessionStore<Arc<StreamHandler>>>) -> Self {
        Self { store }
    }

    pub fn register(&self, handler: Arc<StreamHandler>) {
        let id = handler.connection_id().to_string();
        if self.store.put(&id, handler).is_some() {
            tracing::warn!("[conn {}] Replaced an existing connection", id);
        }
        tracing::info!("[conn {}] Registered, {} active", id, self.store.len());
    }

    pub fn unregister(&self, id: &str) -> Option<Arc<StreamHandler>> {
        let removed = self.store.remove(id);
        if removed.is_some() {
            tracing::info!("[conn {}] Unregistered, {} active", id, self.store.len());
        }
        removed
    }

    pub fn get(&self, id: &str) -> AppResult<Arc<StreamHandler>> {
        self.store
            .get(id)
            .ok_or_else(|| AppError::NotFound(format!("connection {}", id)))
    }

    pub fn connections(&self) -> Vec<ConnectionInfo> {
        self.store
            .list()
            .into_iter()
            .map(|(_, handler)| handler.connection_info())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.store.len()
    }

    pub fn is_empty(&self) -> bool {
        self.store.is_empty()
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use crate::encode::video::FfmpegVideoSinkFactory;

    fn handler(id: &str) -> Arc<StreamHandler> {
        let config = Arc::new(AppConfig::with_data_dir("/tmp/uran-registry-test"));
        let sinks = Arc::new(FfmpegVideoSinkFactory::new(config.pipeline.video_codec));
        Arc::new(StreamHandler::new(id, config, sinks))
    }

    #[tokio::test]
    async fn test_register_lookup_unregister() {
        let registry = ConnectionRegistry::new();
        registry.register(handler("one"));
        registry.register(handler("two"));
        assert_eq!(registry.len(), 2);
        assert_eq!(registry.get("one").unwrap().connection_id(), "one");

        let ids: Vec<String> = registry
            .connections()
            .into_iter()
            .map(|info| info.webrtc_id)
            .collect();
        assert_eq!(ids, vec!["one", "two"]);

        assert!(registry.unregister("one").is_some());
        assert!(matches!(registry.get("one"), Err(AppError::NotFound(_))));
        assert!(registry.unregister("one").is_none());
    }
}
