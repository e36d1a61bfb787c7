//! Pluggable per-applet file storage
//!
//! Implementations live outside this crate; the runtime only resolves the backend
//! registered for the calling applet and forwards store/get/delete to it.

use applet_foundation::Result;
use async_trait::async_trait;
use bytes::Bytes;
use serde_json::Value;
use std::sync::Arc;

/// Identity of the caller, taken from the control-plane request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileContext {
    pub applet_id: String,
    pub tenant_id: String,
}

/// Storage backend for one applet
#[async_trait]
pub trait FileStore: Send + Sync {
    /// Persist `data`, returning metadata (id, name, size, ...) as JSON
    async fn store(
        &self,
        ctx: &FileContext,
        name: &str,
        content_type: &str,
        data: Bytes,
    ) -> Result<Value>;

    /// Metadata for `id`, `None` when unknown
    async fn get(&self, ctx: &FileContext, id: &str) -> Result<Option<Value>>;

    /// `true` when something was deleted
    async fn delete(&self, ctx: &FileContext, id: &str) -> Result<bool>;
}

/// Resolves the backend registered for an applet
pub trait FileStoreLookup: Send + Sync {
    fn file_store(&self, applet_id: &str) -> Option<Arc<dyn FileStore>>;
}
