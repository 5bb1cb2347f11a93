//! Importer registry and the synchronous/asynchronous import service (§4.4).
//!
//! The core never downcasts a specific backend: each [`Importer`] is a
//! value implementing `{kind(), import(ctx, req)}`; backend-specific
//! configuration lives entirely inside each importer, extracted from
//! `backend_config` at entry.
#![deny(unsafe_code)]
#![warn(missing_docs)]

/// Responses-backend importer.
pub mod responses;
/// Upsert policy shared by every importer implementation.
pub mod upsert;
/// Workflow-backend importer.
pub mod workflow;

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use obs_core::CancellationToken;
use obs_error::ObsError;
use obs_queue::JobQueue;
use tracing::{info, warn};

pub use responses::ResponsesImporter;
pub use workflow::WorkflowImporter;

/// A request to import (create or refresh) a trace from an external backend.
#[derive(Debug, Clone, Default)]
pub struct ImportRequest {
    /// Owning tenant.
    pub tenant_id: String,
    /// Set for conversation-context imports.
    pub conversation_id: Option<String>,
    /// Set for conversation-context imports.
    pub application_id: Option<String>,
    /// Set for autonomous-agent-context imports.
    pub autonomous_agent_id: Option<String>,
    /// Log lines to attach to the trace.
    pub logs: Vec<String>,
    /// Identity performing the import, if known.
    pub user_id: Option<String>,
    /// Upsert hint: when set, refresh this exact trace rather than looking
    /// one up by conversation.
    pub existing_trace_id: Option<String>,
    /// Opaque backend-specific configuration (endpoint, credentials, …);
    /// each importer documents and validates its own keys.
    pub backend_config: BTreeMap<String, serde_json::Value>,
}

/// Per-import context: a cancellation token importers must propagate into
/// any HTTP call they make (§4.5).
#[derive(Debug, Clone, Default)]
pub struct ImportContext {
    /// Cancelled when the producer (HTTP request or queue shutdown) gives up.
    pub cancel: CancellationToken,
}

/// A pluggable backend importer.
#[async_trait]
pub trait Importer: Send + Sync {
    /// Stable agent-kind key this importer is registered under.
    fn kind(&self) -> &str;
    /// Fetches external items, builds trace nodes, and upserts a trace.
    /// Returns the trace id.
    async fn import(&self, ctx: &ImportContext, req: &ImportRequest) -> Result<String, ObsError>;
}

/// A process-wide registry mapping agent kind to [`Importer`].
#[derive(Default)]
pub struct ImporterRegistry {
    importers: HashMap<String, Arc<dyn Importer>>,
}

impl ImporterRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an importer under its own [`Importer::kind`], replacing any
    /// previous registration for that kind.
    pub fn register(&mut self, importer: impl Importer + 'static) {
        self.importers.insert(importer.kind().to_string(), Arc::new(importer));
    }

    /// Looks up an importer by kind.
    #[must_use]
    pub fn get(&self, kind: &str) -> Option<&dyn Importer> {
        self.importers.get(kind).map(|i| &**i)
    }

    /// Returns an `Arc` handle to the named importer.
    #[must_use]
    pub fn get_arc(&self, kind: &str) -> Option<Arc<dyn Importer>> {
        self.importers.get(kind).cloned()
    }

    /// Returns a sorted list of registered kinds.
    #[must_use]
    pub fn list(&self) -> Vec<&str> {
        let mut v: Vec<&str> = self.importers.keys().map(String::as_str).collect();
        v.sort_unstable();
        v
    }

    /// Returns `true` if an importer is registered under `kind`.
    #[must_use]
    pub fn contains(&self, kind: &str) -> bool {
        self.importers.contains_key(kind)
    }

    /// Removes the importer registered under `kind`, if any.
    pub fn remove(&mut self, kind: &str) -> Option<Arc<dyn Importer>> {
        self.importers.remove(kind)
    }
}

struct ImportJob {
    kind: String,
    ctx: ImportContext,
    req: ImportRequest,
}

/// Dispatches imports either synchronously (`import`) or asynchronously via
/// the job queue (`enqueue`).
pub struct ImportService {
    registry: Arc<ImporterRegistry>,
    queue: JobQueue<ImportJob>,
}

impl ImportService {
    /// Builds a service over `registry`, spawning a job queue of `capacity`
    /// backed by `worker_count` workers that run registered importers.
    pub fn new(registry: Arc<ImporterRegistry>, capacity: usize, worker_count: usize) -> Self {
        let worker_registry = Arc::clone(&registry);
        let queue = JobQueue::spawn(capacity, worker_count, move |job: ImportJob| {
            let registry = Arc::clone(&worker_registry);
            async move {
                let Some(importer) = registry.get_arc(&job.kind) else {
                    warn!(target: "obs.import", kind = %job.kind, "importer vanished before job ran");
                    return Ok(());
                };
                match importer.import(&job.ctx, &job.req).await {
                    Ok(trace_id) => {
                        info!(target: "obs.import", kind = %job.kind, trace_id, "queued import completed");
                        Ok(())
                    }
                    Err(err) => Err(Box::new(err) as Box<dyn std::error::Error + Send + Sync>),
                }
            }
        });
        Self { registry, queue }
    }

    /// Runs an import inline and returns the resulting trace id.
    pub async fn import(&self, kind: &str, ctx: &ImportContext, req: &ImportRequest) -> Result<String, ObsError> {
        let importer = self
            .registry
            .get_arc(kind)
            .ok_or_else(|| ObsError::not_found(format!("no importer registered for kind '{kind}'")))?;
        importer.import(ctx, req).await
    }

    /// Validates that `kind` is registered, then enqueues the import to run
    /// asynchronously. Returns immediately; queue-full drops are silent
    /// per §4.5 and are not surfaced here.
    pub fn enqueue(&self, kind: &str, ctx: ImportContext, req: ImportRequest) -> Result<(), ObsError> {
        if !self.registry.contains(kind) {
            return Err(ObsError::not_found(format!("no importer registered for kind '{kind}'")));
        }
        self.queue.enqueue(ImportJob {
            kind: kind.to_string(),
            ctx,
            req,
        });
        Ok(())
    }

    /// Gracefully drains the job queue, waiting for in-flight imports to finish.
    pub async fn shutdown(self) {
        self.queue.shutdown().await;
    }
}
