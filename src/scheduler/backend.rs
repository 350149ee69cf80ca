//! Backend port for the update scheduler
//!
//! The scheduler reaches the reasoning services only through this trait, so
//! the cadence, single-flight and requeue logic can be exercised against
//! in-memory fakes. The production implementation wraps the structuring
//! client and, when configured, the remote extraction client.

use std::future::Future;

use crate::error::UpdateError;
use crate::extraction::ExtractionClient;
use crate::settings::InterpretationLevel;
use crate::structure::{GraphStructure, TreeStructure};
use crate::structuring::StructuringClient;

pub(crate) trait UpdateBackend: Send + Sync + 'static {
    /// True when a provider key is configured and calls may be dispatched.
    fn is_configured(&self) -> bool;

    /// Extend `current` with newly transcribed text.
    fn incremental_update(
        &self,
        current: TreeStructure,
        new_text: String,
        level: InterpretationLevel,
    ) -> impl Future<Output = Result<TreeStructure, UpdateError>> + Send;

    /// Rebuild the whole tree from the transcript tail.
    fn full_regeneration(
        &self,
        transcript: String,
        level: InterpretationLevel,
    ) -> impl Future<Output = Result<TreeStructure, UpdateError>> + Send;

    /// Feed text to the remote extraction service and return the
    /// accumulated graph.
    fn ingest(
        &self,
        session_id: String,
        text: String,
    ) -> impl Future<Output = Result<GraphStructure, UpdateError>> + Send;
}

/// Production backend: structuring client plus optional extraction client.
pub(crate) struct LiveBackend {
    structuring: Option<StructuringClient>,
    extraction: Option<ExtractionClient>,
}

impl LiveBackend {
    pub(crate) fn new(
        structuring: Option<StructuringClient>,
        extraction: Option<ExtractionClient>,
    ) -> Self {
        LiveBackend {
            structuring,
            extraction,
        }
    }

    pub(crate) fn has_extraction(&self) -> bool {
        self.extraction.is_some()
    }
}

impl UpdateBackend for LiveBackend {
    fn is_configured(&self) -> bool {
        self.structuring.is_some() || self.extraction.is_some()
    }

    async fn incremental_update(
        &self,
        current: TreeStructure,
        new_text: String,
        level: InterpretationLevel,
    ) -> Result<TreeStructure, UpdateError> {
        match &self.structuring {
            Some(client) => client.incremental_update(&current, &new_text, level).await,
            None => Err(UpdateError::AuthFailed(
                "no structuring provider configured".to_string(),
            )),
        }
    }

    async fn full_regeneration(
        &self,
        transcript: String,
        level: InterpretationLevel,
    ) -> Result<TreeStructure, UpdateError> {
        match &self.structuring {
            Some(client) => client.full_regeneration(&transcript, level).await,
            None => Err(UpdateError::AuthFailed(
                "no structuring provider configured".to_string(),
            )),
        }
    }

    async fn ingest(&self, session_id: String, text: String) -> Result<GraphStructure, UpdateError> {
        match &self.extraction {
            Some(client) => client.ingest(&session_id, &text).await,
            None => Err(UpdateError::RemoteUnreachable(
                "no extraction service configured".to_string(),
            )),
        }
    }
}
