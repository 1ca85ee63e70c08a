//! Shared application state.

use std::sync::Arc;

use evidentia_contracts::EvidentiaResult;
use evidentia_core::{
    traits::ProviderVerifier, CoreContext, DeliveryStateMachine, DownloadGateway, EvidenceCompiler,
};
use evidentia_webhook::NotificationIngester;

use crate::error::{ApiError, ApiResult};

/// Handles passed to every route handler. Cheap to clone.
#[derive(Clone)]
pub struct AppState {
    pub machine: DeliveryStateMachine,
    pub gateway: DownloadGateway,
    pub ingester: NotificationIngester,
    pub compiler: EvidenceCompiler,
    pub admin_token: Arc<str>,
}

impl AppState {
    pub fn new(
        ctx: CoreContext,
        verifier: Arc<dyn ProviderVerifier>,
        admin_token: impl Into<Arc<str>>,
    ) -> EvidentiaResult<Self> {
        let machine = DeliveryStateMachine::new(ctx.clone());
        Ok(Self {
            ingester: NotificationIngester::new(machine.clone(), verifier)?,
            gateway: DownloadGateway::new(ctx.clone()),
            compiler: EvidenceCompiler::new(ctx),
            machine,
            admin_token: admin_token.into(),
        })
    }
}

/// Run a synchronous core operation on the blocking pool.
///
/// Store, mailer and file-store calls may block; they never run on the
/// async worker threads.
pub(crate) async fn blocking<T, F>(f: F) -> ApiResult<T>
where
    F: FnOnce() -> Result<T, evidentia_contracts::EvidentiaError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| ApiError::Internal(format!("blocking task failed: {e}")))?
        .map_err(ApiError::from)
}
