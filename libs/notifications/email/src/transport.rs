//! Lazily constructed, once-verified mail connection shared by every job

use crate::error::MailResult;
use crate::provider::{EmailProvider, TransportBuilder};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::{error, info};

/// Hands out the single verified connection.
///
/// The first caller builds the provider and runs its verification handshake.
/// Callers arriving while that handshake is pending wait on it instead of
/// starting their own. A failed handshake stores nothing, so the next call
/// builds a fresh provider.
pub struct TransportProvider {
    builder: Arc<dyn TransportBuilder>,
    connection: OnceCell<Arc<dyn EmailProvider>>,
    handshakes: AtomicU32,
}

impl TransportProvider {
    pub fn new(builder: Arc<dyn TransportBuilder>) -> Self {
        Self {
            builder,
            connection: OnceCell::new(),
            handshakes: AtomicU32::new(0),
        }
    }

    /// Get the verified connection, building it on first use.
    pub async fn get_connection(&self) -> MailResult<Arc<dyn EmailProvider>> {
        let connection = self.connection.get_or_try_init(|| self.connect()).await?;
        Ok(Arc::clone(connection))
    }

    async fn connect(&self) -> MailResult<Arc<dyn EmailProvider>> {
        let provider = self.builder.build()?;
        self.handshakes.fetch_add(1, Ordering::SeqCst);

        match provider.health_check().await {
            Ok(()) => {
                info!(provider = provider.name(), "SMTP server is ready to send emails");
                Ok(provider)
            }
            Err(e) => {
                error!(provider = provider.name(), error = %e, "SMTP verification failed");
                Err(e)
            }
        }
    }

    pub fn is_ready(&self) -> bool {
        self.connection.initialized()
    }

    /// Verification handshakes started so far
    pub fn handshake_count(&self) -> u32 {
        self.handshakes.load(Ordering::SeqCst)
    }
}
