use crate::core::error::ShellError;
use crate::shell::ForwardSession;
use std::fmt;
use std::future::Future;
use tracing::{info, warn};

/// How a held tunnel ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TunnelExit {
    /// The caller asked to stop, e.g. Ctrl-C.
    Interrupted,
    /// The forward process ended by itself.
    Disconnected,
}

/// An open port forward. The handle is the only owner of the forward process.
pub struct TunnelHandle {
    pub local_port: u16,
    pub remote_node: String,
    pub remote_port: u16,
    session: Box<dyn ForwardSession>,
}

impl fmt::Debug for TunnelHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TunnelHandle")
            .field("local_port", &self.local_port)
            .field("remote_node", &self.remote_node)
            .field("remote_port", &self.remote_port)
            .finish_non_exhaustive()
    }
}

impl TunnelHandle {
    pub fn new(
        local_port: u16,
        remote_node: String,
        remote_port: u16,
        session: Box<dyn ForwardSession>,
    ) -> Self {
        Self {
            local_port,
            remote_node,
            remote_port,
            session,
        }
    }

    pub fn local_url(&self) -> String {
        format!("http://localhost:{}/v1", self.local_port)
    }

    /// Block until the forward drops or `shutdown` resolves. Only the forward
    /// is stopped; the remote job keeps running either way.
    pub async fn hold<F>(mut self, shutdown: F) -> Result<TunnelExit, ShellError>
    where
        F: Future<Output = ()>,
    {
        // Ctrl-C can also end the forward; the interrupt takes precedence.
        let finished = tokio::select! {
            biased;
            _ = shutdown => None,
            result = self.session.wait() => Some(result),
        };

        match finished {
            Some(Ok(())) => {
                info!(local_port = self.local_port, "tunnel closed");
                Ok(TunnelExit::Disconnected)
            }
            Some(Err(err)) => {
                warn!(local_port = self.local_port, error = %err, "tunnel dropped");
                Err(err)
            }
            None => {
                info!(local_port = self.local_port, "closing tunnel");
                self.session.terminate().await?;
                Ok(TunnelExit::Interrupted)
            }
        }
    }
}
