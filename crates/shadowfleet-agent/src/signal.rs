//! Interrupt wiring: turns a process signal into the client's `sigint`.

use crate::client::AgentClient;
use crate::error::ClientResult;
use shadowfleet_types::agent::ClientState;
use std::future::Future;
use std::sync::Arc;
use tracing::info;

/// Wait for Ctrl-C, then interrupt the client.
pub async fn interrupt_on_ctrl_c(client: Arc<AgentClient>) -> ClientResult<ClientState> {
    interrupt_on(client, tokio::signal::ctrl_c()).await
}

/// Wait for `signal` to resolve, then interrupt the client.
pub async fn interrupt_on<F>(client: Arc<AgentClient>, signal: F) -> ClientResult<ClientState>
where
    F: Future<Output = std::io::Result<()>>,
{
    signal.await?;
    info!(agent = %client.agent_id(), "Interrupt received");
    client.interrupt()
}
