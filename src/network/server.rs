use crate::error::{BlockchainError, Result};
use crate::network::connection;
use crate::node::NodeContext;
use log::{debug, error, info, warn};
use std::io::ErrorKind;
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

const ACCEPT_POLL: Duration = Duration::from_millis(100);

/// Listener for inbound peers. Binding happens at construction so a busy port
/// fails startup before any worker runs.
pub struct Server {
    listener: TcpListener,
    local_addr: SocketAddr,
}

impl Server {
    pub fn bind(addr: &str) -> Result<Server> {
        let listener = TcpListener::bind(addr)
            .map_err(|e| BlockchainError::Network(format!("Failed to bind to {addr}: {e}")))?;
        let local_addr = listener
            .local_addr()
            .map_err(|e| BlockchainError::Network(format!("Failed to read bound address: {e}")))?;
        listener
            .set_nonblocking(true)
            .map_err(|e| BlockchainError::Network(format!("Failed to configure listener: {e}")))?;
        Ok(Server {
            listener,
            local_addr,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Accept connections until shutdown. Each connection gets its own thread
    /// that performs the handshake and then pumps messages.
    pub fn run(self, ctx: Arc<NodeContext>) {
        info!("Server listening on {}", self.local_addr);
        while !ctx.shutdown.is_cancelled() {
            match self.listener.accept() {
                Ok((stream, remote)) => {
                    if let Err(e) = Self::spawn_handler(&ctx, stream, remote) {
                        error!("Failed to start handler for {remote}: {e}");
                    }
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => {
                    thread::sleep(ACCEPT_POLL);
                }
                Err(e) => {
                    error!("Error accepting connection: {e}");
                    thread::sleep(ACCEPT_POLL);
                }
            }
        }
        info!("Server on {} stopped", self.local_addr);
    }

    fn spawn_handler(ctx: &Arc<NodeContext>, stream: TcpStream, remote: SocketAddr) -> Result<()> {
        stream
            .set_nonblocking(false)
            .map_err(|e| BlockchainError::Network(format!("Failed to configure socket: {e}")))?;
        let ctx_handler = Arc::clone(ctx);
        let handle = thread::Builder::new()
            .name(format!("conn-{remote}"))
            .spawn(move || {
                let (reader, hello) = match connection::accept(&ctx_handler, &stream) {
                    Ok(pair) => pair,
                    Err(e) => {
                        debug!("Handshake with {remote} failed: {e}");
                        return;
                    }
                };
                if let Err(e) = connection::run_connection(ctx_handler, stream, reader, hello) {
                    warn!("Connection from {remote} ended with error: {e}");
                }
            })
            .map_err(|e| BlockchainError::Network(format!("Failed to spawn handler: {e}")))?;
        ctx.hub.track(handle);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bind_busy_port_fails() {
        let first = Server::bind("127.0.0.1:0").unwrap();
        let addr = first.local_addr().to_string();
        assert!(matches!(
            Server::bind(&addr),
            Err(BlockchainError::Network(_))
        ));
    }
}
