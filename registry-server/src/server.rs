//! Newline-delimited JSON over TCP: one request per line, one response per line.

use multicast_registry::observability::events;
use multicast_registry::RpcDispatcher;
use std::future::Future;
use std::io;
use std::net::SocketAddr;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tracing::{info, warn};

const COMPONENT: &str = "rpc_server";

pub struct RegistryServer {
    listener: TcpListener,
    dispatcher: RpcDispatcher,
}

impl RegistryServer {
    pub async fn bind(addr: &str, dispatcher: RpcDispatcher) -> io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Self {
            listener,
            dispatcher,
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accepts connections until `shutdown` resolves. Open connections keep being
    /// served by their own tasks.
    pub async fn serve_until(self, shutdown: impl Future<Output = ()>) {
        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        let dispatcher = self.dispatcher.clone();
                        tokio::spawn(async move {
                            serve_connection(stream, peer, dispatcher).await;
                        });
                    }
                    Err(err) => {
                        warn!(
                            component = COMPONENT,
                            err = %err,
                            "failed to accept connection"
                        );
                    }
                },
            }
        }
    }
}

async fn serve_connection(stream: TcpStream, peer: SocketAddr, dispatcher: RpcDispatcher) {
    info!(
        event = events::RPC_CONNECTION_OPEN,
        component = COMPONENT,
        peer = %peer,
        "rpc connection opened"
    );

    let (reader, mut writer) = stream.into_split();
    let mut lines = BufReader::new(reader).lines();
    let mut handled = 0usize;
    let outcome: io::Result<()> = async {
        while let Some(line) = lines.next_line().await? {
            if line.trim().is_empty() {
                continue;
            }
            let mut reply = dispatcher.handle_line(&line).await;
            reply.push('\n');
            writer.write_all(reply.as_bytes()).await?;
            handled += 1;
        }
        writer.flush().await
    }
    .await;

    match outcome {
        Ok(()) => info!(
            event = events::RPC_CONNECTION_CLOSED,
            component = COMPONENT,
            peer = %peer,
            handled,
            "rpc connection closed"
        ),
        Err(err) => warn!(
            event = events::RPC_CONNECTION_CLOSED,
            component = COMPONENT,
            peer = %peer,
            handled,
            err = %err,
            "rpc connection closed with error"
        ),
    }
}
