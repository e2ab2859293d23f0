//! Connection Server Module
//!
//! TCP accept loop and the per-connection read/parse/dispatch/write loop.
//! Each connection is one serial task, so replies leave in request order;
//! shutdown closes the listener and drains the open connections.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::task::JoinSet;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::error::Result;
use crate::metrics::ServerMetrics;
use crate::protocol::{CommandHandler, Parser};

// == Server ==
pub struct Server {
    cfg: Arc<Config>,
    listener: TcpListener,
    handler: Arc<CommandHandler>,
    metrics: Arc<ServerMetrics>,
}

impl Server {
    // == Bind ==
    /// Binds the listen socket. A bind failure is a startup failure.
    pub async fn bind(
        cfg: Arc<Config>,
        handler: Arc<CommandHandler>,
        metrics: Arc<ServerMetrics>,
    ) -> Result<Self> {
        let addr = cfg.server.listen_addr();
        let listener = TcpListener::bind(&addr).await?;
        info!(%addr, "server listening");

        Ok(Self {
            cfg,
            listener,
            handler,
            metrics,
        })
    }

    /// The bound address; useful when the configured port is 0.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    // == Run ==
    /// Accepts connections until the shutdown signal flips, then waits for
    /// the outstanding connection tasks to drain.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let read_timeout = self.cfg.server.read_timeout();
        let write_timeout = self.cfg.server.write_timeout();
        let max_connections = self.cfg.server.max_connections;

        let mut connections = JoinSet::new();

        loop {
            tokio::select! {
                accepted = self.listener.accept() => {
                    match accepted {
                        Ok((socket, remote)) => {
                            if self.metrics.active_connections() >= max_connections as u64 {
                                warn!(%remote, max_connections, "connection limit reached, dropping");
                                continue;
                            }
                            socket.set_nodelay(true).ok();

                            let handler = Arc::clone(&self.handler);
                            let metrics = Arc::clone(&self.metrics);
                            connections.spawn(handle_connection(
                                socket,
                                remote,
                                handler,
                                metrics,
                                read_timeout,
                                write_timeout,
                            ));
                        }
                        Err(e) => {
                            error!(error = %e, "failed to accept connection");
                        }
                    }
                }
                _ = shutdown.changed() => break,
                // reap finished connection tasks as we go
                Some(_) = connections.join_next(), if !connections.is_empty() => {}
            }
        }

        drop(self.listener);
        if !connections.is_empty() {
            info!(open = connections.len(), "draining connections");
        }
        while connections.join_next().await.is_some() {}
        info!("server stopped");
    }
}

// == Connection Loop ==
/// Serial loop for one client: parse a frame, dispatch, write the reply.
/// A clean EOF ends the loop silently; any framing or I/O failure, or an
/// elapsed deadline, ends only this connection.
async fn handle_connection(
    socket: TcpStream,
    remote: SocketAddr,
    handler: Arc<CommandHandler>,
    metrics: Arc<ServerMetrics>,
    read_timeout: Option<Duration>,
    write_timeout: Option<Duration>,
) {
    metrics.connection_opened();
    debug!(%remote, "connection opened");

    let (read_half, mut write_half) = socket.into_split();
    let mut parser = Parser::new(BufReader::new(read_half));

    loop {
        let parsed = match read_timeout {
            Some(deadline) => match timeout(deadline, parser.parse()).await {
                Ok(parsed) => parsed,
                Err(_) => {
                    debug!(%remote, "read deadline elapsed");
                    break;
                }
            },
            None => parser.parse().await,
        };

        let request = match parsed {
            Ok(Some(request)) => request,
            Ok(None) => break,
            Err(e) => {
                debug!(%remote, error = %e, "parse error");
                break;
            }
        };

        let reply = handler.execute(request).await.marshal();

        let written = match write_timeout {
            Some(deadline) => match timeout(deadline, write_half.write_all(&reply)).await {
                Ok(written) => written,
                Err(_) => {
                    debug!(%remote, "write deadline elapsed");
                    break;
                }
            },
            None => write_half.write_all(&reply).await,
        };
        if let Err(e) = written {
            debug!(%remote, error = %e, "write error");
            break;
        }
    }

    metrics.connection_closed();
    debug!(%remote, "connection closed");
}
