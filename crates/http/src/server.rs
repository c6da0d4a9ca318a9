//! TCP front end: binds a listener and runs one [`HttpConnection`] task per accepted socket.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::net::{TcpListener, ToSocketAddrs};
use tracing::{Instrument, error, info, info_span, warn};

use crate::config::ServerConfig;
use crate::connection::{ConnectionId, HttpConnection};
use crate::handler::Handler;

#[derive(Error, Debug)]
pub enum ServerError {
    #[error("can't bind the listener: {source}")]
    Bind { source: io::Error },

    #[error("can't read the bound address: {source}")]
    LocalAddr { source: io::Error },
}

/// A server that is not listening yet.
#[derive(Debug)]
pub struct Server<H> {
    handler: Arc<H>,
    config: ServerConfig,
}

/// Creates a server dispatching every request to `handler`.
pub fn create_server<H: Handler>(handler: H) -> Server<H> {
    Server { handler: Arc::new(handler), config: ServerConfig::default() }
}

impl<H: Handler> Server<H> {
    #[must_use]
    pub fn with_config(mut self, config: ServerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Inactivity timeout of connections, zero disables it.
    pub fn set_timeout(&mut self, timeout: Duration) -> &mut Self {
        self.config.set_timeout(timeout);
        self
    }

    /// Inactivity timeout of idle keep-alive connections, zero keeps `timeout` in effect.
    pub fn set_keep_alive_timeout(&mut self, keep_alive_timeout: Duration) -> &mut Self {
        self.config.set_keep_alive_timeout(keep_alive_timeout);
        self
    }

    /// Binds `addr`. The returned listener accepts nothing until [`Listener::serve`] runs.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError`] when the address can't be bound.
    pub async fn listen<A: ToSocketAddrs>(self, addr: A) -> Result<Listener<H>, ServerError> {
        let tcp_listener = TcpListener::bind(addr).await.map_err(|source| ServerError::Bind { source })?;
        let local_addr = tcp_listener.local_addr().map_err(|source| ServerError::LocalAddr { source })?;
        info!(%local_addr, "start listening");
        Ok(Listener { tcp_listener, local_addr, handler: self.handler, config: self.config, next_id: 0 })
    }
}

/// A bound server.
#[derive(Debug)]
pub struct Listener<H> {
    tcp_listener: TcpListener,
    local_addr: SocketAddr,
    handler: Arc<H>,
    config: ServerConfig,
    next_id: u64,
}

impl<H: Handler> Listener<H> {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Accepts connections forever, each one processed by its own task.
    pub async fn serve(mut self) {
        loop {
            let (tcp_stream, peer) = match self.tcp_listener.accept().await {
                Ok(stream_and_addr) => stream_and_addr,
                Err(e) => {
                    warn!(cause = %e, "failed to accept");
                    continue;
                }
            };

            let id = ConnectionId::new(self.next_id);
            self.next_id += 1;

            let handler = Arc::clone(&self.handler);
            let config = self.config.clone();
            let span = info_span!("connection", %id, %peer);

            tokio::spawn(
                async move {
                    let (reader, writer) = tcp_stream.into_split();
                    let connection = HttpConnection::with_config(reader, writer, config, id);
                    match connection.process(handler).await {
                        Ok(()) => info!("finished process, connection shutdown"),
                        Err(e) => error!(cause = %e, "connection closed on error"),
                    }
                }
                .instrument(span),
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::make_handler;
    use crate::protocol::{Request, Response};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpStream;

    async fn hello(_req: Request, mut res: Response) {
        res.end(Some("hello".into())).unwrap();
    }

    #[tokio::test]
    async fn serves_over_tcp() {
        let mut server = create_server(make_handler(hello));
        server.set_keep_alive_timeout(Duration::from_secs(1));
        assert_eq!(server.config().keep_alive_timeout(), Duration::from_secs(1));

        let listener = server.listen("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr();
        tokio::spawn(listener.serve());

        let mut stream = TcpStream::connect(addr).await.unwrap();
        stream.write_all(b"GET / HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n").await.unwrap();

        let mut response = String::new();
        stream.read_to_string(&mut response).await.unwrap();
        assert!(response.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(response.contains("Connection: close\r\n"));
        assert!(response.ends_with("\r\n\r\nhello"));
    }

    #[tokio::test]
    async fn bind_failure() {
        let first = create_server(make_handler(hello)).listen("127.0.0.1:0").await.unwrap();
        let result = create_server(make_handler(hello)).listen(first.local_addr()).await;
        assert!(matches!(result, Err(ServerError::Bind { .. })));
    }
}
