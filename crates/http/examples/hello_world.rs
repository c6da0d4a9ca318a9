use std::time::Duration;

use async_trait::async_trait;
use http_minimal::handler::Handler;
use http_minimal::protocol::{OutgoingMessage, Request, Response};
use http_minimal::server::create_server;
use tracing::{Level, error, info, warn};
use tracing_subscriber::FmtSubscriber;

struct HelloWorld;

#[async_trait]
impl Handler for HelloWorld {
    async fn call(&self, mut req: Request, mut res: Response) {
        info!(method = %req.method(), url = req.url(), "receiving request");

        let body = match req.body_bytes().await {
            Ok(body) => body,
            Err(e) => {
                warn!(cause = %e, "can't read request body");
                return;
            }
        };

        let result = match req.url() {
            // streams a chunked body, one write per line
            "/stream" => res
                .set_header("content-type", "text/plain")
                .and_then(|()| (0..5).try_for_each(|i| res.write(format!("line {i}\r\n"))))
                .and_then(|()| res.end(None)),
            _ => res
                .set_header("content-type", "text/plain")
                .and_then(|()| res.end(Some(format!("Hello World! ({} bytes received)\r\n", body.len()).into()))),
        };

        if let Err(e) = result {
            error!(cause = %e, "can't send response");
        }
    }
}

#[tokio::main]
async fn main() {
    let subscriber = FmtSubscriber::builder().with_max_level(Level::INFO).finish();
    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");

    let mut server = create_server(HelloWorld);
    server.set_keep_alive_timeout(Duration::from_secs(10));

    let listener = match server.listen("127.0.0.1:8080").await {
        Ok(listener) => listener,
        Err(e) => {
            error!(cause = %e, "bind server error");
            return;
        }
    };

    listener.serve().await;
}
