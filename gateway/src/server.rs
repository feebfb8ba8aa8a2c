use crate::Gateway;
use anyhow::Result;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{debug, info};

/// Accepts connections and serves the gateway until drained.
pub async fn serve(gateway: Arc<Gateway>, addr: SocketAddr, drain: drain::Watch) -> Result<()> {
    let listener = TcpListener::bind(addr).await?;
    let addr = listener.local_addr()?;
    info!(%addr, "HTTP gateway listening");

    loop {
        tokio::select! {
            accepted = listener.accept() => {
                let (stream, _) = accepted?;
                let gateway = gateway.clone();
                tokio::spawn(async move {
                    let io = TokioIo::new(stream);
                    let service = service_fn(move |req| {
                        let gateway = gateway.clone();
                        async move { Ok::<_, Infallible>(gateway.handle(req).await) }
                    });
                    if let Err(error) = hyper::server::conn::http1::Builder::new()
                        .serve_connection(io, service)
                        .await
                    {
                        debug!(%error, "Connection error");
                    }
                });
            }
            _ = drain.clone().signaled() => {
                debug!("Gateway server shutting down");
                return Ok(());
            }
        }
    }
}
