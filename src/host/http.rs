// ABOUTME: Endpoint probe speaking plain HTTP/1.1 to a local port via hyper.
// ABOUTME: One connection per probe; the response body is drained and dropped.

use super::{EndpointProbe, HostError};
use async_trait::async_trait;
use http_body_util::{BodyExt, Empty};
use hyper_util::rt::TokioIo;
use std::time::Duration;
use tokio::net::TcpStream;

#[derive(Debug, Clone, Copy, Default)]
pub struct HttpProbe;

impl HttpProbe {
    async fn request(port: u16, path: &str) -> Result<u16, HostError> {
        let stream = TcpStream::connect(("127.0.0.1", port))
            .await
            .map_err(|e| HostError::Http(format!("connect to port {}: {}", port, e)))?;
        let io = TokioIo::new(stream);

        let (mut sender, conn) = hyper::client::conn::http1::handshake(io)
            .await
            .map_err(|e| HostError::Http(format!("handshake failed: {}", e)))?;

        tokio::spawn(async move {
            if let Err(e) = conn.await {
                tracing::debug!("probe connection error: {}", e);
            }
        });

        let req = hyper::Request::builder()
            .method("GET")
            .uri(path)
            .header("Host", "localhost")
            .header("User-Agent", concat!("shipwright/", env!("CARGO_PKG_VERSION")))
            .body(Empty::<bytes::Bytes>::new())
            .map_err(|e| HostError::Http(format!("failed to build request: {}", e)))?;

        let resp = sender
            .send_request(req)
            .await
            .map_err(|e| HostError::Http(format!("request failed: {}", e)))?;
        let status = resp.status().as_u16();

        // Drain so the server sees a clean close.
        let _ = resp.into_body().collect().await;
        Ok(status)
    }
}

#[async_trait]
impl EndpointProbe for HttpProbe {
    async fn get(&self, port: u16, path: &str, timeout: Duration) -> Result<u16, HostError> {
        tokio::time::timeout(timeout, Self::request(port, path))
            .await
            .map_err(|_| HostError::Http(format!("port {} timed out after {:?}", port, timeout)))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn reports_status_code() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 1024];
            let _ = socket.read(&mut buf).await;
            socket
                .write_all(b"HTTP/1.1 204 No Content\r\nContent-Length: 0\r\n\r\n")
                .await
                .unwrap();
        });

        let status = HttpProbe
            .get(port, "/health", Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(status, 204);
    }

    #[tokio::test]
    async fn closed_port_is_an_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        assert!(HttpProbe.get(port, "/", Duration::from_secs(2)).await.is_err());
    }
}
