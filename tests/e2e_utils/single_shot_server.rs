#![cfg(test)]
#![allow(dead_code)]

use std::net::SocketAddr;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

/// Accepts exactly one connection, discards whatever the client sent, and
/// writes a fixed HTTP/1.1 response body back. Stands in for a real origin
/// server when what's under test is PAC-driven upstream selection, not the
/// upstream's own behavior.
pub struct SingleShotServer {
    listener: TcpListener,
}

impl SingleShotServer {
    pub async fn bind() -> Result<Self, Box<dyn std::error::Error>> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        Ok(Self { listener })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, std::io::Error> {
        self.listener.local_addr()
    }

    pub async fn serve_once_with_body(self, body: &'static str) {
        tokio::spawn(async move {
            if let Ok((mut socket, _)) = self.listener.accept().await {
                let mut buf = [0u8; 4096];
                let _ = socket.read(&mut buf).await;
                let response = format!(
                    "HTTP/1.1 200 OK\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                    body.len(),
                    body
                );
                let _ = socket.write_all(response.as_bytes()).await;
            }
        });
    }
}
