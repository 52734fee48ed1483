use crate::config::{ServerConfig, TlsConfig};
use crate::dispatcher::Dispatcher;
use crate::http::{RawRequest, Response};
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use std::fs::File;
use std::future::Future;
use std::io::{self, BufReader as StdBufReader, ErrorKind};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;
use tokio::sync::Semaphore;
use tokio_rustls::TlsAcceptor;

/// Request bodies above this size are rejected as malformed.
const MAX_BODY_BYTES: usize = 16 * 1024 * 1024;

/// Combined limit for the request line and headers.
const MAX_HEAD_BYTES: usize = 64 * 1024;

#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    #[error("TLS error: {0}")]
    Tls(String),
}

fn load_certs(config: &TlsConfig) -> Result<Vec<CertificateDer<'static>>, ServerError> {
    let mut reader = StdBufReader::new(File::open(&config.cert_file)?);
    let certs = rustls_pemfile::certs(&mut reader).collect::<Result<Vec<_>, _>>()?;
    if certs.is_empty() {
        return Err(ServerError::Tls(format!("no certificates in {}", config.cert_file)));
    }
    Ok(certs)
}

fn load_key(config: &TlsConfig) -> Result<PrivateKeyDer<'static>, ServerError> {
    let mut reader = StdBufReader::new(File::open(&config.key_file)?);
    rustls_pemfile::private_key(&mut reader)?
        .ok_or_else(|| ServerError::Tls(format!("no private key in {}", config.key_file)))
}

pub fn tls_acceptor(config: &TlsConfig) -> Result<TlsAcceptor, ServerError> {
    let server_config = rustls::ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(load_certs(config)?, load_key(config)?)
        .map_err(|e| ServerError::Tls(e.to_string()))?;
    Ok(TlsAcceptor::from(Arc::new(server_config)))
}

async fn read_head_line<R>(reader: &mut R, budget: &mut usize) -> io::Result<String>
where
    R: AsyncBufRead + Unpin,
{
    let mut line = String::new();
    let read = (&mut *reader).take(*budget as u64).read_line(&mut line).await?;
    *budget -= read;
    if *budget == 0 && !line.ends_with('\n') {
        return Err(io::Error::new(ErrorKind::InvalidData, "request head too large"));
    }
    Ok(line)
}

/// Reads one HTTP/1.1 request. Returns `None` when the peer closed the
/// connection before sending a request line.
pub async fn read_request<R>(reader: &mut R, peer: Option<SocketAddr>) -> io::Result<Option<RawRequest>>
where
    R: AsyncBufRead + Unpin,
{
    let mut budget = MAX_HEAD_BYTES;
    let request_line = read_head_line(reader, &mut budget).await?;
    if request_line.is_empty() {
        return Ok(None);
    }

    let mut parts = request_line.split_whitespace();
    let invalid = || io::Error::new(ErrorKind::InvalidData, "invalid request line");
    let method = parts.next().ok_or_else(invalid)?.to_string();
    let target = parts.next().ok_or_else(invalid)?.to_string();

    let mut headers = Vec::new();
    loop {
        let line = read_head_line(reader, &mut budget).await?;
        let line = line.trim_end();
        if line.is_empty() {
            break;
        }
        if let Some((name, value)) = line.split_once(':') {
            headers.push((name.trim().to_string(), value.trim().to_string()));
        }
    }

    let length = headers
        .iter()
        .find(|(name, _)| name.eq_ignore_ascii_case("content-length"))
        .map(|(_, value)| value.parse::<usize>())
        .transpose()
        .map_err(|_| io::Error::new(ErrorKind::InvalidData, "invalid content-length"))?
        .unwrap_or(0);
    if length > MAX_BODY_BYTES {
        return Err(io::Error::new(ErrorKind::InvalidData, "request body too large"));
    }

    let mut body = Vec::with_capacity(length);
    reader.take(length as u64).read_to_end(&mut body).await?;

    Ok(Some(RawRequest {
        method: Some(method),
        target,
        headers,
        body,
        peer,
    }))
}

/// Serves one request on `stream` and closes it.
pub async fn handle_connection<S>(dispatcher: &Dispatcher, mut stream: S, peer: Option<SocketAddr>) -> io::Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let parsed = {
        let mut reader = BufReader::new(&mut stream);
        read_request(&mut reader, peer).await
    };

    let mut response = match parsed {
        Ok(Some(raw)) => dispatcher.handle(raw).await,
        Ok(None) => return Ok(()),
        Err(e) if e.kind() == ErrorKind::InvalidData => {
            tracing::debug!(error = %e, "malformed request");
            Response::error("Bad Request", 400)
        }
        Err(e) => return Err(e),
    };
    response.header("Connection", "close");
    response.send(&mut stream).await?;
    stream.shutdown().await
}

pub struct Server {
    dispatcher: Arc<Dispatcher>,
    max_connections: usize,
    tls: Option<TlsAcceptor>,
}

impl Server {
    pub fn new(dispatcher: Dispatcher, config: &ServerConfig) -> Result<Self, ServerError> {
        let tls = config.tls.as_ref().map(tls_acceptor).transpose()?;
        Ok(Self {
            dispatcher: Arc::new(dispatcher),
            max_connections: config.max_connections.max(1),
            tls,
        })
    }

    /// Accepts connections until Ctrl-C.
    pub async fn run(self, listener: TcpListener) -> Result<(), ServerError> {
        self.run_until(listener, async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "failed to listen for shutdown signal");
                std::future::pending::<()>().await;
            }
        })
        .await
    }

    /// Accepts connections until `shutdown` resolves. In-flight connections
    /// finish on their own tasks.
    pub async fn run_until<F>(self, listener: TcpListener, shutdown: F) -> Result<(), ServerError>
    where
        F: Future<Output = ()>,
    {
        let limit = Arc::new(Semaphore::new(self.max_connections));
        tokio::pin!(shutdown);

        tracing::info!(
            address = %listener.local_addr()?,
            tls = self.tls.is_some(),
            max_connections = self.max_connections,
            "listening for connections"
        );

        loop {
            let permit = tokio::select! {
                _ = &mut shutdown => break,
                permit = limit.clone().acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            let (stream, peer) = tokio::select! {
                _ = &mut shutdown => break,
                accepted = listener.accept() => match accepted {
                    Ok(accepted) => accepted,
                    Err(e) => {
                        tracing::warn!(error = %e, "accept failed");
                        continue;
                    }
                },
            };

            let dispatcher = self.dispatcher.clone();
            let acceptor = self.tls.clone();
            tokio::spawn(async move {
                let result = match acceptor {
                    Some(acceptor) => match acceptor.accept(stream).await {
                        Ok(tls_stream) => handle_connection(&dispatcher, tls_stream, Some(peer)).await,
                        Err(e) => {
                            tracing::debug!(%peer, error = %e, "TLS handshake failed");
                            Ok(())
                        }
                    },
                    None => handle_connection(&dispatcher, stream, Some(peer)).await,
                };
                if let Err(e) = result {
                    tracing::debug!(%peer, error = %e, "connection error");
                }
                drop(permit);
            });
        }

        tracing::info!("shutdown signal received, no longer accepting connections");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::Container;
    use crate::error_handler::ErrorHandler;
    use crate::handler::Action;
    use crate::http::RequestOptions;
    use crate::router::Router;
    use serde_json::json;

    #[tokio::test]
    async fn parses_request_line_headers_and_body() {
        let bytes: &[u8] = b"POST /api/users?x=1 HTTP/1.1\r\nHost: localhost\r\nContent-Type: application/json\r\nContent-Length: 13\r\n\r\n{\"name\":\"A\"}\nEXTRA";
        let mut reader = BufReader::new(bytes);
        let raw = read_request(&mut reader, None).await.unwrap().unwrap();

        assert_eq!(raw.method.as_deref(), Some("POST"));
        assert_eq!(raw.target, "/api/users?x=1");
        assert_eq!(raw.headers.len(), 3);
        assert_eq!(raw.body, b"{\"name\":\"A\"}\n");
    }

    #[tokio::test]
    async fn closed_connection_yields_none() {
        let mut reader = BufReader::new(&b""[..]);
        assert!(read_request(&mut reader, None).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn garbage_request_line_is_invalid() {
        let mut reader = BufReader::new(&b"\r\n\r\n"[..]);
        let err = read_request(&mut reader, None).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidData);
    }

    #[tokio::test]
    async fn oversized_head_is_invalid() {
        let mut bytes = b"GET / HTTP/1.1\r\nX-Filler: ".to_vec();
        bytes.extend(std::iter::repeat(b'a').take(MAX_HEAD_BYTES));
        bytes.extend_from_slice(b"\r\n\r\n");
        let mut reader = BufReader::new(&bytes[..]);
        let err = read_request(&mut reader, None).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidData);

        let mut reader = BufReader::new(&[b'G'; MAX_HEAD_BYTES + 1][..]);
        let err = read_request(&mut reader, None).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidData);
    }

    #[tokio::test]
    async fn connection_round_trip() {
        let mut router = Router::new();
        router.get("ping", Action::function(|_req, _res| async { Ok(json!({"pong": true})) }));
        let dispatcher = Dispatcher::new(router, Container::new(), ErrorHandler::new(false), RequestOptions::default());

        let (mut client, server) = tokio::io::duplex(4096);
        let serve = tokio::spawn(async move { handle_connection(&dispatcher, server, None).await });

        client.write_all(b"GET /ping HTTP/1.1\r\nHost: x\r\n\r\n").await.unwrap();
        let mut out = String::new();
        client.read_to_string(&mut out).await.unwrap();
        serve.await.unwrap().unwrap();

        assert!(out.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(out.contains("Connection: close\r\n"));
        assert!(out.ends_with(r#"{"data":{"pong":true},"message":"Success","success":true}"#));
    }
}
