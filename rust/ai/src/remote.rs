//! Remote chooser: posts the request to a scoring service and falls back
//! to the first legal token whenever the answer cannot be used.

use bytes::Bytes;
use engine::{deserialize_state, legal_moves_for, TokenId};
use futures_util::future::BoxFuture;
use http_body_util::{BodyExt, Full};
use hyper::header::{CONTENT_TYPE, HOST};
use hyper::Request;
use hyper_util::rt::TokioIo;
use std::time::Duration;
use tokio::net::TcpStream;
use tracing::{debug, warn};

use crate::{first_legal, AiError, ChooseRequest, ChooseResponse, MoveChooser};

pub const AI_MOVE_PATH: &str = "/api/ai-move";

/// Moves a JSON body to the scoring service and returns `(status, body)`.
pub trait ScoringTransport: Send + Sync {
    fn post_json<'a>(
        &'a self,
        path: &'a str,
        body: Vec<u8>,
    ) -> BoxFuture<'a, Result<(u16, Vec<u8>), AiError>>;
}

/// One HTTP/1.1 connection per request over plain TCP.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    authority: String,
    timeout: Duration,
}

impl HttpTransport {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, AiError> {
        let rest = base_url
            .trim()
            .strip_prefix("http://")
            .ok_or_else(|| AiError::Transport(format!("unsupported url {base_url}")))?;
        let authority = rest.trim_end_matches('/');
        if authority.is_empty() || authority.contains('/') {
            return Err(AiError::Transport(format!("expected http://host:port, got {base_url}")));
        }
        let authority = if authority.contains(':') {
            authority.to_string()
        } else {
            format!("{authority}:80")
        };
        Ok(Self { authority, timeout })
    }

    pub fn authority(&self) -> &str {
        &self.authority
    }

    async fn send(&self, path: &str, body: Vec<u8>) -> Result<(u16, Vec<u8>), AiError> {
        let stream = TcpStream::connect(&self.authority)
            .await
            .map_err(|err| AiError::Transport(err.to_string()))?;
        let (mut sender, conn) = hyper::client::conn::http1::handshake(TokioIo::new(stream))
            .await
            .map_err(|err| AiError::Transport(err.to_string()))?;
        tokio::spawn(async move {
            if let Err(err) = conn.await {
                debug!(%err, "scoring connection closed");
            }
        });

        let request = Request::post(path)
            .header(HOST, self.authority.as_str())
            .header(CONTENT_TYPE, "application/json")
            .body(Full::new(Bytes::from(body)))
            .map_err(|err| AiError::Transport(err.to_string()))?;
        let response = sender
            .send_request(request)
            .await
            .map_err(|err| AiError::Transport(err.to_string()))?;
        let status = response.status().as_u16();
        let bytes = response
            .into_body()
            .collect()
            .await
            .map_err(|err| AiError::Transport(err.to_string()))?
            .to_bytes();
        Ok((status, bytes.to_vec()))
    }
}

impl ScoringTransport for HttpTransport {
    fn post_json<'a>(
        &'a self,
        path: &'a str,
        body: Vec<u8>,
    ) -> BoxFuture<'a, Result<(u16, Vec<u8>), AiError>> {
        Box::pin(async move {
            tokio::time::timeout(self.timeout, self.send(path, body))
                .await
                .map_err(|_| AiError::Timeout)?
        })
    }
}

pub struct RemoteChooser<T> {
    transport: T,
}

impl<T: ScoringTransport> RemoteChooser<T> {
    pub fn new(transport: T) -> Self {
        Self { transport }
    }

    /// Raw answer from the service, without fallback.
    pub async fn request(&self, request: &ChooseRequest) -> Result<Option<TokenId>, AiError> {
        let body = serde_json::to_vec(request).map_err(|err| AiError::Decode(err.to_string()))?;
        let (status, bytes) = self.transport.post_json(AI_MOVE_PATH, body).await?;
        if !(200..300).contains(&status) {
            return Err(AiError::Status(status));
        }
        let response: ChooseResponse =
            serde_json::from_slice(&bytes).map_err(|err| AiError::Decode(err.to_string()))?;
        Ok(response.token_id)
    }

    async fn choose_or_fallback(
        &self,
        request: &ChooseRequest,
    ) -> Result<Option<TokenId>, AiError> {
        let state = deserialize_state(&request.state)
            .map_err(|err| AiError::InvalidRequest(err.to_string()))?;
        let legal = legal_moves_for(&state, request.player_id, request.roll);
        if legal.is_empty() {
            return Ok(None);
        }
        let fallback = first_legal(&state, request.player_id, request.roll);
        match self.request(request).await {
            Ok(Some(token)) if legal.contains(&token) => Ok(Some(token)),
            Ok(Some(token)) => {
                warn!(%token, "scoring service picked an illegal token, using first legal");
                Ok(fallback)
            }
            Ok(None) => {
                warn!("scoring service returned no token, using first legal");
                Ok(fallback)
            }
            Err(err) => {
                warn!(%err, "scoring service unavailable, using first legal");
                Ok(fallback)
            }
        }
    }
}

impl<T: ScoringTransport> MoveChooser for RemoteChooser<T> {
    fn choose<'a>(
        &'a self,
        request: &'a ChooseRequest,
    ) -> BoxFuture<'a, Result<Option<TokenId>, AiError>> {
        Box::pin(self.choose_or_fallback(request))
    }
}
