//! OAuth2 callback listener
//!
//! A single-use local HTTP endpoint that captures the provider redirect,
//! validates it against the session, exchanges the code and records the
//! connected environment. The socket is closed as soon as the first callback
//! request is accepted.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use chrono::Utc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use url::Url;
use crate::Result;
use crate::environments::{EnvironmentRecord, EnvironmentStore, MergeOutcome};
use crate::error::Error;
use super::pkce::Session;
use super::token_exchange::TokenExchanger;

/// Largest request head accepted from the browser
const MAX_REQUEST_BYTES: usize = 8192;

/// How long a connection may take to send its request head
const REQUEST_HEAD_TIMEOUT: Duration = Duration::from_secs(10);

/// Success HTML page shown after the environment is saved
const SUCCESS_HTML: &str = r#"<!DOCTYPE html>
<html lang="en">
<head>
    <meta charset="UTF-8">
    <title>sfauth | Connected</title>
    <style>
        body {
            font-family: Arial, -apple-system, system-ui, sans-serif;
            background: #f3f3f3;
            margin: 0;
        }
        .card {
            max-width: 480px;
            margin: 80px auto;
            padding: 32px;
            border: 1px solid #d8dde6;
            border-radius: 8px;
            text-align: center;
            background: #ffffff;
        }
        h1 { font-size: 20px; color: #16325c; margin-bottom: 16px; }
        p { font-size: 14px; color: #4a4a4a; }
    </style>
</head>
<body>
    <div class="card">
        <h1>Connection successful</h1>
        <p>Authentication is complete. You can close this window and return to your terminal.</p>
    </div>
</body>
</html>"#;

/// Error HTML page, `{{reason}}` is replaced with the escaped failure reason
const ERROR_HTML: &str = r#"<!DOCTYPE html>
<html lang="en">
<head>
    <meta charset="UTF-8">
    <title>sfauth | Connection Failed</title>
    <style>
        body {
            font-family: Arial, -apple-system, system-ui, sans-serif;
            background: #f3f3f3;
            margin: 0;
        }
        .card {
            max-width: 480px;
            margin: 80px auto;
            padding: 32px;
            border: 1px solid #d8dde6;
            border-radius: 8px;
            text-align: center;
            background: #ffffff;
        }
        h1 { font-size: 20px; color: #c23934; margin-bottom: 16px; }
        p { font-size: 14px; color: #4a4a4a; }
        code { font-size: 12px; color: #706e6b; }
    </style>
</head>
<body>
    <div class="card">
        <h1>Connection failed</h1>
        <p><code>{{reason}}</code></p>
        <p>Check your terminal, then run the connect command again.</p>
    </div>
</body>
</html>"#;

/// Query parameters of the provider redirect
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CallbackParams {
    pub code: Option<String>,
    pub state: Option<String>,
    pub error: Option<String>,
    pub error_description: Option<String>,
}

impl CallbackParams {
    /// Parse the query string of a request target such as `/callback?code=..&state=..`
    pub fn from_target(target: &str) -> Result<Self> {
        let url = Url::parse(&format!("http://localhost{}", target))
            .map_err(|e| Error::CallbackProtocol(format!("unparsable callback URL: {}", e)))?;

        let mut params = Self::default();
        for (key, value) in url.query_pairs() {
            let value = Some(value.into_owned()).filter(|v| !v.is_empty());
            match key.as_ref() {
                "code" | "state" if repeated(&params, &key) => {
                    return Err(Error::CallbackProtocol(format!("repeated {} parameter", key)));
                }
                "code" => params.code = value,
                "state" => params.state = value,
                "error" => params.error = value,
                "error_description" => params.error_description = value,
                _ => {}
            }
        }
        Ok(params)
    }

    /// Check the redirect against the session and return the authorization code.
    ///
    /// A provider error wins over everything else. Otherwise both `code` and
    /// `state` must be present and `state` must match exactly.
    pub fn validate(self, session: &Session) -> Result<String> {
        if let Some(error) = self.error {
            let reason = match self.error_description {
                Some(desc) => format!("provider returned {}: {}", error, desc),
                None => format!("provider returned {}", error),
            };
            return Err(Error::CallbackProtocol(reason));
        }

        match (self.code, self.state) {
            (Some(code), Some(state)) if session.state_matches(&state) => Ok(code),
            _ => Err(Error::CallbackProtocol("missing or mismatched code/state".to_string())),
        }
    }
}

fn repeated(params: &CallbackParams, key: &str) -> bool {
    match key {
        "code" => params.code.is_some(),
        "state" => params.state.is_some(),
        _ => false,
    }
}

/// A successfully connected environment
#[derive(Debug, Clone)]
pub struct Connected {
    pub record: EnvironmentRecord,
    pub outcome: MergeOutcome,
}

/// Listener lifecycle
enum ListenerState {
    Validating(CallbackParams),
    Exchanging { code: String },
    Done(Result<Connected>),
}

/// Everything the listener needs to finish one handshake
pub struct CallbackHandler {
    session: Session,
    alias: String,
    exchanger: Arc<dyn TokenExchanger>,
    store: EnvironmentStore,
}

impl CallbackHandler {
    pub fn new(
        session: Session,
        alias: impl Into<String>,
        exchanger: Arc<dyn TokenExchanger>,
        store: EnvironmentStore,
    ) -> Self {
        Self {
            session,
            alias: alias.into(),
            exchanger,
            store,
        }
    }

    /// Drive one callback request from validation to a terminal result
    pub async fn handle(&self, params: CallbackParams) -> Result<Connected> {
        let mut state = ListenerState::Validating(params);
        loop {
            state = match state {
                ListenerState::Validating(params) => match params.validate(&self.session) {
                    Ok(code) => ListenerState::Exchanging { code },
                    Err(e) => ListenerState::Done(Err(e)),
                },
                ListenerState::Exchanging { code } => {
                    ListenerState::Done(self.exchange_and_persist(&code).await)
                }
                ListenerState::Done(result) => return result,
            };
            tracing::debug!("Callback listener -> {}", state.name());
        }
    }

    async fn exchange_and_persist(&self, code: &str) -> Result<Connected> {
        let token = self.exchanger.exchange(code, &self.session.code_verifier).await?;
        let record = EnvironmentRecord::from_token(&self.alias, &token, Utc::now());

        if record.org_id.is_none() {
            tracing::warn!("Could not determine org id from identity URL {:?}", token.id);
        }

        let outcome = self.store.upsert(record.clone())?;
        Ok(Connected { record, outcome })
    }
}

impl ListenerState {
    fn name(&self) -> &'static str {
        match self {
            ListenerState::Validating(_) => "validating",
            ListenerState::Exchanging { .. } => "exchanging",
            ListenerState::Done(Ok(_)) => "done(success)",
            ListenerState::Done(Err(_)) => "done(failure)",
        }
    }
}

/// Bound, not yet serving, callback endpoint
pub struct CallbackListener {
    listener: TcpListener,
    callback_path: String,
}

impl CallbackListener {
    /// Bind `127.0.0.1:<port>`; port 0 picks a free port
    pub async fn bind(port: u16, callback_path: impl Into<String>) -> Result<Self> {
        let addr = format!("127.0.0.1:{}", port);
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|source| Error::ListenerBind { addr, source })?;

        Ok(Self {
            listener,
            callback_path: callback_path.into(),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Serve exactly one callback request, answering the browser with the result page.
    ///
    /// Each connection's request head is read on its own task, so an idle
    /// connection cannot hold up the redirect. Requests for any other path get
    /// a 404 and do not count as the callback. `accepted` fires once the
    /// callback request has been taken.
    async fn serve_once(self, handler: &CallbackHandler, accepted: oneshot::Sender<()>) -> Result<Connected> {
        let Self { listener, callback_path } = self;
        let callback_path = Arc::new(callback_path);
        let (hit_tx, mut hit_rx) = mpsc::channel::<(TcpStream, String)>(1);

        let (mut socket, target) = loop {
            tokio::select! {
                conn = listener.accept() => {
                    let (socket, peer) = conn?;
                    tokio::spawn(route_connection(socket, peer, callback_path.clone(), hit_tx.clone()));
                }
                Some(hit) = hit_rx.recv() => break hit,
            }
        };

        // Only one redirect is ever serviced; later callback hits find the channel closed
        drop(listener);
        drop(hit_rx);
        let _ = accepted.send(());
        tracing::info!("Callback received");

        let result = match CallbackParams::from_target(&target) {
            Ok(params) => handler.handle(params).await,
            Err(e) => Err(e),
        };

        let (status, body) = match &result {
            Ok(_) => ("200 OK", SUCCESS_HTML.to_string()),
            Err(e @ Error::CallbackProtocol(_)) => ("400 Bad Request", error_page(&e.to_string())),
            Err(e) => ("500 Internal Server Error", error_page(&e.to_string())),
        };

        if let Err(e) = write_response(&mut socket, status, "text/html; charset=utf-8", &body).await {
            tracing::warn!("Failed to send callback response: {}", e);
        }

        result
    }

    /// Serve the callback on a background task, signalling completion through a oneshot
    pub fn spawn(self, handler: CallbackHandler) -> PendingCallback {
        let (tx, rx) = oneshot::channel();
        let (accepted_tx, accepted) = oneshot::channel();
        let task = tokio::spawn(async move {
            let result = self.serve_once(&handler, accepted_tx).await;
            let _ = tx.send(result);
        });
        PendingCallback { rx, accepted, task }
    }
}

/// Read one connection's request head and forward it if it targets the callback path
async fn route_connection(
    mut socket: TcpStream,
    peer: SocketAddr,
    callback_path: Arc<String>,
    hits: mpsc::Sender<(TcpStream, String)>,
) {
    let target = match tokio::time::timeout(REQUEST_HEAD_TIMEOUT, read_request_target(&mut socket)).await {
        Ok(Ok(target)) => target,
        Ok(Err(e)) => {
            tracing::debug!("Dropping unreadable request from {}: {}", peer, e);
            return;
        }
        Err(_) => {
            tracing::debug!("Dropping idle connection from {}", peer);
            return;
        }
    };

    if request_path(&target) == callback_path.as_str() {
        if hits.send((socket, target)).await.is_err() {
            tracing::debug!("Rejecting callback from {} after the first one", peer);
        }
        return;
    }

    tracing::debug!("Ignoring request for {}", request_path(&target));
    let _ = write_response(&mut socket, "404 Not Found", "text/plain", "Not found").await;
}

/// Completion signal of a spawned listener
pub struct PendingCallback {
    rx: oneshot::Receiver<Result<Connected>>,
    accepted: oneshot::Receiver<()>,
    task: JoinHandle<()>,
}

impl PendingCallback {
    /// Wait for the handshake to finish.
    ///
    /// `timeout` bounds only the wait for the browser redirect. Once the
    /// callback is accepted the exchange and registry update run to completion.
    /// On timeout or Ctrl+C the listener task is aborted, closing the socket.
    pub async fn wait(self, timeout: Option<Duration>) -> Result<Connected> {
        let Self { rx, accepted, task } = self;

        let result = tokio::select! {
            result = complete(rx, accepted, timeout) => result,
            _ = tokio::signal::ctrl_c() => Err(Error::Interrupted),
        };

        if result.is_err() {
            task.abort();
        }
        result
    }
}

async fn complete(
    rx: oneshot::Receiver<Result<Connected>>,
    accepted: oneshot::Receiver<()>,
    timeout: Option<Duration>,
) -> Result<Connected> {
    if let Some(limit) = timeout {
        // A dropped sender means the listener ended early; `rx` carries the reason
        if tokio::time::timeout(limit, accepted).await.is_err() {
            return Err(Error::Timeout(limit));
        }
    }

    match rx.await {
        Ok(result) => result,
        Err(_) => Err(Error::CallbackProtocol("callback listener stopped unexpectedly".to_string())),
    }
}

/// Read the request head and return the request target of a GET
async fn read_request_target(socket: &mut TcpStream) -> Result<String> {
    let mut buffer = Vec::with_capacity(1024);
    let mut chunk = [0u8; 1024];

    loop {
        let n = socket.read(&mut chunk).await?;
        if n == 0 {
            break;
        }
        buffer.extend_from_slice(&chunk[..n]);
        if buffer.windows(4).any(|w| w == b"\r\n\r\n") || buffer.len() >= MAX_REQUEST_BYTES {
            break;
        }
    }

    let request = String::from_utf8_lossy(&buffer);
    let first_line = request
        .lines()
        .next()
        .ok_or_else(|| Error::CallbackProtocol("empty request".to_string()))?;

    // GET /callback?code=xxx&state=yyy HTTP/1.1
    let mut parts = first_line.split_whitespace();
    match (parts.next(), parts.next()) {
        (Some("GET"), Some(target)) => Ok(target.to_string()),
        _ => Err(Error::CallbackProtocol(format!("unexpected request line: {}", first_line))),
    }
}

fn request_path(target: &str) -> &str {
    target.split('?').next().unwrap_or(target)
}

async fn write_response(socket: &mut TcpStream, status: &str, content_type: &str, body: &str) -> Result<()> {
    let response = format!(
        "HTTP/1.1 {}\r\nContent-Type: {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        status,
        content_type,
        body.len(),
        body
    );

    socket.write_all(response.as_bytes()).await?;
    socket.flush().await?;
    socket.shutdown().await?;
    Ok(())
}

fn error_page(reason: &str) -> String {
    ERROR_HTML.replace("{{reason}}", &escape_html(reason))
}

fn escape_html(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            _ => escaped.push(c),
        }
    }
    escaped
}
