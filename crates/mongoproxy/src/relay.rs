//! Per-connection relay
//!
//! One relay owns one client socket and one freshly opened upstream socket.
//! Each iteration reads a request, inspects it when it is an OP_QUERY,
//! forwards it untouched, then carries the reply back. Nothing is pipelined:
//! a reply is only read after its request has been fully written.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tracing::{debug, error, info, warn};

use mongoproxy_common::config::Config;
use mongoproxy_common::error::{Error, NetworkError, ProtocolError, Result};
use mongoproxy_protocol::document::Document;
use mongoproxy_protocol::frame::{Frame, FrameCodec, OpCode};
use mongoproxy_protocol::query::OpQuery;

use crate::registry::{invoke_all, DispatchReport, ListenerKey, ListenerRegistry};

/// Name of the command field carrying the inserted documents
const DOCUMENTS_FIELD: &str = "documents";

/// Relay settings shared by every connection of a proxy
#[derive(Debug, Clone)]
pub struct RelaySettings {
    pub upstream_addr: String,
    pub connect_timeout: Duration,
    pub codec: FrameCodec,
    pub client_idle_timeout: Option<Duration>,
    pub upstream_response_timeout: Option<Duration>,
}

impl RelaySettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            upstream_addr: config.upstream.addr(),
            connect_timeout: config.upstream.connect_timeout(),
            codec: FrameCodec::new(config.relay.max_message_bytes),
            client_idle_timeout: config.relay.client_idle_timeout(),
            upstream_response_timeout: config.relay.upstream_response_timeout(),
        }
    }
}

/// Lifecycle of a relay
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayState {
    Connecting,
    Relaying,
    Closed,
}

/// Why an OP_QUERY produced no dispatch
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    /// Namespace is not `<database>.$cmd`
    NotACommand,
    /// The query document could not be decoded
    Undecodable(ProtocolError),
    /// First element of the command is not a string (not a collection name)
    FirstElementNotString,
    NoDocumentsField,
    DocumentsNotADocument,
    /// `documents` holds no embedded document at position 0
    NoInsertedDocument,
    NoListeners(ListenerKey),
}

/// Result of inspecting one OP_QUERY
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Interception {
    Dispatched {
        key: ListenerKey,
        report: DispatchReport,
    },
    Skipped(SkipReason),
}

/// An insert command recognized in an OP_QUERY
#[derive(Debug, Clone, PartialEq)]
pub struct InsertCommand {
    pub database: String,
    pub collection: String,
    pub key: ListenerKey,
    /// First document of the `documents` field
    pub document: Document,
}

/// Recognize an insert command in an OP_QUERY frame
pub fn inspect_query(frame: &Frame) -> std::result::Result<InsertCommand, SkipReason> {
    let query = OpQuery::parse(frame).map_err(SkipReason::Undecodable)?;
    let database = query.command_database().ok_or(SkipReason::NotACommand)?;

    let command = query.query().map_err(SkipReason::Undecodable)?;
    debug!("Query on {}: {}", query.namespace(), command);

    let collection = command
        .get_index(0)
        .and_then(|e| e.value().as_str())
        .ok_or(SkipReason::FirstElementNotString)?;

    let documents = command
        .get(DOCUMENTS_FIELD)
        .ok_or(SkipReason::NoDocumentsField)?
        .value()
        .as_document()
        .ok_or(SkipReason::DocumentsNotADocument)?;

    let document = documents
        .get_index(0)
        .and_then(|e| e.value().as_document())
        .ok_or(SkipReason::NoInsertedDocument)?;

    Ok(InsertCommand {
        database: database.to_string(),
        collection: collection.to_string(),
        key: ListenerKey::new(database, collection),
        document: document.clone(),
    })
}

/// Inspect an OP_QUERY and run the matching listeners
///
/// Handlers run on the blocking pool and are awaited, so the request is
/// only forwarded once every handler has returned.
pub async fn intercept(frame: &Frame, registry: &ListenerRegistry) -> Interception {
    let insert = match inspect_query(frame) {
        Ok(insert) => insert,
        Err(reason) => return Interception::Skipped(reason),
    };

    let handlers = registry.lookup(&insert.key);
    if handlers.is_empty() {
        return Interception::Skipped(SkipReason::NoListeners(insert.key));
    }

    let key = insert.key.clone();
    let dispatched = tokio::task::spawn_blocking(move || {
        invoke_all(&handlers, &insert.key, &insert.document)
    })
    .await;

    let report = dispatched.unwrap_or_else(|e| {
        warn!("Listener dispatch for {} did not complete: {}", key, e);
        DispatchReport::default()
    });
    Interception::Dispatched { key, report }
}

async fn with_timeout<T, F>(limit: Option<Duration>, what: &str, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match limit {
        None => fut.await,
        Some(limit) => tokio::time::timeout(limit, fut)
            .await
            .map_err(|_| NetworkError::Timeout(format!("{} after {:?}", what, limit)))?,
    }
}

/// Relay frames until either side fails or hangs up
///
/// Only returns with an error; a clean client close between requests shows
/// up as `NetworkError::ConnectionClosed`.
pub async fn relay_frames<C, U>(
    client: &mut C,
    upstream: &mut U,
    registry: &ListenerRegistry,
    settings: &RelaySettings,
) -> Result<()>
where
    C: AsyncRead + AsyncWrite + Unpin,
    U: AsyncRead + AsyncWrite + Unpin,
{
    let codec = settings.codec;

    loop {
        let request = with_timeout(
            settings.client_idle_timeout,
            "waiting for client request",
            codec.read(client),
        )
        .await?;

        let header = request.header();
        debug!(
            "Opcode: {} (request_id={}, length={})",
            header.op_code, header.request_id, header.message_length
        );

        if header.op_code == OpCode::Query {
            match intercept(&request, registry).await {
                Interception::Dispatched { key, report } => {
                    debug!(
                        "Dispatched insert on {} to {} listener(s), {} failed",
                        key, report.invoked, report.failed
                    );
                }
                Interception::Skipped(SkipReason::Undecodable(e)) => {
                    warn!("Could not decode OP_QUERY {}: {}", header.request_id, e);
                }
                Interception::Skipped(reason) => {
                    debug!("No dispatch for OP_QUERY {}: {:?}", header.request_id, reason);
                }
            }
        }

        codec.write(upstream, &request).await?;

        if !request.expects_reply() {
            continue;
        }

        let response = with_timeout(
            settings.upstream_response_timeout,
            "waiting for upstream response",
            codec.read(upstream),
        )
        .await?;
        codec.write(client, &response).await?;
    }
}

/// Owns one accepted client connection for its whole life
pub struct ConnectionRelay {
    peer: SocketAddr,
    registry: Arc<ListenerRegistry>,
    settings: Arc<RelaySettings>,
    state: RelayState,
}

impl ConnectionRelay {
    pub fn new(
        peer: SocketAddr,
        registry: Arc<ListenerRegistry>,
        settings: Arc<RelaySettings>,
    ) -> Self {
        Self {
            peer,
            registry,
            settings,
            state: RelayState::Connecting,
        }
    }

    /// Run to completion and return the final state; failures are logged,
    /// never returned
    pub async fn run(mut self, client: TcpStream) -> RelayState {
        let result = self.drive(client).await;
        let previous = self.state;
        self.state = RelayState::Closed;

        match result {
            Ok(()) => debug!("Connection from {} closed", self.peer),
            Err(e) if e.is_disconnect() => {
                debug!("Connection from {} closed: {}", self.peer, e);
            }
            Err(e) => error!(
                "Connection from {} terminated while {:?}: {}",
                self.peer, previous, e
            ),
        }
        self.state
    }

    async fn drive(&mut self, mut client: TcpStream) -> Result<()> {
        let mut upstream = self.connect().await?;
        self.state = RelayState::Relaying;
        info!(
            "Relaying {} <-> {}",
            self.peer, self.settings.upstream_addr
        );

        relay_frames(&mut client, &mut upstream, &self.registry, &self.settings).await
    }

    async fn connect(&self) -> Result<TcpStream> {
        let addr = &self.settings.upstream_addr;
        let stream = tokio::time::timeout(self.settings.connect_timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| NetworkError::Timeout(format!("connecting to {}", addr)))?
            .map_err(|e| NetworkError::ConnectionFailed(format!("{}: {}", addr, e)))?;
        stream.set_nodelay(true).map_err(Error::Io)?;
        Ok(stream)
    }
}
