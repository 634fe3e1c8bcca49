use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use chrono::NaiveDateTime;
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio_util::codec::{Framed, LinesCodec, LinesCodecError};
use tracing::{debug, warn};
use ulid::Ulid;

use crate::limits::{MAX_LINE_LEN, MAX_LISTEN_CHANNELS};
use crate::model::*;
use crate::observability::{request_label, REQUESTS_TOTAL, REQUEST_DURATION_SECONDS};
use crate::scheduler::Scheduler;
use crate::validator::EngineError;

// ── Protocol ─────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchItem {
    pub proposal: ProposedAppointment,
    #[serde(default)]
    pub exclude_id: Option<Ulid>,
}

/// One request per line, tagged by `op`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Request {
    Validate {
        proposal: ProposedAppointment,
        #[serde(default)]
        exclude_id: Option<Ulid>,
    },
    ValidateBatch {
        items: Vec<BatchItem>,
    },
    Book {
        proposal: ProposedAppointment,
    },
    Reschedule {
        id: Ulid,
        proposal: ProposedAppointment,
    },
    Cancel {
        id: Ulid,
    },
    Update {
        update: UpdateRequest,
    },
    RegisterClient {
        client: Client,
    },
    RegisterCollection {
        collection: Collection,
    },
    SetAgreement {
        agreement: Agreement,
    },
    Availability {
        collection_id: Ulid,
        start: NaiveDateTime,
        end: NaiveDateTime,
    },
    CollectionStats {
        collection_id: Ulid,
    },
    Listen {
        collection_id: Ulid,
    },
    /// Without a collection, stop every subscription of the connection.
    Unlisten {
        #[serde(default)]
        collection_id: Option<Ulid>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub kind: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub report: Option<ValidationReport>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationBody {
    pub collection_id: Ulid,
    pub event: Event,
}

/// One response (or pushed notification) per line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Response {
    Ok(serde_json::Value),
    Error(ErrorBody),
    Notification(NotificationBody),
}

impl Response {
    fn ok(payload: impl Serialize) -> Self {
        match serde_json::to_value(payload) {
            Ok(value) => Response::Ok(value),
            Err(e) => Response::protocol_error("internal", e.to_string()),
        }
    }

    fn protocol_error(kind: &str, message: impl Into<String>) -> Self {
        Response::Error(ErrorBody {
            kind: kind.to_string(),
            message: message.into(),
            report: None,
        })
    }
}

impl From<EngineError> for Response {
    fn from(e: EngineError) -> Self {
        let kind = e.kind().to_string();
        let message = e.to_string();
        let report = match e {
            EngineError::Rejected(report) => Some(*report),
            _ => None,
        };
        Response::Error(ErrorBody {
            kind,
            message,
            report,
        })
    }
}

// ── Connection errors ────────────────────────────────────

#[derive(Debug)]
pub enum WireError {
    Codec(LinesCodecError),
    Encode(serde_json::Error),
}

impl std::fmt::Display for WireError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WireError::Codec(e) => write!(f, "line codec: {e}"),
            WireError::Encode(e) => write!(f, "encode response: {e}"),
        }
    }
}

impl std::error::Error for WireError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            WireError::Codec(e) => Some(e),
            WireError::Encode(e) => Some(e),
        }
    }
}

impl From<LinesCodecError> for WireError {
    fn from(e: LinesCodecError) -> Self {
        WireError::Codec(e)
    }
}

impl From<serde_json::Error> for WireError {
    fn from(e: serde_json::Error) -> Self {
        WireError::Encode(e)
    }
}

// ── Session ──────────────────────────────────────────────

/// Per-connection state: the scheduler handle and live subscriptions.
struct Session {
    scheduler: Arc<Scheduler>,
    listeners: HashMap<Ulid, JoinHandle<()>>,
    notify_tx: mpsc::Sender<NotificationBody>,
}

impl Session {
    async fn handle(&mut self, request: Request) -> Response {
        let s = self.scheduler.clone();
        let result: Result<Response, EngineError> = match request {
            Request::Validate {
                proposal,
                exclude_id,
            } => s.validate(&proposal, exclude_id).map(Response::ok),
            Request::ValidateBatch { items } => {
                let items: Vec<_> = items
                    .into_iter()
                    .map(|item| (item.proposal, item.exclude_id))
                    .collect();
                s.validate_batch(&items).await.map(Response::ok)
            }
            Request::Book { proposal } => s.book(proposal).await.map(Response::ok),
            Request::Reschedule { id, proposal } => {
                s.reschedule(id, proposal).await.map(Response::ok)
            }
            Request::Cancel { id } => s.cancel(id).await.map(Response::ok),
            Request::Update { update } => s
                .apply_update(update)
                .await
                .map(|report| Response::ok(json!({ "report": report }))),
            Request::RegisterClient { client } => {
                let id = client.id;
                s.register_client(client)
                    .await
                    .map(|()| Response::ok(json!({ "id": id })))
            }
            Request::RegisterCollection { collection } => {
                let id = collection.id;
                s.register_collection(collection)
                    .await
                    .map(|()| Response::ok(json!({ "id": id })))
            }
            Request::SetAgreement { agreement } => {
                let saved = agreement.clone();
                s.set_agreement(agreement).await.map(|()| Response::ok(saved))
            }
            Request::Availability {
                collection_id,
                start,
                end,
            } => s
                .compute_availability(collection_id, start, end)
                .map(Response::ok),
            Request::CollectionStats { collection_id } => {
                s.collection_stats(collection_id).map(Response::ok)
            }
            Request::Listen { collection_id } => self.listen(collection_id),
            Request::Unlisten { collection_id } => Ok(self.unlisten(collection_id)),
        };
        result.unwrap_or_else(Response::from)
    }

    fn listen(&mut self, collection_id: Ulid) -> Result<Response, EngineError> {
        if self.scheduler.store().get_collection(&collection_id).is_none() {
            return Err(EngineError::NotFound(collection_id));
        }
        if !self.listeners.contains_key(&collection_id) {
            if self.listeners.len() >= MAX_LISTEN_CHANNELS {
                return Err(EngineError::LimitExceeded("too many subscriptions"));
            }
            let rx = self.scheduler.notify.subscribe(collection_id);
            let task = tokio::spawn(forward(collection_id, rx, self.notify_tx.clone()));
            self.listeners.insert(collection_id, task);
        }
        Ok(Response::ok(json!({ "listening": self.listening() })))
    }

    fn unlisten(&mut self, collection_id: Option<Ulid>) -> Response {
        let targets: Vec<Ulid> = match collection_id {
            Some(id) => vec![id],
            None => self.listeners.keys().copied().collect(),
        };
        for id in targets {
            if let Some(task) = self.listeners.remove(&id) {
                task.abort();
            }
            self.scheduler.notify.prune(&id);
        }
        Response::ok(json!({ "listening": self.listening() }))
    }

    fn listening(&self) -> Vec<Ulid> {
        let mut ids: Vec<Ulid> = self.listeners.keys().copied().collect();
        ids.sort();
        ids
    }

    fn close(&mut self) {
        self.unlisten(None);
    }
}

/// Relay one collection's feed into the connection's outbound queue.
async fn forward(
    collection_id: Ulid,
    mut rx: broadcast::Receiver<Event>,
    tx: mpsc::Sender<NotificationBody>,
) {
    loop {
        match rx.recv().await {
            Ok(event) => {
                if tx.send(NotificationBody { collection_id, event }).await.is_err() {
                    break;
                }
            }
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(%collection_id, skipped, "listener lagged, notifications dropped");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

fn decode(line: &str) -> Result<Request, Response> {
    serde_json::from_str(line).map_err(|e| Response::protocol_error("bad_request", e.to_string()))
}

/// Serve one connection until the peer closes it.
pub async fn process_connection<S>(stream: S, scheduler: Arc<Scheduler>) -> Result<(), WireError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut framed = Framed::new(stream, LinesCodec::new_with_max_length(MAX_LINE_LEN));
    let (notify_tx, mut notify_rx) = mpsc::channel(256);
    let mut session = Session {
        scheduler,
        listeners: HashMap::new(),
        notify_tx,
    };

    let result = loop {
        tokio::select! {
            line = framed.next() => {
                let line = match line {
                    None => break Ok(()),
                    Some(Ok(line)) => line,
                    Some(Err(LinesCodecError::MaxLineLengthExceeded)) => {
                        let reply = Response::protocol_error("bad_request", "line too long");
                        if let Err(e) = send(&mut framed, &reply).await {
                            break Err(e);
                        }
                        continue;
                    }
                    Some(Err(e)) => break Err(e.into()),
                };
                if line.trim().is_empty() {
                    continue;
                }
                let reply = match decode(&line) {
                    Ok(request) => dispatch(&mut session, request).await,
                    Err(reply) => reply,
                };
                if let Err(e) = send(&mut framed, &reply).await {
                    break Err(e);
                }
            }
            Some(body) = notify_rx.recv() => {
                if let Err(e) = send(&mut framed, &Response::Notification(body)).await {
                    break Err(e);
                }
            }
        }
    };
    session.close();
    result
}

async fn dispatch(session: &mut Session, request: Request) -> Response {
    let op = request_label(&request);
    let started = Instant::now();
    let reply = session.handle(request).await;
    let status = match &reply {
        Response::Error(body) => {
            debug!(op, kind = %body.kind, "request failed: {}", body.message);
            "error"
        }
        _ => "ok",
    };
    metrics::counter!(REQUESTS_TOTAL, "op" => op, "status" => status).increment(1);
    metrics::histogram!(REQUEST_DURATION_SECONDS, "op" => op)
        .record(started.elapsed().as_secs_f64());
    reply
}

async fn send<S>(framed: &mut Framed<S, LinesCodec>, response: &Response) -> Result<(), WireError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    framed.send(serde_json::to_string(response)?).await?;
    Ok(())
}
