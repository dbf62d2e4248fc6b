//! HTTP transport
//!
//! Every request addresses a topic through its path, `/{key}` or
//! `/{key}:{password}`. Responsibilities:
//! - `GET ?sse`: subscribe and stream messages as server-sent events, with a
//!   keepalive comment while the topic is quiet
//! - `GET`: wait for one message and return its raw bytes
//! - `POST`: publish the body
//! - `PUT ?id=N`: compact history up to `N` with the body as summary
//! - `DELETE`: clear history
//!
//! A subscription lives exactly as long as the response that carries it:
//! when the client goes away the stream is dropped, and dropping the
//! subscription unsubscribes it.

use std::convert::Infallible;
use std::time::Duration;

use axum::Router;
use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, Method, StatusCode, Uri};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::any;
use futures::stream::{self, Stream};
use tokio::net::TcpListener;
use tracing::{debug, error, info};

use crate::broker::Broker;
use crate::broker::message::Message;
use crate::client::Subscription;
use crate::transport::message::{
    ClearAck, CompactAck, ErrorBody, PublishAck, RequestParams, parse_cursor, split_password,
};
use crate::utils::error::{BrokerError, BrokerResult};

const LAST_EVENT_ID: &str = "last-event-id";

pub fn router(broker: Broker) -> Router {
    Router::new()
        .route("/{*path}", any(handle))
        .with_state(broker)
}

/// Serve the broker on an already bound listener until the server fails.
pub async fn serve(listener: TcpListener, broker: Broker) -> std::io::Result<()> {
    axum::serve(listener, router(broker)).await
}

pub async fn start_http_server(addr: &str, broker: Broker) -> std::io::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    info!("Serving on http://{}", listener.local_addr()?);
    serve(listener, broker).await
}

async fn handle(
    State(broker): State<Broker>,
    method: Method,
    uri: Uri,
    Path(path): Path<String>,
    Query(params): Query<RequestParams>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    debug!(%method, %uri, "request");
    let (key, password) = split_password(&path);

    let result = match method {
        Method::GET if params.wants_sse() => {
            stream_events(&broker, key, password, &params, &headers).await
        }
        Method::GET => receive_one(&broker, key, password, &params).await,
        Method::POST => publish(&broker, key, password, body).await,
        Method::PUT => compact(&broker, key, password, &params, body).await,
        Method::DELETE => clear(&broker, key, password).await,
        _ => return (StatusCode::METHOD_NOT_ALLOWED, "Unsupported Method").into_response(),
    };

    result.unwrap_or_else(|e| e.into_response())
}

async fn stream_events(
    broker: &Broker,
    key: &str,
    password: &str,
    params: &RequestParams,
    headers: &HeaderMap,
) -> BrokerResult<Response> {
    // Browsers resend Last-Event-ID on reconnect; it only means something
    // on topics that keep history.
    let cursor = params.cursor().or_else(|| {
        if broker.is_history_key(key) {
            parse_cursor(headers.get(LAST_EVENT_ID).and_then(|v| v.to_str().ok()))
        } else {
            None
        }
    });

    let subscription = broker.subscribe(key, password, cursor).await?;
    debug!(topic = %key, subscriber = %subscription.id(), ?cursor, "event stream opened");

    let keepalive = Duration::from_secs(broker.settings().keepalive_secs);
    Ok(Sse::new(events(subscription))
        .keep_alive(KeepAlive::new().interval(keepalive).text("ping"))
        .into_response())
}

fn events(subscription: Subscription) -> impl Stream<Item = Result<Event, Infallible>> {
    stream::unfold(subscription, |mut subscription| async move {
        let message = subscription.recv().await?;
        Some((Ok(to_event(&message)), subscription))
    })
}

fn to_event(message: &Message) -> Event {
    Event::default()
        .id(message.id.to_string())
        .data(event_data(&message.data))
}

/// SSE readers also end a line at a bare `\r`, but axum only splits `data:`
/// lines on `\n`. Normalise so a stray `\r` cannot inject a blank line.
fn event_data(data: &[u8]) -> String {
    String::from_utf8_lossy(data)
        .replace("\r\n", "\n")
        .replace('\r', "\n")
}

async fn receive_one(
    broker: &Broker,
    key: &str,
    password: &str,
    params: &RequestParams,
) -> BrokerResult<Response> {
    let mut subscription = match params.cursor() {
        Some(cursor) => broker.subscribe(key, password, Some(cursor)).await?,
        None => broker.subscribe_live(key, password).await?,
    };

    let message = subscription.recv().await;
    subscription.unsubscribe().await;

    Ok(match message {
        Some(message) => message.data.into_response(),
        None => StatusCode::NO_CONTENT.into_response(),
    })
}

async fn publish(broker: &Broker, key: &str, password: &str, body: Bytes) -> BrokerResult<Response> {
    let published = broker.publish(key, password, body).await?;
    Ok(Json(PublishAck {
        id: published.id,
        remaining: published.remaining,
    })
    .into_response())
}

async fn compact(
    broker: &Broker,
    key: &str,
    password: &str,
    params: &RequestParams,
    body: Bytes,
) -> BrokerResult<Response> {
    let compacted = broker.compact(key, password, params.cursor(), body).await?;
    Ok(Json(CompactAck { compacted }).into_response())
}

async fn clear(broker: &Broker, key: &str, password: &str) -> BrokerResult<Response> {
    broker.clear_history(key, password).await?;
    Ok(Json(ClearAck { cleared: true }).into_response())
}

impl IntoResponse for BrokerError {
    fn into_response(self) -> Response {
        let status = match &self {
            BrokerError::NotHistoryEnabled(_) | BrokerError::MissingCursor => {
                StatusCode::BAD_REQUEST
            }
            BrokerError::Forbidden => StatusCode::FORBIDDEN,
            BrokerError::TopicClosed(_) | BrokerError::Persistence(_) => {
                error!(error = %self, "request failed");
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        (
            status,
            Json(ErrorBody {
                error: self.to_string(),
            }),
        )
            .into_response()
    }
}
