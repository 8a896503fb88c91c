use std::sync::Arc;

use axum::Json;
use axum::Router;
use axum::body::Body;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::{Response, StatusCode, header};
use axum::response::IntoResponse;
use axum::routing::post;
use bytes::Bytes;
use futures::StreamExt as _;
use lattice_model::{BaseError, OrganizationId, WatchKind, WatchOptions, WatchRequest};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;

use crate::store::{EventStore, topic};
use crate::watch::{WatchState, multiplex};

pub const STREAM_CONTENT_TYPE: &str = "application/json;stream=watch";

#[derive(Clone)]
struct AppState {
    store: Arc<dyn EventStore>,
    shutdown: CancellationToken,
}

/// Builds the events API router.
///
/// `shutdown` is the server-wide connection context: cancelling it closes
/// every open stream with a terminal `close` event.
pub fn router(store: Arc<dyn EventStore>, shutdown: CancellationToken) -> Router {
    Router::new()
        .route(
            "/api/organizations/{organization_id}/events",
            post(watch_events),
        )
        .with_state(AppState { store, shutdown })
}

/// `POST /api/organizations/{organization_id}/events`
///
/// Body: a JSON array of watch requests. Response: HTTP 200 with a stream
/// of newline-separated JSON events, one per record, flushed per record.
async fn watch_events(
    State(state): State<AppState>,
    Path(organization_id): Path<String>,
    payload: Result<Json<Vec<WatchRequest>>, JsonRejection>,
) -> Response<Body> {
    let Ok(Json(request)) = payload else {
        return bad_request(BaseError::bad_payload());
    };

    let Ok(org) = organization_id.parse::<OrganizationId>() else {
        return bad_request(BaseError::bad_path_parameter("organization_id"));
    };

    match state.store.organization_readable(org).await {
        Ok(true) => {}
        Ok(false) => {
            return (StatusCode::NOT_FOUND, Json(BaseError::not_found("organization")))
                .into_response();
        }
        Err(e) => {
            tracing::error!("Failed to look up organization: {e:#}");

            return (StatusCode::INTERNAL_SERVER_ERROR, Json(BaseError::internal()))
                .into_response();
        }
    }

    let mut watches = Vec::with_capacity(request.len());
    for (i, r) in request.iter().enumerate() {
        let Ok(kind) = r.kind.parse::<WatchKind>() else {
            return bad_request(BaseError::invalid_field(format!("request[{i}].kind")));
        };

        let options = match (kind, &r.options) {
            (WatchKind::DeviceMetadata, Some(options)) => {
                match serde_json::from_value::<WatchOptions>(options.clone()) {
                    Ok(options) => options,
                    Err(_) => {
                        return bad_request(BaseError::invalid_field(format!(
                            "request[{i}].options"
                        )));
                    }
                }
            }
            _ => WatchOptions::default(),
        };

        // Subscribing before the first fetch closes the gap between "last
        // fetched" and "next notify".
        let sub = state.store.bus().subscribe(&topic(kind, org));
        let source = state.store.watch_source(org, kind, options);

        watches.push(WatchState::new(kind, r.gt_revision, r.at_tail, sub, source));
    }

    let cancel = state.shutdown.child_token();
    let (tx, rx) = mpsc::channel(1);
    tokio::spawn(multiplex(watches, tx, cancel));

    let body = Body::from_stream(ReceiverStream::new(rx).map(|event| {
        let mut line = serde_json::to_vec(&event)?;
        line.push(b'\n');

        Ok::<_, serde_json::Error>(Bytes::from(line))
    }));

    let mut response = Response::new(body);
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        header::HeaderValue::from_static(STREAM_CONTENT_TYPE),
    );

    response
}

fn bad_request(error: BaseError) -> Response<Body> {
    (StatusCode::BAD_REQUEST, Json(error)).into_response()
}
