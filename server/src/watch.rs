use std::sync::Arc;
use std::time::Duration;

use futures::future::select_all;
use lattice_model::{BaseError, WatchEvent, WatchKind};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::signalbus::Subscription;
use crate::store::{WatchRow, WatchSource};

/// How long parked watches wait before forcing a round of empty refetches.
///
/// This doubles as the stream's keepalive: even a completely idle stream
/// re-enters the loop (and notices cancellation) within this interval.
pub(crate) const PARK_KEEPALIVE: Duration = Duration::from_secs(30);

/// Per-watch state of the multiplex loop.
///
/// A watch is either draining its current page, refetching the next one, or
/// parked on its topic signal.
pub(crate) struct WatchState {
    kind: WatchKind,
    gt_revision: u64,
    at_tail: bool,
    parked: bool,
    sub: Subscription,
    source: Arc<dyn WatchSource>,
    page: Option<Vec<WatchRow>>,
    idx: usize,
}

impl WatchState {
    pub(crate) fn new(
        kind: WatchKind,
        gt_revision: u64,
        at_tail: bool,
        sub: Subscription,
        source: Arc<dyn WatchSource>,
    ) -> Self {
        Self {
            kind,
            gt_revision,
            at_tail,
            parked: false,
            sub,
            source,
            page: None,
            idx: 0,
        }
    }
}

/// Streams events for all watches of one connection until the connection
/// context ends.
///
/// Events go out through a bounded channel; a client that cannot drain
/// stalls only its own stream. The final event is always `close`, after
/// which the channel shuts.
pub(crate) async fn multiplex(
    mut states: Vec<WatchState>,
    events: mpsc::Sender<WatchEvent>,
    cancel: CancellationToken,
) {
    loop {
        let event = next_event(&mut states, &cancel).await;
        let done = event.is_close();

        if events.send(event).await.is_err() {
            // The client went away; nobody is listening anymore.
            return;
        }
        if done {
            return;
        }
    }
}

enum Unparked {
    Cancelled,
    Timeout,
    Signalled(usize),
}

/// Round-robins across all watches until one of them produces an event.
async fn next_event(states: &mut Vec<WatchState>, cancel: &CancellationToken) -> WatchEvent {
    loop {
        if cancel.is_cancelled() {
            return WatchEvent::Close;
        }

        let mut parked = 0;

        for i in 0..states.len() {
            let state = &mut states[i];

            if state.parked {
                // A signal may have arrived while other watches were being
                // serviced.
                if state.sub.try_signalled() {
                    state.parked = false;
                } else {
                    parked += 1;
                }
                continue;
            }

            if let Some(page) = &state.page {
                if state.idx < page.len() {
                    let row = &page[state.idx];
                    state.gt_revision = row.revision;
                    state.idx += 1;

                    return match row.deleted_at {
                        Some(_) => WatchEvent::Delete {
                            kind: state.kind,
                            value: row.value.clone(),
                        },
                        None => WatchEvent::Change {
                            kind: state.kind,
                            value: row.value.clone(),
                        },
                    };
                }
            }

            // Page exhausted (or never fetched): get the next one.
            let fetched = tokio::select! {
                _ = cancel.cancelled() => return WatchEvent::Close,
                result = state.source.fetch(state.gt_revision) => result,
            };

            let page = match fetched {
                Ok(page) => page,
                Err(e) => {
                    tracing::warn!(kind = %state.kind, "Dropping watch, fetch failed: {e:#}");

                    let mut failed = states.remove(i);
                    failed.sub.close();

                    return WatchEvent::Error {
                        value: BaseError::internal(),
                    };
                }
            };

            state.idx = 0;
            let drained = page.is_empty();
            state.page = Some(page);

            if drained {
                if !state.at_tail {
                    // Bookmark: all known history has been streamed, live
                    // changes follow.
                    state.at_tail = true;
                    return WatchEvent::Tail { kind: state.kind };
                }

                state.parked = true;
                parked += 1;
            }
        }

        if states.is_empty() {
            // Every watch errored out; nothing left to do but wait for the
            // connection to end.
            cancel.cancelled().await;
            return WatchEvent::Close;
        }

        if parked == states.len() {
            match wait_while_parked(states, cancel).await {
                Unparked::Cancelled => return WatchEvent::Close,
                Unparked::Signalled(i) => states[i].parked = false,
                // Keepalive: force a round of refetches. They either find
                // new rows or park everything again.
                Unparked::Timeout => {
                    for state in states.iter_mut() {
                        state.parked = false;
                    }
                }
            }
        }
    }
}

async fn wait_while_parked(states: &[WatchState], cancel: &CancellationToken) -> Unparked {
    let signals = states
        .iter()
        .map(|state| Box::pin(state.sub.signalled()))
        .collect::<Vec<_>>();

    tokio::select! {
        _ = cancel.cancelled() => Unparked::Cancelled,
        _ = tokio::time::sleep(PARK_KEEPALIVE) => Unparked::Timeout,
        (_, i, _) = select_all(signals) => Unparked::Signalled(i),
    }
}
