//! `GET /api/events`: the SSE adaptor over the broker (C1).

use std::convert::Infallible;
use std::time::Duration;

use axum::extract::State;
use axum::response::sse::{Event as SseEvent, KeepAlive, Sse};
use futures::stream::{self, Stream};
use runner_core::broker::SubscriberId;
use runner_core::Broker;
use tokio::sync::mpsc;

use crate::error::ApiError;
use crate::state::AppState;

struct Subscription {
    broker: Broker,
    id: SubscriberId,
    rx: mpsc::Receiver<runner_core::Event>,
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.broker.unsubscribe(self.id);
    }
}

pub async fn sse_handler(
    State(state): State<AppState>,
) -> Result<Sse<impl Stream<Item = Result<SseEvent, Infallible>>>, ApiError> {
    let (id, rx) = state.broker.subscribe().map_err(ApiError::Supervisor)?;
    let subscription = Subscription { broker: state.broker.clone(), id, rx };

    let stream = stream::unfold(subscription, |mut sub| async move {
        let event = sub.rx.recv().await?;
        let payload = serde_json::to_string(&event).unwrap_or_else(|_| "{}".to_string());
        Some((Ok(SseEvent::default().data(payload)), sub))
    });

    Ok(Sse::new(stream).keep_alive(KeepAlive::new().interval(Duration::from_secs(15))))
}
