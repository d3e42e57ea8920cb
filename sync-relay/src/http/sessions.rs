//! Live session listing.

use crate::server::SyncRelay;
use crate::status::SessionView;
use axum::{Extension, Json};
use std::sync::Arc;

/// Every open connection, ordered by connection id.
pub async fn status_handler(Extension(relay): Extension<Arc<SyncRelay>>) -> Json<Vec<SessionView>> {
    Json(relay.status_board().snapshot())
}
