pub mod handlers;
pub mod intake;
pub mod relay;

use crate::state::AppState;
use axum::Router;

pub fn router(max_upload_bytes: usize) -> Router<AppState> {
    handlers::process_routes(max_upload_bytes)
}
