pub mod diagnostics;
pub mod migrations;
pub mod mounts;
pub mod nodes;
pub mod proxy;

use axum::{
    Router,
    extract::DefaultBodyLimit,
    routing::{any, delete, get, post, put},
};

use crate::core::state::ControlState;

/// Archives are the largest thing crossing this API, on the proxy path and
/// on the migration receive endpoint alike.
pub const MAX_BODY_BYTES: usize = 1024 * 1024 * 1024;

/// The node's full API surface. Also dispatched in-process for
/// self-addressed `/proxy/{node_id}/...` requests.
pub fn router(state: ControlState) -> Router {
    Router::new()
        .route("/healthz", get(nodes::healthz))
        .route("/nodes", get(nodes::list_nodes).post(nodes::add_node))
        .route("/nodes/{node_id}", delete(nodes::remove_node))
        .route("/proxy/{node_id}/{*rest}", any(proxy::proxy_request))
        .route(
            "/mounts",
            get(mounts::list_mounts).post(mounts::create_mount),
        )
        .route("/mounts/apply", post(mounts::apply_mount))
        .route(
            "/mounts/{id}",
            put(mounts::update_mount).delete(mounts::delete_mount),
        )
        .route("/mounts/{id}/mount", post(mounts::mount_one))
        .route("/mounts/{id}/unmount", post(mounts::unmount_one))
        .route("/mounts/{id}/sync", post(mounts::sync_one))
        .route("/migrations", post(migrations::start_migration))
        .route("/migrations/token", post(migrations::issue_token))
        .route("/migrations/{id}", get(migrations::get_migration))
        .route(
            "/internal/migrations/receive",
            post(migrations::receive_transfer),
        )
        .route(
            "/internal/migrations/import",
            post(migrations::import_transfer),
        )
        .route("/diagnostics", post(diagnostics::run_diagnostics))
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .with_state(state)
}
