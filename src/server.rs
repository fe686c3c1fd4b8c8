//! HTTP server and routes.

mod handlers;
pub mod rate_limit;
mod state;

pub use state::AppState;

use axum::{
    Router,
    extract::DefaultBodyLimit,
    middleware,
    routing::{delete, get, post, put},
};
use tower_http::{cors::CorsLayer, limit::RequestBodyLimitLayer, trace::TraceLayer};

/// Multipart framing on top of the file itself.
const UPLOAD_OVERHEAD_BYTES: usize = 64 * 1024;

/// Create the application router.
pub fn create_router(state: AppState) -> Router {
    let auth_routes = Router::new()
        .route("/register", post(handlers::auth_register))
        .route("/login", post(handlers::auth_login))
        .route("/logout", post(handlers::auth_logout))
        .route("/me", get(handlers::auth_me));

    let book_routes = Router::new()
        .route("/", get(handlers::list_books))
        .route(
            "/{id}",
            get(handlers::get_book)
                .put(handlers::update_book)
                .delete(handlers::delete_book),
        )
        .route("/{id}/progress", put(handlers::update_progress))
        .route("/{id}/cover", get(handlers::book_cover))
        .route("/{id}/download-url", get(handlers::download_url));

    let bookmark_routes = Router::new()
        .route(
            "/",
            get(handlers::list_bookmarks).post(handlers::create_bookmark),
        )
        .route(
            "/{id}",
            put(handlers::update_bookmark).delete(handlers::delete_bookmark),
        );

    let highlight_routes = Router::new()
        .route(
            "/",
            get(handlers::list_highlights).post(handlers::create_highlight),
        )
        .route(
            "/{id}",
            put(handlers::update_highlight).delete(handlers::delete_highlight),
        );

    let collection_routes = Router::new()
        .route(
            "/",
            get(handlers::list_collections).post(handlers::create_collection),
        )
        .route(
            "/{id}",
            put(handlers::rename_collection).delete(handlers::delete_collection),
        )
        .route("/{id}/books", post(handlers::add_collection_book))
        .route(
            "/{id}/books/{book_id}",
            delete(handlers::remove_collection_book),
        );

    let analytics_routes = Router::new()
        .route(
            "/sessions",
            get(handlers::list_sessions).post(handlers::log_session),
        )
        .route("/summary", get(handlers::analytics_summary))
        .route(
            "/goals",
            get(handlers::list_goals).post(handlers::create_goal),
        )
        .route(
            "/goals/{id}",
            put(handlers::update_goal).delete(handlers::delete_goal),
        );

    let max_upload = state.config.storage.max_upload_bytes();

    let api_routes = Router::new()
        .nest("/auth", auth_routes)
        .nest("/books", book_routes)
        .nest("/bookmarks", bookmark_routes)
        .nest("/highlights", highlight_routes)
        .nest("/collections", collection_routes)
        .nest("/analytics", analytics_routes)
        .route("/files/{token}", get(handlers::serve_file))
        .route(
            "/upload",
            post(handlers::upload_book)
                .layer::<_, std::convert::Infallible>(DefaultBodyLimit::disable())
                .layer(RequestBodyLimitLayer::new(
                    max_upload.saturating_add(UPLOAD_OVERHEAD_BYTES),
                )),
        )
        .layer(middleware::from_fn_with_state(
            state.clone(),
            rate_limit::rate_limit,
        ))
        // liveness probes are never limited
        .route("/health", get(handlers::health));

    Router::new()
        .nest("/api", api_routes)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
