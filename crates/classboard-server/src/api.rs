use std::sync::Arc;

use axum::{
    extract::{DefaultBodyLimit, Path, Query, State},
    http::{HeaderMap, Method},
    middleware,
    routing::{get, patch, post, put},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;
use uuid::Uuid;

use classboard_shared::document::{
    Attribute, AttributePatch, ElementPatch, NewClass, Position, Relation, RelationPatch,
};
use classboard_shared::{DiagramId, UserId};
use classboard_store::{Diagram, NewDiagram, NewUser, User};

use crate::config::ServerConfig;
use crate::diagrams::{DiagramPatch, DiagramService};
use crate::error::ServerError;
use crate::rate_limit::{rate_limit_middleware, RateLimiter};

/// Header carrying the authenticated caller, set by the upstream auth proxy.
pub const CALLER_HEADER: &str = "x-user-id";

#[derive(Clone)]
pub struct AppState {
    pub diagrams: DiagramService,
    pub rate_limiter: RateLimiter,
    pub config: Arc<ServerConfig>,
}

pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::PATCH,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health_check))
        .route("/info", get(server_info))
        .route("/admin/users", post(admin_create_user))
        .route("/users", get(user_by_email))
        .route("/users/:user_id", get(user_by_id))
        .route("/users/:user_id/diagrams", get(list_owned))
        .route("/users/:user_id/diagrams/shared", get(list_shared))
        .route("/diagrams", post(create_diagram))
        .route(
            "/diagrams/:id",
            get(get_diagram).patch(update_diagram).delete(delete_diagram),
        )
        .route("/diagrams/:id/share", post(share_diagram))
        .route("/diagrams/:id/elements/:element_id", patch(update_element))
        .route(
            "/diagrams/:id/elements/:element_id/position",
            put(move_element),
        )
        .route(
            "/diagrams/:id/classes/:class_id",
            post(add_class).delete(remove_class),
        )
        .route(
            "/diagrams/:id/classes/:class_id/attributes",
            post(add_attribute),
        )
        .route(
            "/diagrams/:id/classes/:class_id/attributes/:index",
            patch(update_attribute).delete(remove_attribute),
        )
        .route(
            "/diagrams/:id/relations/:relation_id",
            post(add_relation)
                .patch(update_relation)
                .delete(remove_relation),
        )
        .layer(DefaultBodyLimit::max(state.config.max_body_bytes))
        .layer(middleware::from_fn_with_state(
            state.rate_limiter.clone(),
            rate_limit_middleware,
        ))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

#[derive(Serialize)]
struct ServerInfoResponse {
    name: String,
    version: &'static str,
    admin_enabled: bool,
}

#[derive(Deserialize)]
struct EmailQuery {
    email: String,
}

#[derive(Deserialize)]
struct ShareRequest {
    user_id: UserId,
}

async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

async fn server_info(State(state): State<AppState>) -> Json<ServerInfoResponse> {
    Json(ServerInfoResponse {
        name: state.config.instance_name.clone(),
        version: env!("CARGO_PKG_VERSION"),
        admin_enabled: state.config.admin_token.is_some(),
    })
}

/// Read the caller identity injected by the auth proxy.
fn caller(headers: &HeaderMap) -> Result<UserId, ServerError> {
    let raw = headers
        .get(CALLER_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| ServerError::Unauthorized(format!("Missing {CALLER_HEADER} header")))?;

    UserId::parse(raw)
        .map_err(|_| ServerError::Unauthorized(format!("Invalid {CALLER_HEADER} header")))
}

fn verify_admin_token(headers: &HeaderMap, config: &ServerConfig) -> Result<(), ServerError> {
    let Some(ref expected) = config.admin_token else {
        return Err(ServerError::Forbidden(
            "Admin API is disabled (no ADMIN_TOKEN configured)".into(),
        ));
    };

    let auth = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");

    let token = auth.strip_prefix("Bearer ").unwrap_or(auth);

    // Constant-time comparison to prevent timing attacks on admin token.
    use subtle::ConstantTimeEq;
    let token_bytes = token.as_bytes();
    let expected_bytes = expected.as_bytes();
    if token_bytes.len() != expected_bytes.len()
        || token_bytes.ct_eq(expected_bytes).unwrap_u8() != 1
    {
        return Err(ServerError::Forbidden("Invalid admin token".into()));
    }

    Ok(())
}

// ─── Users ───

async fn admin_create_user(
    headers: HeaderMap,
    State(state): State<AppState>,
    Json(req): Json<NewUser>,
) -> Result<Json<User>, ServerError> {
    verify_admin_token(&headers, &state.config)?;

    if req.email.trim().is_empty() || req.password_hash.is_empty() {
        return Err(ServerError::BadRequest(
            "email and password_hash are required".into(),
        ));
    }

    let user = state.diagrams.create_user(req).await?;
    Ok(Json(user))
}

async fn user_by_id(
    headers: HeaderMap,
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
) -> Result<Json<User>, ServerError> {
    caller(&headers)?;
    Ok(Json(state.diagrams.find_user(UserId(user_id)).await?))
}

async fn user_by_email(
    headers: HeaderMap,
    State(state): State<AppState>,
    Query(query): Query<EmailQuery>,
) -> Result<Json<User>, ServerError> {
    caller(&headers)?;
    Ok(Json(state.diagrams.find_user_by_email(&query.email).await?))
}

// ─── Diagrams ───

async fn list_owned(
    headers: HeaderMap,
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
) -> Result<Json<Vec<Diagram>>, ServerError> {
    let caller = caller(&headers)?;
    Ok(Json(state.diagrams.list_owned(UserId(user_id), caller).await?))
}

async fn list_shared(
    headers: HeaderMap,
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
) -> Result<Json<Vec<Diagram>>, ServerError> {
    let caller = caller(&headers)?;
    Ok(Json(state.diagrams.list_shared(UserId(user_id), caller).await?))
}

async fn create_diagram(
    headers: HeaderMap,
    State(state): State<AppState>,
    Json(req): Json<NewDiagram>,
) -> Result<Json<Diagram>, ServerError> {
    let caller = caller(&headers)?;
    if req.name.trim().is_empty() {
        return Err(ServerError::BadRequest("name is required".into()));
    }
    Ok(Json(state.diagrams.create(req, caller).await?))
}

async fn get_diagram(
    headers: HeaderMap,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Diagram>, ServerError> {
    let caller = caller(&headers)?;
    Ok(Json(state.diagrams.find_one(DiagramId(id), caller).await?))
}

async fn update_diagram(
    headers: HeaderMap,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(patch): Json<DiagramPatch>,
) -> Result<Json<Diagram>, ServerError> {
    let caller = caller(&headers)?;
    Ok(Json(state.diagrams.update(DiagramId(id), patch, caller).await?))
}

async fn delete_diagram(
    headers: HeaderMap,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<serde_json::Value>, ServerError> {
    let caller = caller(&headers)?;
    state.diagrams.remove(DiagramId(id), caller).await?;
    Ok(Json(serde_json::json!({ "deleted": true })))
}

async fn share_diagram(
    headers: HeaderMap,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(req): Json<ShareRequest>,
) -> Result<Json<Diagram>, ServerError> {
    let caller = caller(&headers)?;
    let diagram = state.diagrams.share(DiagramId(id), req.user_id, caller).await?;
    info!(diagram = %id, target = %req.user_id, "Share request handled");
    Ok(Json(diagram))
}

// ─── Document mutations ───

async fn update_element(
    headers: HeaderMap,
    State(state): State<AppState>,
    Path((id, element_id)): Path<(Uuid, String)>,
    Json(patch): Json<ElementPatch>,
) -> Result<Json<Diagram>, ServerError> {
    let caller = caller(&headers)?;
    let diagram = state
        .diagrams
        .update_element(DiagramId(id), &element_id, patch, caller)
        .await?;
    Ok(Json(diagram))
}

async fn move_element(
    headers: HeaderMap,
    State(state): State<AppState>,
    Path((id, element_id)): Path<(Uuid, String)>,
    Json(position): Json<Position>,
) -> Result<Json<Diagram>, ServerError> {
    let caller = caller(&headers)?;
    let diagram = state
        .diagrams
        .move_element(DiagramId(id), &element_id, position, caller)
        .await?;
    Ok(Json(diagram))
}

async fn add_class(
    headers: HeaderMap,
    State(state): State<AppState>,
    Path((id, class_id)): Path<(Uuid, String)>,
    Json(class): Json<NewClass>,
) -> Result<Json<Diagram>, ServerError> {
    let caller = caller(&headers)?;
    let diagram = state
        .diagrams
        .add_class(DiagramId(id), &class_id, class, caller)
        .await?;
    Ok(Json(diagram))
}

async fn remove_class(
    headers: HeaderMap,
    State(state): State<AppState>,
    Path((id, class_id)): Path<(Uuid, String)>,
) -> Result<Json<Diagram>, ServerError> {
    let caller = caller(&headers)?;
    let diagram = state
        .diagrams
        .remove_class(DiagramId(id), &class_id, caller)
        .await?;
    Ok(Json(diagram))
}

async fn add_attribute(
    headers: HeaderMap,
    State(state): State<AppState>,
    Path((id, class_id)): Path<(Uuid, String)>,
    Json(attribute): Json<Attribute>,
) -> Result<Json<Diagram>, ServerError> {
    let caller = caller(&headers)?;
    let diagram = state
        .diagrams
        .add_attribute(DiagramId(id), &class_id, attribute, caller)
        .await?;
    Ok(Json(diagram))
}

async fn update_attribute(
    headers: HeaderMap,
    State(state): State<AppState>,
    Path((id, class_id, index)): Path<(Uuid, String, usize)>,
    Json(patch): Json<AttributePatch>,
) -> Result<Json<Diagram>, ServerError> {
    let caller = caller(&headers)?;
    let diagram = state
        .diagrams
        .update_attribute(DiagramId(id), &class_id, index, patch, caller)
        .await?;
    Ok(Json(diagram))
}

async fn remove_attribute(
    headers: HeaderMap,
    State(state): State<AppState>,
    Path((id, class_id, index)): Path<(Uuid, String, usize)>,
) -> Result<Json<Diagram>, ServerError> {
    let caller = caller(&headers)?;
    let diagram = state
        .diagrams
        .remove_attribute(DiagramId(id), &class_id, index, caller)
        .await?;
    Ok(Json(diagram))
}

async fn add_relation(
    headers: HeaderMap,
    State(state): State<AppState>,
    Path((id, relation_id)): Path<(Uuid, String)>,
    Json(relation): Json<Relation>,
) -> Result<Json<Diagram>, ServerError> {
    let caller = caller(&headers)?;
    let diagram = state
        .diagrams
        .add_relation(DiagramId(id), &relation_id, relation, caller)
        .await?;
    Ok(Json(diagram))
}

async fn update_relation(
    headers: HeaderMap,
    State(state): State<AppState>,
    Path((id, relation_id)): Path<(Uuid, String)>,
    Json(patch): Json<RelationPatch>,
) -> Result<Json<Diagram>, ServerError> {
    let caller = caller(&headers)?;
    let diagram = state
        .diagrams
        .update_relation(DiagramId(id), &relation_id, patch, caller)
        .await?;
    Ok(Json(diagram))
}

async fn remove_relation(
    headers: HeaderMap,
    State(state): State<AppState>,
    Path((id, relation_id)): Path<(Uuid, String)>,
) -> Result<Json<Diagram>, ServerError> {
    let caller = caller(&headers)?;
    let diagram = state
        .diagrams
        .remove_relation(DiagramId(id), &relation_id, caller)
        .await?;
    Ok(Json(diagram))
}

pub async fn serve(state: AppState, addr: std::net::SocketAddr) -> anyhow::Result<()> {
    let app = build_router(state);

    info!(addr = %addr, "Starting HTTP API server");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<std::net::SocketAddr>(),
    )
    .await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use axum::response::Response;
    use tower::ServiceExt;

    use classboard_shared::Role;
    use classboard_store::Database;

    use super::*;

    const ADMIN: &str = "test-admin-token";

    fn test_state() -> AppState {
        let config = ServerConfig {
            admin_token: Some(ADMIN.to_string()),
            ..ServerConfig::default()
        };
        AppState {
            diagrams: DiagramService::new(Database::open_in_memory().unwrap()),
            rate_limiter: RateLimiter::new(1000.0, 1000.0),
            config: Arc::new(config),
        }
    }

    async fn send(
        app: &Router,
        method: Method,
        uri: &str,
        caller: Option<UserId>,
        body: Option<serde_json::Value>,
    ) -> Response {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(caller) = caller {
            builder = builder.header(CALLER_HEADER, caller.to_string());
        }
        let body = match body {
            Some(json) => {
                builder = builder.header("content-type", "application/json");
                Body::from(json.to_string())
            }
            None => Body::empty(),
        };
        app.clone().oneshot(builder.body(body).unwrap()).await.unwrap()
    }

    async fn json_body(response: Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    async fn register(state: &AppState, name: &str) -> User {
        state
            .diagrams
            .create_user(NewUser {
                name: name.into(),
                email: format!("{name}@example.com"),
                password_hash: "hash".into(),
                role: Role::User,
            })
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn health_is_public() {
        let app = build_router(test_state());
        let response = send(&app, Method::GET, "/health", None, None).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(json_body(response).await["status"], "ok");
    }

    #[tokio::test]
    async fn diagram_routes_require_caller() {
        let app = build_router(test_state());
        let response = send(
            &app,
            Method::POST,
            "/diagrams",
            None,
            Some(serde_json::json!({ "name": "Vehicles" })),
        )
        .await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn admin_user_provisioning_requires_token() {
        let app = build_router(test_state());
        let body = serde_json::json!({
            "name": "Alice",
            "email": "alice@example.com",
            "password_hash": "hash",
        });

        let denied = send(&app, Method::POST, "/admin/users", None, Some(body.clone())).await;
        assert_eq!(denied.status(), StatusCode::FORBIDDEN);

        let request = Request::builder()
            .method(Method::POST)
            .uri("/admin/users")
            .header("authorization", format!("Bearer {ADMIN}"))
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap();
        let response = app.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let user = json_body(response).await;
        assert_eq!(user["email"], "alice@example.com");
        assert_eq!(user["role"], "user");
        assert!(user.get("password_hash").is_none());
    }

    #[tokio::test]
    async fn collaborative_editing_flow() {
        let state = test_state();
        let u1 = register(&state, "u1").await;
        let u2 = register(&state, "u2").await;
        let app = build_router(state);

        let created = send(
            &app,
            Method::POST,
            "/diagrams",
            Some(u1.id),
            Some(serde_json::json!({ "name": "Vehicles" })),
        )
        .await;
        assert_eq!(created.status(), StatusCode::OK);
        let id = json_body(created).await["id"].as_str().unwrap().to_string();

        let added = send(
            &app,
            Method::POST,
            &format!("/diagrams/{id}/classes/c1"),
            Some(u1.id),
            Some(serde_json::json!({ "name": "Car", "position": { "x": 0.0, "y": 0.0 } })),
        )
        .await;
        assert_eq!(added.status(), StatusCode::OK);

        let duplicate = send(
            &app,
            Method::POST,
            &format!("/diagrams/{id}/classes/c1"),
            Some(u1.id),
            Some(serde_json::json!({ "name": "Car" })),
        )
        .await;
        assert_eq!(duplicate.status(), StatusCode::CONFLICT);

        let attr = send(
            &app,
            Method::POST,
            &format!("/diagrams/{id}/classes/c1/attributes"),
            Some(u1.id),
            Some(serde_json::json!({ "name": "speed", "type": "number" })),
        )
        .await;
        assert_eq!(
            json_body(attr).await["content"]["elements"]["c1"]["attributes"],
            serde_json::json!([{ "name": "speed", "type": "number" }])
        );

        let forbidden = send(
            &app,
            Method::GET,
            &format!("/diagrams/{id}"),
            Some(u2.id),
            None,
        )
        .await;
        assert_eq!(forbidden.status(), StatusCode::FORBIDDEN);

        let shared = send(
            &app,
            Method::POST,
            &format!("/diagrams/{id}/share"),
            Some(u1.id),
            Some(serde_json::json!({ "user_id": u2.id })),
        )
        .await;
        assert_eq!(shared.status(), StatusCode::OK);

        let moved = send(
            &app,
            Method::PUT,
            &format!("/diagrams/{id}/elements/c1/position"),
            Some(u2.id),
            Some(serde_json::json!({ "x": 5.0, "y": 5.0 })),
        )
        .await;
        assert_eq!(moved.status(), StatusCode::OK);
        assert_eq!(
            json_body(moved).await["content"]["elements"]["c1"]["position"],
            serde_json::json!({ "x": 5.0, "y": 5.0 })
        );

        let reshare = send(
            &app,
            Method::POST,
            &format!("/diagrams/{id}/share"),
            Some(u2.id),
            Some(serde_json::json!({ "user_id": u1.id })),
        )
        .await;
        assert_eq!(reshare.status(), StatusCode::FORBIDDEN);

        let listed = send(
            &app,
            Method::GET,
            &format!("/users/{}/diagrams/shared", u2.id),
            Some(u2.id),
            None,
        )
        .await;
        assert_eq!(json_body(listed).await.as_array().unwrap().len(), 1);

        let missing_attr = send(
            &app,
            Method::DELETE,
            &format!("/diagrams/{id}/classes/c1/attributes/4"),
            Some(u2.id),
            None,
        )
        .await;
        assert_eq!(missing_attr.status(), StatusCode::NOT_FOUND);

        let deleted = send(
            &app,
            Method::DELETE,
            &format!("/diagrams/{id}"),
            Some(u2.id),
            None,
        )
        .await;
        assert_eq!(deleted.status(), StatusCode::OK);

        let gone = send(&app, Method::GET, &format!("/diagrams/{id}"), Some(u1.id), None).await;
        assert_eq!(gone.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn user_lookup_by_email() {
        let state = test_state();
        let u1 = register(&state, "u1").await;
        let app = build_router(state);

        let found = send(&app, Method::GET, "/users?email=u1@example.com", Some(u1.id), None).await;
        assert_eq!(found.status(), StatusCode::OK);
        assert_eq!(json_body(found).await["id"], serde_json::json!(u1.id));

        let missing = send(
            &app,
            Method::GET,
            "/users?email=nobody@example.com",
            Some(u1.id),
            None,
        )
        .await;
        assert_eq!(missing.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn exhausted_bucket_returns_json_429() {
        let state = AppState {
            rate_limiter: RateLimiter::new(0.001, 1.0),
            ..test_state()
        };
        let u1 = register(&state, "u1").await;
        let u2 = register(&state, "u2").await;
        let app = build_router(state);

        let first = send(&app, Method::GET, "/health", Some(u1.id), None).await;
        assert_eq!(first.status(), StatusCode::OK);

        let limited = send(&app, Method::GET, "/health", Some(u1.id), None).await;
        assert_eq!(limited.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(json_body(limited).await["error"], "Too many requests");

        let other = send(&app, Method::GET, "/health", Some(u2.id), None).await;
        assert_eq!(other.status(), StatusCode::OK);
    }
}
