//! API Router configuration

use super::handlers;
use super::state::AppState;
use crate::config::ServerConfig;
use axum::{routing::get, Router};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Create the inspection router
pub fn create_router(state: AppState, config: &ServerConfig) -> Router {
    let mut router = Router::new()
        .route("/health", get(handlers::health_check))
        .route("/state", get(handlers::get_state))
        .route("/state/agents/:id", get(handlers::get_agent))
        .route("/state/frameworks/:id", get(handlers::get_framework))
        .layer(TraceLayer::new_for_http());

    if config.enable_cors {
        router = router.layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        );
    }

    router.with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use corral_allocator::SimpleAllocator;
    use corral_coordinator::{Coordinator, CoordinatorActor, CoordinatorConfig, StateSnapshot};
    use corral_registry::InMemoryRegistry;
    use corral_types::{AgentInfo, Resources, SystemClock};
    use std::sync::Arc;
    use tokio::sync::broadcast;
    use tower::ServiceExt;

    async fn app(agents: Vec<AgentInfo>) -> Router {
        let clock = Arc::new(SystemClock);
        let coordinator = Coordinator::new(
            CoordinatorConfig::default(),
            clock.clone(),
            Box::new(SimpleAllocator::new(clock)),
        );
        let registry = Arc::new(InMemoryRegistry::with_agents(agents));
        let (mut actor, handle) = CoordinatorActor::new(coordinator, registry, 16);
        actor.recover().await.unwrap();
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        tokio::spawn(async move {
            let _keep = shutdown_tx;
            actor.run(shutdown_rx).await
        });
        create_router(AppState::new(handle), &ServerConfig::default())
    }

    async fn get(app: Router, uri: &str) -> (StatusCode, Vec<u8>) {
        let response = app
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, body.to_vec())
    }

    #[tokio::test]
    async fn test_health_reports_leadership() {
        let (status, body) = get(app(Vec::new()).await, "/health").await;
        assert_eq!(status, StatusCode::OK);

        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["leader"], true);
        assert_eq!(json["status"], "healthy");
    }

    #[tokio::test]
    async fn test_state_lists_recovered_agents() {
        let info = AgentInfo::new("host-1", Resources::new().with_scalar("cpus", 2.0));
        let (status, body) = get(app(vec![info.clone()]).await, "/state").await;
        assert_eq!(status, StatusCode::OK);

        let snapshot: StateSnapshot = serde_json::from_slice(&body).unwrap();
        assert_eq!(snapshot.agents.len(), 1);
        assert_eq!(snapshot.agents[0].id, info.id);
        assert!(snapshot.orphan_tasks.is_empty());
    }

    #[tokio::test]
    async fn test_unknown_agent_is_not_found() {
        let (status, _) = get(app(Vec::new()).await, "/state/agents/nope").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
