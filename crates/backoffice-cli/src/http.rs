//! HTTP endpoint - `POST /operations/execute/{name}`
//!
//! Scripts run on the blocking pool, one fresh VM per request.

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::post;
use axum::{Json, Router};
use backoffice_core::{ErrorKind, ExecuteResponse, OperationExecutor};
use serde::Deserialize;
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::{error, info};

#[derive(Debug, Deserialize)]
pub struct ExecuteRequest {
    #[serde(default)]
    pub parameters: Map<String, Value>,
}

pub fn router(executor: Arc<OperationExecutor>) -> Router {
    Router::new()
        .route("/operations/execute/:name", post(execute))
        .with_state(executor)
}

pub async fn serve(listen: &str, executor: Arc<OperationExecutor>) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(listen).await?;
    info!(addr = %listener.local_addr()?, "serving operations");
    axum::serve(listener, router(executor)).await?;
    Ok(())
}

async fn execute(
    State(executor): State<Arc<OperationExecutor>>,
    Path(name): Path<String>,
    body: Result<Json<ExecuteRequest>, JsonRejection>,
) -> (StatusCode, Json<ExecuteResponse>) {
    let request = match body {
        Ok(Json(request)) => request,
        Err(rejection) => return failure(StatusCode::BAD_REQUEST, rejection.body_text()),
    };

    let task = tokio::task::spawn_blocking(move || {
        let outcome = executor.execute(&name, &request.parameters);
        let status = match &outcome {
            Ok(_) => StatusCode::OK,
            Err(err) => match err.kind() {
                ErrorKind::NotFound => StatusCode::NOT_FOUND,
                ErrorKind::BadInput => StatusCode::BAD_REQUEST,
                ErrorKind::Execution => StatusCode::INTERNAL_SERVER_ERROR,
            },
        };
        (status, ExecuteResponse::from(&outcome))
    });

    match task.await {
        Ok((status, response)) => (status, Json(response)),
        Err(err) => {
            error!(error = %err, "execution task failed");
            failure(StatusCode::INTERNAL_SERVER_ERROR, "execution task failed".to_string())
        }
    }
}

fn failure(status: StatusCode, message: String) -> (StatusCode, Json<ExecuteResponse>) {
    let response = ExecuteResponse {
        success: false,
        result: None,
        message: Some(message),
    };
    (status, Json(response))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::header::CONTENT_TYPE;
    use axum::http::Request;
    use backoffice_core::{InMemoryOperationStore, Operation, OperationStore, QueryBackend, QueryError, ValueSchema};
    use serde_json::json;
    use tower::ServiceExt;

    struct NoDatabase;

    impl QueryBackend for NoDatabase {
        fn query(&self, _sql: &str, _params: &[Value]) -> Result<Vec<Vec<Value>>, QueryError> {
            Err(QueryError::new("no database configured"))
        }
    }

    fn app() -> Router {
        let store = InMemoryOperationStore::new();
        store
            .add_operation(
                Operation::new("sum", "function run({ a, b }) { return a + b }", ValueSchema::number())
                    .with_parameter("a", ValueSchema::number())
                    .with_parameter("b", ValueSchema::number()),
            )
            .unwrap();
        store
            .add_operation(Operation::new(
                "explode",
                "function run() { throw new Error('banana') }",
                ValueSchema::string(),
            ))
            .unwrap();
        router(Arc::new(OperationExecutor::new(Arc::new(store), Arc::new(NoDatabase))))
    }

    async fn call(method: &str, uri: &str, body: &str) -> (StatusCode, Value) {
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .header(CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap();

        let response = app().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, body)
    }

    #[tokio::test]
    async fn test_execute_success() {
        let (status, body) = call("POST", "/operations/execute/sum", r#"{"parameters": {"a": 2, "b": 3}}"#).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({"success": true, "result": 5}));
    }

    #[tokio::test]
    async fn test_unknown_operation() {
        let (status, body) = call("POST", "/operations/execute/ghost", r#"{"parameters": {}}"#).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body, json!({"success": false, "message": "operation not found"}));
    }

    #[tokio::test]
    async fn test_bad_arguments() {
        let (status, body) = call("POST", "/operations/execute/sum", r#"{"parameters": {"a": 2}}"#).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["message"], "argument not provided: b");

        let (status, body) = call("POST", "/operations/execute/sum", r#"{"parameters": {"a": 2, "b": "3"}}"#).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["message"], "invalid argument b: value is not a float64 or int64");
    }

    #[tokio::test]
    async fn test_malformed_body() {
        let (status, body) = call("POST", "/operations/execute/sum", "{not json").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["success"], false);
    }

    #[tokio::test]
    async fn test_script_failure() {
        let (status, body) = call("POST", "/operations/execute/explode", "{}").await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(body["message"].as_str().unwrap().contains("Error: banana"));
    }

    #[tokio::test]
    async fn test_only_post_is_routed() {
        let (status, _) = call("GET", "/operations/execute/sum", "").await;
        assert_eq!(status, StatusCode::METHOD_NOT_ALLOWED);
    }
}
