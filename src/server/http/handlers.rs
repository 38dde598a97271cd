use super::AppState;
use crate::core::{CollectorError, Metric, MetricKind, MetricRecord, RawValue};
use crate::server::RequestId;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{Html, IntoResponse, Response};
use axum::{Extension, Json};
use bytes::Bytes;

/// Map a storage or validation error to an HTTP status and log it.
fn reject(id: RequestId, err: CollectorError) -> StatusCode {
    let status = match err {
        CollectorError::WrongName => StatusCode::NOT_FOUND,
        CollectorError::WrongType | CollectorError::WrongValue => StatusCode::BAD_REQUEST,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };

    if status == StatusCode::INTERNAL_SERVER_ERROR {
        tracing::error!("[{}] something went wrong: {}", id, err);
    } else {
        tracing::debug!("[{}] {}", id, err);
    }
    status
}

/// Lookups report an unknown kind as a missing metric.
fn reject_lookup(id: RequestId, err: CollectorError) -> StatusCode {
    match err {
        CollectorError::WrongType => StatusCode::NOT_FOUND,
        err => reject(id, err),
    }
}

fn parse_json<T: serde::de::DeserializeOwned>(id: RequestId, body: &[u8]) -> Result<T, StatusCode> {
    serde_json::from_slice(body).map_err(|e| {
        tracing::debug!("[{}] malformed JSON body: {}", id, e);
        StatusCode::BAD_REQUEST
    })
}

/// `POST /update/{type}/{name}/{value}`
pub async fn update_path(
    State(state): State<AppState>,
    Extension(id): Extension<RequestId>,
    Path((mtype, name, value)): Path<(String, String, String)>,
) -> Result<StatusCode, StatusCode> {
    let kind: MetricKind = mtype.parse().map_err(|e| reject(id, e))?;
    let raw: RawValue = value.parse().map_err(|e| reject(id, e))?;
    let mut metric = Metric::new(name, Some(kind), raw).map_err(|e| reject(id, e))?;

    state
        .storage
        .update(&mut metric)
        .await
        .map_err(|e| reject(id, e))?;
    Ok(StatusCode::OK)
}

/// `POST /update/`: echoes the stored metric, counters carry their total.
pub async fn update_json(
    State(state): State<AppState>,
    Extension(id): Extension<RequestId>,
    body: Bytes,
) -> Result<Json<Metric>, StatusCode> {
    let record: MetricRecord = parse_json(id, &body)?;
    let mut metric = Metric::try_from(record).map_err(|e| reject(id, e))?;

    state
        .storage
        .update(&mut metric)
        .await
        .map_err(|e| reject(id, e))?;
    Ok(Json(metric))
}

/// `POST /updates/`
pub async fn update_many(
    State(state): State<AppState>,
    Extension(id): Extension<RequestId>,
    body: Bytes,
) -> Result<StatusCode, StatusCode> {
    let records: Vec<MetricRecord> = parse_json(id, &body)?;
    let metrics = records
        .into_iter()
        .map(Metric::try_from)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| reject(id, e))?;

    state
        .storage
        .update_many(&metrics)
        .await
        .map_err(|e| reject(id, e))?;
    Ok(StatusCode::OK)
}

/// `GET /value/{type}/{name}`: the bare value as text.
pub async fn value_path(
    State(state): State<AppState>,
    Extension(id): Extension<RequestId>,
    Path((mtype, name)): Path<(String, String)>,
) -> Result<String, StatusCode> {
    match state.storage.get_value(&mtype, &name).await {
        Ok(Some(metric)) => Ok(metric.value.to_string()),
        Ok(None) => Err(StatusCode::NOT_FOUND),
        Err(e) => Err(reject_lookup(id, e)),
    }
}

/// `POST /value/`
pub async fn value_json(
    State(state): State<AppState>,
    Extension(id): Extension<RequestId>,
    body: Bytes,
) -> Result<Json<Metric>, StatusCode> {
    let record: MetricRecord = parse_json(id, &body)?;

    match state.storage.get_value(&record.mtype, &record.id).await {
        Ok(Some(metric)) => Ok(Json(metric)),
        Ok(None) => Err(StatusCode::NOT_FOUND),
        Err(e) => Err(reject_lookup(id, e)),
    }
}

/// `GET /`: all metrics as an HTML table.
pub async fn index(
    State(state): State<AppState>,
    Extension(id): Extension<RequestId>,
) -> Result<Html<String>, StatusCode> {
    let metrics = state.storage.get_all().await.map_err(|e| reject(id, e))?;
    Ok(Html(render_table(&metrics)))
}

/// `GET /ping`
pub async fn ping(State(state): State<AppState>) -> Response {
    if state.storage.ping().await {
        StatusCode::OK.into_response()
    } else {
        StatusCode::INTERNAL_SERVER_ERROR.into_response()
    }
}

fn render_table(metrics: &[Metric]) -> String {
    let mut html =
        String::from("<table><tr><th>Metric name</th><th>Metric type</th><th>Value</th></tr>");
    for metric in metrics {
        html.push_str(&format!(
            "<tr><td>{}</td><td>{}</td><td>{}</td></tr>",
            escape(&metric.name),
            metric.kind(),
            metric.value
        ));
    }
    html.push_str("</table>");
    html
}

fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            c => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::http::router;
    use crate::server::Security;
    use crate::storage::{MemoryRepo, MetricsStorage};
    use axum::body::Body;
    use axum::http::Request;
    use std::sync::Arc;
    use std::time::Duration;
    use tower::ServiceExt;

    fn app() -> axum::Router {
        let storage = MetricsStorage::new(Arc::new(MemoryRepo::new()), Duration::from_secs(1));
        router(AppState::new(storage, Arc::new(Security::default())))
    }

    async fn call(app: &axum::Router, method: &str, uri: &str, body: &str) -> (StatusCode, String) {
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .body(Body::from(body.to_string()))
            .unwrap();
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, String::from_utf8(body.to_vec()).unwrap())
    }

    #[tokio::test]
    async fn test_update_path_statuses() {
        let app = app();
        assert_eq!(call(&app, "POST", "/update/counter/PollCount/5", "").await.0, StatusCode::OK);
        assert_eq!(call(&app, "POST", "/update/gauge/Alloc/1.5", "").await.0, StatusCode::OK);
        assert_eq!(
            call(&app, "POST", "/update/unknown/x/1", "").await.0,
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            call(&app, "POST", "/update/counter/x/1.5", "").await.0,
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            call(&app, "POST", "/update/gauge/x/abc", "").await.0,
            StatusCode::BAD_REQUEST
        );
        assert_eq!(call(&app, "POST", "/update/counter/5", "").await.0, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_non_finite_gauge_is_rejected() {
        let app = app();
        for value in ["NaN", "inf", "-inf"] {
            let uri = format!("/update/gauge/Bad/{value}");
            assert_eq!(call(&app, "POST", &uri, "").await.0, StatusCode::BAD_REQUEST, "{value}");
        }
        assert_eq!(call(&app, "GET", "/value/gauge/Bad", "").await.0, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_counter_accumulates_through_text_endpoints() {
        let app = app();
        call(&app, "POST", "/update/counter/PollCount/5", "").await;
        call(&app, "POST", "/update/counter/PollCount/3", "").await;

        let (status, body) = call(&app, "GET", "/value/counter/PollCount", "").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "8");
    }

    #[tokio::test]
    async fn test_update_json_echoes_total() {
        let app = app();
        call(&app, "POST", "/update/", r#"{"id":"hits","type":"counter","delta":2}"#).await;
        let (status, body) =
            call(&app, "POST", "/update/", r#"{"id":"hits","type":"counter","delta":3}"#).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, r#"{"id":"hits","type":"counter","delta":5}"#);
    }

    #[tokio::test]
    async fn test_update_json_validation() {
        let app = app();
        let cases = [
            (r#"{"id":"","type":"gauge","value":1}"#, StatusCode::NOT_FOUND),
            (r#"{"id":"a","type":"histogram","value":1}"#, StatusCode::BAD_REQUEST),
            (r#"{"id":"a","type":"counter"}"#, StatusCode::BAD_REQUEST),
            (r#"{"id":"a","type":"gauge"}"#, StatusCode::BAD_REQUEST),
            ("not json", StatusCode::BAD_REQUEST),
        ];
        for (body, expected) in cases {
            assert_eq!(call(&app, "POST", "/update/", body).await.0, expected, "{body}");
        }
    }

    #[tokio::test]
    async fn test_updates_rejects_whole_batch() {
        let app = app();
        let batch = r#"[{"id":"a","type":"gauge","value":1},{"id":"","type":"gauge","value":2}]"#;
        assert_eq!(call(&app, "POST", "/updates/", batch).await.0, StatusCode::NOT_FOUND);
        assert_eq!(call(&app, "GET", "/value/gauge/a", "").await.0, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_value_lookups() {
        let app = app();
        call(&app, "POST", "/update/gauge/Alloc/2.5", "").await;

        assert_eq!(call(&app, "GET", "/value/gauge/Alloc", "").await.1, "2.5");
        assert_eq!(call(&app, "GET", "/value/counter/Alloc", "").await.0, StatusCode::NOT_FOUND);
        assert_eq!(call(&app, "GET", "/value/bogus/Alloc", "").await.0, StatusCode::NOT_FOUND);

        let (status, body) = call(&app, "POST", "/value/", r#"{"id":"Alloc","type":"gauge"}"#).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, r#"{"id":"Alloc","type":"gauge","value":2.5}"#);

        let (status, _) = call(&app, "POST", "/value/", r#"{"id":"doesNotExist","type":"counter"}"#).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_index_and_ping() {
        let app = app();
        call(&app, "POST", "/update/gauge/%3Cb%3E/1", "").await;

        let (status, body) = call(&app, "GET", "/", "").await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.starts_with("<table>"));
        assert!(body.contains("<td>&lt;b&gt;</td><td>gauge</td><td>1</td>"));

        assert_eq!(call(&app, "GET", "/ping", "").await.0, StatusCode::OK);
    }
}
