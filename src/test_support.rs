//! Local stand-in for PostgREST, Stripe and Resend used by tests

use std::sync::{Arc, Mutex};

use axum::{
    body::Bytes,
    extract::{Query, State},
    http::{Method, Uri},
    response::{IntoResponse, Json, Response},
    Router,
};
use serde_json::Value;
use tokio::net::TcpListener;

use crate::config::{test_config, Config};

/// A request the stub received
#[derive(Debug, Clone)]
pub struct StubRequest {
    pub method: Method,
    pub path: String,
    pub params: Vec<(String, String)>,
    pub raw_body: String,
}

impl StubRequest {
    pub fn is(&self, method: Method, path: &str) -> bool {
        self.method == method && self.path == path
    }

    pub fn param(&self, key: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn json(&self) -> Value {
        serde_json::from_str(&self.raw_body).unwrap_or(Value::Null)
    }
}

type Responder = dyn Fn(&StubRequest) -> Response + Send + Sync;

#[derive(Clone)]
struct StubState {
    requests: Arc<Mutex<Vec<StubRequest>>>,
    responder: Arc<Responder>,
}

/// Running stub server plus everything it has seen
pub struct Stub {
    pub base_url: String,
    requests: Arc<Mutex<Vec<StubRequest>>>,
}

impl Stub {
    pub async fn start<F>(responder: F) -> Self
    where
        F: Fn(&StubRequest) -> Response + Send + Sync + 'static,
    {
        let requests = Arc::new(Mutex::new(Vec::new()));
        let state = StubState {
            requests: requests.clone(),
            responder: Arc::new(responder),
        };
        let app = Router::new().fallback(record).with_state(state);

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            base_url: format!("http://{}", addr),
            requests,
        }
    }

    /// Config whose Supabase, Stripe and Resend calls all land on this stub
    pub fn config(&self) -> Config {
        Config {
            supabase_url: self.base_url.clone(),
            stripe_api_url: format!("{}/stripe", self.base_url),
            resend_api_url: format!("{}/resend/emails", self.base_url),
            ..test_config()
        }
    }

    pub fn requests(&self) -> Vec<StubRequest> {
        self.requests.lock().unwrap().clone()
    }

    /// Requests matching a method and path, in arrival order
    pub fn matching(&self, method: Method, path: &str) -> Vec<StubRequest> {
        self.requests()
            .into_iter()
            .filter(|r| r.is(method.clone(), path))
            .collect()
    }
}

async fn record(
    State(state): State<StubState>,
    method: Method,
    uri: Uri,
    Query(params): Query<Vec<(String, String)>>,
    body: Bytes,
) -> Response {
    let request = StubRequest {
        method,
        path: uri.path().to_string(),
        params,
        raw_body: String::from_utf8_lossy(&body).into_owned(),
    };
    state.requests.lock().unwrap().push(request.clone());
    (state.responder)(&request)
}

pub fn json(value: Value) -> Response {
    Json(value).into_response()
}

/// PostgREST's answer to a single-object request that matched nothing
pub fn no_rows() -> Response {
    (axum::http::StatusCode::NOT_ACCEPTABLE, "").into_response()
}

pub fn subscriber_row(status: &str) -> Value {
    serde_json::json!({
        "id": "11111111-1111-1111-1111-111111111111",
        "email": "ana@example.com",
        "name": "Ana",
        "status": status,
        "source": null,
        "unsubscribe_token": "22222222-2222-2222-2222-222222222222",
        "created_at": "2024-05-01T10:00:00Z",
        "unsubscribed_at": null
    })
}

pub fn appointment_row(status: &str, payment_status: &str) -> Value {
    serde_json::json!({
        "id": "33333333-3333-3333-3333-333333333333",
        "client_name": "Sam",
        "client_email": "sam@example.com",
        "starts_at": "2024-05-02T14:30:00Z",
        "ends_at": "2024-05-02T15:20:00Z",
        "status": status,
        "payment_status": payment_status,
        "stripe_payment_intent": "pi_123",
        "amount_cents": 15000,
        "no_show_fee_cents": 7500,
        "reminder_sent_at": null,
        "notes": null,
        "created_at": "2024-04-01T10:00:00Z"
    })
}

pub fn template_row(id: &str) -> Value {
    serde_json::json!({
        "id": id,
        "slug": "tips-1",
        "subject": "Hello {{name}}",
        "html_body": "<p>Hi {{name}}</p>",
        "created_at": "2024-04-01T10:00:00Z",
        "updated_at": null
    })
}
