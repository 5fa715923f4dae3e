// src/api/mod.rs
// HTTP surface: page, sessions, streaming turns, rulebook upload.

use crate::chat::{ChatError, DisplaySink};
use crate::config::ApiConfig;
use crate::controller::{PageController, PageError};
use crate::embedder::EmbeddingError;
use crate::loader::{Document, LoadError};
use crate::middleware::{RequestId, RequestIdExt};
use crate::pipeline::PipelineError;
use crate::session::ChatMessage;
use actix_cors::Cors;
use actix_multipart::Multipart;
use actix_web::http::StatusCode;
use actix_web::{dev::Server, web, App, Error, HttpRequest, HttpResponse, HttpServer, ResponseError};
use chrono::{DateTime, Utc};
use futures_util::stream::{self, StreamExt};
use serde::Deserialize;
use serde_json::json;
use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

const INDEX_HTML: &str = include_str!("../../static/index.html");

/// Process-level facts reported by `/health`.
#[derive(Debug, Clone)]
pub struct ServerInfo {
    pub started_at: DateTime<Utc>,
}

impl Default for ServerInfo {
    fn default() -> Self {
        Self {
            started_at: Utc::now(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct MessageRequest {
    pub message: String,
}

fn status_for(err: &PageError) -> StatusCode {
    match err {
        PageError::Busy => StatusCode::CONFLICT,
        PageError::NoRulebook => StatusCode::SERVICE_UNAVAILABLE,
        PageError::InvalidInput(_) => StatusCode::BAD_REQUEST,
        PageError::Load(LoadError::Io(_)) => StatusCode::INTERNAL_SERVER_ERROR,
        PageError::Load(_) => StatusCode::BAD_REQUEST,
        PageError::Pipeline(PipelineError::Load(LoadError::Io(_))) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
        PageError::Pipeline(PipelineError::Load(_)) => StatusCode::BAD_REQUEST,
        PageError::Pipeline(PipelineError::Embedding(
            EmbeddingError::RequestFailed(_) | EmbeddingError::InvalidResponse(_),
        )) => StatusCode::BAD_GATEWAY,
        PageError::Pipeline(_) => StatusCode::INTERNAL_SERVER_ERROR,
        PageError::Chat(ChatError::Model(_)) => StatusCode::BAD_GATEWAY,
        PageError::Chat(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn error_body(status: StatusCode, message: &str, request_id: &str) -> serde_json::Value {
    json!({
        "status": status.as_u16(),
        "message": message,
        "request_id": request_id,
    })
}

/// A `PageError` tagged with the id of the request that produced it.
/// The only error type handlers turn into responses.
#[derive(Debug)]
pub struct ApiError {
    pub error: PageError,
    pub request_id: String,
}

impl ApiError {
    pub fn new(error: impl Into<PageError>, req: &HttpRequest) -> Self {
        Self {
            error: error.into(),
            request_id: req.request_id(),
        }
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.request_id, self.error)
    }
}

impl ResponseError for ApiError {
    fn status_code(&self) -> StatusCode {
        status_for(&self.error)
    }

    fn error_response(&self) -> HttpResponse {
        let status = self.status_code();
        if status.is_server_error() {
            error!(request_id = %self.request_id, status = status.as_u16(), error = %self.error, "Request failed");
        } else {
            warn!(request_id = %self.request_id, status = status.as_u16(), error = %self.error, "Request rejected");
        }
        HttpResponse::build(status).json(error_body(
            status,
            &self.error.to_string(),
            &self.request_id,
        ))
    }
}

/// One server-sent event of a streaming turn.
#[derive(Debug, Clone, PartialEq)]
pub enum SseEvent {
    /// Full text generated so far.
    Token(String),
    Done(ChatMessage),
    Error(serde_json::Value),
}

impl SseEvent {
    pub fn frame(&self) -> String {
        let (name, data) = match self {
            SseEvent::Token(text) => ("token", json!({ "content": text })),
            SseEvent::Done(message) => ("done", json!(message)),
            SseEvent::Error(body) => ("error", body.clone()),
        };
        format!("event: {}\ndata: {}\n\n", name, data)
    }
}

/// Forwards every render of the live message to the SSE channel.
struct ChannelDisplay {
    tx: mpsc::UnboundedSender<SseEvent>,
}

impl DisplaySink for ChannelDisplay {
    fn render(&mut self, text: &str) {
        // Receiver gone means the client disconnected; generation still completes and persists.
        let _ = self.tx.send(SseEvent::Token(text.to_string()));
    }
}

async fn index_handler() -> HttpResponse {
    HttpResponse::Ok()
        .content_type("text/html; charset=utf-8")
        .body(INDEX_HTML)
}

async fn health_check(
    req: HttpRequest,
    controller: web::Data<PageController>,
    server: web::Data<ServerInfo>,
) -> Result<HttpResponse, Error> {
    let rulebook = controller.rulebook_info().map(|r| r.name);
    let status = if rulebook.is_some() {
        "healthy"
    } else {
        "waiting_for_rulebook"
    };
    Ok(HttpResponse::Ok().json(json!({
        "status": status,
        "rulebook": rulebook,
        "sessions": controller.sessions().len(),
        "pipeline": controller.pipeline().stats(),
        "started_at": server.started_at.to_rfc3339(),
        "request_id": req.request_id(),
    })))
}

async fn create_session(controller: web::Data<PageController>) -> Result<HttpResponse, Error> {
    let session = controller.sessions().create();
    Ok(HttpResponse::Created().json(json!({
        "session_id": session.id(),
        "view": controller.render(&session),
    })))
}

async fn get_session(
    path: web::Path<String>,
    controller: web::Data<PageController>,
) -> Result<HttpResponse, Error> {
    let session = controller.sessions().get_or_init(&path.into_inner());
    Ok(HttpResponse::Ok().json(controller.render(&session)))
}

async fn post_message(
    req: HttpRequest,
    path: web::Path<String>,
    body: web::Json<MessageRequest>,
    controller: web::Data<PageController>,
) -> Result<HttpResponse, Error> {
    let request_id = req.request_id();
    let session = controller.sessions().get_or_init(&path.into_inner());
    let pending = controller
        .start_turn(&session, &body.message)
        .await
        .map_err(|e| ApiError::new(e, &req))?;

    let (tx, rx) = mpsc::unbounded_channel::<SseEvent>();
    let display = ChannelDisplay { tx: tx.clone() };
    actix_web::rt::spawn(async move {
        let event = match pending.run(display).await {
            Ok(message) => SseEvent::Done(message),
            Err(e) => {
                let status = status_for(&e);
                error!(request_id = %request_id, error = %e, "Turn failed after stream start");
                SseEvent::Error(error_body(status, &e.to_string(), &request_id))
            }
        };
        let _ = tx.send(event);
    });

    let frames = stream::unfold(rx, |mut rx| async move {
        rx.recv()
            .await
            .map(|event| (Ok::<_, Error>(web::Bytes::from(event.frame())), rx))
    });

    Ok(HttpResponse::Ok()
        .content_type("text/event-stream")
        .insert_header(("Cache-Control", "no-cache"))
        .streaming(frames))
}

async fn upload_rulebook(
    req: HttpRequest,
    mut payload: Multipart,
    controller: web::Data<PageController>,
) -> Result<HttpResponse, Error> {
    let mut upload: Option<(String, Vec<u8>)> = None;

    let malformed = |e: actix_multipart::MultipartError| {
        ApiError::new(
            PageError::InvalidInput(format!("malformed multipart body: {}", e)),
            &req,
        )
    };

    while let Some(item) = payload.next().await {
        let mut field = item.map_err(malformed)?;
        let filename = match field
            .content_disposition()
            .as_ref()
            .and_then(|cd| cd.get_filename())
        {
            Some(name) => name.to_string(),
            None => continue,
        };

        let mut bytes = Vec::new();
        while let Some(chunk) = field.next().await {
            bytes.extend_from_slice(&chunk.map_err(malformed)?);
        }
        if upload.is_none() {
            upload = Some((filename, bytes));
        }
    }

    let (filename, bytes) = upload.ok_or_else(|| {
        ApiError::new(
            PageError::InvalidInput("expected one file field".to_string()),
            &req,
        )
    })?;
    let document = Document::new(&filename, bytes).map_err(|e| ApiError::new(e, &req))?;
    let info = controller
        .upload_rulebook(document)
        .await
        .map_err(|e| ApiError::new(e, &req))?;

    Ok(HttpResponse::Ok().json(json!({
        "status": "success",
        "rulebook": info,
        "request_id": req.request_id(),
    })))
}

async fn get_rulebook(
    req: HttpRequest,
    controller: web::Data<PageController>,
) -> Result<HttpResponse, Error> {
    let info = controller
        .rulebook_info()
        .ok_or_else(|| ApiError::new(PageError::NoRulebook, &req))?;
    Ok(HttpResponse::Ok().json(info))
}

async fn not_found(req: HttpRequest) -> HttpResponse {
    let status = StatusCode::NOT_FOUND;
    HttpResponse::NotFound().json(error_body(
        status,
        &format!("No route for {} {}", req.method(), req.path()),
        &req.request_id(),
    ))
}

/// Register every route. Callers provide `web::Data<PageController>` and `web::Data<ServerInfo>`.
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.route("/", web::get().to(index_handler))
        .route("/health", web::get().to(health_check))
        .route("/sessions", web::post().to(create_session))
        .route("/sessions/{id}", web::get().to(get_session))
        .route("/sessions/{id}/messages", web::post().to(post_message))
        .route("/rulebook", web::post().to(upload_rulebook))
        .route("/rulebook", web::get().to(get_rulebook))
        .default_service(web::route().to(not_found));
}

pub fn start_api_server(config: &ApiConfig, controller: Arc<PageController>) -> std::io::Result<Server> {
    let bind_addr = config.bind_addr();
    let controller = web::Data::from(controller);
    let server_info = web::Data::new(ServerInfo::default());

    let server = HttpServer::new(move || {
        let cors = Cors::default()
            .allow_any_origin()
            .allowed_methods(vec!["GET", "POST"])
            .allowed_headers(vec![actix_web::http::header::CONTENT_TYPE])
            .max_age(3600);

        App::new()
            .app_data(controller.clone())
            .app_data(server_info.clone())
            .wrap(cors)
            .wrap(RequestId)
            .configure(configure)
    })
    .bind(&bind_addr)?
    .run();

    info!(addr = %bind_addr, "API server listening");
    Ok(server)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::LLMError;

    #[test]
    fn test_status_mapping() {
        assert_eq!(status_for(&PageError::Busy), StatusCode::CONFLICT);
        assert_eq!(status_for(&PageError::NoRulebook), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(
            status_for(&PageError::Load(LoadError::UnsupportedFormat("x.xls".into()))),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            status_for(&PageError::Chat(ChatError::Model(LLMError::ConnectionFailed(
                "refused".into()
            )))),
            StatusCode::BAD_GATEWAY
        );
    }

    #[test]
    fn test_sse_frames() {
        assert_eq!(
            SseEvent::Token("Hello".into()).frame(),
            "event: token\ndata: {\"content\":\"Hello\"}\n\n"
        );
        let done = SseEvent::Done(ChatMessage::ai("Hi")).frame();
        assert!(done.starts_with("event: done\n"));
        assert!(done.contains("\"role\":\"ai\""));
    }

    #[test]
    fn test_error_body_shape() {
        let body = error_body(StatusCode::CONFLICT, "busy", "abcd1234");
        assert_eq!(body["status"], 409);
        assert_eq!(body["message"], "busy");
        assert_eq!(body["request_id"], "abcd1234");
    }
}
