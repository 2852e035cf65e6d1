use actix_multipart::Multipart;
use actix_web::body::MessageBody;
use actix_web::dev::ServiceResponse;
use actix_web::http::header;
use actix_web::middleware::{ErrorHandlerResponse, ErrorHandlers};
use actix_web::{HttpRequest, HttpResponse, web};
use futures::{StreamExt, TryStreamExt};
use serde_json::json;
use std::sync::Arc;

use shared::{
    ANXIETY_FEATURES, AnxietyResponse, DepressionResponse, FaceExpressionResponse,
    FeaturesResponse, ModelsResponse, PredictionResult, STRESS_FEATURES, SUGGESTION_FEATURES,
    StatusErrorResponse, StressResponse, SuggestionResponse, TestJsonResponse,
};

use crate::config::AnxietyConfig;
use crate::error::ApiError;
use crate::registry::ModelRegistry;
use crate::validation::{self, ValidationError};

/// Largest request body accepted by the face route when it reads the raw
/// payload itself.
#[derive(Debug, Clone, Copy)]
pub struct BodyLimit(pub usize);

impl Default for BodyLimit {
    fn default() -> Self {
        BodyLimit(16 * 1024 * 1024)
    }
}

pub fn configure_routes(cfg: &mut web::ServiceConfig) {
    cfg.service(web::resource("/").route(web::get().to(home)))
        .service(web::resource("/test_json").route(web::get().to(test_json)))
        .service(web::resource("/features").route(web::get().to(features)))
        .service(web::resource("/models").route(web::get().to(models)))
        .service(web::resource("/predict_stress").route(web::post().to(predict_stress)))
        .service(web::resource("/predict_suggestion").route(web::post().to(predict_suggestion)))
        .service(web::resource("/predict_depression").route(web::post().to(predict_depression)))
        .service(web::resource("/predict_anxiety").route(web::post().to(predict_anxiety)))
        .service(
            web::resource("/predict_face_expression")
                .route(web::post().to(predict_face_expression)),
        )
        .default_service(web::to(not_found));
}

/// Rewrites server errors that are not already JSON into the common envelope.
pub fn error_handlers<B: MessageBody + 'static>() -> ErrorHandlers<B> {
    ErrorHandlers::new().default_handler_server(internal_error)
}

fn internal_error<B: MessageBody + 'static>(
    res: ServiceResponse<B>,
) -> actix_web::Result<ErrorHandlerResponse<B>> {
    let is_json = res
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| value.starts_with("application/json"));
    if is_json {
        return Ok(ErrorHandlerResponse::Response(res.map_into_left_body()));
    }

    let error = match res.response().error() {
        Some(err) => err.to_string(),
        None => res
            .status()
            .canonical_reason()
            .unwrap_or("Internal Server Error")
            .to_string(),
    };
    log::error!("Unhandled server error: {}", error);

    let (req, _) = res.into_parts();
    let response = HttpResponse::InternalServerError().json(json!({
        "status": "error",
        "message": "Internal server error",
        "error": error,
    }));
    Ok(ErrorHandlerResponse::Response(
        ServiceResponse::new(req, response).map_into_right_body(),
    ))
}

async fn not_found() -> HttpResponse {
    HttpResponse::NotFound().json(StatusErrorResponse::new("Not found".into()))
}

async fn home() -> HttpResponse {
    HttpResponse::Ok()
        .content_type("text/plain; charset=utf-8")
        .body("✅ MindCare backend is running.")
}

async fn test_json() -> HttpResponse {
    HttpResponse::Ok().json(TestJsonResponse {
        status: "success".into(),
        message: "JSON test successful".into(),
        timestamp: chrono::Utc::now().to_rfc3339(),
    })
}

async fn features() -> HttpResponse {
    let names = |fields: &[&str]| -> Vec<String> { fields.iter().map(|f| f.to_string()).collect() };
    HttpResponse::Ok().json(FeaturesResponse {
        stress_features: names(&STRESS_FEATURES),
        suggestion_features: names(&SUGGESTION_FEATURES),
        anxiety_features: names(&ANXIETY_FEATURES),
        depression_features: "21 BDI questionnaire responses".into(),
        face_expression_features:
            "Image upload (multipart field 'image') or base64 string in JSON field 'image'"
                .into(),
    })
}

async fn models(registry: web::Data<ModelRegistry>) -> HttpResponse {
    HttpResponse::Ok().json(ModelsResponse {
        models: registry.status(),
    })
}

/// Runs `f` on the blocking pool so model calls do not stall the workers.
async fn run_blocking<T, F>(registry: web::Data<ModelRegistry>, f: F) -> Result<T, ApiError>
where
    T: Send + 'static,
    F: FnOnce(&ModelRegistry) -> Result<T, ApiError> + Send + 'static,
{
    let registry: Arc<ModelRegistry> = registry.into_inner();
    web::block(move || f(&registry)).await?
}

fn respond(result: Result<PredictionResult, ApiError>, route: &str) -> Result<HttpResponse, ApiError> {
    match result {
        Ok(prediction) => {
            log::debug!("{} result: {:?}", route, prediction);
            Ok(HttpResponse::Ok().json(prediction))
        }
        Err(e) => {
            log::error!("{} failed: {}", route, e);
            Err(e)
        }
    }
}

async fn predict_stress(
    registry: web::Data<ModelRegistry>,
    body: web::Bytes,
) -> Result<HttpResponse, ApiError> {
    log::info!("Stress prediction requested");
    respond(stress(registry, body).await.map(Into::into), "Stress prediction")
}

async fn stress(registry: web::Data<ModelRegistry>, body: web::Bytes) -> Result<StressResponse, ApiError> {
    registry.stress()?;
    let data = validation::parse_object(&body)?;
    let features = validation::stress_features(&data)?;
    run_blocking(registry, move |models| Ok(models.stress()?.predict(&features)?)).await
}

async fn predict_suggestion(registry: web::Data<ModelRegistry>, body: web::Bytes) -> HttpResponse {
    log::info!("Suggestion prediction requested");
    match suggestion(registry, body).await {
        Ok(recommendation) => {
            log::info!("Recommendation: {}", recommendation);
            HttpResponse::Ok().json(SuggestionResponse::success(recommendation))
        }
        Err(e) => {
            log::error!("Suggestion prediction failed: {}", e);
            e.status_envelope()
        }
    }
}

async fn suggestion(registry: web::Data<ModelRegistry>, body: web::Bytes) -> Result<String, ApiError> {
    registry.suggestion()?;
    let data = validation::parse_object(&body)?;
    let features = validation::suggestion_features(&data)?;
    run_blocking(registry, move |models| {
        Ok(models.suggestion()?.recommend(&features)?)
    })
    .await
}

async fn predict_depression(
    registry: web::Data<ModelRegistry>,
    body: web::Bytes,
) -> Result<HttpResponse, ApiError> {
    log::info!("Depression prediction requested");
    respond(depression(registry, body).await.map(Into::into), "Depression prediction")
}

async fn depression(
    registry: web::Data<ModelRegistry>,
    body: web::Bytes,
) -> Result<DepressionResponse, ApiError> {
    registry.depression()?;
    let data = validation::parse_object(&body)?;
    let responses = validation::bdi_responses(&data)?;
    run_blocking(registry, move |models| {
        Ok(models.depression()?.assess(&responses)?)
    })
    .await
}

async fn predict_anxiety(
    registry: web::Data<ModelRegistry>,
    anxiety_config: web::Data<AnxietyConfig>,
    body: web::Bytes,
) -> Result<HttpResponse, ApiError> {
    log::info!("Anxiety prediction requested");
    respond(
        anxiety(registry, &anxiety_config, body).await.map(Into::into),
        "Anxiety prediction",
    )
}

async fn anxiety(
    registry: web::Data<ModelRegistry>,
    config: &AnxietyConfig,
    body: web::Bytes,
) -> Result<AnxietyResponse, ApiError> {
    registry.anxiety()?;
    let data = validation::parse_object(&body)?;
    let features = validation::anxiety_features(&data, &config.categories)?;
    run_blocking(registry, move |models| Ok(models.anxiety()?.predict(&features)?)).await
}

async fn predict_face_expression(
    req: HttpRequest,
    payload: web::Payload,
    registry: web::Data<ModelRegistry>,
) -> Result<HttpResponse, ApiError> {
    log::info!("Face expression detection requested");
    respond(
        face_expression(req, payload, registry).await.map(Into::into),
        "Face expression detection",
    )
}

async fn face_expression(
    req: HttpRequest,
    payload: web::Payload,
    registry: web::Data<ModelRegistry>,
) -> Result<FaceExpressionResponse, ApiError> {
    registry.face_expression()?;
    let limit = req
        .app_data::<web::Data<BodyLimit>>()
        .map(|limit| *limit.get_ref())
        .unwrap_or_default();

    let image = if is_multipart(&req) {
        log::info!("Image format: file upload");
        image_from_multipart(Multipart::new(req.headers(), payload), limit).await?
    } else {
        log::info!("Image format: base64 JSON");
        let body = read_body(payload, limit).await?;
        validation::image_from_json(&body)?
    };

    run_blocking(registry, move |models| models.face_expression()?.analyze(&image)).await
}

fn is_multipart(req: &HttpRequest) -> bool {
    req.headers()
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| value.starts_with("multipart/form-data"))
}

async fn read_body(mut payload: web::Payload, limit: BodyLimit) -> Result<web::BytesMut, ApiError> {
    let mut body = web::BytesMut::new();
    while let Some(chunk) = payload.next().await {
        let chunk = chunk.map_err(|e| ApiError::Decode(format!("could not read request body: {}", e)))?;
        if body.len() + chunk.len() > limit.0 {
            return Err(ApiError::Decode("request body is too large".into()));
        }
        body.extend_from_slice(&chunk);
    }
    Ok(body)
}

/// Bytes of the `image` field; other fields are drained and ignored.
async fn image_from_multipart(mut multipart: Multipart, limit: BodyLimit) -> Result<Vec<u8>, ApiError> {
    let read_error = |e: actix_multipart::MultipartError| {
        ApiError::Decode(format!("could not read upload: {}", e))
    };

    while let Some(mut field) = multipart.try_next().await.map_err(read_error)? {
        let is_image = field.name() == Some("image");
        let mut data = Vec::new();
        while let Some(chunk) = field.try_next().await.map_err(read_error)? {
            if is_image {
                if data.len() + chunk.len() > limit.0 {
                    return Err(ApiError::Decode("uploaded image is too large".into()));
                }
                data.extend_from_slice(&chunk);
            }
        }
        if is_image {
            return Ok(data);
        }
    }
    Err(ValidationError::MissingImage.into())
}
