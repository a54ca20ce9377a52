use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;
use sqlx::PgPool;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::advisor::Advisor;
use crate::charts::{self, ChartScope};
use crate::db;
use crate::shape::{self, LabeledSeries};

pub struct AppState {
    pub pool: PgPool,
    pub advisor: Advisor,
}

#[derive(Serialize)]
struct Detail {
    detail: String,
}

/// Two-way error split at the HTTP edge: an empty series is a 404 with a
/// human-readable detail; anything else is a logged 500.
pub enum ApiError {
    NotFound(String),
    Internal(anyhow::Error),
}

impl ApiError {
    fn no_data() -> Self {
        ApiError::NotFound("No data found for the requested parameters".to_string())
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        ApiError::Internal(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::NotFound(detail) => {
                (StatusCode::NOT_FOUND, Json(Detail { detail })).into_response()
            }
            ApiError::Internal(err) => {
                tracing::error!("internal error: {err:#}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(Detail {
                        detail: "internal server error".to_string(),
                    }),
                )
                    .into_response()
            }
        }
    }
}

type ApiResult = Result<Response, ApiError>;

fn png_response(bytes: Vec<u8>) -> Response {
    (
        [
            (header::CONTENT_TYPE, "image/png"),
            (header::CONTENT_DISPOSITION, "inline; filename=chart.png"),
        ],
        bytes,
    )
        .into_response()
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/metrics/session-averages/:ind", get(session_averages))
        .route(
            "/metrics/session-averages/:ind/:expedition_id",
            get(session_averages_for_expedition),
        )
        // legacy alias for the EEG-band session chart
        .route("/metrics/nlp/:ind", get(session_averages))
        .route("/metrics/nlp/:ind/:expedition_id", get(session_averages_for_expedition))
        .route("/metrics/alpha-beta-theta/:ind", get(alpha_beta_theta))
        .route(
            "/metrics/alpha-beta-theta/:ind/:expedition_id",
            get(alpha_beta_theta_for_expedition),
        )
        .route("/metrics/fatigue/:ind", get(fatigue))
        .route("/metrics/fatigue/:ind/:expedition_id", get(fatigue_for_expedition))
        .route("/metrics/heart-rate/:ind", get(heart_rate))
        .route("/metrics/heart-rate/:ind/:expedition_id", get(heart_rate_for_expedition))
        .route("/metrics/psychological-fatigue/:ind", get(psychological_fatigue))
        .route(
            "/metrics/psychological-fatigue/:ind/:expedition_id",
            get(psychological_fatigue_for_expedition),
        )
        .route("/metrics/gravity/:ind", get(gravity))
        .route("/metrics/gravity/:ind/:expedition_id", get(gravity_for_expedition))
        .route("/metrics/concentration/:ind", get(concentration))
        .route(
            "/metrics/concentration/:ind/:expedition_id",
            get(concentration_for_expedition),
        )
        .route("/metrics/relaxation/:ind", get(relaxation))
        .route("/metrics/relaxation/:ind/:expedition_id", get(relaxation_for_expedition))
        .route("/expedition/:expedition_id/stress", get(expedition_stress))
        .route("/giga/advices/:ind/:expedition_id", get(advices))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "healthy" }))
}

// -- session-average EEG bar chart (and its legacy /metrics/nlp alias) --

async fn session_averages(
    State(state): State<Arc<AppState>>,
    Path(ind): Path<String>,
) -> ApiResult {
    session_averages_inner(&state, &ind, None).await
}

async fn session_averages_for_expedition(
    State(state): State<Arc<AppState>>,
    Path((ind, expedition_id)): Path<(String, i32)>,
) -> ApiResult {
    session_averages_inner(&state, &ind, Some(expedition_id)).await
}

async fn session_averages_inner(
    state: &AppState,
    ind: &str,
    expedition_id: Option<i32>,
) -> ApiResult {
    let rows = db::fetch_nlp_metrics(&state.pool, ind, expedition_id).await?;
    if rows.is_empty() {
        return Err(ApiError::no_data());
    }

    let bands = vec![
        ("Alpha", shape::session_means(&rows, |r| r.session, |r| r.alpha)),
        ("Beta", shape::session_means(&rows, |r| r.session, |r| r.beta)),
        ("Theta", shape::session_means(&rows, |r| r.session, |r| r.theta)),
    ];
    let scope = ChartScope {
        individual_number: ind,
        expedition_id,
    };
    Ok(png_response(charts::session_average_bars(&bands, &scope)?))
}

// -- three-panel EEG band time series --

async fn alpha_beta_theta(
    State(state): State<Arc<AppState>>,
    Path(ind): Path<String>,
) -> ApiResult {
    alpha_beta_theta_inner(&state, &ind, None).await
}

async fn alpha_beta_theta_for_expedition(
    State(state): State<Arc<AppState>>,
    Path((ind, expedition_id)): Path<(String, i32)>,
) -> ApiResult {
    alpha_beta_theta_inner(&state, &ind, Some(expedition_id)).await
}

async fn alpha_beta_theta_inner(
    state: &AppState,
    ind: &str,
    expedition_id: Option<i32>,
) -> ApiResult {
    let rows = db::fetch_nlp_metrics(&state.pool, ind, expedition_id).await?;
    if rows.is_empty() {
        return Err(ApiError::no_data());
    }

    let bands = vec![
        LabeledSeries::new("Alpha", shape::time_points(&rows, |r| r.timestamp, |r| r.alpha)),
        LabeledSeries::new("Beta", shape::time_points(&rows, |r| r.timestamp, |r| r.beta)),
        LabeledSeries::new("Theta", shape::time_points(&rows, |r| r.timestamp, |r| r.theta)),
    ];
    let scope = ChartScope {
        individual_number: ind,
        expedition_id,
    };
    Ok(png_response(charts::band_panels(&bands, &scope)?))
}

// -- fatigue overlay from both sources --

async fn fatigue(State(state): State<Arc<AppState>>, Path(ind): Path<String>) -> ApiResult {
    fatigue_inner(&state, &ind, None).await
}

async fn fatigue_for_expedition(
    State(state): State<Arc<AppState>>,
    Path((ind, expedition_id)): Path<(String, i32)>,
) -> ApiResult {
    fatigue_inner(&state, &ind, Some(expedition_id)).await
}

async fn fatigue_inner(state: &AppState, ind: &str, expedition_id: Option<i32>) -> ApiResult {
    let (physio, productivity) = tokio::try_join!(
        db::fetch_physiological_metrics(&state.pool, ind, expedition_id),
        db::fetch_productivity_metrics(&state.pool, ind, expedition_id),
    )?;

    let series = shape::overlay_sources(vec![
        LabeledSeries::new(
            "Fatigue (physiological)",
            shape::time_points(&physio, |r| r.timestamp, |r| r.fatigue),
        ),
        LabeledSeries::new(
            "Fatigue (productivity)",
            shape::time_points(&productivity, |r| r.timestamp, |r| r.fatigue),
        ),
    ])
    .ok_or_else(ApiError::no_data)?;

    let scope = ChartScope {
        individual_number: ind,
        expedition_id,
    };
    Ok(png_response(charts::overlay_chart(
        &series,
        "Fatigue over time",
        "Fatigue level",
        false,
        &scope,
    )?))
}

// -- heart rate --

async fn heart_rate(State(state): State<Arc<AppState>>, Path(ind): Path<String>) -> ApiResult {
    heart_rate_inner(&state, &ind, None).await
}

async fn heart_rate_for_expedition(
    State(state): State<Arc<AppState>>,
    Path((ind, expedition_id)): Path<(String, i32)>,
) -> ApiResult {
    heart_rate_inner(&state, &ind, Some(expedition_id)).await
}

async fn heart_rate_inner(state: &AppState, ind: &str, expedition_id: Option<i32>) -> ApiResult {
    let rows = db::fetch_cardio_metrics(&state.pool, ind, expedition_id).await?;
    if rows.is_empty() {
        return Err(ApiError::no_data());
    }

    let series = LabeledSeries::new(
        "Heart rate",
        shape::time_points(&rows, |r| r.timestamp, |r| r.heart_rate),
    );
    let scope = ChartScope {
        individual_number: ind,
        expedition_id,
    };
    Ok(png_response(charts::heart_rate_chart(&series, &scope)?))
}

// -- psychological fatigue with stress overlay --

async fn psychological_fatigue(
    State(state): State<Arc<AppState>>,
    Path(ind): Path<String>,
) -> ApiResult {
    psychological_fatigue_inner(&state, &ind, None).await
}

async fn psychological_fatigue_for_expedition(
    State(state): State<Arc<AppState>>,
    Path((ind, expedition_id)): Path<(String, i32)>,
) -> ApiResult {
    psychological_fatigue_inner(&state, &ind, Some(expedition_id)).await
}

async fn psychological_fatigue_inner(
    state: &AppState,
    ind: &str,
    expedition_id: Option<i32>,
) -> ApiResult {
    let rows = db::fetch_physiological_metrics(&state.pool, ind, expedition_id).await?;
    if rows.is_empty() {
        return Err(ApiError::no_data());
    }

    let series = vec![
        LabeledSeries::new(
            "Psychological fatigue",
            shape::time_points(&rows, |r| r.timestamp, |r| r.fatigue),
        ),
        LabeledSeries::new(
            "Stress",
            shape::time_points(&rows, |r| r.timestamp, |r| r.stress),
        ),
    ];
    let scope = ChartScope {
        individual_number: ind,
        expedition_id,
    };
    Ok(png_response(charts::overlay_chart(
        &series,
        "Psychological fatigue",
        "Level",
        true,
        &scope,
    )?))
}

// -- gravity --

async fn gravity(State(state): State<Arc<AppState>>, Path(ind): Path<String>) -> ApiResult {
    gravity_inner(&state, &ind, None).await
}

async fn gravity_for_expedition(
    State(state): State<Arc<AppState>>,
    Path((ind, expedition_id)): Path<(String, i32)>,
) -> ApiResult {
    gravity_inner(&state, &ind, Some(expedition_id)).await
}

async fn gravity_inner(state: &AppState, ind: &str, expedition_id: Option<i32>) -> ApiResult {
    let rows = db::fetch_productivity_metrics(&state.pool, ind, expedition_id).await?;
    if rows.is_empty() {
        return Err(ApiError::no_data());
    }

    let series = vec![LabeledSeries::new(
        "Gravity",
        shape::time_points(&rows, |r| r.timestamp, |r| r.gravity),
    )];
    let scope = ChartScope {
        individual_number: ind,
        expedition_id,
    };
    Ok(png_response(charts::overlay_chart(
        &series,
        "Gravity over time",
        "Gravity",
        true,
        &scope,
    )?))
}

// -- concentration overlay from both sources --

async fn concentration(State(state): State<Arc<AppState>>, Path(ind): Path<String>) -> ApiResult {
    concentration_inner(&state, &ind, None).await
}

async fn concentration_for_expedition(
    State(state): State<Arc<AppState>>,
    Path((ind, expedition_id)): Path<(String, i32)>,
) -> ApiResult {
    concentration_inner(&state, &ind, Some(expedition_id)).await
}

async fn concentration_inner(
    state: &AppState,
    ind: &str,
    expedition_id: Option<i32>,
) -> ApiResult {
    let (physio, productivity) = tokio::try_join!(
        db::fetch_physiological_metrics(&state.pool, ind, expedition_id),
        db::fetch_productivity_metrics(&state.pool, ind, expedition_id),
    )?;

    let series = shape::overlay_sources(vec![
        LabeledSeries::new(
            "Concentration (physiological)",
            shape::time_points(&physio, |r| r.timestamp, |r| r.concentration),
        ),
        LabeledSeries::new(
            "Concentration (productivity)",
            shape::time_points(&productivity, |r| r.timestamp, |r| r.concentration),
        ),
    ])
    .ok_or_else(ApiError::no_data)?;

    let scope = ChartScope {
        individual_number: ind,
        expedition_id,
    };
    Ok(png_response(charts::overlay_chart(
        &series,
        "Concentration over time",
        "Concentration level",
        false,
        &scope,
    )?))
}

// -- relaxation overlay from both sources --

async fn relaxation(State(state): State<Arc<AppState>>, Path(ind): Path<String>) -> ApiResult {
    relaxation_inner(&state, &ind, None).await
}

async fn relaxation_for_expedition(
    State(state): State<Arc<AppState>>,
    Path((ind, expedition_id)): Path<(String, i32)>,
) -> ApiResult {
    relaxation_inner(&state, &ind, Some(expedition_id)).await
}

async fn relaxation_inner(state: &AppState, ind: &str, expedition_id: Option<i32>) -> ApiResult {
    let (physio, productivity) = tokio::try_join!(
        db::fetch_physiological_metrics(&state.pool, ind, expedition_id),
        db::fetch_productivity_metrics(&state.pool, ind, expedition_id),
    )?;

    let series = shape::overlay_sources(vec![
        LabeledSeries::new(
            "Relaxation (physiological)",
            shape::time_points(&physio, |r| r.timestamp, |r| r.relax),
        ),
        LabeledSeries::new(
            "Relaxation (productivity)",
            shape::time_points(&productivity, |r| r.timestamp, |r| r.relaxation),
        ),
    ])
    .ok_or_else(ApiError::no_data)?;

    let scope = ChartScope {
        individual_number: ind,
        expedition_id,
    };
    Ok(png_response(charts::overlay_chart(
        &series,
        "Relaxation over time",
        "Relaxation level",
        false,
        &scope,
    )?))
}

// -- expedition-wide stress --

/// The aggregation rule for a cross-participant stress chart was never
/// settled, so the route answers 501 instead of guessing one.
async fn expedition_stress(Path(expedition_id): Path<i32>) -> Response {
    (
        StatusCode::NOT_IMPLEMENTED,
        Json(Detail {
            detail: format!(
                "aggregated stress chart for expedition {expedition_id} is not implemented"
            ),
        }),
    )
        .into_response()
}

// -- advisory --

#[derive(Serialize)]
struct AdviceResponse {
    response: String,
}

async fn advices(
    State(state): State<Arc<AppState>>,
    Path((ind, expedition_id)): Path<(String, i32)>,
) -> Result<Json<AdviceResponse>, ApiError> {
    let expedition_id = Some(expedition_id);
    let (nlp, physio, cardio, productivity) = tokio::try_join!(
        db::fetch_nlp_metrics(&state.pool, &ind, expedition_id),
        db::fetch_physiological_metrics(&state.pool, &ind, expedition_id),
        db::fetch_cardio_metrics(&state.pool, &ind, expedition_id),
        db::fetch_productivity_metrics(&state.pool, &ind, expedition_id),
    )?;

    let response = state
        .advisor
        .advise(&nlp, &physio, &cardio, &productivity)
        .await?;
    Ok(Json(AdviceResponse { response }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_maps_to_404_with_detail() {
        let response = ApiError::no_data().into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn internal_errors_map_to_500() {
        let response = ApiError::from(anyhow::anyhow!("boom")).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn png_responses_carry_image_headers() {
        let response = png_response(vec![1, 2, 3]);
        assert_eq!(
            response.headers().get(header::CONTENT_TYPE).unwrap(),
            "image/png"
        );
        assert_eq!(
            response.headers().get(header::CONTENT_DISPOSITION).unwrap(),
            "inline; filename=chart.png"
        );
    }
}
