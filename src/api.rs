// Read API: thin HTTP layer over the location store

use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{Query, State},
    http::{header::CONTENT_TYPE, Method, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use chrono::{Datelike, Weekday};
use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::signal;
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info, warn};

use crate::menu::{Day, Week};
use crate::store::{Location, LocationStore, ResourceKind, StoreError};

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Invalid value {value:?} for query parameter {name}")]
    InvalidParameter { name: &'static str, value: String },

    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    message: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            ApiError::InvalidParameter { .. } => (StatusCode::BAD_REQUEST, self.to_string()),
            ApiError::Store(e) => {
                error!("{}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal Server Error".to_string(),
                )
            }
        };

        (status, Json(ErrorResponse { message })).into_response()
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct MealsQuery {
    pub mensa: Option<String>,
    pub day: Option<String>,
    pub week: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct LocationQuery {
    pub mensa: Option<String>,
}

// German and English weekday spellings, Sunday first
const WEEKDAY_NAMES: [[&str; 7]; 4] = [
    ["so", "mo", "di", "mi", "do", "fr", "sa"],
    ["su", "mo", "tu", "we", "th", "fr", "sa"],
    ["sun", "mon", "tue", "wed", "thu", "fri", "sat"],
    [
        "sunday",
        "monday",
        "tuesday",
        "wednesday",
        "thursday",
        "friday",
        "saturday",
    ],
];

const SUNDAY_FIRST: [Weekday; 7] = [
    Weekday::Sun,
    Weekday::Mon,
    Weekday::Tue,
    Weekday::Wed,
    Weekday::Thu,
    Weekday::Fri,
    Weekday::Sat,
];

pub fn parse_day(value: &str) -> Option<Weekday> {
    let value = value.trim().to_lowercase();
    WEEKDAY_NAMES.iter().find_map(|names| {
        names
            .iter()
            .position(|name| *name == value)
            .map(|index| SUNDAY_FIRST[index])
    })
}

#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub struct DayFilter {
    pub weekday: Option<Weekday>,
    pub week: Option<Week>,
}

impl DayFilter {
    pub fn from_query(query: &MealsQuery) -> Result<Self, ApiError> {
        let weekday = query
            .day
            .as_deref()
            .map(|value| {
                parse_day(value).ok_or_else(|| ApiError::InvalidParameter {
                    name: "day",
                    value: value.to_string(),
                })
            })
            .transpose()?;
        let week = query
            .week
            .as_deref()
            .map(|value| {
                Week::parse(value).ok_or_else(|| ApiError::InvalidParameter {
                    name: "week",
                    value: value.to_string(),
                })
            })
            .transpose()?;

        Ok(Self { weekday, week })
    }

    pub fn accepts(&self, day: &Day) -> bool {
        self.weekday.map_or(true, |weekday| day.date.weekday() == weekday)
            && self.week.map_or(true, |week| day.week == week)
    }

    pub fn apply(&self, days: &[Day]) -> Vec<Day> {
        days.iter().filter(|day| self.accepts(day)).cloned().collect()
    }
}

pub fn router(store: Arc<LocationStore>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::OPTIONS])
        .allow_headers([CONTENT_TYPE])
        .max_age(Duration::from_secs(60 * 60));

    Router::new()
        .route("/", get(index))
        .route("/meals", get(meals))
        .route("/meals/last-update", get(meals_last_update))
        .route("/allergens", get(allergens))
        .route("/allergens/last-update", get(allergens_last_update))
        .route("/refresh", get(refresh))
        .fallback(not_found)
        .layer(cors)
        .with_state(store)
}

pub async fn serve(store: Arc<LocationStore>, port: u16) -> std::io::Result<()> {
    let address = format!("0.0.0.0:{port}");
    let listener = TcpListener::bind(&address).await?;
    info!("Server running on {address}");

    axum::serve(listener, router(store))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server shut down");
    Ok(())
}

async fn index() -> impl IntoResponse {
    Json(json!([
        { "path": "/meals", "name": "meals" },
        { "path": "/allergens", "name": "allergens" },
        { "path": "/refresh", "name": "refresh" },
    ]))
}

async fn meals(
    State(store): State<Arc<LocationStore>>,
    Query(query): Query<MealsQuery>,
) -> Result<Json<Vec<Day>>, ApiError> {
    let filter = DayFilter::from_query(&query)?;
    let menu = store
        .menu(Location::from_param(query.mensa.as_deref()))
        .await?;
    Ok(Json(filter.apply(&menu)))
}

async fn meals_last_update(
    State(store): State<Arc<LocationStore>>,
    Query(query): Query<LocationQuery>,
) -> impl IntoResponse {
    last_update(&store, &query, ResourceKind::Menu)
}

async fn allergens(
    State(store): State<Arc<LocationStore>>,
    Query(query): Query<LocationQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let allergens = store
        .allergens(Location::from_param(query.mensa.as_deref()))
        .await?;
    Ok(Json(allergens.as_ref().clone()))
}

async fn allergens_last_update(
    State(store): State<Arc<LocationStore>>,
    Query(query): Query<LocationQuery>,
) -> impl IntoResponse {
    last_update(&store, &query, ResourceKind::Allergens)
}

fn last_update(
    store: &LocationStore,
    query: &LocationQuery,
    kind: ResourceKind,
) -> Json<serde_json::Value> {
    let location = Location::from_param(query.mensa.as_deref());
    Json(json!({ "lastUpdate": store.last_update(location, kind) }))
}

async fn refresh(State(store): State<Arc<LocationStore>>) -> Result<impl IntoResponse, ApiError> {
    store.refresh_all().await?;
    Ok(Json(json!({ "status": "refreshed" })))
}

async fn not_found() -> impl IntoResponse {
    (
        StatusCode::NOT_FOUND,
        Json(ErrorResponse {
            message: "Not Found".to_string(),
        }),
    )
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
        info!("Received Ctrl+C, shutting down");
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
                info!("Received terminate signal, shutting down");
            }
            Err(e) => {
                warn!("Failed to install terminate handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
