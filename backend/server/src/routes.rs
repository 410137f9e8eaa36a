use std::sync::Arc;

use axum::{
    Json,
    extract::{State as AxumState, rejection::JsonRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, warn};

use crate::{
    clock::Clock,
    config::Config,
    error::AppError,
    service::LevelReport,
    state::State,
    store::StateStore,
    utils::level_from_payload,
};

#[derive(Deserialize)]
pub struct SetLevel {
    level: Option<Value>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LevelChanged {
    success: bool,
    new_level: u8,
}

#[derive(Deserialize)]
pub struct Credentials {
    username: Option<String>,
    password: Option<String>,
}

#[derive(Serialize)]
pub struct AuthOutcome {
    authenticated: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<String>,
}

pub async fn boredom_handler<S, C>(
    AxumState(state): AxumState<Arc<State<S, C>>>,
) -> Result<Json<LevelReport>, AppError>
where
    S: StateStore,
    C: Clock,
{
    let report = state
        .service
        .get_current_level()
        .await
        .inspect_err(|e| warn!(error = %e, "Failed to read boredom level"))?;

    Ok(Json(report))
}

pub async fn set_handler<S, C>(
    AxumState(state): AxumState<Arc<State<S, C>>>,
    payload: Result<Json<SetLevel>, JsonRejection>,
) -> Result<Json<LevelChanged>, AppError>
where
    S: StateStore,
    C: Clock,
{
    let Json(payload) = payload.map_err(|_| AppError::MalformedPayload)?;
    let requested = level_from_payload(payload.level.as_ref())?;

    let new_level = state.service.set_level(requested).await?;

    Ok(Json(LevelChanged {
        success: true,
        new_level,
    }))
}

pub async fn reset_handler<S, C>(
    AxumState(state): AxumState<Arc<State<S, C>>>,
) -> Result<Json<LevelChanged>, AppError>
where
    S: StateStore,
    C: Clock,
{
    let new_level = state.service.reset().await?;

    Ok(Json(LevelChanged {
        success: true,
        new_level,
    }))
}

pub async fn auth_handler<S, C>(
    AxumState(state): AxumState<Arc<State<S, C>>>,
    payload: Result<Json<Credentials>, JsonRejection>,
) -> Response
where
    S: StateStore,
    C: Clock,
{
    let result = payload
        .map_err(|_| AppError::MalformedPayload)
        .and_then(|Json(credentials)| check_credentials(&state.config, credentials));

    match result {
        Ok(()) => {
            info!("Admin authenticated");
            (
                StatusCode::OK,
                Json(AuthOutcome {
                    authenticated: true,
                    message: None,
                }),
            )
                .into_response()
        }
        Err(e) => {
            warn!(error = %e, "Authentication rejected");
            let message = match e {
                AppError::AuthFailure => None,
                _ => Some(e.to_string()),
            };

            (
                e.status(),
                Json(AuthOutcome {
                    authenticated: false,
                    message,
                }),
            )
                .into_response()
        }
    }
}

fn check_credentials(config: &Config, credentials: Credentials) -> Result<(), AppError> {
    let (Some(username), Some(password)) = (
        credentials.username.filter(|u| !u.is_empty()),
        credentials.password.filter(|p| !p.is_empty()),
    ) else {
        return Err(AppError::InvalidArgument(
            "Username and password are required".to_string(),
        ));
    };

    if username == config.admin_username && password == config.admin_password {
        Ok(())
    } else {
        Err(AppError::AuthFailure)
    }
}
