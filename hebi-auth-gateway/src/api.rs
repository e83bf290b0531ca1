use axum::Json;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum_extra::extract::CookieJar;
use axum_extra::extract::cookie::Cookie;
use hebi_token::{SessionToken, TokenError};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::GatewayState;
use crate::cas::TicketOutcome;

pub fn make_router<S>(state: GatewayState) -> axum::Router<S> {
    axum::Router::new()
        .route("/", axum::routing::get(check_cookie))
        .route("/validate_ticket", axum::routing::get(validate_ticket))
        .route("/health", axum::routing::get(get_health))
        .with_state(state)
}

#[derive(Debug, Error)]
pub(crate) enum GatewayError {
    #[error("missing session token cookie")]
    MissingCookie,
    #[error(transparent)]
    InvalidToken(#[from] TokenError),
    #[error("failed to mint session token")]
    Mint(#[source] TokenError),
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        error!(error = format!("{self:#}"));

        let code = match self {
            Self::MissingCookie => StatusCode::FORBIDDEN,
            Self::InvalidToken(_) => StatusCode::UNAUTHORIZED,
            Self::Mint(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        (code, Json(serde_json::json!({ "message": self.to_string() }))).into_response()
    }
}

#[derive(Serialize)]
pub(crate) struct CookieCheck {
    has_requestor_been_authenticated: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    username: Option<String>,
}

/// Answers "is this request authenticated?" from the session token cookie
pub(crate) async fn check_cookie(
    State(state): State<GatewayState>,
    jar: CookieJar,
) -> Result<Json<CookieCheck>, GatewayError> {
    let cookie = jar.get(hebi_token::COOKIE_NAME).ok_or(GatewayError::MissingCookie)?;

    let conf = state.conf_handle.get_conf();
    let token = SessionToken::verify(&conf.jwt_key, cookie.value())?;

    let response = match token.username() {
        Some(username) => CookieCheck {
            has_requestor_been_authenticated: true,
            username: Some(username.to_owned()),
        },
        None => CookieCheck {
            has_requestor_been_authenticated: false,
            username: None,
        },
    };

    Ok(Json(response))
}

#[derive(Deserialize)]
pub(crate) struct TicketQuery {
    ticket: String,
}

#[derive(Serialize, Default)]
pub(crate) struct TicketValidation {
    validated: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    user: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    desc: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    code: Option<String>,
}

/// Exchanges an SSO ticket for a session token cookie
pub(crate) async fn validate_ticket(
    State(state): State<GatewayState>,
    Query(query): Query<TicketQuery>,
    jar: CookieJar,
) -> Result<(CookieJar, Json<TicketValidation>), GatewayError> {
    let outcome = match state.cas.validate(&query.ticket).await {
        Ok(outcome) => outcome,
        Err(error) => {
            // An unreachable SSO server gets the same answer as an
            // unintelligible one; the details stay in the logs.
            error!(error = format!("{error:#}"), "Ticket validation request failed");
            TicketOutcome::Unintelligible
        }
    };

    match outcome {
        TicketOutcome::Validated { user } => {
            let conf = state.conf_handle.get_conf();
            let token = SessionToken::mint(&conf.jwt_key, &user).map_err(GatewayError::Mint)?;

            info!(%user, "Ticket validated, session token issued");

            let jar = jar.add(Cookie::new(hebi_token::COOKIE_NAME, token.clone()));

            Ok((
                jar,
                Json(TicketValidation {
                    validated: true,
                    user: Some(user),
                    token: Some(token),
                    desc: Some("successful authentication".to_owned()),
                    ..Default::default()
                }),
            ))
        }
        TicketOutcome::Rejected { code, description } => {
            info!(%code, "Ticket rejected by the SSO server");

            Ok((
                jar,
                Json(TicketValidation {
                    validated: false,
                    code: Some(code),
                    desc: Some(description),
                    ..Default::default()
                }),
            ))
        }
        TicketOutcome::Unintelligible => Ok((
            jar,
            Json(TicketValidation {
                validated: false,
                desc: Some("invalid_CAS_server_response".to_owned()),
                ..Default::default()
            }),
        )),
    }
}

#[derive(Serialize)]
pub(crate) struct Health {
    version: &'static str,
}

pub(crate) async fn get_health() -> Json<Health> {
    Json(Health {
        version: env!("CARGO_PKG_VERSION"),
    })
}
