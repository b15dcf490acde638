// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use axum::{
    middleware,
    routing::{get, post, put},
    Router,
};
use tower::ServiceBuilder;
use tower_http::{
    cors::CorsLayer,
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::TraceLayer,
};
use utoipa::{
    openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme},
    Modify, OpenApi,
};
use utoipa_swagger_ui::SwaggerUi;

use crate::{
    auth::authenticate,
    models::{
        ActivateRequest, AvailabilityResponse, ExternalLoginRequest, ForgotPasswordRequest,
        IsSelfResponse, LoginRequest, MessageResponse, ResetPasswordRequest, SessionResponse,
        SignupRequest, SignupResponse, UserProfile,
    },
    state::AppState,
};

pub mod health;
pub mod tokens;
pub mod users;

pub fn router(state: AppState) -> Router {
    // Routes that read the caller's identity. Anonymous requests pass the
    // middleware; handlers decide whether they need a user.
    let identity_routes = Router::new()
        .route("/users/me", get(users::me))
        .route("/users/check", get(users::check))
        .route("/users/{username}/is-self", get(users::is_self))
        .route("/tokens/logout", post(tokens::logout))
        .route_layer(middleware::from_fn_with_state(
            state.authenticator.clone(),
            authenticate,
        ));

    let v1_routes = Router::new()
        .route("/users", post(users::signup))
        .route("/users/activate/{token}", put(users::activate))
        .route("/users/password/forgot", post(users::forgot_password))
        .route("/users/password/reset/{token}", put(users::reset_password))
        .route("/tokens/login", post(tokens::login))
        .route("/tokens/external", post(tokens::external_login))
        .route("/tokens/refresh", post(tokens::refresh))
        .merge(identity_routes)
        .with_state(state.clone());

    let health_routes = Router::new()
        .route("/health", get(health::health))
        .route("/health/live", get(health::liveness))
        .route("/health/ready", get(health::readiness))
        .with_state(state);

    Router::new()
        .nest("/v1", v1_routes)
        .merge(health_routes)
        .merge(SwaggerUi::new("/docs").url("/api-doc/openapi.json", ApiDoc::openapi()))
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
                .layer(TraceLayer::new_for_http())
                .layer(PropagateRequestIdLayer::x_request_id()),
        )
        .layer(CorsLayer::permissive())
}

struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        let components = openapi.components.get_or_insert_with(Default::default);
        components.add_security_scheme(
            "bearer",
            SecurityScheme::Http(
                HttpBuilder::new()
                    .scheme(HttpAuthScheme::Bearer)
                    .bearer_format("JWT")
                    .build(),
            ),
        );
    }
}

#[derive(OpenApi)]
#[openapi(
    paths(
        users::signup,
        users::activate,
        users::me,
        users::is_self,
        users::check,
        users::forgot_password,
        users::reset_password,
        tokens::login,
        tokens::external_login,
        tokens::refresh,
        tokens::logout,
        health::health,
        health::liveness,
        health::readiness
    ),
    components(
        schemas(
            SignupRequest,
            SignupResponse,
            ActivateRequest,
            UserProfile,
            AvailabilityResponse,
            IsSelfResponse,
            LoginRequest,
            ExternalLoginRequest,
            SessionResponse,
            ForgotPasswordRequest,
            ResetPasswordRequest,
            MessageResponse,
            health::ReadyResponse,
            health::HealthChecks,
            health::HealthResponse
        )
    ),
    modifiers(&SecurityAddon),
    tags(
        (name = "Users", description = "Signup, activation and password reset"),
        (name = "Tokens", description = "Session credentials"),
        (name = "Health", description = "Liveness and readiness checks")
    )
)]
struct ApiDoc;
