/// Authentication Routes
///
/// Handles registration, login, token refresh, logout and current user
/// information. Tokens travel in HttpOnly cookies.

use actix_web::cookie::{time::Duration as CookieDuration, Cookie, SameSite};
use actix_web::{web, HttpRequest, HttpResponse};
use serde::{Deserialize, Serialize};

use crate::error::{AppError, AuthError, ErrorContext};
use crate::middleware::{access_token_from_request, AuthenticatedUser, ACCESS_TOKEN_COOKIE};
use crate::service::AuthService;
use crate::store::User;

pub const REFRESH_TOKEN_COOKIE: &str = "refresh_token";

/// Cookie policy shared by all auth routes
#[derive(Debug, Clone)]
pub struct CookieSettings {
    pub secure: bool,
    pub access_max_age: i64,
    pub refresh_max_age: i64,
}

impl CookieSettings {
    fn build(&self, name: &'static str, value: String, max_age: i64) -> Cookie<'static> {
        Cookie::build(name, value)
            .path("/")
            .http_only(true)
            .secure(self.secure)
            .same_site(SameSite::Lax)
            .max_age(CookieDuration::seconds(max_age))
            .finish()
    }

    fn access(&self, token: String) -> Cookie<'static> {
        self.build(ACCESS_TOKEN_COOKIE, token, self.access_max_age)
    }

    fn refresh(&self, token: String) -> Cookie<'static> {
        self.build(REFRESH_TOKEN_COOKIE, token, self.refresh_max_age)
    }

    fn expired(&self, name: &'static str) -> Cookie<'static> {
        let mut cookie = self.build(name, String::new(), 0);
        cookie.make_removal();
        cookie
    }
}

/// User registration request
#[derive(Deserialize)]
pub struct RegisterRequest {
    pub name: String,
    pub email: String,
    pub password: String,
}

/// User login request
#[derive(Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

/// Public view of a user
#[derive(Serialize)]
pub struct UserResponse {
    pub id: String,
    pub name: String,
    pub email: String,
}

impl From<&User> for UserResponse {
    fn from(user: &User) -> Self {
        Self {
            id: user.id.to_string(),
            name: user.name.clone(),
            email: user.email.clone(),
        }
    }
}

#[derive(Serialize)]
pub struct LoginResponse {
    pub user: UserResponse,
}

#[derive(Serialize)]
pub struct MessageResponse {
    pub message: &'static str,
}

#[derive(Serialize)]
pub struct MeResponse {
    pub id: String,
    pub name: String,
    pub email: String,
    pub created_at: String,
}

/// POST /api/v1/register
///
/// # Errors
/// - 400: Validation errors
/// - 409: Email already registered
/// - 503: Store unavailable
pub async fn register(
    form: web::Json<RegisterRequest>,
    auth: web::Data<AuthService>,
) -> Result<HttpResponse, AppError> {
    let context = ErrorContext::new("user_registration");

    let user = auth
        .register(&form.name, &form.email, &form.password)
        .await
        .map_err(|e| {
            context.log_error(&e);
            e
        })?;

    Ok(HttpResponse::Created().json(UserResponse::from(&user)))
}

/// POST /api/v1/login
///
/// Sets the `access_token` and `refresh_token` cookies.
///
/// # Errors
/// - 401: Invalid credentials (same response for unknown email and wrong password)
/// - 503: Store or randomness unavailable
pub async fn login(
    form: web::Json<LoginRequest>,
    auth: web::Data<AuthService>,
    cookies: web::Data<CookieSettings>,
) -> Result<HttpResponse, AppError> {
    let context = ErrorContext::new("user_login");

    let (access_token, user) = auth.login(&form.email, &form.password).await.map_err(|e| {
        context.log_error(&e);
        e
    })?;

    let refresh_token = auth.issue_refresh(user.id).await.map_err(|e| {
        context.clone().with_user_id(user.id.to_string()).log_error(&e);
        e
    })?;

    Ok(HttpResponse::Ok()
        .cookie(cookies.access(access_token))
        .cookie(cookies.refresh(refresh_token))
        .json(LoginResponse {
            user: UserResponse::from(&user),
        }))
}

/// POST /api/v1/refresh
///
/// Exchanges the `refresh_token` cookie for a new access token and a rotated
/// refresh token. A token is accepted at most once.
///
/// # Errors
/// - 401: Missing, malformed, replayed, expired or revoked refresh token
pub async fn refresh(
    req: HttpRequest,
    auth: web::Data<AuthService>,
    cookies: web::Data<CookieSettings>,
) -> Result<HttpResponse, AppError> {
    let context = ErrorContext::new("token_refresh");

    let presented = req
        .cookie(REFRESH_TOKEN_COOKIE)
        .map(|c| c.value().to_string())
        .filter(|v| !v.is_empty())
        .ok_or(AuthError::MissingToken)?;

    let tokens = auth.refresh(&presented).await.map_err(|e| {
        context.log_error(&e);
        e
    })?;

    Ok(HttpResponse::Ok()
        .cookie(cookies.access(tokens.access_token))
        .cookie(cookies.refresh(tokens.refresh_token))
        .json(MessageResponse {
            message: "token refreshed",
        }))
}

/// POST /api/v1/logout
///
/// Clears the server-side session of the user named by a valid access token,
/// or else of the `refresh_token` cookie once its secret is verified. Store
/// failures are logged and both cookies are cleared regardless.
pub async fn logout(
    req: HttpRequest,
    auth: web::Data<AuthService>,
    cookies: web::Data<CookieSettings>,
) -> Result<HttpResponse, AppError> {
    let context = ErrorContext::new("user_logout");
    let user_id = access_token_from_request(&req).and_then(|token| auth.authenticate(&token).ok());

    let outcome = match user_id {
        Some(user_id) => auth.logout(user_id).await,
        None => match req.cookie(REFRESH_TOKEN_COOKIE).filter(|c| !c.value().is_empty()) {
            Some(cookie) => auth.logout_with_refresh(cookie.value()).await.map(|_| ()),
            None => Ok(()),
        },
    };

    match outcome {
        Ok(()) => {}
        Err(e @ AppError::Token(_)) => {
            tracing::debug!(error = %e, "Logout without a live session");
        }
        Err(e) => context.log_error(&e),
    }

    Ok(HttpResponse::Ok()
        .cookie(cookies.expired(ACCESS_TOKEN_COOKIE))
        .cookie(cookies.expired(REFRESH_TOKEN_COOKIE))
        .json(MessageResponse {
            message: "logged out",
        }))
}

/// GET /api/v1/user/me
///
/// **Requires a valid access token**; the user id is injected by `JwtMiddleware`.
pub async fn get_current_user(
    user: web::ReqData<AuthenticatedUser>,
    auth: web::Data<AuthService>,
) -> Result<HttpResponse, AppError> {
    let AuthenticatedUser(user_id) = user.into_inner();
    let user = auth.current_user(user_id).await?;

    Ok(HttpResponse::Ok().json(MeResponse {
        id: user.id.to_string(),
        name: user.name,
        email: user.email,
        created_at: user.created_at.to_rfc3339(),
    }))
}
