/// Middleware module
///
/// Access-token guard for protected routes.

mod jwt_middleware;

pub use jwt_middleware::{access_token_from_request, AuthenticatedUser, JwtMiddleware, ACCESS_TOKEN_COOKIE};
