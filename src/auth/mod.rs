/// Authentication module
///
/// Password hashing, access-token issuance/validation, and refresh token
/// issuance, rotation and revocation.

mod claims;
mod jwt;
mod password;
mod refresh_token;

pub use claims::Claims;
pub use jwt::AccessTokenCodec;
pub use password::CredentialHasher;
pub use refresh_token::{RefreshToken, RefreshTokenManager, SEPARATOR};
