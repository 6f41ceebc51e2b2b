use serde::{Deserialize, Serialize};

/// JWT claims for tokens issued by this service
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// Subject (user ID)
    pub sub: String,

    /// Audience
    pub aud: String,

    /// Issuer
    pub iss: String,

    /// Issued at (Unix timestamp)
    pub iat: i64,

    /// Expiration (Unix timestamp)
    pub exp: i64,

    /// Not before (Unix timestamp)
    #[serde(default)]
    pub nbf: Option<i64>,

    /// `admin` or `customer`
    pub role: String,

    #[serde(default)]
    pub email: Option<String>,

    /// Set when the token was minted for an OAuth client
    #[serde(default)]
    pub client_id: Option<String>,
}
