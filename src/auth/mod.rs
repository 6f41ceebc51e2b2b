pub mod api_client;
pub mod claims;
pub mod context;
pub mod middleware;
pub mod password;
pub mod tokens;

pub use api_client::RequireApiClient;
pub use claims::Claims;
pub use context::AuthContext;
pub use middleware::{RequireAdmin, RequireAuth, RequireCustomer};
pub use tokens::TokenSigner;
