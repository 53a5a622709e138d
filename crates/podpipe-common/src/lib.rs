mod error;
mod tls;

pub use error::CredentialError;
pub use tls::{load_client_config, load_client_config_from_pem, ClientIdentity};
