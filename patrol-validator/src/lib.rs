pub mod node;
pub mod server;
pub mod settings;

pub use node::{load_or_create_keypair, ValidatorNode};
pub use settings::{DenylistSource, Settings, ValidatorConfig};
