pub mod hash;
pub mod json_stringify_deterministic;
pub mod keypair;
pub mod retry;
