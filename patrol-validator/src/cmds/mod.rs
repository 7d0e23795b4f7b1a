pub mod create_keypair;
pub mod request_evidence;
pub mod run;
