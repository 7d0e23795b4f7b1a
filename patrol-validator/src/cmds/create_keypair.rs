use std::path::PathBuf;

use anyhow::{bail, Result};
use clap::Parser;

use patrol_utils::keypair::Keypair;

#[derive(Debug, Parser)]
pub struct Opts {
    #[clap(long, env = "KEYPAIR_PATH", default_value = "./data/validator.keypair.json")]
    path: PathBuf,
}

pub async fn run(opts: &Opts) -> Result<()> {
    if opts.path.exists() {
        bail!(
            "keypair file already exists at {}; remove it or choose another --path",
            opts.path.display()
        );
    }
    if let Some(parent) = opts.path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    let keypair = Keypair::generate();
    keypair.write_json_file(&opts.path)?;

    println!("validator address: {}", keypair.as_public_address());
    println!("private key saved to {}", opts.path.display());
    Ok(())
}
