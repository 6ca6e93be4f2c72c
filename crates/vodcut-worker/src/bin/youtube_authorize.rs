//! One-time YouTube authorization.
//!
//! Runs the OAuth device flow with the client secrets file and stores the
//! resulting credential where the pipeline reads it.

use anyhow::Context;

use vodcut_youtube::{ClientSecrets, CredentialStore, DeviceFlow, FileCredentialStore, YouTubeConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    rustls::crypto::ring::default_provider()
        .install_default()
        .expect("Failed to install rustls crypto provider");

    dotenvy::dotenv().ok();
    vodcut_worker::init_tracing();

    let config = YouTubeConfig::from_env()?;
    let secrets = ClientSecrets::load(&config.client_secret_file)
        .await
        .with_context(|| format!("cannot load {}", config.client_secret_file.display()))?;

    let flow = DeviceFlow::new(&secrets)?;
    let credential = flow
        .authorize(&secrets, |code| {
            println!();
            println!("To authorize uploads, visit:");
            println!("  {}", code.verification_uri);
            println!("and enter the code: {}", code.user_code);
            if let Some(direct) = &code.verification_uri_complete {
                println!("(or open {})", direct);
            }
            println!();
            println!("Waiting for approval (expires in {}s)...", code.expires_in);
        })
        .await
        .context("authorization failed")?;

    let store = FileCredentialStore::new(config.token_file.clone());
    store
        .save(&credential)
        .await
        .with_context(|| format!("cannot write {}", config.token_file.display()))?;

    println!("youtube-authorize: credential saved to {}", config.token_file.display());
    Ok(())
}
