//! Operator tooling for the token cipher key.
//!
//! `generate-key` prints a fresh key suitable for `CRM_CRYPTO_KEY`.
//! `rotate-key` re-encrypts every stored Salesforce token from an old key to
//! the currently configured one, which is how connections become readable
//! again after the key changed.

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use crm_config::{
    config::ConfigLoader,
    crypto::{CryptoKey, TokenCipher},
    db,
    models::salesforce_connection,
    repositories::ConnectionRepository,
};

#[derive(Debug, Parser)]
#[command(name = "crm-admin", version, about = "CRM config administration")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Print a new random base64-encoded 32-byte key
    GenerateKey,
    /// Re-encrypt stored tokens from OLD_KEY to the configured CRM_CRYPTO_KEY
    RotateKey {
        /// Base64-encoded key the tokens are currently encrypted with
        #[arg(long)]
        old_key: String,
        /// Report what would change without writing
        #[arg(long)]
        dry_run: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    match Cli::parse().command {
        Command::GenerateKey => {
            println!("{}", CryptoKey::generate().to_base64());
            Ok(())
        }
        Command::RotateKey { old_key, dry_run } => rotate_key(&old_key, dry_run).await,
    }
}

async fn rotate_key(old_key: &str, dry_run: bool) -> Result<()> {
    let config = ConfigLoader::new()
        .load()
        .context("loading configuration")?;

    let key_bytes = config
        .crypto_key
        .clone()
        .context("crypto key not present in configuration")?;
    let new_cipher = TokenCipher::new(CryptoKey::new(key_bytes).context("initializing new key")?);
    let old_cipher =
        TokenCipher::new(CryptoKey::from_base64(old_key).context("decoding --old-key")?);

    let db = db::init_pool(&config)
        .await
        .context("initializing database connection pool")?;
    let repository = ConnectionRepository::new(db);

    let connections = repository
        .list_all()
        .await
        .context("querying connections")?;

    let (mut rotated, mut current, mut failed) = (0usize, 0usize, 0usize);

    for conn in connections {
        match rotate_connection(&old_cipher, &new_cipher, &conn) {
            Ok(Rotation::AlreadyCurrent) => current += 1,
            Ok(Rotation::Rotated {
                access_token,
                refresh_token,
            }) => {
                if !dry_run {
                    repository
                        .replace_ciphertexts(conn.id, access_token, refresh_token)
                        .await
                        .with_context(|| format!("updating connection {}", conn.id))?;
                }
                rotated += 1;
            }
            Err(err) => {
                eprintln!("connection {} (org {}): {err:#}", conn.id, conn.org_id);
                failed += 1;
            }
        }
    }

    let verb = if dry_run { "Would re-encrypt" } else { "Re-encrypted" };
    println!(
        "{verb} {rotated} connection(s); {current} already on the current key; {failed} unreadable."
    );

    if failed > 0 {
        bail!("{failed} connection(s) could not be decrypted with either key");
    }
    Ok(())
}

#[derive(Debug, PartialEq, Eq)]
enum Rotation {
    AlreadyCurrent,
    Rotated {
        access_token: String,
        refresh_token: Option<String>,
    },
}

fn rotate_connection(
    old: &TokenCipher,
    new: &TokenCipher,
    conn: &salesforce_connection::Model,
) -> Result<Rotation> {
    if new.decrypt(&conn.access_token).is_ok() {
        return Ok(Rotation::AlreadyCurrent);
    }

    let reencrypt = |ciphertext: &str| -> Result<String> {
        let plaintext = old
            .decrypt(ciphertext)
            .context("token does not decrypt under the old key")?;
        new.encrypt(&plaintext).context("encrypting under the new key")
    };

    let access_token = reencrypt(&conn.access_token)?;
    let refresh_token = conn.refresh_token.as_deref().map(reencrypt).transpose()?;

    Ok(Rotation::Rotated {
        access_token,
        refresh_token,
    })
}
