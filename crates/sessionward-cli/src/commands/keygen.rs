use anyhow::{Context, Result};
use serde::Serialize;
use sessionward_auth::{SigningAlgorithm, SigningKeyPair};

use crate::cli::{KeygenArgs, OutputFormat};
use crate::output::print_json;

/// Generated key material, shaped like a `signing.current` table.
#[derive(Debug, Serialize)]
struct GeneratedKey {
    kid: String,
    algorithm: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    secret: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    private_key_pem: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    public_key_pem: Option<String>,
}

fn generate(kid: &str, algorithm: SigningAlgorithm) -> Result<GeneratedKey> {
    let mut key = GeneratedKey {
        kid: kid.to_string(),
        algorithm: algorithm.to_string(),
        secret: None,
        private_key_pem: None,
        public_key_pem: None,
    };

    if algorithm.is_hmac() {
        key.secret = Some(SigningKeyPair::generate_secret());
    } else {
        let pem = if algorithm.is_rsa() {
            SigningKeyPair::generate_rsa_pem(algorithm)
        } else {
            SigningKeyPair::generate_ec_pem()
        }
        .context("Key generation failed")?;
        key.private_key_pem = Some(pem.private_pem);
        key.public_key_pem = Some(pem.public_pem);
    }
    Ok(key)
}

fn to_toml(key: &GeneratedKey) -> String {
    let mut out = format!(
        "[lifecycle.signing.current]\nkid = \"{}\"\nalgorithm = \"{}\"\n",
        key.kid, key.algorithm
    );
    if let Some(secret) = &key.secret {
        out.push_str(&format!("secret = \"{secret}\"\n"));
    }
    if let Some(pem) = &key.private_key_pem {
        out.push_str(&format!("private_key_pem = \"\"\"\n{pem}\"\"\"\n"));
    }
    if let Some(pem) = &key.public_key_pem {
        out.push_str(&format!("public_key_pem = \"\"\"\n{pem}\"\"\"\n"));
    }
    out
}

pub fn keygen(args: &KeygenArgs, format: OutputFormat) -> Result<()> {
    let algorithm: SigningAlgorithm = args
        .algorithm
        .parse()
        .with_context(|| format!("Unsupported algorithm: {}", args.algorithm))?;
    let key = generate(&args.kid, algorithm)?;

    match format {
        OutputFormat::Json => print_json(&key),
        OutputFormat::Table => {
            print!("{}", to_toml(&key));
            Ok(())
        }
    }
}
