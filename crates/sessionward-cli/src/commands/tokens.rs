use anyhow::{Context, Result};
use colored::Colorize;
use serde::Serialize;
use serde_json::{Value, json};
use sessionward_auth::{
    CleanupWorker, LifecycleConfig, LifecycleManager, RefreshTokenRecord, SessionClaims,
    SessionScope, TokenPair, TokenStatus, fingerprint,
};
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

use crate::cli::{IssueArgs, OutputFormat, RevokeAllArgs};
use crate::output::{print_fields, print_json, print_success, print_table};

/// Splits a `key=value` claim. Values that parse as JSON keep their type.
fn parse_claim(raw: &str) -> Result<(String, Value)> {
    let Some((key, value)) = raw.split_once('=') else {
        anyhow::bail!("Invalid claim \"{raw}\". Expected format: key=value");
    };
    let key = key.trim();
    if key.is_empty() {
        anyhow::bail!("Invalid claim \"{raw}\": empty key");
    }
    let value = serde_json::from_str(value).unwrap_or_else(|_| Value::String(value.to_string()));
    Ok((key.to_string(), value))
}

fn session_claims(args: &IssueArgs) -> Result<SessionClaims> {
    let mut claims = match &args.role {
        Some(role) => SessionClaims::with_role(role),
        None => SessionClaims::default(),
    };
    for raw in &args.claims {
        let (key, value) = parse_claim(raw)?;
        claims = claims.claim(key, value);
    }
    Ok(claims)
}

fn timestamp(at: OffsetDateTime) -> String {
    at.format(&Rfc3339).unwrap_or_else(|_| at.to_string())
}

fn print_pair(pair: &TokenPair, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => print_json(pair),
        OutputFormat::Table => {
            print_fields(&[
                ("session", pair.family_id.clone()),
                ("access_token", pair.access_token.clone()),
                ("expires_in", format!("{}s", pair.expires_in)),
                ("refresh_token", pair.refresh_token.clone()),
                ("refresh_expires_in", format!("{}s", pair.refresh_expires_in)),
            ]);
            Ok(())
        }
    }
}

pub async fn issue(
    manager: &LifecycleManager,
    args: &IssueArgs,
    format: OutputFormat,
) -> Result<()> {
    let claims = session_claims(args)?;
    let pair = manager
        .issue(&args.user_id, claims)
        .await
        .with_context(|| format!("Failed to issue tokens for {}", args.user_id))?;
    print_pair(&pair, format)
}

pub async fn refresh(manager: &LifecycleManager, token: &str, format: OutputFormat) -> Result<()> {
    let pair = manager
        .refresh(token)
        .await
        .context("Refresh rejected")?;
    print_pair(&pair, format)
}

pub async fn revoke(manager: &LifecycleManager, token: &str) -> Result<()> {
    manager.revoke(token).await.context("Revocation failed")?;
    print_success(&format!("Revoked refresh token {}", fingerprint(token).cyan()));
    Ok(())
}

pub async fn revoke_all(
    manager: &LifecycleManager,
    args: &RevokeAllArgs,
    format: OutputFormat,
) -> Result<()> {
    let scope = match (&args.user, &args.family) {
        (Some(user), _) => SessionScope::User(user.clone()),
        (None, Some(family)) => SessionScope::Family(family.clone()),
        (None, None) => anyhow::bail!("One of --user or --family is required"),
    };
    let revoked = manager
        .revoke_all_sessions(scope)
        .await
        .context("Revocation failed")?;

    match format {
        OutputFormat::Json => print_json(&json!({ "revoked": revoked })),
        OutputFormat::Table => {
            print_success(&format!("Revoked {revoked} refresh token(s)"));
            Ok(())
        }
    }
}

/// Verifies an access token with the configured keys. Needs no store.
pub fn verify(config: &LifecycleConfig, token: &str, format: OutputFormat) -> Result<()> {
    let codec = config.build_codec()?;
    let claims = codec
        .verify_access_token(token)
        .context("Access token rejected")?;

    match format {
        OutputFormat::Json => print_json(&claims),
        OutputFormat::Table => {
            let expires = OffsetDateTime::from_unix_timestamp(claims.exp)
                .map(timestamp)
                .unwrap_or_else(|_| claims.exp.to_string());
            let mut fields = vec![
                ("subject", claims.sub.clone()),
                ("session", claims.sid.clone()),
                ("issuer", claims.iss.clone()),
                ("expires_at", expires),
                ("role", claims.role.clone().unwrap_or_else(|| "-".to_string())),
            ];
            for (key, value) in &claims.extra {
                fields.push((key.as_str(), value.to_string()));
            }
            print_fields(&fields);
            Ok(())
        }
    }
}

pub async fn sessions(
    manager: &LifecycleManager,
    user_id: &str,
    format: OutputFormat,
) -> Result<()> {
    let sessions = manager
        .active_sessions(user_id)
        .await
        .context("Failed to list sessions")?;

    match format {
        OutputFormat::Json => print_json(&sessions),
        OutputFormat::Table => {
            let rows = sessions
                .iter()
                .map(|s| {
                    [
                        s.family_id.clone(),
                        timestamp(s.started_at),
                        timestamp(s.last_rotated_at),
                        timestamp(s.expires_at),
                        s.rotations.to_string(),
                    ]
                })
                .collect();
            print_table(
                ["Session", "Started", "Last rotated", "Expires", "Rotations"],
                rows,
            );
            Ok(())
        }
    }
}

/// Lineage entry with fingerprints in place of refresh token ids.
#[derive(Serialize)]
struct LineageEntry {
    token_fp: String,
    parent_fp: Option<String>,
    status: TokenStatus,
    #[serde(with = "time::serde::rfc3339")]
    issued_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    expires_at: OffsetDateTime,
}

impl From<&RefreshTokenRecord> for LineageEntry {
    fn from(record: &RefreshTokenRecord) -> Self {
        Self {
            token_fp: record.fingerprint(),
            parent_fp: record.parent_id.as_deref().map(fingerprint),
            status: record.status,
            issued_at: record.issued_at,
            expires_at: record.expires_at,
        }
    }
}

pub async fn lineage(
    manager: &LifecycleManager,
    family_id: &str,
    format: OutputFormat,
) -> Result<()> {
    let records = manager
        .family_lineage(family_id)
        .await
        .context("Failed to read session lineage")?;
    let entries: Vec<LineageEntry> = records.iter().map(LineageEntry::from).collect();

    match format {
        OutputFormat::Json => print_json(&entries),
        OutputFormat::Table => {
            let rows = entries
                .iter()
                .map(|e| {
                    [
                        e.token_fp.clone(),
                        e.parent_fp.clone().unwrap_or_else(|| "-".to_string()),
                        e.status.as_str().to_string(),
                        timestamp(e.issued_at),
                        timestamp(e.expires_at),
                    ]
                })
                .collect();
            print_table(["Token", "Parent", "Status", "Issued", "Expires"], rows);
            Ok(())
        }
    }
}

pub async fn sweep(manager: &LifecycleManager) -> Result<()> {
    let store = manager.engine().store();
    if store.has_native_ttl() {
        print_success(&format!(
            "{} expires records natively, nothing to sweep",
            store.backend_name()
        ));
        return Ok(());
    }

    let removed = CleanupWorker::sweep(store.as_ref())
        .await
        .context("Sweep failed")?;
    print_success(&format!("Removed {removed} expired record(s)"));
    Ok(())
}
