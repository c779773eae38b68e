//! Operator CLI for the governance control plane (spec.md §6): audit chain
//! inspection/verification against the on-disk log, and decision
//! resolution/reconciliation against a running server.

#![deny(unsafe_code)]

use clap::{Parser, Subcommand, ValueEnum};
use serde_json::json;
use std::path::PathBuf;

use clasper_audit::{verify_audit_chain, AuditChain};

#[derive(Parser, Debug)]
#[command(name = "clasper", about = "Inspect the audit chain and act on pending decisions")]
struct Cli {
    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Operate on the on-disk, per-tenant hash-chained audit log
    Audit {
        #[command(subcommand)]
        cmd: AuditCommand,
    },
    /// Act on decisions held by a running control plane
    Decisions {
        #[command(subcommand)]
        cmd: DecisionsCommand,
    },
}

#[derive(Subcommand, Debug)]
enum AuditCommand {
    /// Replay a tenant's chain and report the first broken link, if any
    Verify {
        #[arg(short, long, default_value = "./data/audit")]
        dir: PathBuf,
        #[arg(short, long)]
        tenant: String,
    },
    /// Print a tenant's chain as JSON
    Show {
        #[arg(short, long, default_value = "./data/audit")]
        dir: PathBuf,
        #[arg(short, long)]
        tenant: String,
        /// Only show entries of this event_type
        #[arg(long)]
        event_type: Option<String>,
    },
}

#[derive(Subcommand, Debug)]
enum DecisionsCommand {
    /// POST /api/decisions/:decision_id/resolve
    Resolve {
        #[arg(long, default_value = "http://localhost:8081")]
        url: String,
        #[arg(long, env = "CLASPER_OPS_API_KEY", default_value = "")]
        ops_api_key: String,
        #[arg(long)]
        decision_id: String,
        #[arg(long, value_enum)]
        action: Action,
        #[arg(long)]
        justification: String,
        #[arg(long, value_enum, default_value = "local")]
        approval_type: ApprovalTypeArg,
    },
    /// POST /ops/api/decisions/reconcile
    Reconcile {
        #[arg(long, default_value = "http://localhost:8081")]
        url: String,
        #[arg(long, env = "CLASPER_OPS_API_KEY", default_value = "")]
        ops_api_key: String,
        #[arg(long)]
        tenant_id: String,
        #[arg(long)]
        workspace_id: Option<String>,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Action {
    Approve,
    Deny,
}

impl Action {
    fn as_wire(self) -> &'static str {
        match self {
            Self::Approve => "approve",
            Self::Deny => "deny",
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum ApprovalTypeArg {
    Local,
    Cloud,
}

impl ApprovalTypeArg {
    fn as_wire(self) -> &'static str {
        match self {
            Self::Local => "local",
            Self::Cloud => "cloud",
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    match cli.cmd {
        Command::Audit { cmd } => match cmd {
            AuditCommand::Verify { dir, tenant } => cmd_audit_verify(&dir, &tenant)?,
            AuditCommand::Show { dir, tenant, event_type } => cmd_audit_show(&dir, &tenant, event_type.as_deref())?,
        },
        Command::Decisions { cmd } => match cmd {
            DecisionsCommand::Resolve { url, ops_api_key, decision_id, action, justification, approval_type } => {
                cmd_resolve(&url, &ops_api_key, &decision_id, action, &justification, approval_type).await?
            }
            DecisionsCommand::Reconcile { url, ops_api_key, tenant_id, workspace_id } => {
                cmd_reconcile(&url, &ops_api_key, &tenant_id, workspace_id.as_deref()).await?
            }
        },
    }
    Ok(())
}

fn cmd_audit_verify(dir: &PathBuf, tenant: &str) -> Result<(), Box<dyn std::error::Error>> {
    let chain = AuditChain::open(dir)?;
    let result = verify_audit_chain(&chain, tenant)?;
    println!("{}", serde_json::to_string_pretty(&result)?);
    if !result.verified {
        std::process::exit(1);
    }
    Ok(())
}

fn cmd_audit_show(dir: &PathBuf, tenant: &str, event_type: Option<&str>) -> Result<(), Box<dyn std::error::Error>> {
    let chain = AuditChain::open(dir)?;
    let mut entries = chain.read_all(tenant)?;
    if let Some(event_type) = event_type {
        entries.retain(|e| e.event_type == event_type);
    }
    println!("{}", serde_json::to_string_pretty(&entries)?);
    Ok(())
}

fn ops_headers(req: reqwest::RequestBuilder, ops_api_key: &str) -> reqwest::RequestBuilder {
    if ops_api_key.is_empty() {
        req
    } else {
        req.header("X-Ops-Api-Key", ops_api_key)
    }
}

async fn cmd_resolve(
    url: &str,
    ops_api_key: &str,
    decision_id: &str,
    action: Action,
    justification: &str,
    approval_type: ApprovalTypeArg,
) -> Result<(), Box<dyn std::error::Error>> {
    let client = reqwest::Client::new();
    let body = json!({
        "action": action.as_wire(),
        "justification": justification,
        "approval_type": approval_type.as_wire(),
    });
    let endpoint = format!("{url}/api/decisions/{decision_id}/resolve");
    let resp = ops_headers(client.post(&endpoint), ops_api_key).json(&body).send().await?;
    let status = resp.status();
    let text = resp.text().await?;
    if !status.is_success() {
        eprintln!("resolve failed: {status}\n{text}");
        std::process::exit(1);
    }
    println!("{text}");
    Ok(())
}

async fn cmd_reconcile(
    url: &str,
    ops_api_key: &str,
    tenant_id: &str,
    workspace_id: Option<&str>,
) -> Result<(), Box<dyn std::error::Error>> {
    let client = reqwest::Client::new();
    let body = json!({"tenant_id": tenant_id, "workspace_id": workspace_id});
    let endpoint = format!("{url}/ops/api/decisions/reconcile");
    let resp = ops_headers(client.post(&endpoint), ops_api_key).json(&body).send().await?;
    let status = resp.status();
    let text = resp.text().await?;
    if !status.is_success() {
        eprintln!("reconcile failed: {status}\n{text}");
        std::process::exit(1);
    }
    println!("{text}");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clasper_audit::Linkage;
    use clasper_core::identity::TenantId;
    use tempfile::tempdir;

    #[test]
    fn verify_reports_a_clean_chain() {
        let dir = tempdir().unwrap();
        let chain = AuditChain::open(dir.path()).unwrap();
        chain.append(&TenantId::from("t1"), "tool_execution_blocked", json!({"tool": "delete"}), Linkage::default()).unwrap();
        cmd_audit_verify(&dir.path().to_path_buf(), "t1").unwrap();
    }

    #[test]
    fn show_filters_by_event_type() {
        let dir = tempdir().unwrap();
        let chain = AuditChain::open(dir.path()).unwrap();
        chain.append(&TenantId::from("t1"), "a", json!({}), Linkage::default()).unwrap();
        chain.append(&TenantId::from("t1"), "b", json!({}), Linkage::default()).unwrap();
        let chain2 = AuditChain::open(dir.path()).unwrap();
        let entries = chain2.read_all("t1").unwrap();
        assert_eq!(entries.len(), 2);
        cmd_audit_show(&dir.path().to_path_buf(), "t1", Some("a")).unwrap();
    }
}
