//! Request fingerprinting (spec.md §4.6): groups retries of the same
//! logical request under one `execution_id` without the shim needing to
//! ask the control plane.

use std::collections::BTreeSet;

use clasper_policy::Targets;

/// Raw session-identifying fields an adapter can supply, in priority order.
#[derive(Debug, Clone, Default)]
pub struct SessionContext {
    /// Explicit session key, if the adapter tracks one.
    pub session_key: Option<String>,
    /// Session id, if the adapter has no `session_key` concept.
    pub session_id: Option<String>,
    /// Agent id, as a last resort before a thread id.
    pub agent_id: Option<String>,
    /// Thread id, the final fallback.
    pub thread_id: Option<String>,
}

impl SessionContext {
    /// Resolve a stable session key, never a per-call id (spec.md §4.6).
    #[must_use]
    pub fn resolve(&self) -> &str {
        self.session_key
            .as_deref()
            .or(self.session_id.as_deref())
            .or(self.agent_id.as_deref())
            .or(self.thread_id.as_deref())
            .unwrap_or("none")
    }
}

/// Rewrite a raw tool name through the fixed alias table (spec.md §4.6).
#[must_use]
pub fn normalize_tool(tool: &str) -> String {
    match tool {
        "read_file" => "read".to_string(),
        "write_file" => "write".to_string(),
        "delete_file" => "delete".to_string(),
        "http_request" => "web_search".to_string(),
        other => other.to_string(),
    }
}

/// Sorted, deduped, lowercased set of target paths/hosts, joined with `,`.
#[must_use]
pub fn targets_key(targets: &Targets) -> String {
    let mut set: BTreeSet<String> = BTreeSet::new();
    for p in &targets.paths {
        set.insert(p.to_lowercase());
    }
    for h in &targets.hosts {
        set.insert(h.to_lowercase());
    }
    set.into_iter().collect::<Vec<_>>().join(",")
}

const PACKAGE_MANAGERS: &[&str] = &["npm", "pnpm", "yarn", "pip", "pip3", "cargo", "poetry", "bundler", "gem"];
const SCRIPT_RUNTIMES: &[&str] = &["python", "python3", "node", "ruby", "perl", "bash", "sh", "zsh"];
const NETWORK_CLIS: &[&str] = &["curl", "wget", "ssh", "scp", "nc"];

/// Bucket a shell argv0 into a coarse command class (spec.md §4.6).
#[must_use]
pub fn command_class(argv0: Option<&str>) -> String {
    let Some(argv0) = argv0 else { return "none".to_string() };
    let stem = argv0.rsplit('/').next().unwrap_or(argv0);
    if PACKAGE_MANAGERS.contains(&stem) {
        "package_manager".to_string()
    } else if SCRIPT_RUNTIMES.contains(&stem) {
        "script_runtime".to_string()
    } else if stem == "git" {
        "git".to_string()
    } else if NETWORK_CLIS.contains(&stem) {
        "network_cli".to_string()
    } else if matches!(stem, "rm" | "mv" | "cp" | "mkdir" | "touch" | "chmod" | "chown") {
        "shell_fs".to_string()
    } else {
        stem.to_string()
    }
}

/// Compute `adapter_id :: normalized_tool :: session_key :: targets_key ::
/// command_class` (spec.md §4.6).
#[must_use]
pub fn fingerprint(adapter_id: &str, normalized_tool: &str, session: &SessionContext, targets: &Targets, argv0: Option<&str>) -> String {
    format!(
        "{adapter_id}::{normalized_tool}::{}::{}::{}",
        session.resolve(),
        targets_key(targets),
        command_class(argv0)
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alias_table_rewrites_known_tools() {
        assert_eq!(normalize_tool("read_file"), "read");
        assert_eq!(normalize_tool("delete_file"), "delete");
        assert_eq!(normalize_tool("http_request"), "web_search");
        assert_eq!(normalize_tool("exec"), "exec");
    }

    #[test]
    fn session_key_resolution_order() {
        let s = SessionContext { session_key: None, session_id: Some("s1".into()), agent_id: Some("a1".into()), thread_id: None };
        assert_eq!(s.resolve(), "s1");
        let s = SessionContext::default();
        assert_eq!(s.resolve(), "none");
    }

    #[test]
    fn targets_key_is_sorted_deduped_lowercased() {
        let t = Targets { paths: vec!["/Tmp/X".into(), "/tmp/x".into()], hosts: vec!["Example.com".into()] };
        assert_eq!(targets_key(&t), "/tmp/x,example.com");
    }

    #[test]
    fn command_class_buckets() {
        assert_eq!(command_class(Some("npm")), "package_manager");
        assert_eq!(command_class(Some("/usr/bin/git")), "git");
        assert_eq!(command_class(Some("curl")), "network_cli");
        assert_eq!(command_class(Some("rm")), "shell_fs");
        assert_eq!(command_class(Some("custom-tool")), "custom-tool");
        assert_eq!(command_class(None), "none");
    }

    #[test]
    fn fingerprint_is_deterministic_for_identical_inputs() {
        let session = SessionContext { session_key: Some("sess-1".into()), ..Default::default() };
        let targets = Targets { paths: vec!["/tmp/x".into()], hosts: vec![] };
        let a = fingerprint("adapter-1", "delete", &session, &targets, None);
        let b = fingerprint("adapter-1", "delete", &session, &targets, None);
        assert_eq!(a, b);
    }
}
