//! Context mapping (spec.md §4.6): turns an adapter's raw tool arguments
//! into the structured `ExecutionContext` the policy engine evaluates.

use clasper_policy::{ExecFields, ExecutionContext, SideEffects, Targets};
use serde_json::Value;

const ELEVATED_TOKENS: &[&str] = &["sudo", "--privileged"];
const PACKAGE_MANAGERS: &[&str] = &["npm", "pnpm", "yarn", "pip", "pip3", "cargo", "poetry", "bundler", "gem"];
const WRITE_TOOLS: &[&str] = &["write", "write_file", "delete", "delete_file"];
const EXEC_TOOLS: &[&str] = &["exec", "run_command", "shell"];

fn str_field<'a>(args: &'a Value, key: &str) -> Option<&'a str> {
    args.get(key).and_then(Value::as_str)
}

fn host_of(url: &str) -> Option<String> {
    let without_scheme = url.split("://").nth(1).unwrap_or(url);
    let host = without_scheme.split(['/', '?', '#']).next()?;
    let host = host.split('@').next_back().unwrap_or(host);
    let host = host.split(':').next().unwrap_or(host);
    if host.is_empty() {
        None
    } else {
        Some(host.to_lowercase())
    }
}

fn tokenize(command: &str) -> Vec<String> {
    command.split_whitespace().map(str::to_string).collect()
}

/// Build an [`ExecutionContext`] from a tool's raw JSON arguments.
#[must_use]
pub fn map_context(normalized_tool: &str, args: &Value) -> ExecutionContext {
    let mut paths = Vec::new();
    for key in ["path", "file", "cwd"] {
        if let Some(v) = str_field(args, key) {
            paths.push(v.to_string());
        }
    }

    let mut hosts = Vec::new();
    if let Some(url) = str_field(args, "url") {
        if let Some(host) = host_of(url) {
            hosts.push(host);
        }
    }
    let external_network = !hosts.is_empty();

    let exec = if EXEC_TOOLS.contains(&normalized_tool) {
        str_field(args, "command").map(|command| {
            let argv = tokenize(command);
            ExecFields { argv0: argv.first().cloned(), cwd: str_field(args, "cwd").map(str::to_string), argv }
        })
    } else {
        None
    };

    let elevated_privileges = exec
        .as_ref()
        .map(|e| e.argv.iter().any(|tok| ELEVATED_TOKENS.contains(&tok.as_str())))
        .unwrap_or(false);

    let package_manager = exec.as_ref().and_then(|e| e.argv0.as_deref()).and_then(|argv0| {
        let stem = argv0.rsplit('/').next().unwrap_or(argv0);
        PACKAGE_MANAGERS.iter().find(|&&pm| pm == stem).map(|s| s.to_string())
    });

    let writes_files = WRITE_TOOLS.contains(&normalized_tool);
    let writes_possible = writes_files || exec.is_some();

    ExecutionContext {
        external_network,
        writes_files,
        elevated_privileges,
        package_manager,
        targets: Targets { paths, hosts },
        exec,
        side_effects: SideEffects { writes_possible, network_possible: external_network },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn write_tool_sets_writes_files() {
        let ctx = map_context("write", &json!({"path": "/tmp/x"}));
        assert!(ctx.writes_files);
        assert!(ctx.side_effects.writes_possible);
        assert_eq!(ctx.targets.paths, vec!["/tmp/x".to_string()]);
    }

    #[test]
    fn exec_tool_tokenizes_command_and_detects_elevation() {
        let ctx = map_context("exec", &json!({"command": "sudo rm -rf /tmp/x"}));
        let exec = ctx.exec.unwrap();
        assert_eq!(exec.argv0.as_deref(), Some("sudo"));
        assert_eq!(exec.argv, vec!["sudo", "rm", "-rf", "/tmp/x"]);
        assert!(ctx.elevated_privileges);
    }

    #[test]
    fn url_arg_derives_lowercased_host() {
        let ctx = map_context("web_search", &json!({"url": "https://Example.com/path?x=1"}));
        assert_eq!(ctx.targets.hosts, vec!["example.com".to_string()]);
        assert!(ctx.external_network);
        assert!(ctx.side_effects.network_possible);
    }

    #[test]
    fn read_tool_has_no_side_effects() {
        let ctx = map_context("read", &json!({"path": "/tmp/x"}));
        assert!(!ctx.writes_files);
        assert!(!ctx.side_effects.writes_possible);
    }
}
