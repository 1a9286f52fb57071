//! Builds the agent prompt for a single bead attempt. The prohibition on
//! commits is explicit and first — the commit-ownership invariant is
//! enforced by the caller regardless, but the prompt should never leave the
//! agent guessing.

use vigil_core::types::ResolvedExecutionContract;

pub fn build_bead_prompt(
    run_id: &str,
    repo_id: &str,
    branch: &str,
    bead_id: &str,
    title: &str,
    description: Option<&str>,
    contract: &ResolvedExecutionContract,
) -> String {
    let mut prompt = String::new();
    prompt.push_str("Do not run `git commit` or `git add` yourself; the orchestrator commits your work after validating it.\n\n");
    prompt.push_str(&format!("run_id: {run_id}\nrepo_id: {repo_id}\nbranch: {branch}\n"));
    prompt.push_str(&format!("bead_id: {bead_id}\ntitle: {title}\n"));
    if let Some(desc) = description {
        prompt.push_str(&format!("description:\n{desc}\n"));
    }
    prompt.push_str(&format!(
        "\nallowed_roots: {:?}\ndeny_roots: {:?}\n",
        contract.allowed_roots, contract.deny_roots
    ));
    prompt.push_str(&format!(
        "validation_commands to satisfy: {:?}\n",
        contract.validation_commands
    ));
    if contract.enforce_given_when_then {
        prompt.push_str("\nAny test file you add or modify must contain the words given, when, and then.\n");
    }
    prompt.push_str(&format!(
        "\nTime budget: {} minutes. Stay within the allowed and denied paths above.\n",
        contract.time_budget_minutes
    ));
    prompt
}

#[cfg(test)]
mod tests {
    use super::*;
    use vigil_core::types::NotebookOutputPolicy;

    fn contract() -> ResolvedExecutionContract {
        ResolvedExecutionContract {
            time_budget_minutes: 30,
            validation_commands: vec!["pytest".into()],
            env: "py311".into(),
            allow_env_creation: false,
            requires_notebook_execution: false,
            allowed_roots: vec!["src".into()],
            deny_roots: vec!["secrets".into()],
            notebook_roots: vec![],
            notebook_output_policy: NotebookOutputPolicy::Strip,
            enforce_given_when_then: true,
        }
    }

    #[test]
    fn prompt_forbids_commits_up_front() {
        let prompt = build_bead_prompt("r1", "widgets", "run/r1", "bd-1", "Fix bug", None, &contract());
        assert!(prompt.starts_with("Do not run `git commit`"));
    }

    #[test]
    fn prompt_includes_identifiers_and_roots() {
        let prompt = build_bead_prompt("r1", "widgets", "run/r1", "bd-1", "Fix bug", Some("desc"), &contract());
        assert!(prompt.contains("bd-1"));
        assert!(prompt.contains("widgets"));
        assert!(prompt.contains("src"));
        assert!(prompt.contains("secrets"));
        assert!(prompt.contains("given"));
    }
}
