//! `orchestrator init-repo`: append a `[repos.<repo_id>]` table to
//! `config/repos.toml` and validate the result. `vigil-config` only reads
//! TOML, so this hand-assembles the block with the same field names
//! `ReposToml::load` expects, then round-trips it through `load` to
//! catch anything a human typo'd on the command line.

use std::path::Path;

use anyhow::{bail, Context, Result};
use clap::Args;

use vigil_config::ReposToml;

#[derive(Debug, Args)]
pub struct InitRepoArgs {
    #[arg(long = "repo-id")]
    repo_id: String,
    #[arg(long)]
    path: std::path::PathBuf,
    #[arg(long)]
    env: Option<String>,
    #[arg(long = "base-branch")]
    base_branch: String,
    #[arg(long = "validation-command")]
    validation_commands: Vec<String>,
    #[arg(long = "allowed-root")]
    allowed_roots: Vec<String>,
    #[arg(long = "deny-root")]
    deny_roots: Vec<String>,
    #[arg(long = "notebook-root")]
    notebook_roots: Vec<String>,
    #[arg(long = "dirty-ignore-glob")]
    dirty_ignore_globs: Vec<String>,
    #[arg(long = "notebook-output-policy")]
    notebook_output_policy: Option<String>,
    #[arg(long = "dirty-cleanup")]
    dirty_cleanup: bool,
    #[arg(long = "allow-existing")]
    allow_existing: bool,
}

fn toml_string_array(label: &str, values: &[String]) -> String {
    if values.is_empty() {
        return String::new();
    }
    let quoted: Vec<String> = values.iter().map(|v| format!("{v:?}")).collect();
    format!("{label} = [{}]\n", quoted.join(", "))
}

pub async fn run(config_dir: &Path, args: InitRepoArgs) -> Result<()> {
    let repos_path = config_dir.join("repos.toml");
    let existing = if repos_path.exists() {
        std::fs::read_to_string(&repos_path).with_context(|| format!("reading {}", repos_path.display()))?
    } else {
        String::new()
    };

    if !args.allow_existing {
        let needle = format!("[repos.{}]", args.repo_id);
        if existing.contains(&needle) {
            bail!("repo {} already has a table in {}; pass --allow-existing to overwrite", args.repo_id, repos_path.display());
        }
    }

    let mut block = format!(
        "\n[repos.{}]\npath = {:?}\nbase_branch = {:?}\n",
        args.repo_id,
        args.path.display().to_string(),
        args.base_branch,
    );
    if let Some(env) = &args.env {
        block.push_str(&format!("env = {env:?}\n"));
    }
    block.push_str(&toml_string_array("validation_commands", &args.validation_commands));
    block.push_str(&toml_string_array("allowed_roots", &args.allowed_roots));
    block.push_str(&toml_string_array("deny_roots", &args.deny_roots));
    block.push_str(&toml_string_array("notebook_roots", &args.notebook_roots));
    block.push_str(&toml_string_array("dirty_ignore_globs", &args.dirty_ignore_globs));
    if let Some(policy) = &args.notebook_output_policy {
        block.push_str(&format!("notebook_output_policy = {policy:?}\n"));
    }
    if args.dirty_cleanup {
        block.push_str("dirty_cleanup = true\n");
    }

    vigil_core::atomic::append_text(&repos_path, &block).with_context(|| format!("writing {}", repos_path.display()))?;

    ReposToml::load(&repos_path).with_context(|| format!("{} failed to validate after init-repo", repos_path.display()))?;

    println!("added repo {} to {}", args.repo_id, repos_path.display());
    Ok(())
}
