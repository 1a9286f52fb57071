//! `orchestrator signoff`: record a human reviewer's signoff for an ended
//! run, so the next `ensure_active_run` call doesn't trip the signoff
//! gate. The signoff's hash binds it to the exact `final_review.json`
//! bytes reviewed — editing the review after signing invalidates it.

use std::path::Path;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::Args;

use vigil_core::atomic;
use vigil_core::paths;
use vigil_core::signoff::RunSignoff;

#[derive(Debug, Args)]
pub struct SignoffArgs {
    #[arg(long)]
    run_id: String,
    #[arg(long)]
    reviewer: String,
    #[arg(long)]
    notes: Option<String>,
}

pub fn run(_config_dir: &Path, args: SignoffArgs) -> Result<()> {
    let cache_dir = super::context::resolve_cache_dir(None);

    let final_review_json_path = paths::final_review_json_path(&cache_dir, &args.run_id);
    let final_review_bytes = std::fs::read(&final_review_json_path)
        .with_context(|| format!("reading {}", final_review_json_path.display()))?;

    let json_name = final_review_json_path.file_name().and_then(|n| n.to_str()).unwrap_or("final_review.json");
    let md_name = paths::final_review_md_path(&cache_dir, &args.run_id)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("final_review.md")
        .to_string();

    let signoff = RunSignoff::new(
        args.run_id.clone(),
        args.reviewer.clone(),
        Utc::now(),
        json_name,
        md_name,
        &final_review_bytes,
        args.notes.clone(),
    )
    .with_context(|| "building signoff")?;

    let signoff_json_path = paths::run_signoff_json_path(&cache_dir, &args.run_id);
    atomic::write_json_atomic(&signoff_json_path, &signoff).with_context(|| format!("writing {}", signoff_json_path.display()))?;

    let signoff_md_path = paths::run_signoff_md_path(&cache_dir, &args.run_id);
    let md = render_signoff_md(&signoff);
    std::fs::write(&signoff_md_path, &md).with_context(|| format!("writing {}", signoff_md_path.display()))?;

    println!("signoff recorded for run {} by {}", args.run_id, args.reviewer);
    Ok(())
}

fn render_signoff_md(signoff: &RunSignoff) -> String {
    let mut out = format!(
        "# Signoff: {}\n\nreviewer: {}\nreviewed_at: {}\n",
        signoff.run_id, signoff.reviewer, signoff.reviewed_at
    );
    if let Some(notes) = &signoff.notes {
        out.push_str(&format!("\nnotes:\n\n{notes}\n"));
    }
    out
}
