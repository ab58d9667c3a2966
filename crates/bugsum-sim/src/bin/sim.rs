#![forbid(unsafe_code)]

use anyhow::Result;
use bugsum_sim::campaign::{CampaignConfig, run_campaign};

fn main() -> Result<()> {
    let report = run_campaign(&CampaignConfig::default())?;

    println!(
        "simulation campaign complete: seeds={} passed={} rollups={} journal_entries={}",
        report.seeds_run, report.seeds_passed, report.rollups, report.journal_entries_written
    );

    if let Some(seed) = report.first_failure {
        for failure in &report.failures {
            eprintln!("seed {}: {}", failure.seed, failure.violations.join("; "));
        }
        anyhow::bail!("invariant violated, first failing seed {seed}");
    }

    Ok(())
}
