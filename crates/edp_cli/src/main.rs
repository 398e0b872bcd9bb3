//! CLI smoke entry point.
//!
//! # Responsibility
//! - Verify `edp_store` linkage with deterministic output.
//! - When `EDP_BACKEND` is set, open the configured data layer and report
//!   what it sees.

use edp_store::{DataLayer, EdpStatus, Query, StoreConfig};
use log::info;
use std::process::ExitCode;

fn main() -> ExitCode {
    println!("edp_store ping={}", edp_store::ping());
    println!("edp_store version={}", edp_store::core_version());

    if let Err(err) = edp_store::init_from_env() {
        eprintln!("logging disabled: {err}");
    }

    if std::env::var_os("EDP_BACKEND").is_none() {
        println!("probe=skipped reason=EDP_BACKEND unset");
        return ExitCode::SUCCESS;
    }

    match probe() {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("probe failed: {err}");
            ExitCode::FAILURE
        }
    }
}

fn probe() -> Result<(), Box<dyn std::error::Error>> {
    let config = StoreConfig::from_env()?;
    let layer = DataLayer::open(&config)?;

    let milestones = layer.milestones();
    let total = milestones.list(&Query::new())?.len();
    println!("backend={} milestones={total}", layer.backend_kind());
    for status in EdpStatus::ALL {
        let count = milestones.with_status(status)?.len();
        if count > 0 {
            println!("milestones.{status}={count}");
        }
    }
    info!(
        "event=cli_probe module=cli status=ok backend={} milestones={total}",
        layer.backend_kind()
    );
    Ok(())
}
