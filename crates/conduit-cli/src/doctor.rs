use std::process::ExitCode;

use anyhow::Result;

use conduit_core::backend::{probe_all, BackendRegistry, ProbeReport};
use conduit_core::config::ConduitConfig;

pub fn run_doctor(config: &ConduitConfig, json_output: bool) -> Result<ExitCode> {
    let report = probe_all(&BackendRegistry::from_config(&config.backends));

    if json_output {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_human_report(&report);
    }

    if report.all_available {
        Ok(ExitCode::SUCCESS)
    } else {
        Ok(ExitCode::from(1))
    }
}

fn print_human_report(report: &ProbeReport) {
    println!("Conduit Doctor Report");
    println!("=====================");
    println!();
    println!("Backends:");
    for result in &report.results {
        match &result.resolved_path {
            Some(path) => println!(
                "  \u{2713} {:<8} {} ({})",
                result.backend,
                result.binary,
                path.display()
            ),
            None => println!(
                "  \u{2717} {:<8} {} (not found on PATH)",
                result.backend, result.binary
            ),
        }
    }
    println!();
    if report.all_available {
        println!("All backends available.");
    } else {
        println!("Some backends are missing.");
    }
}
