use std::path::Path;
use std::process;

use crate::commands::check_config::load_config;
use crate::scenario::{self, Scenario, SimulationReport};
use crate::{read_json, report_error, OutputFormat};

pub(crate) fn cmd_simulate(
    scenario_path: &Path,
    config_path: Option<&Path>,
    output: OutputFormat,
    quiet: bool,
) {
    let doc = read_json(scenario_path, output, quiet);
    let mut scenario: Scenario = match serde_json::from_value(doc) {
        Ok(s) => s,
        Err(e) => {
            let msg = format!("error: invalid scenario '{}': {}", scenario_path.display(), e);
            exit_with(&msg, output, quiet)
        }
    };

    let config = match (config_path, scenario.config.take()) {
        (Some(path), _) => match load_config(path) {
            Ok(c) => c,
            Err(msg) => exit_with(&msg, output, quiet),
        },
        (None, Some(config)) => match config.validate() {
            Ok(()) => config,
            Err(e) => exit_with(&format!("error in scenario config: {}", e), output, quiet),
        },
        (None, None) => exit_with(
            "error: no engine configuration; pass --config or set `config` in the scenario",
            output,
            quiet,
        ),
    };

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => exit_with(&format!("error: failed to start runtime: {}", e), output, quiet),
    };
    let report = match runtime.block_on(scenario::run(scenario, config)) {
        Ok(r) => r,
        Err(msg) => exit_with(&format!("error: {}", msg), output, quiet),
    };

    match output {
        OutputFormat::Json => match serde_json::to_string_pretty(&report) {
            Ok(s) => println!("{}", s),
            Err(e) => exit_with(&format!("serialization error: {}", e), output, quiet),
        },
        OutputFormat::Text => print_text(&report),
    }
}

fn exit_with(msg: &str, output: OutputFormat, quiet: bool) -> ! {
    report_error(msg, output, quiet);
    process::exit(1);
}

fn short(hash: &str) -> &str {
    hash.get(..12).unwrap_or(hash)
}

fn print_text(report: &SimulationReport) {
    for action in &report.actions {
        let hash = action.record_hash.as_deref().map(short).unwrap_or("-");
        let state = action
            .state
            .map(|s| s.as_str().to_string())
            .unwrap_or_else(|| "-".to_string());
        match &action.error {
            Some(err) => println!(
                "#{} {} {} {}: {}",
                action.index,
                hash,
                state,
                err.code.as_deref().unwrap_or("error"),
                err.detail
            ),
            None => println!("#{} {} {}", action.index, hash, state),
        }
    }
    println!();
    println!("balances (total supply {}):", report.total_supply);
    for (account, balance) in &report.balances {
        println!("  {:<24} {}", account, balance);
    }
    for tensor in &report.tensors {
        let dims: Vec<String> = tensor
            .snapshot
            .t3
            .iter()
            .chain(tensor.snapshot.v3.iter())
            .map(|(d, v)| format!("{}={}", d, v.round_dp(4)))
            .collect();
        println!(
            "tensor {} / {} ({} actions): {} trust={} value={}",
            tensor.entity,
            tensor.role,
            tensor.counters.total,
            dims.join(" "),
            tensor.trust_score.round_dp(4),
            tensor.value_score.round_dp(4)
        );
    }
    println!("ledger records: {}", report.ledger_records);
}
