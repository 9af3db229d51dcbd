use std::path::Path;
use std::process;

use r7_engine::{EngineConfig, WitnessFallback};

use crate::{report_error, OutputFormat};

/// Parse and validate an engine configuration file.
pub(crate) fn load_config(path: &Path) -> Result<EngineConfig, String> {
    let text = std::fs::read_to_string(path)
        .map_err(|e| format!("error reading config '{}': {}", path.display(), e))?;
    let config: EngineConfig = toml::from_str(&text)
        .map_err(|e| format!("error parsing config '{}': {}", path.display(), e))?;
    config
        .validate()
        .map_err(|e| format!("error in config '{}': {}", path.display(), e))?;
    Ok(config)
}

fn describe_fallback(fallback: &WitnessFallback) -> String {
    match fallback {
        WitnessFallback::Abort => "abort".to_string(),
        WitnessFallback::ReducedConfidence { min_attestations } => {
            format!("reduced_confidence (min {} attestation(s))", min_attestations)
        }
        WitnessFallback::ExpandAndRetry { max_rounds } => {
            format!("expand_and_retry (up to {} extra round(s))", max_rounds)
        }
    }
}

pub(crate) fn cmd_check_config(path: &Path, output: OutputFormat, quiet: bool) {
    let config = match load_config(path) {
        Ok(c) => c,
        Err(msg) => {
            report_error(&msg, output, quiet);
            process::exit(1);
        }
    };

    match output {
        OutputFormat::Json => {
            let value = serde_json::to_value(&config).unwrap_or_default();
            println!("{}", serde_json::json!({ "valid": true, "config": value }));
        }
        OutputFormat::Text => {
            if quiet {
                return;
            }
            println!("Configuration OK: {}", path.display());
            println!("  refund fraction:   {}", config.settlement.refund_fraction);
            println!("  escrow ttl:        {}s", config.settlement.escrow_ttl_secs);
            println!("  witness fallback:  {}", describe_fallback(&config.witness.fallback));
            println!("  witness timeout:   {}ms", config.witness.timeout_ms);
            println!("  half-life:         {} days", config.tensor.half_life_days);
            println!("  ledger attempts:   {}", config.ledger.max_attempts);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fallback_descriptions_name_the_policy() {
        assert_eq!(describe_fallback(&WitnessFallback::Abort), "abort");
        assert!(describe_fallback(&WitnessFallback::ExpandAndRetry { max_rounds: 2 })
            .starts_with("expand_and_retry"));
    }
}
