//! Scenario files for `r7 simulate`.
//!
//! A scenario seeds an in-memory engine (accounts, role pairings, pricing,
//! rule sets, witnesses, scripted effectors) and lists the actions to run
//! in order. An Action Record may name a rule set by id as
//! `"rulesHash": "@<id>"`; `@r7-standard` is always available.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use r7_engine::{
    ActionOutcome, ActionState, Engine, EngineConfig, EngineError, Grant, MemoryDirectory,
    MemoryWitnessNetwork, PairCounters, PricingSchedule, ResourcePool, RolePairing, RuleRegistry,
    ScriptedEffector, StaticPricing, SystemClock, WitnessBehavior,
};
use r7_interchange::{parse_action_record, RuleSet, TensorSnapshot};
use r7_ledger::MemoryLedger;

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Scenario {
    #[serde(default)]
    pub config: Option<EngineConfig>,
    #[serde(default)]
    pub accounts: BTreeMap<String, Decimal>,
    #[serde(default)]
    pub pairings: Vec<RolePairing>,
    #[serde(default)]
    pub grants: Vec<Grant>,
    #[serde(default)]
    pub pricing: BTreeMap<String, PricingSchedule>,
    #[serde(default)]
    pub rule_sets: Vec<RuleSet>,
    #[serde(default)]
    pub witnesses: Vec<WitnessSpec>,
    #[serde(default)]
    pub effectors: BTreeMap<String, ScriptedEffector>,
    pub actions: Vec<ScenarioAction>,
}

#[derive(Debug, Deserialize)]
pub struct WitnessSpec {
    pub id: String,
    #[serde(flatten)]
    pub behavior: WitnessBehavior,
    /// Roles this witness validates.
    #[serde(default)]
    pub validates: Vec<String>,
    /// Relationship-graph neighbours.
    #[serde(default)]
    pub peers: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct ScenarioAction {
    pub record: serde_json::Value,
    /// Cancel after admission instead of running.
    #[serde(default)]
    pub cancel: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionReport {
    pub index: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub record_hash: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<ActionState>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outcome: Option<ActionOutcome>,
}

#[derive(Debug, Serialize)]
pub struct ErrorReport {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    pub detail: String,
}

impl From<&EngineError> for ErrorReport {
    fn from(e: &EngineError) -> Self {
        let detail = match e {
            EngineError::Admission(a) => a.detail.clone(),
            other => other.to_string(),
        };
        ErrorReport {
            code: e.code().map(str::to_string),
            detail,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TensorReport {
    pub entity: String,
    pub role: String,
    pub snapshot: TensorSnapshot,
    pub trust_score: Decimal,
    pub value_score: Decimal,
    pub counters: PairCounters,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SimulationReport {
    pub actions: Vec<ActionReport>,
    pub balances: BTreeMap<String, Decimal>,
    pub total_supply: Decimal,
    pub tensors: Vec<TensorReport>,
    pub ledger_records: usize,
}

/// Replace a `@<id>` rules reference with the published hash.
fn resolve_rules_alias(
    record: &mut serde_json::Value,
    published: &HashMap<String, String>,
) -> Result<(), String> {
    let Some(field) = record.get_mut("rulesHash") else {
        return Ok(());
    };
    let Some(id) = field.as_str().and_then(|s| s.strip_prefix('@')) else {
        return Ok(());
    };
    let hash = published
        .get(id)
        .ok_or_else(|| format!("scenario names unknown rule set '@{}'", id))?;
    *field = serde_json::Value::String(hash.clone());
    Ok(())
}

/// Run every action of the scenario, in order, against a fresh engine.
pub async fn run(scenario: Scenario, config: EngineConfig) -> Result<SimulationReport, String> {
    let ledger = Arc::new(MemoryLedger::new());
    let pool = Arc::new(ResourcePool::new());
    let directory = Arc::new(MemoryDirectory::new());
    let network = Arc::new(MemoryWitnessNetwork::new(Arc::new(SystemClock)));
    let registry = Arc::new(RuleRegistry::new());
    let pricing = Arc::new(StaticPricing::new());

    let mut accounts: BTreeSet<String> = BTreeSet::new();
    for (account, amount) in &scenario.accounts {
        pool.deposit(account, *amount);
        accounts.insert(account.clone());
    }
    let mut pairs = BTreeSet::new();
    for pairing in scenario.pairings {
        pairs.insert((pairing.actor.clone(), pairing.role_ref.clone()));
        directory.add_pairing(pairing);
    }
    for grant in scenario.grants {
        directory.add_grant(grant);
    }
    for (pricing_ref, schedule) in scenario.pricing {
        accounts.extend(schedule.providers.iter().map(|p| p.account.clone()));
        accounts.insert(schedule.pool_account.clone());
        pricing.insert(&pricing_ref, schedule);
    }

    let mut published = HashMap::new();
    for rules in std::iter::once(RuleSet::standard()).chain(scenario.rule_sets) {
        let id = rules.id.clone();
        let hash = registry.publish(rules).map_err(|e| e.to_string())?;
        published.insert(id, hash);
    }

    for witness in scenario.witnesses {
        network.add_witness(&witness.id, witness.behavior);
        directory.add_witness(&witness.id);
        for role in &witness.validates {
            network.add_role_validator(role, &witness.id);
        }
        for peer in &witness.peers {
            network.connect(&witness.id, peer);
        }
    }

    let engine = Engine::builder(config)
        .ledger(ledger.clone())
        .rules(registry)
        .directory(directory)
        .pricing(pricing)
        .pool(pool.clone())
        .witnesses(network)
        .build()
        .map_err(|e| e.to_string())?;
    for (action, effector) in scenario.effectors {
        engine.register_effector(&action, Arc::new(effector));
    }

    let mut reports = Vec::with_capacity(scenario.actions.len());
    for (index, action) in scenario.actions.into_iter().enumerate() {
        let mut value = action.record;
        resolve_rules_alias(&mut value, &published)?;
        let record = parse_action_record(&value).map_err(|e| format!("action #{}: {}", index, e))?;
        let record_hash = record.content_hash().map_err(|e| e.to_string())?;

        let result = match engine.submit(record).await {
            Ok(_) if action.cancel => engine.cancel(&record_hash).await.map(|_| None),
            Ok(_) => engine.run(&record_hash).await.map(Some),
            Err(e) => Err(e),
        };
        let report = match result {
            Ok(outcome) => ActionReport {
                index,
                state: engine.state(&record_hash),
                record_hash: Some(record_hash),
                error: None,
                outcome,
            },
            Err(e) => ActionReport {
                index,
                state: engine.state(&record_hash),
                record_hash: Some(record_hash),
                error: Some(ErrorReport::from(&e)),
                outcome: None,
            },
        };
        reports.push(report);
    }

    for (actor, _) in &pairs {
        accounts.insert(actor.clone());
    }
    let balances = accounts
        .into_iter()
        .map(|a| {
            let balance = pool.balance(&a);
            (a, balance)
        })
        .collect();
    let tensors = pairs
        .into_iter()
        .map(|(entity, role)| {
            let snapshot = engine.tensor().snapshot(&entity, &role);
            TensorReport {
                trust_score: snapshot.trust_score(),
                value_score: snapshot.value_score(),
                snapshot,
                counters: engine.tensor().counters(&entity, &role),
                entity,
                role,
            }
        })
        .collect();

    Ok(SimulationReport {
        actions: reports,
        balances,
        total_supply: pool.total_supply(),
        tensors,
        ledger_records: ledger.len(),
    })
}
