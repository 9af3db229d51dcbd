//! Execution Meter.
//!
//! Runs the requested action through a registered [`Effector`] while a
//! [`Meter`] tracks consumption against the declared caps. The effector
//! runs on its own task, so a panic or a timeout is observed here and
//! turned into a failed result carrying whatever was consumed so far.
//! Execution failures are data: [`ExecutionMeter::execute`] always
//! returns an [`ActionResult`].

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use r7_interchange::{
    content_hash, ActionRecord, ActionResult, Output, Request, ResourceAmounts, ResourceKind,
    ResultError, ResultStatus,
};

use crate::error::ErrorKind;
use crate::predicate::action_matches;

pub const ERR_EXECUTION_FAULT: &str = "ERR_EXECUTION_FAULT";
pub const ERR_EXECUTION_TIMEOUT: &str = "ERR_EXECUTION_TIMEOUT";
pub const ERR_EXECUTION_PANIC: &str = "ERR_EXECUTION_PANIC";
pub const ERR_NO_EFFECTOR: &str = "ERR_NO_EFFECTOR";

/// Consumption beyond a declared cap.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{kind} consumption {attempted} exceeds declared cap {cap}")]
pub struct CapExceeded {
    pub kind: ResourceKind,
    pub attempted: Decimal,
    pub cap: Decimal,
}

#[derive(Debug)]
struct MeterState {
    caps: ResourceAmounts,
    consumed: ResourceAmounts,
    exceeded: Option<CapExceeded>,
}

/// Shared consumption counter handed to an effector.
///
/// Undeclared resource kinds have a cap of zero. Once a cap is exceeded
/// the meter holds consumption at the cap and refuses further charges.
#[derive(Debug, Clone)]
pub struct Meter {
    state: Arc<Mutex<MeterState>>,
}

impl Meter {
    pub fn new(caps: ResourceAmounts) -> Self {
        Meter {
            state: Arc::new(Mutex::new(MeterState {
                caps,
                consumed: ResourceAmounts::default(),
                exceeded: None,
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, MeterState> {
        self.state.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Record consumption of `amount` units of `kind`.
    pub fn charge(&self, kind: ResourceKind, amount: Decimal) -> Result<(), CapExceeded> {
        let mut state = self.lock();
        if let Some(exceeded) = &state.exceeded {
            return Err(exceeded.clone());
        }
        let amount = amount.max(Decimal::ZERO);
        let cap = state.caps.amount(kind);
        let attempted = state.consumed.amount(kind).saturating_add(amount);
        if attempted > cap {
            state.consumed.set(kind, cap);
            let err = CapExceeded {
                kind,
                attempted,
                cap,
            };
            state.exceeded = Some(err.clone());
            return Err(err);
        }
        state.consumed.set(kind, attempted);
        Ok(())
    }

    pub fn consumed(&self) -> ResourceAmounts {
        self.lock().consumed.clone()
    }

    pub fn exceeded(&self) -> Option<CapExceeded> {
        self.lock().exceeded.clone()
    }
}

/// A fault reported by an effector.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{code}: {message}")]
pub struct ExecutionFault {
    pub code: String,
    pub message: String,
}

impl ExecutionFault {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        ExecutionFault {
            code: code.into(),
            message: message.into(),
        }
    }
}

impl From<CapExceeded> for ExecutionFault {
    fn from(e: CapExceeded) -> Self {
        ExecutionFault::new(ErrorKind::ResourceInsufficient.code(), e.to_string())
    }
}

/// Performs an action and reports consumption through the meter.
#[async_trait]
pub trait Effector: Send + Sync + 'static {
    async fn execute(&self, request: Request, meter: Meter) -> Result<serde_json::Value, ExecutionFault>;
}

/// An effector whose behavior is fixed up front: charge the listed
/// consumption, optionally wait, then succeed, fail or panic.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScriptedEffector {
    #[serde(default)]
    pub output: serde_json::Value,
    #[serde(default)]
    pub consume: BTreeMap<ResourceKind, Decimal>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fail: Option<String>,
    #[serde(default)]
    pub panic: bool,
    #[serde(default)]
    pub delay_ms: u64,
}

impl ScriptedEffector {
    pub fn succeed(output: serde_json::Value) -> Self {
        ScriptedEffector {
            output,
            ..Default::default()
        }
    }

    pub fn consuming(mut self, kind: ResourceKind, amount: Decimal) -> Self {
        self.consume.insert(kind, amount);
        self
    }

    pub fn failing(mut self, message: &str) -> Self {
        self.fail = Some(message.to_string());
        self
    }

    pub fn panicking(mut self) -> Self {
        self.panic = true;
        self
    }

    pub fn delayed(mut self, ms: u64) -> Self {
        self.delay_ms = ms;
        self
    }
}

#[async_trait]
impl Effector for ScriptedEffector {
    async fn execute(&self, _request: Request, meter: Meter) -> Result<serde_json::Value, ExecutionFault> {
        for (kind, amount) in &self.consume {
            meter.charge(*kind, *amount)?;
        }
        if self.delay_ms > 0 {
            tokio::time::sleep(Duration::from_millis(self.delay_ms)).await;
        }
        if self.panic {
            panic!("scripted effector panicked");
        }
        match &self.fail {
            Some(message) => Err(ExecutionFault::new(ERR_EXECUTION_FAULT, message.clone())),
            None => Ok(self.output.clone()),
        }
    }
}

/// Output wrapper with its content hash.
pub fn output_of(data: serde_json::Value) -> Output {
    let hash = content_hash(&data).unwrap_or_default();
    Output { data, hash }
}

/// Runs actions under their role's capabilities.
pub struct ExecutionMeter {
    effectors: RwLock<HashMap<String, Arc<dyn Effector>>>,
    timeout: Duration,
}

impl ExecutionMeter {
    pub fn new(timeout: Duration) -> Self {
        ExecutionMeter {
            effectors: RwLock::new(HashMap::new()),
            timeout,
        }
    }

    /// Register the effector for an action name (trailing `*` globs allowed).
    pub fn register(&self, action: &str, effector: Arc<dyn Effector>) {
        self.effectors
            .write()
            .unwrap_or_else(|p| p.into_inner())
            .insert(action.to_string(), effector);
    }

    /// Exact registration wins; otherwise the longest matching glob.
    fn effector_for(&self, action: &str) -> Option<Arc<dyn Effector>> {
        let effectors = self.effectors.read().unwrap_or_else(|p| p.into_inner());
        if let Some(e) = effectors.get(action) {
            return Some(e.clone());
        }
        effectors
            .iter()
            .filter(|(pattern, _)| pattern.ends_with('*') && action_matches(pattern, action))
            .max_by(|(a, _), (b, _)| a.len().cmp(&b.len()).then_with(|| b.cmp(a)))
            .map(|(_, e)| e.clone())
    }

    /// Execute a validated action. `capabilities` is the role's declared
    /// capability set; nothing outside it is reachable.
    pub async fn execute(
        &self,
        record: &ActionRecord,
        record_hash: &str,
        capabilities: &BTreeSet<String>,
    ) -> ActionResult {
        let started = Instant::now();
        let meter = Meter::new(record.resource.required.clone());
        let action = record.request.action.as_str();

        let finish = |status: ResultStatus, data: serde_json::Value, error: Option<ResultError>| {
            ActionResult {
                action_ref: record_hash.to_string(),
                status,
                output: output_of(data),
                resource_consumed: meter.consumed(),
                error,
                elapsed_ms: started.elapsed().as_millis() as u64,
                ledger_proof: None,
            }
        };
        let error = |code: &str, message: String| {
            Some(ResultError {
                code: code.to_string(),
                message,
            })
        };

        if !capabilities.iter().any(|c| action_matches(c, action)) {
            return finish(
                ResultStatus::Error,
                serde_json::Value::Null,
                error(
                    ErrorKind::RoleUnauthorized.code(),
                    format!("action '{action}' is outside the role's capabilities"),
                ),
            );
        }
        let Some(effector) = self.effector_for(action) else {
            return finish(
                ResultStatus::Error,
                serde_json::Value::Null,
                error(ERR_NO_EFFECTOR, format!("no effector registered for '{action}'")),
            );
        };

        let task = tokio::spawn({
            let meter = meter.clone();
            let request = record.request.clone();
            async move { effector.execute(request, meter).await }
        });
        let abort = task.abort_handle();

        let outcome = tokio::time::timeout(self.timeout, task).await;
        let result = match outcome {
            Err(_) => {
                abort.abort();
                finish(
                    ResultStatus::Failure,
                    serde_json::Value::Null,
                    error(
                        ERR_EXECUTION_TIMEOUT,
                        format!("execution exceeded {} ms", self.timeout.as_millis()),
                    ),
                )
            }
            Ok(Err(join_err)) => finish(
                ResultStatus::Failure,
                serde_json::Value::Null,
                error(ERR_EXECUTION_PANIC, format!("effector aborted: {join_err}")),
            ),
            Ok(Ok(_)) if meter.exceeded().is_some() => {
                let exceeded = meter.exceeded().map(|e| e.to_string()).unwrap_or_default();
                finish(
                    ResultStatus::Failure,
                    serde_json::Value::Null,
                    error(ErrorKind::ResourceInsufficient.code(), exceeded),
                )
            }
            Ok(Ok(Err(fault))) => finish(
                ResultStatus::Failure,
                serde_json::Value::Null,
                error(&fault.code, fault.message),
            ),
            Ok(Ok(Ok(data))) => finish(ResultStatus::Success, data, None),
        };

        tracing::debug!(
            action,
            status = %result.status,
            elapsed_ms = result.elapsed_ms,
            "execution finished"
        );
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{dec, record};

    fn caps() -> BTreeSet<String> {
        BTreeSet::from(["analyze*".to_string()])
    }

    fn meter_with(effector: ScriptedEffector, timeout_ms: u64) -> ExecutionMeter {
        let meter = ExecutionMeter::new(Duration::from_millis(timeout_ms));
        meter.register("analyze", Arc::new(effector));
        meter
    }

    #[test]
    fn meter_holds_at_cap_once_exceeded() {
        let meter = Meter::new(ResourceAmounts::work(dec("10")));
        meter.charge(ResourceKind::Work, dec("6")).unwrap();
        let err = meter.charge(ResourceKind::Work, dec("6")).unwrap_err();
        assert_eq!(err.attempted, dec("12"));
        assert_eq!(meter.consumed().work, dec("10"));
        assert!(meter.charge(ResourceKind::Work, dec("1")).is_err());
    }

    #[test]
    fn undeclared_kinds_have_zero_cap() {
        let meter = Meter::new(ResourceAmounts::work(dec("10")));
        assert!(meter.charge(ResourceKind::Storage, dec("1")).is_err());
    }

    #[tokio::test]
    async fn success_reports_consumption_and_output_hash() {
        let rec = record("analyze", "100");
        let m = meter_with(
            ScriptedEffector::succeed(serde_json::json!({"summary": "ok"}))
                .consuming(ResourceKind::Work, dec("95")),
            1000,
        );
        let result = m.execute(&rec, "h", &caps()).await;
        assert_eq!(result.status, ResultStatus::Success);
        assert_eq!(result.resource_consumed.work, dec("95"));
        assert_eq!(result.output.hash, content_hash(&serde_json::json!({"summary": "ok"})).unwrap());
        assert!(result.error.is_none());
    }

    #[tokio::test]
    async fn fault_becomes_failure_with_partial_consumption() {
        let rec = record("analyze", "100");
        let m = meter_with(
            ScriptedEffector::default()
                .consuming(ResourceKind::Work, dec("30"))
                .failing("disk full"),
            1000,
        );
        let result = m.execute(&rec, "h", &caps()).await;
        assert_eq!(result.status, ResultStatus::Failure);
        assert_eq!(result.resource_consumed.work, dec("30"));
        assert_eq!(result.error.unwrap().message, "disk full");
    }

    #[tokio::test]
    async fn exceeding_cap_is_a_failure() {
        let rec = record("analyze", "100");
        let m = meter_with(
            ScriptedEffector::succeed(serde_json::json!({})).consuming(ResourceKind::Work, dec("150")),
            1000,
        );
        let result = m.execute(&rec, "h", &caps()).await;
        assert_eq!(result.status, ResultStatus::Failure);
        assert_eq!(result.error.unwrap().code, "ERR_RESOURCE_INSUFFICIENT");
        assert_eq!(result.resource_consumed.work, dec("100"));
    }

    #[tokio::test]
    async fn panic_is_captured() {
        let rec = record("analyze", "100");
        let m = meter_with(
            ScriptedEffector::default()
                .consuming(ResourceKind::Work, dec("5"))
                .panicking(),
            1000,
        );
        let result = m.execute(&rec, "h", &caps()).await;
        assert_eq!(result.status, ResultStatus::Failure);
        assert_eq!(result.error.unwrap().code, ERR_EXECUTION_PANIC);
        assert_eq!(result.resource_consumed.work, dec("5"));
    }

    #[tokio::test]
    async fn timeout_is_captured() {
        let rec = record("analyze", "100");
        let m = meter_with(
            ScriptedEffector::default()
                .consuming(ResourceKind::Work, dec("5"))
                .delayed(5_000),
            20,
        );
        let result = m.execute(&rec, "h", &caps()).await;
        assert_eq!(result.status, ResultStatus::Failure);
        assert_eq!(result.error.unwrap().code, ERR_EXECUTION_TIMEOUT);
        assert_eq!(result.resource_consumed.work, dec("5"));
    }

    #[tokio::test]
    async fn action_outside_capabilities_is_unreachable() {
        let rec = record("delete", "100");
        let m = meter_with(ScriptedEffector::default(), 1000);
        m.register("delete", Arc::new(ScriptedEffector::default()));
        let result = m.execute(&rec, "h", &caps()).await;
        assert_eq!(result.status, ResultStatus::Error);
        assert_eq!(result.error.unwrap().code, "ERR_ROLE_UNAUTHORIZED");
    }

    #[tokio::test]
    async fn glob_registration_matches() {
        let rec = record("analyze_dataset", "100");
        let m = ExecutionMeter::new(Duration::from_millis(1000));
        m.register("analyze*", Arc::new(ScriptedEffector::succeed(serde_json::json!(1))));
        let result = m.execute(&rec, "h", &caps()).await;
        assert_eq!(result.status, ResultStatus::Success);
    }
}
