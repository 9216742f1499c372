//! Failure injection for mock instruments.
//!
//! A [`FaultPlan`] holds a list of [`Fault`]s. Instruments call
//! [`FaultPlan::check`] at the start of every operation; the plan counts calls
//! per operation and returns an error when a fault matches.

use anyhow::{bail, Result};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

/// A single injected failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fault {
    /// Fail the N-th call (1-based) of an operation. Other calls succeed.
    OnCall {
        /// Operation name (e.g. "measure").
        operation: &'static str,
        /// 1-based call number.
        call: u32,
    },
    /// Fail every call of an operation.
    Always {
        /// Operation name.
        operation: &'static str,
    },
}

/// Failure injection state, shared between clones.
#[derive(Debug, Clone, Default)]
pub struct FaultPlan {
    faults: Arc<Vec<Fault>>,
    calls: Arc<Mutex<HashMap<&'static str, u32>>>,
}

impl FaultPlan {
    /// No failures.
    pub fn none() -> Self {
        Self::default()
    }

    /// Plan with the given faults.
    pub fn with_faults(faults: Vec<Fault>) -> Self {
        Self {
            faults: Arc::new(faults),
            calls: Arc::default(),
        }
    }

    /// Return a new plan with one more fault. Call counters start over.
    pub fn add(&self, fault: Fault) -> Self {
        let mut faults = self.faults.as_ref().clone();
        faults.push(fault);
        Self::with_faults(faults)
    }

    /// Count one call of `operation` and fail it if a fault matches.
    pub fn check(&self, instrument: &str, operation: &'static str) -> Result<()> {
        let call = {
            let mut calls = self.calls.lock();
            let count = calls.entry(operation).or_insert(0);
            *count += 1;
            *count
        };

        for fault in self.faults.iter() {
            match fault {
                Fault::OnCall { operation: op, call: n } if *op == operation && *n == call => {
                    bail!("{instrument}: injected failure on {operation} call {call}");
                }
                Fault::Always { operation: op } if *op == operation => {
                    bail!("{instrument}: injected failure on {operation}");
                }
                _ => {}
            }
        }
        Ok(())
    }

    /// Number of calls of `operation` seen so far, failed ones included.
    pub fn calls(&self, operation: &str) -> u32 {
        self.calls.lock().get(operation).copied().unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_faults() {
        let plan = FaultPlan::none();
        for _ in 0..5 {
            plan.check("dmm", "measure").unwrap();
        }
        assert_eq!(plan.calls("measure"), 5);
    }

    #[test]
    fn test_fail_on_call() {
        let plan = FaultPlan::with_faults(vec![Fault::OnCall {
            operation: "measure",
            call: 2,
        }]);
        assert!(plan.check("dmm", "measure").is_ok());
        let err = plan.check("dmm", "measure").unwrap_err();
        assert!(err.to_string().contains("call 2"));
        assert!(plan.check("dmm", "measure").is_ok());
        // other operations are counted separately
        assert!(plan.check("dmm", "connect").is_ok());
        assert!(plan.check("dmm", "connect").is_ok());
    }

    #[test]
    fn test_always() {
        let plan = FaultPlan::none().add(Fault::Always {
            operation: "shutdown",
        });
        assert!(plan.check("x", "shutdown").is_err());
        assert!(plan.check("x", "shutdown").is_err());
        assert_eq!(plan.calls("shutdown"), 2);
    }
}
