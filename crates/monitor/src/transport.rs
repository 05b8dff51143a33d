//! Field bus transport.
//!
//! One [`Transport`] instance is owned by the acquisition cycle and takes
//! `&mut self`, so at most one transaction is ever in flight on the bus.
//! Serial framing lives behind this trait; the monitor ships with a
//! [`SimulatedTransport`] for bench runs and a [`ScriptedTransport`] for
//! tests.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TransportError {
    /// The slave did not answer in time.
    #[error("no response within {0:?}")]
    Timeout(Duration),

    /// The slave answered with something unusable (exception code, CRC
    /// mismatch, non-numeric value).
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The port itself failed.
    #[error("I/O error: {0}")]
    Io(String),
}

/// Reads one raw register value from one slave.
#[async_trait]
pub trait Transport: Send {
    async fn read(&mut self, address: u8, register: u16) -> Result<f64, TransportError>;
}

// ---------------------------------------------------------------------------
// SimulatedTransport
// ---------------------------------------------------------------------------

/// Deterministic stand-in for a real bus.
///
/// Every address follows its own slow wave between roughly 2 and 38 ppm,
/// so a factory configuration sees occasional warnings and no alarms.
#[derive(Debug, Default)]
pub struct SimulatedTransport {
    reads: HashMap<u8, u64>,
}

impl SimulatedTransport {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Transport for SimulatedTransport {
    async fn read(&mut self, address: u8, _register: u16) -> Result<f64, TransportError> {
        let n = self.reads.entry(address).or_insert(0);
        *n += 1;
        let phase = *n as f64 * 0.05 + f64::from(address);
        Ok(20.0 + 18.0 * phase.sin())
    }
}

// ---------------------------------------------------------------------------
// ScriptedTransport
// ---------------------------------------------------------------------------

/// One scripted answer.
#[derive(Debug, Clone, PartialEq)]
pub enum ScriptStep {
    Value(f64),
    Fail(TransportError),
    /// Answer with the value after a delay.
    Slow(Duration, f64),
    /// Never answer; the caller's timeout must fire.
    Hang,
}

#[derive(Debug, Default)]
struct Script {
    steps: HashMap<u8, VecDeque<ScriptStep>>,
    fallback: HashMap<u8, ScriptStep>,
    calls: Vec<u8>,
}

/// Transport driven by a per-address script.
///
/// Clones share the same script, so a test can keep one clone to feed
/// steps and inspect the call log while the monitor owns the other.
/// Addresses with an exhausted script repeat their fallback step, or fail
/// with a protocol error if none was set.
#[derive(Debug, Clone, Default)]
pub struct ScriptedTransport {
    script: Arc<Mutex<Script>>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue steps for `address`.
    pub fn push(&self, address: u8, steps: impl IntoIterator<Item = ScriptStep>) {
        let mut script = self.lock();
        script.steps.entry(address).or_default().extend(steps);
    }

    /// Step returned once the queue for `address` is empty.
    pub fn set_fallback(&self, address: u8, step: ScriptStep) {
        self.lock().fallback.insert(address, step);
    }

    /// Addresses read so far, in order.
    pub fn calls(&self) -> Vec<u8> {
        self.lock().calls.clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Script> {
        // A panic while holding the lock can only come from a test thread.
        self.script.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn next_step(&self, address: u8) -> ScriptStep {
        let mut script = self.lock();
        script.calls.push(address);
        if let Some(step) = script.steps.get_mut(&address).and_then(VecDeque::pop_front) {
            return step;
        }
        script.fallback.get(&address).cloned().unwrap_or_else(|| {
            ScriptStep::Fail(TransportError::Protocol(format!(
                "no scripted answer for address {address}"
            )))
        })
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn read(&mut self, address: u8, _register: u16) -> Result<f64, TransportError> {
        match self.next_step(address) {
            ScriptStep::Value(v) => Ok(v),
            ScriptStep::Fail(e) => Err(e),
            ScriptStep::Slow(delay, v) => {
                tokio::time::sleep(delay).await;
                Ok(v)
            }
            ScriptStep::Hang => std::future::pending().await,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn simulated_values_stay_in_band() {
        let mut transport = SimulatedTransport::new();
        for _ in 0..200 {
            for address in 1..=10 {
                let v = transport.read(address, 0).await.unwrap();
                assert!((2.0..=38.0).contains(&v), "value {v}");
            }
        }
    }

    #[tokio::test]
    async fn scripted_steps_then_fallback() {
        let mut transport = ScriptedTransport::new();
        transport.push(
            5,
            [
                ScriptStep::Value(12.5),
                ScriptStep::Fail(TransportError::Protocol("CRC".into())),
            ],
        );
        transport.set_fallback(5, ScriptStep::Value(1.0));

        assert_eq!(transport.read(5, 0).await, Ok(12.5));
        assert!(transport.read(5, 0).await.is_err());
        assert_eq!(transport.read(5, 0).await, Ok(1.0));
        assert!(transport.read(6, 0).await.is_err());
        assert_eq!(transport.calls(), vec![5, 5, 5, 6]);
    }

    #[tokio::test]
    async fn hang_never_resolves() {
        let mut transport = ScriptedTransport::new();
        transport.push(1, [ScriptStep::Hang]);
        let result =
            tokio::time::timeout(Duration::from_millis(20), transport.read(1, 0)).await;
        assert!(result.is_err());
    }
}
