//! Test helpers: scripted transports, a recording transport factory and
//! CI-aware timeouts.

use conduit_transport::{
    Transport, TransportError, TransportFactory, TransportFlags, TransportResult, TransportSpec,
};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

/// Check if running in a CI environment
///
/// Checks common CI environment variables.
pub fn is_ci_environment() -> bool {
    std::env::var("CI").is_ok()
        || std::env::var("GITHUB_ACTIONS").is_ok()
        || std::env::var("GITLAB_CI").is_ok()
}

/// Get CI-adjusted timeout duration
///
/// Loopback exchanges are quick, but shared CI runners can stall a thread
/// for a while.
pub fn ci_timeout(base_timeout: Duration) -> Duration {
    if is_ci_environment() {
        base_timeout.mul_f32(3.0)
    } else {
        base_timeout
    }
}

/// What a [`ScriptedTransport`] has been asked to do, and what it will
/// answer next
#[derive(Debug, Default)]
pub struct Script {
    /// Data handed out by reads, one chunk per read (cut to fit)
    pub chunks: VecDeque<Vec<u8>>,
    /// Per-write acceptance limits, consumed in order
    pub write_limits: VecDeque<usize>,
    /// Size and flags of every read
    pub reads: Vec<(usize, TransportFlags)>,
    /// Every buffer passed to write
    pub writes: Vec<Vec<u8>>,
    /// Every connect target
    pub connects: Vec<(String, u16, Duration)>,
    /// Number of disconnects
    pub disconnects: usize,
}

/// In-memory transport driven by a [`Script`]. Clones share the script.
///
/// A blocking read with nothing left reports the peer as gone; a
/// non-blocking one returns 0.
#[derive(Debug, Default, Clone)]
pub struct ScriptedTransport {
    state: Arc<Mutex<Script>>,
}

impl ScriptedTransport {
    /// Transport whose reads return `chunks` in order
    pub fn with_chunks<I, C>(chunks: I) -> Self
    where
        I: IntoIterator<Item = C>,
        C: Into<Vec<u8>>,
    {
        let transport = Self::default();
        transport.script().chunks = chunks.into_iter().map(Into::into).collect();
        transport
    }

    /// Lock the script
    pub fn script(&self) -> MutexGuard<'_, Script> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Number of reads issued so far
    pub fn read_calls(&self) -> usize {
        self.script().reads.len()
    }

    /// Everything written, concatenated
    pub fn written(&self) -> Vec<u8> {
        self.script().writes.concat()
    }
}

impl Transport for ScriptedTransport {
    fn connect(&mut self, host: &str, port: u16, timeout: Duration) -> TransportResult<()> {
        self.script().connects.push((host.to_string(), port, timeout));
        Ok(())
    }

    fn disconnect(&mut self, _full: bool) {
        self.script().disconnects += 1;
    }

    fn read(&mut self, buf: &mut [u8], flags: TransportFlags) -> TransportResult<usize> {
        let mut script = self.script();
        script.reads.push((buf.len(), flags));
        let Some(mut chunk) = script.chunks.pop_front() else {
            return if flags.is_nonblocking() {
                Ok(0)
            } else {
                Err(TransportError::Closed)
            };
        };
        let n = chunk.len().min(buf.len());
        buf[..n].copy_from_slice(&chunk[..n]);
        if n < chunk.len() {
            script.chunks.push_front(chunk.split_off(n));
        }
        Ok(n)
    }

    fn write(&mut self, buf: &[u8], _flags: TransportFlags) -> TransportResult<usize> {
        let mut script = self.script();
        let n = script
            .write_limits
            .pop_front()
            .unwrap_or(buf.len())
            .min(buf.len());
        script.writes.push(buf.to_vec());
        Ok(n)
    }

    fn is_ok(&self) -> bool {
        true
    }

    fn check(&mut self) -> TransportResult<()> {
        Ok(())
    }

    fn set_timeout(&mut self, _timeout: Duration) {}
}

/// Factory whose transports all share one script, recording each request
#[derive(Debug, Default, Clone)]
pub struct RecordingFactory {
    transport: ScriptedTransport,
    specs: Arc<Mutex<Vec<TransportSpec>>>,
}

impl RecordingFactory {
    /// Factory with an empty script
    pub fn new() -> Self {
        Self::default()
    }

    /// Handle on the shared transport
    pub fn transport(&self) -> &ScriptedTransport {
        &self.transport
    }

    /// Every connect target, in order
    pub fn connects(&self) -> Vec<(String, u16, Duration)> {
        self.transport.script().connects.clone()
    }

    /// Every transport requested, in order
    pub fn specs(&self) -> Vec<TransportSpec> {
        self.specs.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

impl TransportFactory for RecordingFactory {
    fn create(&self, spec: &TransportSpec) -> Box<dyn Transport> {
        self.specs
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(*spec);
        Box::new(self.transport.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ci_timeout_never_shrinks() {
        let base = Duration::from_secs(2);
        assert!(ci_timeout(base) >= base);
    }

    #[test]
    fn test_scripted_transport_cuts_chunks() {
        let mut transport = ScriptedTransport::with_chunks([b"abcdef".to_vec()]);
        let mut buf = [0u8; 4];
        assert_eq!(transport.read(&mut buf, TransportFlags::BLOCKING).unwrap(), 4);
        assert_eq!(transport.read(&mut buf, TransportFlags::BLOCKING).unwrap(), 2);
        assert_eq!(
            transport.read(&mut buf, TransportFlags::NONBLOCKING).unwrap(),
            0
        );
        assert!(matches!(
            transport.read(&mut buf, TransportFlags::BLOCKING),
            Err(TransportError::Closed)
        ));
        assert_eq!(transport.read_calls(), 4);
    }
}
