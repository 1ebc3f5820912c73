//! SOL instance table, console fan-in, and configuration parameters.

use std::collections::HashMap;
use std::time::Duration;

use kiln_types::{Privilege, SessionId};
use kiln_wire::sol::SolPayload;

use crate::{ConsoleBuffer, SolContext, SolServices, SolTimerKind};

/// The UDP port SOL reports in Activate Payload responses; read-only.
pub const SOL_PORT: u16 = 623;

/// Character-accumulate interval setting unit.
pub const ACCUMULATE_INTERVAL_UNIT: Duration = Duration::from_millis(5);

/// Retry interval setting unit.
pub const RETRY_INTERVAL_UNIT: Duration = Duration::from_millis(10);

/// SOL configuration parameters, set and read over the IPMI command
/// channel.
#[derive(Debug, Clone)]
pub struct SolParams {
    /// Set-in-progress nibble (parameter 0).
    pub progress: u8,
    /// Whether SOL payloads may be activated at all.
    pub enable: bool,
    /// Sessions carrying SOL must negotiate encryption.
    pub force_encrypt: bool,
    /// Sessions carrying SOL must negotiate authentication.
    pub force_auth: bool,
    /// Minimum operating privilege for SOL activation.
    pub min_privilege: Privilege,
    /// Character-accumulate interval (multiples of 5 ms on the wire).
    pub accumulate_interval: Duration,
    /// Buffered-byte count that triggers an immediate send.
    pub send_threshold: u8,
    /// Retransmissions before buffered bytes are dropped.
    pub retry_count: u8,
    /// Interval between retransmissions (multiples of 10 ms on the wire).
    pub retry_interval: Duration,
    /// The IPMI channel SOL is bound to.
    pub channel: u8,
}

impl Default for SolParams {
    fn default() -> Self {
        Self {
            progress: 0,
            enable: true,
            force_encrypt: true,
            force_auth: true,
            min_privilege: Privilege::User,
            accumulate_interval: Duration::from_millis(100),
            send_threshold: 1,
            retry_count: 7,
            retry_interval: Duration::from_millis(100),
            channel: 1,
        }
    }
}

/// Owns every active SOL context and the host console buffer they share.
///
/// The current payload capacity is one instance; the table is keyed anyway
/// so capacity is a configuration change, not a redesign.
#[derive(Debug)]
pub struct SolManager {
    pub params: SolParams,
    contexts: HashMap<u8, SolContext>,
    buffer: ConsoleBuffer,
}

impl Default for SolManager {
    fn default() -> Self {
        Self::new(SolParams::default())
    }
}

impl SolManager {
    pub fn new(params: SolParams) -> Self {
        Self {
            params,
            contexts: HashMap::new(),
            buffer: ConsoleBuffer::new(),
        }
    }

    pub fn is_instance_active(&self, instance: u8) -> bool {
        self.contexts.contains_key(&instance)
    }

    /// The session owning an instance, if it is active.
    pub fn instance_session(&self, instance: u8) -> Option<SessionId> {
        self.contexts.get(&instance).map(SolContext::session_id)
    }

    pub fn buffer(&self) -> &ConsoleBuffer {
        &self.buffer
    }

    /// Activates a payload instance bound to `session_id`.
    pub fn start_instance(
        &mut self,
        instance: u8,
        session_id: SessionId,
        svc: &mut dyn SolServices,
    ) {
        let context = SolContext::start(instance, session_id, &self.params, svc);
        self.contexts.insert(instance, context);
        tracing::debug!(instance, session = %session_id, "SOL payload activated");
    }

    /// Deactivates an instance, cancelling its timers. Returns false when
    /// the instance was not active.
    pub fn stop_instance(&mut self, instance: u8, svc: &mut dyn SolServices) -> bool {
        if self.contexts.remove(&instance).is_none() {
            return false;
        }
        svc.cancel_timer(instance, SolTimerKind::Accumulate);
        svc.cancel_timer(instance, SolTimerKind::Retry);
        tracing::debug!(instance, "SOL payload deactivated");
        true
    }

    /// Tears down every instance riding the given session; called from
    /// session teardown.
    pub fn stop_session(&mut self, session_id: SessionId, svc: &mut dyn SolServices) {
        let instances: Vec<u8> = self
            .contexts
            .iter()
            .filter(|(_, ctx)| ctx.session_id() == session_id)
            .map(|(&instance, _)| instance)
            .collect();
        for instance in instances {
            self.stop_instance(instance, svc);
        }
    }

    /// Routes an inbound SOL payload to the context bound to its session.
    /// Payloads for sessions without an active instance are dropped.
    pub fn process_inbound(
        &mut self,
        session_id: SessionId,
        frame: &SolPayload,
        svc: &mut dyn SolServices,
    ) {
        let Some(context) = self
            .contexts
            .values_mut()
            .find(|ctx| ctx.session_id() == session_id)
        else {
            tracing::info!(session = %session_id, "SOL payload without an active instance");
            return;
        };
        context.process_inbound(frame, &mut self.buffer, &self.params, svc);
    }

    /// Feeds host console output into the buffer; instances flush once the
    /// send threshold is reached.
    pub fn console_input(&mut self, data: &[u8], svc: &mut dyn SolServices) {
        self.buffer.write(data);
        if self.buffer.len() < usize::from(self.params.send_threshold) {
            return;
        }
        for context in self.contexts.values_mut() {
            context.send_outbound(&mut self.buffer, &self.params, svc);
        }
    }

    /// Dispatches an accumulate-timer expiry to its instance.
    pub fn handle_accumulate_timer(&mut self, instance: u8, svc: &mut dyn SolServices) {
        if let Some(context) = self.contexts.get_mut(&instance) {
            context.handle_accumulate_timer(&mut self.buffer, &self.params, svc);
        }
    }

    /// Dispatches a retry-timer expiry to its instance.
    pub fn handle_retry_timer(&mut self, instance: u8, svc: &mut dyn SolServices) {
        if let Some(context) = self.contexts.get_mut(&instance) {
            context.handle_retry_timer(&mut self.buffer, &self.params, svc);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::RecordingServices;

    const SESSION: SessionId = SessionId::new(0x4000_0001);

    #[test]
    fn start_and_stop_instance() {
        let mut manager = SolManager::default();
        let mut svc = RecordingServices::default();

        assert!(!manager.is_instance_active(1));
        manager.start_instance(1, SESSION, &mut svc);
        assert!(manager.is_instance_active(1));
        assert_eq!(manager.instance_session(1), Some(SESSION));

        assert!(manager.stop_instance(1, &mut svc));
        assert!(!manager.is_instance_active(1));
        assert!(svc.cancelled.contains(&(1, SolTimerKind::Accumulate)));
        assert!(svc.cancelled.contains(&(1, SolTimerKind::Retry)));

        assert!(!manager.stop_instance(1, &mut svc));
    }

    #[test]
    fn session_teardown_stops_its_instances() {
        let mut manager = SolManager::default();
        let mut svc = RecordingServices::default();
        manager.start_instance(1, SESSION, &mut svc);

        manager.stop_session(SessionId::new(0xDEAD), &mut svc);
        assert!(manager.is_instance_active(1));

        manager.stop_session(SESSION, &mut svc);
        assert!(!manager.is_instance_active(1));
    }

    #[test]
    fn console_input_below_threshold_waits() {
        let params = SolParams {
            send_threshold: 10,
            ..SolParams::default()
        };
        let mut manager = SolManager::new(params);
        let mut svc = RecordingServices::default();
        manager.start_instance(1, SESSION, &mut svc);
        svc.clear();

        manager.console_input(b"abc", &mut svc);
        assert!(svc.sent.is_empty());
        assert_eq!(manager.buffer().len(), 3);

        // Crossing the threshold flushes.
        manager.console_input(b"defghij", &mut svc);
        assert_eq!(svc.sent.len(), 1);
        assert_eq!(
            SolPayload::parse(&svc.sent[0].1).unwrap().data,
            b"abcdefghij"
        );
    }

    #[test]
    fn inbound_for_unknown_session_is_dropped() {
        let mut manager = SolManager::default();
        let mut svc = RecordingServices::default();
        manager.start_instance(1, SESSION, &mut svc);
        svc.clear();

        let frame = SolPayload {
            seq: 1,
            ack_seq: 0,
            accepted_count: 0,
            operation: 0,
            data: b"x".to_vec(),
        };
        manager.process_inbound(SessionId::new(0xDEAD), &frame, &mut svc);
        assert!(svc.sent.is_empty());
        assert!(svc.console.is_empty());
    }

    #[test]
    fn timer_dispatch_reaches_context() {
        let mut manager = SolManager::default();
        let mut svc = RecordingServices::default();
        manager.start_instance(1, SESSION, &mut svc);
        svc.clear();

        manager.console_input(b"hello", &mut svc);
        assert_eq!(svc.sent.len(), 1);

        // Retry timer resends the cached payload.
        let original = svc.sent[0].1.clone();
        svc.clear();
        manager.handle_retry_timer(1, &mut svc);
        assert_eq!(svc.sent[0].1, original);

        // Timer for an unknown instance is a no-op.
        svc.clear();
        manager.handle_accumulate_timer(9, &mut svc);
        assert!(svc.sent.is_empty());
    }
}
