//! Per-payload-instance SOL state.
//!
//! A context tracks two independent 4-bit sequence spaces (inbound and
//! outbound, wrapping 15 → 1), the last payload sent (kept for retry until
//! acknowledged), and the retry counter. Multiple outstanding packets are
//! not supported: one payload is in flight at a time, and a retried packet
//! reuses its original sequence number.

use kiln_types::{SessionId, SolSeqNumbers};
use kiln_wire::sol::{MAX_SOL_PAYLOAD, SolPayload};

use crate::{ConsoleBuffer, SolParams, SolServices, SolTimerKind};

/// State for one active SOL payload instance.
#[derive(Debug)]
pub struct SolContext {
    instance: u8,
    session_id: SessionId,
    seq: SolSeqNumbers,
    /// Character count the next ack must carry; set when a payload ships.
    expected_char_count: usize,
    /// Encoded copy of the in-flight payload, kept for retransmission.
    payload_cache: Vec<u8>,
    max_retry_count: u8,
    retry_counter: u8,
}

impl SolContext {
    /// Builds the context and starts the character-accumulate timer.
    pub fn start(
        instance: u8,
        session_id: SessionId,
        params: &SolParams,
        svc: &mut dyn SolServices,
    ) -> Self {
        svc.arm_timer(instance, SolTimerKind::Accumulate, params.accumulate_interval);
        Self {
            instance,
            session_id,
            seq: SolSeqNumbers::default(),
            expected_char_count: 0,
            payload_cache: Vec::new(),
            max_retry_count: params.retry_count,
            retry_counter: params.retry_count,
        }
    }

    pub fn instance(&self) -> u8 {
        self.instance
    }

    pub fn session_id(&self) -> SessionId {
        self.session_id
    }

    /// Processes one inbound SOL payload and generates whatever response or
    /// retransmission it calls for.
    pub fn process_inbound(
        &mut self,
        frame: &SolPayload,
        buffer: &mut ConsoleBuffer,
        params: &SolParams,
        svc: &mut dyn SolServices,
    ) {
        // Sequence 0 is ack-only; a data packet must carry the expected
        // inbound number or it is dropped (retries reuse the original).
        if frame.seq != 0 && frame.seq != self.seq.expected_inbound() {
            tracing::info!(
                instance = self.instance,
                seq = frame.seq,
                "out of sequence SOL packet dropped"
            );
            return;
        }

        // Same for the ack space: a non-zero ack must name the last
        // payload we transmitted.
        if frame.ack_seq != 0 && frame.ack_seq != self.seq.last_outbound() {
            tracing::info!(
                instance = self.instance,
                ack = frame.ack_seq,
                "out of sequence SOL ack dropped"
            );
            return;
        }

        // NACK, or an ack whose accepted count disagrees with what we
        // sent: retransmit and restart the retry clock.
        if frame.is_nack()
            || (frame.ack_seq != 0 && usize::from(frame.accepted_count) != self.expected_char_count)
        {
            self.resend(svc);
            svc.cancel_timer(self.instance, SolTimerKind::Retry);
            svc.arm_timer(self.instance, SolTimerKind::Retry, params.retry_interval);
            return;
        }

        // A clean ack: the remote console took those bytes, drop them.
        if frame.ack_seq != 0 && usize::from(frame.accepted_count) == self.expected_char_count {
            buffer.erase(usize::from(frame.accepted_count));
            svc.cancel_timer(self.instance, SolTimerKind::Retry);
            self.retry_counter = self.max_retry_count;
            self.expected_char_count = 0;
            self.payload_cache.clear();
        }

        let mut resp_ack_seq = 0;
        let mut accepted = 0;
        let mut nack = false;

        if !frame.data.is_empty() && frame.seq != 0 {
            match svc.write_console(&frame.data) {
                Ok(()) => {
                    resp_ack_seq = frame.seq;
                    accepted = frame.data.len() as u8;
                }
                Err(err) => {
                    tracing::error!(error = %err, "writing to host console failed");
                    nack = true;
                }
            }
        } else if frame.data.is_empty() && frame.seq != 0 {
            // A data-less packet with a sequence number keeps the SOL
            // session alive; it still gets acknowledged.
            resp_ack_seq = frame.seq;
        }

        if frame.seq != 0 {
            self.seq.advance_inbound();
            self.prepare_response(resp_ack_seq, accepted, nack, buffer, params, svc);
        } else {
            svc.arm_timer(self.instance, SolTimerKind::Accumulate, params.accumulate_interval);
        }
    }

    /// Responds to an accepted inbound packet: ack-only when nothing can be
    /// piggybacked, otherwise the next data payload with ack fields set.
    fn prepare_response(
        &mut self,
        ack_seq: u8,
        accepted: u8,
        nack: bool,
        buffer: &mut ConsoleBuffer,
        params: &SolParams,
        svc: &mut dyn SolServices,
    ) {
        if !self.payload_cache.is_empty() || buffer.len() < usize::from(params.send_threshold) {
            svc.arm_timer(self.instance, SolTimerKind::Accumulate, params.accumulate_interval);

            let mut response = SolPayload {
                seq: 0,
                ack_seq,
                accepted_count: accepted,
                operation: 0,
                data: Vec::new(),
            };
            response.set_nack(nack);
            svc.send_payload(self.session_id, &response.to_bytes());
            return;
        }

        let data = buffer.read(MAX_SOL_PAYLOAD);
        let mut response = SolPayload {
            seq: self.seq.next_outbound(),
            ack_seq,
            accepted_count: accepted,
            operation: 0,
            data,
        };
        response.set_nack(nack);

        self.expected_char_count = response.data.len();
        self.payload_cache = response.to_bytes();

        svc.arm_timer(self.instance, SolTimerKind::Retry, params.retry_interval);
        svc.cancel_timer(self.instance, SolTimerKind::Accumulate);
        svc.send_payload(self.session_id, &self.payload_cache);
    }

    /// Ships buffered console bytes as a fresh outbound payload. Returns
    /// false (and rearms the accumulate timer) while a payload is still in
    /// flight.
    pub fn send_outbound(
        &mut self,
        buffer: &mut ConsoleBuffer,
        params: &SolParams,
        svc: &mut dyn SolServices,
    ) -> bool {
        if !self.payload_cache.is_empty() {
            svc.arm_timer(self.instance, SolTimerKind::Accumulate, params.accumulate_interval);
            return false;
        }

        let data = buffer.read(MAX_SOL_PAYLOAD);
        let payload = SolPayload {
            seq: self.seq.next_outbound(),
            ack_seq: 0,
            accepted_count: 0,
            operation: 0,
            data,
        };

        self.expected_char_count = payload.data.len();
        self.payload_cache = payload.to_bytes();

        svc.arm_timer(self.instance, SolTimerKind::Retry, params.retry_interval);
        svc.cancel_timer(self.instance, SolTimerKind::Accumulate);
        svc.send_payload(self.session_id, &self.payload_cache);
        true
    }

    fn resend(&mut self, svc: &mut dyn SolServices) {
        svc.send_payload(self.session_id, &self.payload_cache);
    }

    /// Accumulate-timer expiry: flush buffered bytes if any, else keep
    /// accumulating.
    pub fn handle_accumulate_timer(
        &mut self,
        buffer: &mut ConsoleBuffer,
        params: &SolParams,
        svc: &mut dyn SolServices,
    ) {
        if !buffer.is_empty() && self.send_outbound(buffer, params, svc) {
            return;
        }
        svc.arm_timer(self.instance, SolTimerKind::Accumulate, params.accumulate_interval);
    }

    /// Retry-timer expiry: retransmit while retries remain; on exhaustion
    /// send once more, drop the unacknowledged bytes, and fall back to
    /// accumulating.
    pub fn handle_retry_timer(
        &mut self,
        buffer: &mut ConsoleBuffer,
        params: &SolParams,
        svc: &mut dyn SolServices,
    ) {
        if self.retry_counter > 0 {
            self.retry_counter -= 1;
            svc.arm_timer(self.instance, SolTimerKind::Retry, params.retry_interval);
            self.resend(svc);
        } else {
            self.retry_counter = self.max_retry_count;
            self.resend(svc);
            buffer.erase(self.expected_char_count);
            self.payload_cache.clear();
            self.expected_char_count = 0;
            svc.cancel_timer(self.instance, SolTimerKind::Retry);
            svc.arm_timer(self.instance, SolTimerKind::Accumulate, params.accumulate_interval);
        }
    }
}
