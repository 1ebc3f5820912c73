//! The IPMI command table.
//!
//! Inbound IPMI payloads resolve to a 24-bit key (payload type ‖ netfn ‖
//! command). Keys the daemon implements itself map to a [`BuiltinCommand`]
//! with a privilege floor and a sessionless flag; everything else is
//! handed to the external [`CommandDispatcher`] with a [`Continuation`]
//! that frames and sends the reply whenever the dispatcher completes -
//! immediately or long after the dispatch call returned.

use std::cell::RefCell;
use std::collections::{HashMap, VecDeque};
use std::rc::Rc;

use kiln_types::{CompletionCode, PayloadType, Privilege, SessionId};
use kiln_wire::ipmi::{IpmiRequest, command_key};

/// Netfn bytes as they appear in the LAN header (netfn << 2).
const NETFN_APP: u8 = 0x06 << 2;
const NETFN_TRANSPORT: u8 = 0x0C << 2;

/// Commands the daemon executes itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuiltinCommand {
    GetChannelAuthCapabilities,
    SetSessionPrivilege,
    CloseSession,
    ActivatePayload,
    DeactivatePayload,
    GetPayloadStatus,
    GetPayloadInfo,
    SetSolConfiguration,
    GetSolConfiguration,
}

/// One registered command.
#[derive(Debug, Clone, Copy)]
pub struct CommandEntry {
    pub command: BuiltinCommand,
    /// Privilege floor checked against the session's current privilege.
    pub privilege: Privilege,
    /// Whether the command may execute on session id 0.
    pub sessionless: bool,
}

/// Key → entry table for the built-in command set.
#[derive(Debug, Default)]
pub struct CommandTable {
    entries: HashMap<u32, CommandEntry>,
}

impl CommandTable {
    /// The session-setup and payload command set this daemon serves.
    pub fn with_builtin_commands() -> Self {
        let mut table = Self::default();
        let mut register = |netfn: u8, cmd: u8, command, privilege, sessionless| {
            table.entries.insert(
                command_key(PayloadType::Ipmi, netfn, cmd),
                CommandEntry {
                    command,
                    privilege,
                    sessionless,
                },
            );
        };

        register(
            NETFN_APP,
            0x38,
            BuiltinCommand::GetChannelAuthCapabilities,
            Privilege::HighestMatching,
            true,
        );
        register(
            NETFN_APP,
            0x3B,
            BuiltinCommand::SetSessionPrivilege,
            Privilege::User,
            false,
        );
        register(
            NETFN_APP,
            0x3C,
            BuiltinCommand::CloseSession,
            Privilege::Callback,
            false,
        );
        register(
            NETFN_APP,
            0x48,
            BuiltinCommand::ActivatePayload,
            Privilege::User,
            false,
        );
        register(
            NETFN_APP,
            0x49,
            BuiltinCommand::DeactivatePayload,
            Privilege::User,
            false,
        );
        register(
            NETFN_APP,
            0x4A,
            BuiltinCommand::GetPayloadStatus,
            Privilege::User,
            false,
        );
        register(
            NETFN_APP,
            0x4B,
            BuiltinCommand::GetPayloadInfo,
            Privilege::User,
            false,
        );
        register(
            NETFN_TRANSPORT,
            0x21,
            BuiltinCommand::SetSolConfiguration,
            Privilege::Admin,
            false,
        );
        register(
            NETFN_TRANSPORT,
            0x22,
            BuiltinCommand::GetSolConfiguration,
            Privilege::User,
            false,
        );

        table
    }

    pub fn lookup(&self, key: u32) -> Option<CommandEntry> {
        self.entries.get(&key).copied()
    }
}

/// Addressing needed to frame a reply once a deferred command completes.
#[derive(Debug, Clone)]
pub struct ReplyTicket {
    pub session_id: SessionId,
    pub request: IpmiRequest,
    pub encrypted: bool,
    pub authenticated: bool,
}

/// Replies completed by the dispatcher, drained by the event loop.
pub type ReplyQueue = Rc<RefCell<VecDeque<(ReplyTicket, Vec<u8>)>>>;

/// Hands a deferred command's response back to the event loop.
///
/// The dispatcher owns the continuation until the command finishes; the
/// reply is framed and sent when the loop drains its queue. Dropping the
/// continuation without completing it answers the host with an error so a
/// lost command never strands the requester.
pub struct Continuation {
    ticket: Option<ReplyTicket>,
    queue: ReplyQueue,
}

impl Continuation {
    pub fn new(ticket: ReplyTicket, queue: ReplyQueue) -> Self {
        Self {
            ticket: Some(ticket),
            queue,
        }
    }

    /// Completes the command. `response` starts with the completion code.
    pub fn complete(mut self, response: Vec<u8>) {
        if let Some(ticket) = self.ticket.take() {
            self.queue.borrow_mut().push_back((ticket, response));
        }
    }
}

impl Drop for Continuation {
    fn drop(&mut self) {
        if let Some(ticket) = self.ticket.take() {
            tracing::warn!(
                session = %ticket.session_id,
                cmd = ticket.request.cmd,
                "dispatcher dropped a command; answering with unspecified error"
            );
            self.queue
                .borrow_mut()
                .push_back((ticket, vec![CompletionCode::UNSPECIFIED_ERROR.as_u8()]));
        }
    }
}

/// The boundary to the outer IPMI pipeline for commands this daemon does
/// not own.
pub trait CommandDispatcher {
    fn execute(&mut self, key: u32, data: Vec<u8>, done: Continuation);
}

/// Dispatcher for standalone operation: every command is unknown.
#[derive(Debug, Default)]
pub struct NullDispatcher;

impl CommandDispatcher for NullDispatcher {
    fn execute(&mut self, key: u32, _data: Vec<u8>, done: Continuation) {
        tracing::debug!(key = %format_args!("{key:#08x}"), "unknown command");
        done.complete(vec![CompletionCode::INVALID_COMMAND.as_u8()]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ticket() -> ReplyTicket {
        ReplyTicket {
            session_id: SessionId::new(7),
            request: IpmiRequest {
                rs_addr: 0x20,
                netfn_lun: NETFN_APP,
                rq_addr: 0x81,
                rq_seq: 0,
                cmd: 0x3B,
                data: Vec::new(),
            },
            encrypted: false,
            authenticated: false,
        }
    }

    #[test]
    fn builtin_keys_resolve() {
        let table = CommandTable::with_builtin_commands();

        let entry = table
            .lookup(command_key(PayloadType::Ipmi, NETFN_APP, 0x38))
            .unwrap();
        assert_eq!(entry.command, BuiltinCommand::GetChannelAuthCapabilities);
        assert!(entry.sessionless);

        let entry = table
            .lookup(command_key(PayloadType::Ipmi, NETFN_APP, 0x3C))
            .unwrap();
        assert_eq!(entry.command, BuiltinCommand::CloseSession);
        assert!(!entry.sessionless);

        let entry = table
            .lookup(command_key(PayloadType::Ipmi, NETFN_TRANSPORT, 0x21))
            .unwrap();
        assert_eq!(entry.privilege, Privilege::Admin);

        assert!(table.lookup(command_key(PayloadType::Ipmi, NETFN_APP, 0x01)).is_none());
    }

    #[test]
    fn continuation_completes_into_queue() {
        let queue: ReplyQueue = ReplyQueue::default();
        let continuation = Continuation::new(ticket(), Rc::clone(&queue));
        continuation.complete(vec![0x00, 0x04]);

        let (reply_ticket, response) = queue.borrow_mut().pop_front().unwrap();
        assert_eq!(reply_ticket.session_id, SessionId::new(7));
        assert_eq!(response, vec![0x00, 0x04]);
        assert!(queue.borrow().is_empty());
    }

    #[test]
    fn dropped_continuation_answers_with_error() {
        let queue: ReplyQueue = ReplyQueue::default();
        drop(Continuation::new(ticket(), Rc::clone(&queue)));

        let (_, response) = queue.borrow_mut().pop_front().unwrap();
        assert_eq!(response, vec![CompletionCode::UNSPECIFIED_ERROR.as_u8()]);
    }

    #[test]
    fn null_dispatcher_reports_invalid_command() {
        let queue: ReplyQueue = ReplyQueue::default();
        let continuation = Continuation::new(ticket(), Rc::clone(&queue));
        NullDispatcher.execute(0x1234, Vec::new(), continuation);

        let (_, response) = queue.borrow_mut().pop_front().unwrap();
        assert_eq!(response, vec![CompletionCode::INVALID_COMMAND.as_u8()]);
    }
}
