//! Packet handler registry
//!
//! Maps opcodes to handler descriptors: how a packet is framed, what it
//! requires of the session, and which callback receives it. The registry is
//! built once at startup and shared immutably; dispatch never observes a
//! concurrent mutation.

use std::fmt;
use std::sync::Arc;

use tracing::warn;

use crate::error::Result;
use crate::net::session::Session;
use crate::protocol::reader::PacketReader;

/// Receive callback invoked with a read view over the dispatched packet
pub type ReceiveFn =
    Box<dyn for<'a> Fn(&Arc<Session>, &mut PacketReader<'a>) -> Result<()> + Send + Sync>;

/// Admission predicate; returning `false` defers the whole session one cycle
pub type ThrottleFn = Box<dyn Fn(&Session) -> bool + Send + Sync>;

/// How a packet's total length is determined
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketLength {
    /// Fixed byte count, opcode included
    Fixed(u16),
    /// 2-byte big-endian length prefix following the opcode, counting the
    /// opcode and the prefix itself
    Variable,
}

/// Static configuration for one opcode
pub struct HandlerDescriptor {
    /// Handler name for logging
    pub name: &'static str,
    /// Framing rule
    pub length: PacketLength,
    /// Whether dispatch requires a live attached actor
    pub requires_actor: bool,
    /// Optional admission predicate
    pub throttle: Option<ThrottleFn>,
    /// The receive callback
    receive: ReceiveFn,
}

impl HandlerDescriptor {
    /// Describe a fixed-length packet (`length` counts the opcode byte)
    pub fn fixed(name: &'static str, length: u16, receive: ReceiveFn) -> Self {
        debug_assert!(length >= 1, "fixed length counts the opcode byte");
        Self {
            name,
            length: PacketLength::Fixed(length),
            requires_actor: false,
            throttle: None,
            receive,
        }
    }

    /// Describe a length-prefixed packet
    pub fn variable(name: &'static str, receive: ReceiveFn) -> Self {
        Self {
            name,
            length: PacketLength::Variable,
            requires_actor: false,
            throttle: None,
            receive,
        }
    }

    /// Require a live attached actor before dispatch
    pub fn requires_actor(mut self) -> Self {
        self.requires_actor = true;
        self
    }

    /// Attach an admission predicate
    pub fn with_throttle(mut self, throttle: ThrottleFn) -> Self {
        self.throttle = Some(throttle);
        self
    }

    /// Invoke the receive callback
    pub fn receive(&self, session: &Arc<Session>, reader: &mut PacketReader<'_>) -> Result<()> {
        (self.receive)(session, reader)
    }
}

impl fmt::Debug for HandlerDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerDescriptor")
            .field("name", &self.name)
            .field("length", &self.length)
            .field("requires_actor", &self.requires_actor)
            .field("throttled", &self.throttle.is_some())
            .finish()
    }
}

/// Immutable opcode → descriptor table
pub struct HandlerRegistry {
    handlers: [Option<HandlerDescriptor>; 256],
}

impl HandlerRegistry {
    /// Start building a registry
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder {
            handlers: std::array::from_fn(|_| None),
        }
    }

    /// Look up the descriptor for an opcode
    pub fn get(&self, opcode: u8) -> Option<&HandlerDescriptor> {
        self.handlers[opcode as usize].as_ref()
    }

    /// Number of registered opcodes
    pub fn len(&self) -> usize {
        self.handlers.iter().filter(|h| h.is_some()).count()
    }

    /// Whether no opcodes are registered
    pub fn is_empty(&self) -> bool {
        self.handlers.iter().all(|h| h.is_none())
    }
}

impl fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("registered", &self.len())
            .finish()
    }
}

/// Startup-time registry builder
pub struct RegistryBuilder {
    handlers: [Option<HandlerDescriptor>; 256],
}

impl RegistryBuilder {
    /// Register a descriptor for an opcode. Re-registering replaces the
    /// previous entry (last wins), with a warning.
    pub fn register(mut self, opcode: u8, descriptor: HandlerDescriptor) -> Self {
        if let Some(previous) = &self.handlers[opcode as usize] {
            warn!(
                opcode = %format!("0x{:02X}", opcode),
                previous = previous.name,
                replacement = descriptor.name,
                "Replacing registered packet handler"
            );
        }
        self.handlers[opcode as usize] = Some(descriptor);
        self
    }

    /// Finalize the registry
    pub fn build(self) -> HandlerRegistry {
        HandlerRegistry {
            handlers: self.handlers,
        }
    }
}
