//! # Summary
//!
//! Client-facing message schema for the register services. Requests flow
//! from a client into its session's inbound channel; replies flow back
//! through the outbound channel handle the client registered on connect.

/// A register-service request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Request {
    /// Write `value` to `register`.
    Write { register: String, value: String },

    /// Read the current value of `register`.
    Read { register: String },

    /// Shut the whole system down.
    Stop,
}

/// A reply delivered to a client's outbound channel.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Reply {
    /// A write request completed.
    WriteAck,

    /// The value read from a register; `None` if the register was
    /// never written.
    Value {
        register: String,
        value: Option<String>,
    },

    /// The result of a dequeue operation; `None` if the queue was empty.
    Dequeued { value: Option<i64> },
}

impl Request {
    pub fn is_stop(&self) -> bool {
        matches!(self, Request::Stop)
    }
}
