use serde::{Deserialize, Serialize};

#[derive(Serialize, Deserialize)]
pub struct Scenario(pub Vec<Command>);

#[derive(Serialize, Deserialize)]
#[serde(tag = "type")]
#[derive(Clone, Debug)]
pub enum Command {
    /// Write `value` to `register` (register services only)
    Write {
        register: String,
        value: String,
    },

    /// Read `register` (register services only)
    Read {
        register: String,
    },

    /// Enqueue `value` (queue service only)
    Enqueue {
        value: i64,
    },

    /// Dequeue one value (queue service only)
    Dequeue,

    /// Sleep the harness for `ms` milliseconds
    Sleep {
        ms: u64,
    },
}
