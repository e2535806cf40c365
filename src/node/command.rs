use bytes::Bytes;

use crate::resp::Frame;

/// A command ready to be sent to a Redis node.
///
/// Built with the builder pattern and converted to a RESP array frame for
/// transmission. The router also reads arguments back out of a `Cmd` to
/// classify it: the lowercased name decides the routing class and the
/// key-position argument decides the slot.
///
/// # Example
///
/// ```
/// use shardis::Cmd;
///
/// let cmd = Cmd::new("SET").arg("key").arg("value");
/// assert_eq!(cmd.name(), "set");
/// ```
#[derive(Debug, Clone)]
pub struct Cmd {
    args: Vec<Bytes>,
}

impl Cmd {
    /// Creates a new command with the given name.
    pub fn new(name: impl Into<Bytes>) -> Self {
        Self {
            args: vec![name.into()],
        }
    }

    /// Appends an argument.
    pub fn arg<T: Into<Bytes>>(mut self, arg: T) -> Self {
        self.args.push(arg.into());
        self
    }

    /// The command name, lowercased.
    pub fn name(&self) -> String {
        String::from_utf8_lossy(&self.args[0]).to_ascii_lowercase()
    }

    /// The raw argument at `index` (the name is index 0).
    pub fn arg_at(&self, index: usize) -> Option<&Bytes> {
        self.args.get(index)
    }

    /// The argument at `index` as lowercased text. Used for subcommand
    /// dispatch (`CLUSTER NODES`, `SCRIPT LOAD`, ...).
    pub fn arg_lower(&self, index: usize) -> Option<String> {
        self.args
            .get(index)
            .map(|b| String::from_utf8_lossy(b).to_ascii_lowercase())
    }

    /// Number of arguments, command name included.
    pub fn len(&self) -> usize {
        self.args.len()
    }

    /// True when the command has no arguments at all.
    pub fn is_empty(&self) -> bool {
        self.args.is_empty()
    }

    /// Converts the command into a RESP array frame.
    pub fn into_frame(self) -> Frame {
        Frame::Array(
            self.args
                .into_iter()
                .map(|b| Frame::BulkString(Some(b)))
                .collect(),
        )
    }
}

/// Creates a PING command.
pub fn ping() -> Cmd {
    Cmd::new("PING")
}

/// Creates the ASKING command sent before an ASK-redirected retry.
pub fn asking() -> Cmd {
    Cmd::new("ASKING")
}

/// Creates a CLUSTER NODES command, the topology discovery call.
pub fn cluster_nodes() -> Cmd {
    Cmd::new("CLUSTER").arg("NODES")
}

/// Creates an AUTH command, with the username for ACL-style auth.
pub fn auth(username: Option<&str>, password: &str) -> Cmd {
    match username {
        Some(user) => Cmd::new("AUTH")
            .arg(user.to_string())
            .arg(password.to_string()),
        None => Cmd::new("AUTH").arg(password.to_string()),
    }
}

/// Creates a SELECT command.
pub fn select(db: u32) -> Cmd {
    Cmd::new("SELECT").arg(db.to_string())
}
