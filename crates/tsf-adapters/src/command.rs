//! ---
//! tsf_section: "04-adapter-orchestration"
//! tsf_subsection: "module"
//! tsf_type: "source"
//! tsf_scope: "code"
//! tsf_description: "Adapter contract, lifecycle state and collections."
//! tsf_version: "v0.0.0-prealpha"
//! tsf_owner: "tbd"
//! ---
use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;
use parking_lot::RwLock;

use crate::base::AdapterStatus;
use crate::{AdapterError, Result};

/// Commands every adapter answers without registration.
pub const BUILTIN_COMMANDS: [(&str, &str); 5] = [
    ("Start", "Starts the adapter, waiting for initialization"),
    ("Stop", "Stops the adapter"),
    ("Initialize", "Re-reads the connection string and re-initializes the adapter"),
    (
        "SetInitializedState",
        "Manually sets the initialized flag (argument: true/false)",
    ),
    ("GetStatus", "Returns a snapshot of the adapter state"),
];

/// Result of a management command.
#[derive(Debug, Clone, PartialEq)]
pub enum CommandResponse {
    Done,
    Text(String),
    Status(Box<AdapterStatus>),
}

type CommandHandler = Arc<dyn Fn(&[&str]) -> Result<CommandResponse> + Send + Sync>;

struct CommandEntry {
    name: String,
    description: String,
    handler: CommandHandler,
}

/// Per-instance table of named management commands.
#[derive(Default)]
pub struct CommandTable {
    entries: RwLock<IndexMap<String, CommandEntry>>,
}

impl CommandTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) a named command. Names are case-insensitive.
    pub fn register<F>(&self, name: &str, description: &str, handler: F)
    where
        F: Fn(&[&str]) -> Result<CommandResponse> + Send + Sync + 'static,
    {
        self.entries.write().insert(
            name.to_lowercase(),
            CommandEntry {
                name: name.to_owned(),
                description: description.to_owned(),
                handler: Arc::new(handler),
            },
        );
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.read().contains_key(&name.to_lowercase())
    }

    /// Name and description of every command, built-ins first.
    pub fn describe(&self) -> Vec<(String, String)> {
        let mut listing: Vec<(String, String)> = BUILTIN_COMMANDS
            .iter()
            .map(|(name, description)| ((*name).to_owned(), (*description).to_owned()))
            .collect();
        listing.extend(
            self.entries
                .read()
                .values()
                .map(|entry| (entry.name.clone(), entry.description.clone())),
        );
        listing
    }

    /// Run a registered command. The handler runs outside the table lock.
    pub fn invoke(&self, adapter: &str, name: &str, args: &[&str]) -> Result<CommandResponse> {
        let handler = self
            .entries
            .read()
            .get(&name.to_lowercase())
            .map(|entry| entry.handler.clone())
            .ok_or_else(|| AdapterError::UnknownCommand {
                adapter: adapter.to_owned(),
                command: name.to_owned(),
            })?;
        handler(args)
    }
}

impl fmt::Debug for CommandTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.entries.read().values().map(|entry| entry.name.clone()))
            .finish()
    }
}
