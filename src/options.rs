//! Options applied to every NATS connection the relay opens

use crate::{auth, config::NatsConfig, Result, SecureOption};

/// Client name every relay connection announces to the broker
pub const CLIENT_NAME: &str = "nats-event-relay";

/// A single NATS connection option
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionOption {
    /// Client connection name
    Name(String),

    /// nkey credential
    Credential(SecureOption),
}

/// Options for one NATS connection attempt
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectionOptions {
    options: Vec<ConnectionOption>,
}

impl ConnectionOptions {
    /// Options every connection starts from
    pub fn base() -> Self {
        Self {
            options: vec![ConnectionOption::Name(CLIENT_NAME.to_owned())],
        }
    }

    /// Base options plus the credential from `nats.auth`, when one is configured
    pub fn assemble(config: &NatsConfig) -> Result<Self> {
        let mut options = Self::base();

        if !config.auth.seed_path.is_empty() {
            options.push(ConnectionOption::Credential(auth::build_secure_option(
                &config.auth.seed_path,
            )?));
        }

        Ok(options)
    }

    /// Appends an option
    pub fn push(&mut self, option: ConnectionOption) {
        self.options.push(option);
    }

    /// Options in the order they were added
    pub fn iter(&self) -> impl Iterator<Item = &ConnectionOption> {
        self.options.iter()
    }

    /// The credential, if any
    pub fn credential(&self) -> Option<&SecureOption> {
        self.iter().find_map(|option| match option {
            ConnectionOption::Credential(credential) => Some(credential),
            ConnectionOption::Name(_) => None,
        })
    }

    /// Translates into async-nats connect options
    pub fn to_connect_options(&self) -> async_nats::ConnectOptions {
        self.iter()
            .fold(async_nats::ConnectOptions::new(), |connect, option| match option {
                ConnectionOption::Name(name) => connect.name(name),
                ConnectionOption::Credential(credential) => {
                    connect.nkey(credential.seed().to_owned())
                }
            })
    }
}
