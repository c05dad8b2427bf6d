use crate::config::ConfigError;
use crate::models::Host;
use std::collections::HashSet;

/// Ordered, immutable list of monitored hosts
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostRegistry {
    hosts: Vec<Host>,
}

impl HostRegistry {
    pub fn new<I, S>(hosts: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = S>,
        S: Into<Host>,
    {
        let hosts: Vec<Host> = hosts.into_iter().map(|h| h.into().trim().to_string()).collect();
        if hosts.is_empty() {
            return Err(ConfigError::EmptyHosts);
        }

        {
            let mut seen = HashSet::with_capacity(hosts.len());
            for (i, host) in hosts.iter().enumerate() {
                if host.is_empty() {
                    return Err(ConfigError::BlankHost(i + 1));
                }
                if !seen.insert(host.as_str()) {
                    return Err(ConfigError::DuplicateHost(host.clone()));
                }
            }
        }

        Ok(Self { hosts })
    }

    pub fn list_hosts(&self) -> &[Host] {
        &self.hosts
    }

    pub fn len(&self) -> usize {
        self.hosts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hosts.is_empty()
    }
}
