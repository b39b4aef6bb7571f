use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// One of the two managed services.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Master,
    Agent,
}

impl Role {
    pub const ALL: [Role; 2] = [Role::Master, Role::Agent];

    pub fn as_str(self) -> &'static str {
        match self {
            Role::Master => "master",
            Role::Agent => "agent",
        }
    }

    /// Container ports whose published host port is turned into a URL.
    pub fn tracked_ports(self) -> &'static [u16] {
        match self {
            Role::Master => &[CONSOLE_PORT, BUILD_PORT],
            Role::Agent => &[DEMO_PORT],
        }
    }
}

/// Administrative console on the master (https).
pub const CONSOLE_PORT: u16 = 443;
/// Build/pipeline web UI on the master.
pub const BUILD_PORT: u16 = 9000;
/// Demo web application on the agent.
pub const DEMO_PORT: u16 = 9090;

/// URL scheme for a container port.
pub fn scheme_for(port: u16) -> &'static str {
    if port == CONSOLE_PORT {
        "https"
    } else {
        "http"
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "master" => Ok(Role::Master),
            "agent" => Ok(Role::Agent),
            other => Err(format!("unknown role '{}' (expected master or agent)", other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_roles_case_insensitively() {
        assert_eq!("Master".parse::<Role>().unwrap(), Role::Master);
        assert_eq!("agent".parse::<Role>().unwrap(), Role::Agent);
        assert!("db".parse::<Role>().is_err());
    }

    #[test]
    fn only_console_port_is_https() {
        assert_eq!(scheme_for(443), "https");
        assert_eq!(scheme_for(9000), "http");
        assert_eq!(scheme_for(9090), "http");
    }

    #[test]
    fn tracked_ports_per_role() {
        assert_eq!(Role::Master.tracked_ports(), &[443, 9000]);
        assert_eq!(Role::Agent.tracked_ports(), &[9090]);
    }
}
