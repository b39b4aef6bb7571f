use std::collections::BTreeMap;
use std::net::TcpListener;

use crate::docker::container::PortMap;
use crate::orchestrator::role::{scheme_for, Role};

/// Master ports that keep their own number on the host when ports are exposed,
/// so agents outside the container network can reach the master directly.
pub const FIXED_MASTER_PORTS: [u16; 3] = [8140, 8142, 61613];

/// Master ports that are always published on a free host port.
const EPHEMERAL_MASTER_PORTS: [u16; 4] = [22, 443, 9000, 61616];

/// Published-port plan for a role.
pub fn port_plan(role: Role, expose_ports: bool) -> Vec<PortMap> {
    match role {
        Role::Master => {
            let mut plan: Vec<PortMap> = EPHEMERAL_MASTER_PORTS
                .iter()
                .map(|&p| PortMap {
                    container_port: p,
                    host_port: None,
                })
                .collect();
            plan.extend(FIXED_MASTER_PORTS.iter().map(|&p| PortMap {
                container_port: p,
                host_port: expose_ports.then_some(p),
            }));
            plan.sort_by_key(|pm| pm.container_port);
            plan
        }
        Role::Agent => vec![PortMap {
            container_port: 9090,
            host_port: None,
        }],
    }
}

/// Build URLs for the role's tracked ports from the engine's published ports.
/// Ports that were not published are left out.
pub fn derive_urls(
    role: Role,
    address: &str,
    published: &BTreeMap<u16, u16>,
) -> BTreeMap<u16, String> {
    role.tracked_ports()
        .iter()
        .filter_map(|port| {
            published
                .get(port)
                .map(|host| (*port, format!("{}://{}:{}", scheme_for(*port), address, host)))
        })
        .collect()
}

pub fn check_port_available(port: u16) -> bool {
    TcpListener::bind(("127.0.0.1", port)).is_ok()
}

/// Fixed host ports of the plan that something else already listens on.
pub fn fixed_port_conflicts(plan: &[PortMap]) -> Vec<u16> {
    plan.iter()
        .filter_map(|pm| pm.host_port)
        .filter(|p| !check_port_available(*p))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixed(plan: &[PortMap]) -> Vec<u16> {
        plan.iter().filter_map(|pm| pm.host_port).collect()
    }

    #[test]
    fn exposed_master_keeps_agent_facing_ports() {
        let plan = port_plan(Role::Master, true);
        assert_eq!(plan.len(), 7);
        assert_eq!(fixed(&plan), vec![8140, 8142, 61613]);
    }

    #[test]
    fn unexposed_master_publishes_everything_ephemerally() {
        let plan = port_plan(Role::Master, false);
        assert!(fixed(&plan).is_empty());
        assert!(plan.iter().any(|pm| pm.container_port == 443));
    }

    #[test]
    fn console_port_is_never_fixed() {
        for expose in [true, false] {
            let plan = port_plan(Role::Master, expose);
            let console = plan.iter().find(|pm| pm.container_port == 443).unwrap();
            assert_eq!(console.host_port, None);
        }
    }

    #[test]
    fn agent_publishes_demo_port() {
        let plan = port_plan(Role::Agent, true);
        assert_eq!(
            plan,
            vec![PortMap {
                container_port: 9090,
                host_port: None
            }]
        );
    }

    #[test]
    fn urls_use_scheme_per_port() {
        let published = BTreeMap::from([(443, 32768), (9000, 32769), (22, 32770)]);
        let urls = derive_urls(Role::Master, "172.17.0.1", &published);
        assert_eq!(urls.len(), 2);
        assert_eq!(urls[&443], "https://172.17.0.1:32768");
        assert_eq!(urls[&9000], "http://172.17.0.1:32769");
    }

    #[test]
    fn unpublished_tracked_port_has_no_url() {
        let urls = derive_urls(Role::Agent, "127.0.0.1", &BTreeMap::new());
        assert!(urls.is_empty());
    }

    #[test]
    fn busy_fixed_port_is_reported() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let plan = vec![PortMap {
            container_port: 8140,
            host_port: Some(port),
        }];
        assert_eq!(fixed_port_conflicts(&plan), vec![port]);
    }
}
