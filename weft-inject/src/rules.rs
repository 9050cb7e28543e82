//! Interception rule generation.
//!
//! Interception is a static nat ruleset, never content inspection: ingress
//! on declared application ports is redirected to the proxy's inbound
//! listener via PREROUTING, and all other egress is redirected to its
//! outbound listener via OUTPUT. Two escapes keep the proxy out of its own
//! way: loopback traffic is returned untouched (the proxy reaches the
//! workload over 127.0.0.1) and so is anything sent by the proxy's own UID
//! (its upstream connections would otherwise loop back into it). Reserved
//! ports bypass the mesh entirely, in both directions.

use std::fmt::Write;

use weft_policy::intent::{DEFAULT_INBOUND_PORT, DEFAULT_OUTBOUND_PORT};

/// The UID the proxy container runs as. Egress owned by this UID is exempt
/// from redirection, which is what lets the proxy dial upstreams.
pub const PROXY_UID: u32 = 1337;

const CHAIN_INBOUND: &str = "WEFT_INBOUND";
const CHAIN_OUTBOUND: &str = "WEFT_OUTBOUND";

/// Parameters for one workload's interception rules.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Redirect {
    /// Proxy port receiving redirected ingress.
    pub inbound_port: u16,
    /// Proxy port receiving redirected egress.
    pub outbound_port: u16,
    /// The UID whose egress is never redirected.
    pub proxy_uid: u32,
    /// Declared application ports whose ingress is intercepted.
    pub app_ports: Vec<u16>,
    /// Ports that bypass the mesh entirely.
    pub reserved_ports: Vec<u16>,
}

// === impl Redirect ===

impl Redirect {
    /// A redirect of the given application ports onto the proxy's default
    /// listeners.
    pub fn new(app_ports: Vec<u16>, reserved_ports: Vec<u16>) -> Self {
        Self {
            inbound_port: DEFAULT_INBOUND_PORT,
            outbound_port: DEFAULT_OUTBOUND_PORT,
            proxy_uid: PROXY_UID,
            app_ports,
            reserved_ports,
        }
    }

    /// The ruleset, one `iptables` invocation per line.
    ///
    /// Order is load-bearing: reserved-port RETURNs precede the REDIRECTs,
    /// so a port listed both as an application port and as reserved stays
    /// out of the mesh.
    pub fn rules(&self) -> Vec<String> {
        let mut rules = vec![format!("iptables -t nat -N {CHAIN_INBOUND}")];
        if !self.reserved_ports.is_empty() {
            rules.push(format!(
                "iptables -t nat -A {CHAIN_INBOUND} -p tcp -m multiport --dports {} -j RETURN",
                ports(&self.reserved_ports),
            ));
        }
        if !self.app_ports.is_empty() {
            rules.push(format!(
                "iptables -t nat -A {CHAIN_INBOUND} -p tcp -m multiport --dports {} -j REDIRECT --to-ports {}",
                ports(&self.app_ports),
                self.inbound_port,
            ));
        }
        rules.push(format!(
            "iptables -t nat -A PREROUTING -p tcp -j {CHAIN_INBOUND}"
        ));

        rules.push(format!("iptables -t nat -N {CHAIN_OUTBOUND}"));
        rules.push(format!(
            "iptables -t nat -A {CHAIN_OUTBOUND} -o lo -j RETURN"
        ));
        rules.push(format!(
            "iptables -t nat -A {CHAIN_OUTBOUND} -m owner --uid-owner {} -j RETURN",
            self.proxy_uid,
        ));
        if !self.reserved_ports.is_empty() {
            rules.push(format!(
                "iptables -t nat -A {CHAIN_OUTBOUND} -p tcp -m multiport --dports {} -j RETURN",
                ports(&self.reserved_ports),
            ));
        }
        rules.push(format!(
            "iptables -t nat -A {CHAIN_OUTBOUND} -p tcp -j REDIRECT --to-ports {}",
            self.outbound_port,
        ));
        rules.push(format!("iptables -t nat -A OUTPUT -p tcp -j {CHAIN_OUTBOUND}"));
        rules
    }

    /// The ruleset as a shell script for the init step, aborting on the
    /// first failed rule.
    pub fn script(&self) -> String {
        let mut script = String::from("set -e\n");
        for rule in self.rules() {
            let _ = writeln!(&mut script, "{rule}");
        }
        script
    }
}

fn ports(ports: &[u16]) -> String {
    let mut out = String::new();
    for (i, port) in ports.iter().enumerate() {
        if i > 0 {
            out.push(',');
        }
        let _ = write!(&mut out, "{port}");
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_the_full_ruleset() {
        let redirect = Redirect::new(vec![8080], vec![5432, 6379]);
        assert_eq!(
            redirect.rules(),
            vec![
                "iptables -t nat -N WEFT_INBOUND",
                "iptables -t nat -A WEFT_INBOUND -p tcp -m multiport --dports 5432,6379 -j RETURN",
                "iptables -t nat -A WEFT_INBOUND -p tcp -m multiport --dports 8080 -j REDIRECT --to-ports 15006",
                "iptables -t nat -A PREROUTING -p tcp -j WEFT_INBOUND",
                "iptables -t nat -N WEFT_OUTBOUND",
                "iptables -t nat -A WEFT_OUTBOUND -o lo -j RETURN",
                "iptables -t nat -A WEFT_OUTBOUND -m owner --uid-owner 1337 -j RETURN",
                "iptables -t nat -A WEFT_OUTBOUND -p tcp -m multiport --dports 5432,6379 -j RETURN",
                "iptables -t nat -A WEFT_OUTBOUND -p tcp -j REDIRECT --to-ports 15001",
                "iptables -t nat -A OUTPUT -p tcp -j WEFT_OUTBOUND",
            ],
        );
    }

    #[test]
    fn reserved_returns_precede_redirects() {
        let redirect = Redirect::new(vec![5432, 8080], vec![5432]);
        let rules = redirect.rules();
        let reserved = rules
            .iter()
            .position(|r| r.contains("--dports 5432 -j RETURN"))
            .unwrap();
        let redirected = rules
            .iter()
            .position(|r| r.contains("-j REDIRECT --to-ports 15006"))
            .unwrap();
        assert!(reserved < redirected);
    }

    #[test]
    fn no_app_ports_means_no_inbound_redirect() {
        let redirect = Redirect::new(Vec::new(), Vec::new());
        let rules = redirect.rules();
        assert!(!rules.iter().any(|r| r.contains("--to-ports 15006")));
        // Egress is still intercepted.
        assert!(rules.iter().any(|r| r.contains("--to-ports 15001")));
    }

    #[test]
    fn the_script_aborts_on_failure() {
        let script = Redirect::new(vec![8080], Vec::new()).script();
        assert!(script.starts_with("set -e\n"));
        assert_eq!(script.lines().count(), 9);
    }
}
