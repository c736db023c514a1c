//! Daemon configuration.
//!
//! Every option can come from the command line or the environment; the
//! command line wins. `.env` is loaded by the binary before parsing.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;

use clap::Args;

use crate::manager::ManagerSettings;
use crate::resolver::{IngressStrategy, ResolveError, ResolverSettings};

pub const DEFAULT_PORT: u16 = 9090;

#[derive(Debug, Clone, Args)]
pub struct GrantConfig {
    /// Serve grant redemptions
    #[arg(
        long = "enable-grants",
        env = "SITELINK_ENABLE_GRANTS",
        default_value_t = true,
        action = clap::ArgAction::Set
    )]
    pub enabled: bool,

    /// Take the redemption URL from the access configuration
    #[arg(
        long,
        env = "SITELINK_GRANT_SERVER_AUTOCONFIGURE",
        default_value_t = false,
        action = clap::ArgAction::Set
    )]
    pub autoconfigure: bool,

    /// Fixed base URL for redemption (e.g. https://claims.example.com)
    #[arg(long, env = "SITELINK_GRANT_SERVER_BASE_URL")]
    pub base_url: Option<String>,

    /// Listen port
    #[arg(long, env = "SITELINK_GRANT_SERVER_PORT", default_value_t = DEFAULT_PORT)]
    pub port: u16,

    /// Listen address
    #[arg(long, env = "SITELINK_GRANT_SERVER_ADDRESS", default_value_t = IpAddr::V4(Ipv4Addr::UNSPECIFIED))]
    pub address: IpAddr,

    /// PEM certificate for the redemption endpoint
    #[arg(long, env = "SITELINK_GRANT_SERVER_TLS_CERT", requires = "tls_key")]
    pub tls_cert: Option<PathBuf>,

    /// PEM private key for the redemption endpoint
    #[arg(long, env = "SITELINK_GRANT_SERVER_TLS_KEY", requires = "tls_cert")]
    pub tls_key: Option<PathBuf>,

    /// PEM CA handed to redeemers. Defaults to the site authority.
    #[arg(long, env = "SITELINK_GRANT_SERVER_CA")]
    pub ca: Option<PathBuf>,

    /// Ingress strategy (route, loadbalancer, nodeport, ingress, proxy, local)
    #[arg(long, env = "SITELINK_INGRESS", default_value = "local")]
    pub ingress: String,

    /// Externally visible base host, required by nodeport and proxy
    #[arg(long, env = "SITELINK_INGRESS_HOST")]
    pub ingress_host: Option<String>,

    /// Namespace of this site
    #[arg(long, env = "SITELINK_NAMESPACE", default_value = "default")]
    pub namespace: String,

    /// JSON file describing routes, load balancers, node ports and ingresses
    #[arg(long, env = "SITELINK_LOOKUP_FILE")]
    pub lookup_file: Option<PathBuf>,
}

impl GrantConfig {
    pub fn listen_addr(&self) -> SocketAddr {
        SocketAddr::new(self.address, self.port)
    }

    pub fn strategy(&self) -> Result<IngressStrategy, ResolveError> {
        self.ingress.parse()
    }

    pub fn resolver_settings(&self) -> ResolverSettings {
        ResolverSettings {
            namespace: self.namespace.clone(),
            ingress_host: self.ingress_host.clone(),
        }
    }

    pub fn tls_enabled(&self) -> bool {
        self.tls_cert.is_some() && self.tls_key.is_some()
    }

    /// Manager settings. `ca` is the PEM already loaded by the caller.
    pub fn manager_settings(&self, ca: Option<String>) -> ManagerSettings {
        ManagerSettings {
            enabled: self.enabled,
            autoconfigure: self.autoconfigure,
            base_url: self.base_url.clone().filter(|u| !u.is_empty()),
            ca,
            tls: self.tls_enabled(),
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[derive(Parser)]
    struct Cli {
        #[command(flatten)]
        config: GrantConfig,
    }

    fn parse(args: &[&str]) -> GrantConfig {
        let mut argv = vec!["sitelink-daemon"];
        argv.extend_from_slice(args);
        Cli::try_parse_from(argv).unwrap().config
    }

    #[test]
    fn listen_port_is_configurable() {
        let config = parse(&["--port", "8443", "--address", "127.0.0.1"]);
        assert_eq!(config.listen_addr(), "127.0.0.1:8443".parse().unwrap());
    }

    #[test]
    fn grants_can_be_disabled() {
        let config = parse(&["--enable-grants", "false"]);
        assert!(!config.manager_settings(None).enabled);
    }

    #[test]
    fn tls_files_come_in_pairs() {
        let mut argv = vec!["sitelink-daemon", "--tls-cert", "/etc/tls.crt"];
        assert!(Cli::try_parse_from(argv.clone()).is_err());

        argv.extend_from_slice(&["--tls-key", "/etc/tls.key"]);
        let config = Cli::try_parse_from(argv).unwrap().config;
        assert!(config.tls_enabled());
        assert!(config.manager_settings(None).tls);
    }

    #[test]
    fn strategy_and_settings_follow_args() {
        let config = parse(&[
            "--ingress",
            "nodeport",
            "--ingress-host",
            "nodes.example.com",
            "--namespace",
            "west",
        ]);
        assert_eq!(config.strategy().unwrap(), IngressStrategy::NodePort);
        assert_eq!(
            config.resolver_settings(),
            ResolverSettings {
                namespace: "west".to_string(),
                ingress_host: Some("nodes.example.com".to_string()),
            }
        );

        let bad = parse(&["--ingress", "carrier-pigeon"]);
        assert!(bad.strategy().is_err());
    }

    #[test]
    fn empty_base_url_is_ignored() {
        let config = parse(&["--base-url", ""]);
        assert_eq!(config.manager_settings(None).base_url, None);
    }
}
