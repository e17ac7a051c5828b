//! Process configuration.
//!
//! Read once at startup and immutable thereafter; the process itself is the
//! unit of teardown. Holds CLI parsing, bind-address validation against the
//! host's interfaces, and the per-service descriptors each launcher consumes.

use std::net::Ipv4Addr;
use std::path::PathBuf;

use clap::Parser;
use thiserror::Error;
use url::Url;

/// Default DNS hijack service port.
pub const DEFAULT_DNS_PORT: u16 = 53;
/// Default RTMP relay port (also the default upstream port).
pub const DEFAULT_RTMP_PORT: u16 = 1935;
/// Default TCP forward proxy port.
pub const DEFAULT_FORWARD_PORT: u16 = 8080;
/// Hijack pattern applied when none are configured.
pub const DEFAULT_HIJACK_PATTERN: &str = r"^live-.*\.twitch\.tv$";
/// System resolver configuration consulted for upstream nameservers.
pub const DEFAULT_RESOLV_CONF: &str = "/etc/resolv.conf";

/// Local multi-service proxy: DNS hijack resolver, RTMP relay, TCP forwarder.
#[derive(Parser, Debug)]
#[command(name = "streamtap", version, about)]
pub struct Args {
    /// Local IPv4 address all services bind to; must be assigned to an
    /// interface on this host.
    #[arg(short = 'b', long, default_value = "127.0.0.1", env = "STREAMTAP_BIND")]
    pub bind: Ipv4Addr,

    /// Start the DNS hijack resolver on <bind>:<dns-port> (TCP + UDP).
    #[arg(short = 's', long)]
    pub hijack_dns: bool,

    /// Hostname regex to hijack (repeatable); defaults to the Twitch live
    /// edge pattern.
    #[arg(long = "hijack-pattern")]
    pub hijack_patterns: Vec<String>,

    /// RTMP playback URL; if set, starts the RTMP relay on <bind>:<rtmp-port>.
    #[arg(short = 'r', long)]
    pub rtmp_url: Option<String>,

    /// Destination HOST:PORT; if set, starts the TCP forward proxy on
    /// <bind>:<forward-port>.
    #[arg(short = 'f', long)]
    pub forward: Option<String>,

    #[arg(long, default_value_t = DEFAULT_DNS_PORT)]
    pub dns_port: u16,

    #[arg(long, default_value_t = DEFAULT_RTMP_PORT)]
    pub rtmp_port: u16,

    #[arg(long, default_value_t = DEFAULT_FORWARD_PORT)]
    pub forward_port: u16,

    /// Resolver configuration file supplying upstream nameservers.
    #[arg(long, default_value = DEFAULT_RESOLV_CONF)]
    pub resolv_conf: PathBuf,

    /// Default log level when RUST_LOG is not set.
    #[arg(long, default_value = "info", env = "STREAMTAP_LOG")]
    pub log_level: String,
}

/// Startup configuration errors. All of these are fatal; nothing is retried.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("bind address {0} is not assigned to any local interface")]
    BindAddrNotLocal(Ipv4Addr),

    #[error("failed to enumerate network interfaces: {0}")]
    Interfaces(#[from] nix::Error),

    #[error("invalid rtmp url {url:?}: {reason}")]
    InvalidRtmpUrl { url: String, reason: String },

    #[error("invalid hijack pattern {pattern:?}: {source}")]
    InvalidHijackPattern {
        pattern: String,
        source: regex::Error,
    },

    #[error("invalid forward destination {0:?}: expected HOST:PORT")]
    InvalidForwardDestination(String),
}

/// DNS hijack service descriptor.
#[derive(Debug, Clone)]
pub struct DnsConfig {
    pub port: u16,
    pub hijack_patterns: Vec<String>,
    pub resolv_conf: PathBuf,
}

/// RTMP relay service descriptor.
#[derive(Debug, Clone)]
pub struct RtmpConfig {
    pub port: u16,
    pub target: RtmpTarget,
}

/// Forward proxy service descriptor.
#[derive(Debug, Clone)]
pub struct ForwardConfig {
    pub port: u16,
    pub destination: String,
}

/// Validated process configuration: one bind address plus the descriptors of
/// the enabled services.
#[derive(Debug, Clone)]
pub struct Config {
    pub bind: Ipv4Addr,
    pub dns: Option<DnsConfig>,
    pub rtmp: Option<RtmpConfig>,
    pub forward: Option<ForwardConfig>,
}

impl Config {
    /// Validate CLI arguments into an immutable configuration.
    pub fn from_args(args: &Args) -> Result<Self, ConfigError> {
        validate_bind(args.bind)?;

        let dns = args.hijack_dns.then(|| DnsConfig {
            port: args.dns_port,
            hijack_patterns: if args.hijack_patterns.is_empty() {
                vec![DEFAULT_HIJACK_PATTERN.to_string()]
            } else {
                args.hijack_patterns.clone()
            },
            resolv_conf: args.resolv_conf.clone(),
        });

        let rtmp = args
            .rtmp_url
            .as_deref()
            .filter(|u| !u.is_empty())
            .map(|raw| -> Result<RtmpConfig, ConfigError> {
                Ok(RtmpConfig {
                    port: args.rtmp_port,
                    target: RtmpTarget::parse(raw)?,
                })
            })
            .transpose()?;

        let forward = args
            .forward
            .as_deref()
            .filter(|d| !d.is_empty())
            .map(|dst| {
                // Port presence is all we can check without resolving; the
                // dial itself happens per connection.
                match dst.rsplit_once(':') {
                    Some((host, port)) if !host.is_empty() && port.parse::<u16>().is_ok() => {
                        Ok(ForwardConfig {
                            port: args.forward_port,
                            destination: dst.to_string(),
                        })
                    }
                    _ => Err(ConfigError::InvalidForwardDestination(dst.to_string())),
                }
            })
            .transpose()?;

        Ok(Self {
            bind: args.bind,
            dns,
            rtmp,
            forward,
        })
    }
}

/// Check that `bind` exactly matches an IPv4 address currently assigned to a
/// local network interface.
pub fn validate_bind(bind: Ipv4Addr) -> Result<(), ConfigError> {
    for ifaddr in nix::ifaddrs::getifaddrs()? {
        if let Some(addr) = ifaddr.address {
            if let Some(sin) = addr.as_sockaddr_in() {
                if sin.ip() == bind {
                    return Ok(());
                }
            }
        }
    }
    Err(ConfigError::BindAddrNotLocal(bind))
}

/// Upstream target derived from an RTMP playback URL.
///
/// Splits `rtmp://host[:port]/app/?query` into the pieces the relay
/// collaborator is constructed with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RtmpTarget {
    /// Upstream dial target, `host:port` with the port defaulted to 1935.
    pub upstream: String,
    /// Application path segment, slashes trimmed.
    pub app: String,
    /// Canonical playback URL, `rtmp://host[:port]/app`.
    pub canonical_url: String,
    /// Query string pass-through, always `?`-prefixed as upstream expects.
    pub query: String,
}

impl RtmpTarget {
    pub fn parse(raw: &str) -> Result<Self, ConfigError> {
        let invalid = |reason: &str| ConfigError::InvalidRtmpUrl {
            url: raw.to_string(),
            reason: reason.to_string(),
        };

        let url = Url::parse(raw).map_err(|e| invalid(&e.to_string()))?;
        if url.scheme() != "rtmp" {
            return Err(invalid("scheme must be rtmp"));
        }
        let host = url.host_str().ok_or_else(|| invalid("missing host"))?;

        let authority = match url.port() {
            Some(port) => format!("{host}:{port}"),
            None => host.to_string(),
        };
        let app = url.path().trim_matches('/').to_string();

        Ok(Self {
            upstream: format!("{host}:{}", url.port().unwrap_or(DEFAULT_RTMP_PORT)),
            canonical_url: format!("rtmp://{authority}/{app}"),
            app,
            query: format!("?{}", url.query().unwrap_or("")),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_args() -> Args {
        Args::parse_from(["streamtap"])
    }

    #[test]
    fn rtmp_target_defaults_port() {
        let target = RtmpTarget::parse("rtmp://live.example.net/app/?stream=key").unwrap();
        assert_eq!(target.upstream, "live.example.net:1935");
        assert_eq!(target.app, "app");
        assert_eq!(target.canonical_url, "rtmp://live.example.net/app");
        assert_eq!(target.query, "?stream=key");
    }

    #[test]
    fn rtmp_target_keeps_explicit_port() {
        let target = RtmpTarget::parse("rtmp://live.example.net:19350/deep/app").unwrap();
        assert_eq!(target.upstream, "live.example.net:19350");
        assert_eq!(target.app, "deep/app");
        assert_eq!(target.canonical_url, "rtmp://live.example.net:19350/deep/app");
        assert_eq!(target.query, "?");
    }

    #[test]
    fn rtmp_target_rejects_other_schemes() {
        assert!(matches!(
            RtmpTarget::parse("http://live.example.net/app"),
            Err(ConfigError::InvalidRtmpUrl { .. })
        ));
    }

    #[test]
    fn loopback_bind_is_local() {
        validate_bind(Ipv4Addr::LOCALHOST).unwrap();
    }

    #[test]
    fn test_net_bind_is_rejected() {
        // TEST-NET-3, never assigned to a real interface.
        assert!(matches!(
            validate_bind("203.0.113.77".parse().unwrap()),
            Err(ConfigError::BindAddrNotLocal(_))
        ));
    }

    #[test]
    fn forward_destination_requires_port() {
        let mut args = base_args();
        args.forward = Some("upstream.example.net".to_string());
        assert!(matches!(
            Config::from_args(&args),
            Err(ConfigError::InvalidForwardDestination(_))
        ));

        args.forward = Some("upstream.example.net:9000".to_string());
        let config = Config::from_args(&args).unwrap();
        assert_eq!(
            config.forward.unwrap().destination,
            "upstream.example.net:9000"
        );
    }

    #[test]
    fn hijack_patterns_default_when_unset() {
        let mut args = base_args();
        args.hijack_dns = true;
        let config = Config::from_args(&args).unwrap();
        assert_eq!(
            config.dns.unwrap().hijack_patterns,
            vec![DEFAULT_HIJACK_PATTERN.to_string()]
        );
    }

    #[test]
    fn disabled_services_stay_disabled() {
        let config = Config::from_args(&base_args()).unwrap();
        assert!(config.dns.is_none());
        assert!(config.rtmp.is_none());
        assert!(config.forward.is_none());
    }
}
