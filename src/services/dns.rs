//! DNS hijack resolver.
//!
//! Answers A queries whose name matches a hijack rule with the configured
//! redirect addresses; everything else is forwarded verbatim to the first
//! upstream nameserver from resolv.conf and the raw response relayed back.
//! Only the question name is ever parsed out of a forwarded query; responses
//! pass through untouched.
//!
//! Serves the same rule set over UDP datagrams and TCP with the standard
//! 2-byte length framing. Per-query failures (malformed packet, upstream
//! timeout) are logged and dropped; they never stop a serve loop.

use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use hickory_proto::op::{Message, MessageType, OpCode, ResponseCode};
use hickory_proto::rr::rdata::A;
use hickory_proto::rr::{RData, Record, RecordType};
use regex::Regex;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream, UdpSocket};
use tracing::{debug, error, info};

use crate::config::DnsConfig;
use crate::proxy;
use crate::supervisor::Supervisor;

/// TTL on hijacked answers; short so un-hijacking takes effect quickly.
const HIJACK_TTL: u32 = 10;

/// How long to wait on the upstream nameserver before dropping a query.
const UPSTREAM_TIMEOUT: Duration = Duration::from_secs(5);

/// Largest datagram we accept or relay (EDNS-sized).
const MAX_DATAGRAM: usize = 4096;

/// One hijack rule: hostname pattern mapped to the redirect address set.
#[derive(Debug, Clone)]
pub struct HijackRule {
    pattern: String,
    re: Regex,
    ips: Vec<Ipv4Addr>,
}

impl HijackRule {
    /// Compile a rule. A malformed pattern is a fatal startup error.
    pub fn compile(pattern: &str, ips: Vec<Ipv4Addr>) -> Result<Self, crate::ConfigError> {
        let re = Regex::new(pattern).map_err(|source| crate::ConfigError::InvalidHijackPattern {
            pattern: pattern.to_string(),
            source,
        })?;
        Ok(Self {
            pattern: pattern.to_string(),
            re,
            ips,
        })
    }

    fn matches(&self, name: &str) -> bool {
        self.re.is_match(name)
    }
}

/// The resolver collaborator: hijack rules plus the upstream nameserver.
pub struct DnsResolver {
    rules: Vec<HijackRule>,
    upstream: SocketAddr,
}

impl DnsResolver {
    pub fn new(rules: Vec<HijackRule>, upstream: SocketAddr) -> Self {
        Self { rules, upstream }
    }

    /// Serve queries on `socket` until the transport fails.
    pub async fn serve_udp(self: Arc<Self>, socket: UdpSocket) -> io::Result<()> {
        let socket = Arc::new(socket);
        let local_addr = socket.local_addr()?;
        info!(service = "dns", bind_addr = %local_addr, transport = "udp", "listener started");

        let mut buf = vec![0u8; MAX_DATAGRAM];
        loop {
            let (n, peer) = socket.recv_from(&mut buf).await?;
            let query = buf[..n].to_vec();
            let resolver = Arc::clone(&self);
            let socket = Arc::clone(&socket);
            tokio::spawn(async move {
                match resolver.answer(&query).await {
                    Ok(reply) => {
                        let _ = socket.send_to(&reply, peer).await;
                    }
                    Err(e) => debug!(peer = %peer, error = format!("{e:#}"), "dns query dropped"),
                }
            });
        }
    }

    /// Serve queries on `listener` until the process exits.
    pub async fn serve_tcp(self: Arc<Self>, listener: TcpListener) -> io::Result<()> {
        proxy::supervise(listener, "dns", move |stream, _peer| {
            let resolver = Arc::clone(&self);
            async move { resolver.serve_stream(stream).await }
        })
        .await
    }

    /// Answer length-framed queries on one TCP connection until the client
    /// hangs up.
    async fn serve_stream(&self, mut stream: TcpStream) -> Result<()> {
        loop {
            let mut len_buf = [0u8; 2];
            match stream.read_exact(&mut len_buf).await {
                Ok(_) => {}
                Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(()),
                Err(e) => return Err(e.into()),
            }
            let len = u16::from_be_bytes(len_buf) as usize;
            let mut query = vec![0u8; len];
            stream.read_exact(&mut query).await?;

            let reply = self.answer(&query).await?;
            if reply.len() > u16::MAX as usize {
                bail!("oversized dns reply: {} bytes", reply.len());
            }
            stream.write_all(&(reply.len() as u16).to_be_bytes()).await?;
            stream.write_all(&reply).await?;
        }
    }

    /// Resolve one wire-format query to a wire-format response.
    async fn answer(&self, query: &[u8]) -> Result<Vec<u8>> {
        let message = Message::from_vec(query).context("malformed dns query")?;

        if let Some(question) = message.queries().first() {
            let name = question.name().to_utf8();
            let name = name.trim_end_matches('.');
            if let Some(rule) = self.rules.iter().find(|r| r.matches(name)) {
                debug!(name, pattern = %rule.pattern, qtype = %question.query_type(), "hijacking query");
                return hijack_response(&message, rule);
            }
        }

        self.forward(query).await
    }

    /// Forward the raw query bytes upstream and return the raw response.
    async fn forward(&self, query: &[u8]) -> Result<Vec<u8>> {
        let socket = UdpSocket::bind("0.0.0.0:0")
            .await
            .context("binding upstream socket")?;
        socket
            .send_to(query, self.upstream)
            .await
            .with_context(|| format!("sending to upstream {}", self.upstream))?;

        let mut buf = vec![0u8; MAX_DATAGRAM];
        let (n, _) = tokio::time::timeout(UPSTREAM_TIMEOUT, socket.recv_from(&mut buf))
            .await
            .with_context(|| format!("upstream {} timed out", self.upstream))??;
        buf.truncate(n);
        Ok(buf)
    }
}

/// Build the hijacked response for a matched query.
///
/// A queries get the rule's redirect addresses; any other type gets an empty
/// NoError answer so a matching name cannot be resolved around the hijack.
fn hijack_response(query: &Message, rule: &HijackRule) -> Result<Vec<u8>> {
    let mut response = Message::new();
    response
        .set_id(query.id())
        .set_message_type(MessageType::Response)
        .set_op_code(OpCode::Query)
        .set_recursion_desired(query.header().recursion_desired())
        .set_recursion_available(true)
        .set_response_code(ResponseCode::NoError);

    for question in query.queries() {
        response.add_query(question.clone());
    }

    if let Some(question) = query.queries().first() {
        if question.query_type() == RecordType::A {
            for ip in &rule.ips {
                response.add_answer(Record::from_rdata(
                    question.name().clone(),
                    HIJACK_TTL,
                    RData::A(A(*ip)),
                ));
            }
        }
    }

    response.to_vec().context("encoding hijack response")
}

/// Extract the first `nameserver` entry from a resolv.conf-format file.
pub fn load_resolv_conf(path: &Path) -> Result<SocketAddr> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("reading {}", path.display()))?;
    for line in content.lines() {
        if let Some(rest) = line.trim().strip_prefix("nameserver") {
            if let Ok(ip) = rest.trim().parse::<IpAddr>() {
                return Ok(SocketAddr::new(ip, 53));
            }
        }
    }
    bail!("no nameserver entries in {}", path.display())
}

/// Launch the DNS hijack service: compile rules, load the upstream, bind TCP
/// and UDP on the same port, and register both serve loops.
///
/// Returns the bound address. Any failure here is fatal to the process.
pub async fn launch(
    config: &DnsConfig,
    bind: Ipv4Addr,
    supervisor: &mut Supervisor,
) -> Result<SocketAddr> {
    // The redirect set is solely the bind address: hijacked names resolve to
    // whatever service runs on this host.
    let redirect_ips = vec![bind];
    let mut rules = Vec::with_capacity(config.hijack_patterns.len());
    for pattern in &config.hijack_patterns {
        rules.push(HijackRule::compile(pattern, redirect_ips.clone())?);
    }

    let upstream = load_resolv_conf(&config.resolv_conf)
        .context("dns: loading system resolver configuration")?;
    let resolver = Arc::new(DnsResolver::new(rules, upstream));

    let requested = SocketAddr::from((bind, config.port));
    let tcp = TcpListener::bind(requested)
        .await
        .with_context(|| format!("dns: failed to listen on {requested}/tcp"))?;
    // UDP mirrors whatever port TCP actually got, so port 0 works too.
    let bound = tcp.local_addr()?;
    let udp = UdpSocket::bind(bound)
        .await
        .with_context(|| format!("dns: failed to listen on {bound}/udp"))?;

    let tcp_resolver = Arc::clone(&resolver);
    supervisor.spawn("dns-tcp", async move {
        if let Err(e) = tcp_resolver.serve_tcp(tcp).await {
            error!(error = %e, "dns tcp serve failed");
        }
    });
    supervisor.spawn("dns-udp", async move {
        if let Err(e) = resolver.serve_udp(udp).await {
            error!(error = %e, "dns udp serve failed");
        }
    });

    info!(
        bind_addr = %bound,
        upstream = %upstream,
        patterns = config.hijack_patterns.len(),
        "dns hijack service started"
    );
    Ok(bound)
}
