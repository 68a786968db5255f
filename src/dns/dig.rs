//! External lookup tool adapter.
//!
//! All knowledge of the lookup tool's command line and text output lives
//! here. The rest of the crate sees only [`DnsQuery`] and [`QueryAnswer`].

#![allow(clippy::missing_errors_doc)]

use async_trait::async_trait;
use std::net::{IpAddr, Ipv4Addr};
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::process::Command;

use crate::error::ResolutionFailure;

/// Default per-query wait in seconds.
const DEFAULT_QUERY_TIMEOUT_SECS: u64 = 3;

/// Extra time granted to the subprocess beyond the tool's own timeout.
const PROCESS_GRACE_MS: u64 = 1500;

/// Exit status dig uses when no server could be reached.
const DIG_EXIT_NO_REPLY: i32 = 9;

/// Record types the engine queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordKind {
    A,
    Ns,
    Txt,
}

impl RecordKind {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::A => "A",
            Self::Ns => "NS",
            Self::Txt => "TXT",
        }
    }
}

/// One lookup request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DnsQuery {
    pub name: String,
    pub kind: RecordKind,
    /// Resolver or authoritative server to ask; `None` uses the tool's default
    pub server: Option<IpAddr>,
    /// EDNS client-subnet hint, e.g. `81.2.69.0/24`
    pub client_subnet: Option<String>,
    pub timeout: Duration,
}

impl DnsQuery {
    /// Create a query for a name and record type.
    pub fn new(name: impl Into<String>, kind: RecordKind) -> Self {
        Self {
            name: name.into(),
            kind,
            server: None,
            client_subnet: None,
            timeout: Duration::from_secs(DEFAULT_QUERY_TIMEOUT_SECS),
        }
    }

    /// Shorthand for an A query.
    pub fn a(name: impl Into<String>) -> Self {
        Self::new(name, RecordKind::A)
    }

    #[must_use]
    pub fn via(mut self, server: IpAddr) -> Self {
        self.server = Some(server);
        self
    }

    #[must_use]
    pub fn with_subnet(mut self, subnet: impl Into<String>) -> Self {
        self.client_subnet = Some(subnet.into());
        self
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// One line of an answer section.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnswerRecord {
    pub name: String,
    pub ttl: u32,
    pub kind: String,
    pub data: String,
}

/// Parsed result of a lookup.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryAnswer {
    pub records: Vec<AnswerRecord>,
    pub elapsed_ms: f64,
    /// Unparsed tool output, kept for reports
    pub raw: String,
}

impl QueryAnswer {
    /// IPv4 addresses from A records, in answer order.
    #[must_use]
    pub fn ipv4_addresses(&self) -> Vec<Ipv4Addr> {
        self.records
            .iter()
            .filter(|r| r.kind.eq_ignore_ascii_case("A"))
            .filter_map(|r| r.data.parse().ok())
            .collect()
    }

    /// Data of all records of a given type, TXT quotes stripped.
    #[must_use]
    pub fn values(&self, kind: RecordKind) -> Vec<String> {
        self.records
            .iter()
            .filter(|r| r.kind.eq_ignore_ascii_case(kind.as_str()))
            .map(|r| r.data.trim_matches('"').replace("\" \"", ""))
            .collect()
    }

    /// Lowest TTL among A records.
    #[must_use]
    pub fn min_ttl(&self) -> Option<u32> {
        self.records
            .iter()
            .filter(|r| r.kind.eq_ignore_ascii_case("A"))
            .map(|r| r.ttl)
            .min()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Capability to run a DNS query through an external tool.
#[async_trait]
pub trait LookupTool: Send + Sync {
    async fn query(&self, query: &DnsQuery) -> Result<QueryAnswer, ResolutionFailure>;
}

/// Parse `+noall +answer` style output.
///
/// Comment lines (`;`) and anything that does not look like
/// `name ttl class type data` are skipped.
#[must_use]
pub fn parse_answer_section(text: &str) -> Vec<AnswerRecord> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with(';'))
        .filter_map(|line| {
            let mut fields = line.split_whitespace();
            let name = fields.next()?;
            let ttl = fields.next()?.parse().ok()?;
            let class = fields.next()?;
            if !class.eq_ignore_ascii_case("IN") {
                return None;
            }
            let kind = fields.next()?;
            let data = fields.collect::<Vec<_>>().join(" ");
            if data.is_empty() {
                return None;
            }
            Some(AnswerRecord {
                name: name.trim_end_matches('.').to_string(),
                ttl,
                kind: kind.to_uppercase(),
                data: data.trim_end_matches('.').to_string(),
            })
        })
        .collect()
}

/// `dig` invoked as a subprocess.
#[derive(Debug, Clone)]
pub struct DigTool {
    program: String,
}

impl Default for DigTool {
    fn default() -> Self {
        Self::new("dig")
    }
}

impl DigTool {
    /// Use the given executable name or path.
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    /// Command line arguments for a query.
    #[must_use]
    pub fn args(query: &DnsQuery) -> Vec<String> {
        let mut args = Vec::with_capacity(8);
        if let Some(server) = query.server {
            args.push(format!("@{server}"));
        }
        args.push(query.name.clone());
        args.push(query.kind.as_str().to_string());
        args.push("+noall".into());
        args.push("+answer".into());
        args.push(format!("+time={}", query.timeout.as_secs().max(1)));
        args.push("+tries=1".into());
        if let Some(subnet) = &query.client_subnet {
            args.push(format!("+subnet={subnet}"));
        }
        args
    }
}

#[async_trait]
impl LookupTool for DigTool {
    async fn query(&self, query: &DnsQuery) -> Result<QueryAnswer, ResolutionFailure> {
        let args = Self::args(query);
        tracing::trace!("{} {}", self.program, args.join(" "));

        let wait = query.timeout + Duration::from_millis(PROCESS_GRACE_MS);
        let start = Instant::now();
        let child = Command::new(&self.program)
            .args(&args)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output();

        let output = match tokio::time::timeout(wait, child).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                return Err(ResolutionFailure::Tool(format!(
                    "failed to run {}: {e}",
                    self.program
                )))
            }
            Err(_) => return Err(ResolutionFailure::Timeout(wait.as_millis() as u64)),
        };
        let elapsed_ms = start.elapsed().as_secs_f64() * 1000.0;
        let raw = String::from_utf8_lossy(&output.stdout).into_owned();

        if !output.status.success() {
            if output.status.code() == Some(DIG_EXIT_NO_REPLY) {
                return Err(ResolutionFailure::Timeout(query.timeout.as_millis() as u64));
            }
            let stderr = String::from_utf8_lossy(&output.stderr);
            let reason = stderr
                .lines()
                .chain(raw.lines())
                .find(|l| !l.trim().is_empty())
                .unwrap_or("no output")
                .trim()
                .to_string();
            return Err(ResolutionFailure::Tool(format!(
                "{} exited with {}: {reason}",
                self.program, output.status
            )));
        }

        if raw.contains(";; connection timed out") {
            return Err(ResolutionFailure::Timeout(query.timeout.as_millis() as u64));
        }

        Ok(QueryAnswer {
            records: parse_answer_section(&raw),
            elapsed_ms,
            raw,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ANSWER_FIXTURE: &str = "\
; <<>> DiG 9.18.18 <<>> www.example.com A +noall +answer
;; global options: +cmd
www.example.com.\t60\tIN\tCNAME\tlb.example.net.
lb.example.net.\t\t30\tIN\tA\t52.17.200.1
lb.example.net.\t\t45\tIN\tA\t54.72.9.14
";

    const TXT_FIXTURE: &str = "\
o-o.myaddr.l.google.com. 60\tIN\tTXT\t\"172.253.1.133\"
o-o.myaddr.l.google.com. 60\tIN\tTXT\t\"edns0-client-subnet 81.2.69.0/24\"
";

    const NS_FIXTURE: &str = "\
example.com.\t\t172800\tIN\tNS\tns-101.awsdns-12.com.
example.com.\t\t172800\tIN\tNS\tns-1400.awsdns-47.org.
";

    #[test]
    fn test_parse_answer_section() {
        let records = parse_answer_section(ANSWER_FIXTURE);
        assert_eq!(records.len(), 3);
        assert_eq!(records[0].kind, "CNAME");
        assert_eq!(records[0].data, "lb.example.net");
        assert_eq!(records[1].name, "lb.example.net");
        assert_eq!(records[1].ttl, 30);

        let answer = QueryAnswer {
            records,
            ..QueryAnswer::default()
        };
        assert_eq!(
            answer.ipv4_addresses(),
            vec![
                "52.17.200.1".parse::<Ipv4Addr>().unwrap(),
                "54.72.9.14".parse().unwrap()
            ]
        );
        assert_eq!(answer.min_ttl(), Some(30));
    }

    #[test]
    fn test_parse_txt_and_ns() {
        let answer = QueryAnswer {
            records: parse_answer_section(TXT_FIXTURE),
            ..QueryAnswer::default()
        };
        let txt = answer.values(RecordKind::Txt);
        assert_eq!(txt[0], "172.253.1.133");
        assert_eq!(txt[1], "edns0-client-subnet 81.2.69.0/24");

        let ns = QueryAnswer {
            records: parse_answer_section(NS_FIXTURE),
            ..QueryAnswer::default()
        };
        assert_eq!(
            ns.values(RecordKind::Ns),
            vec!["ns-101.awsdns-12.com", "ns-1400.awsdns-47.org"]
        );
    }

    #[test]
    fn test_dig_args() {
        let query = DnsQuery::a("example.com")
            .via("8.8.8.8".parse().unwrap())
            .with_subnet("81.2.69.0/24")
            .with_timeout(Duration::from_secs(2));
        assert_eq!(
            DigTool::args(&query),
            vec![
                "@8.8.8.8",
                "example.com",
                "A",
                "+noall",
                "+answer",
                "+time=2",
                "+tries=1",
                "+subnet=81.2.69.0/24"
            ]
        );
    }

    #[tokio::test]
    async fn test_missing_program_is_tool_failure() {
        let tool = DigTool::new("definitely-not-a-real-dig-binary");
        let result = tool.query(&DnsQuery::a("example.com")).await;
        assert!(matches!(result, Err(ResolutionFailure::Tool(_))));
    }
}
