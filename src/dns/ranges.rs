//! Static provider and region address tables.
//!
//! The tables are built once ([`RangeTables::shared`]) and never mutated, so
//! concurrent test runs can share them freely. Region CIDRs must not overlap:
//! any address inside a listed block maps to exactly one region.

use ipnet::Ipv4Net;
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::net::Ipv4Addr;
use std::sync::Arc;

/// Endpoint id returned when no configured endpoint matches an address.
pub const DEFAULT_ENDPOINT: &str = "default-endpoint";

/// Region label used when nothing better is known.
pub const UNKNOWN_REGION: &str = "unknown-region";

/// Cloud provider recognized by the address tables.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum CloudProvider {
    Aws,
    Google,
    Microsoft,
    Cloudflare,
}

impl CloudProvider {
    /// Short lowercase label used inside endpoint ids.
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            Self::Aws => "aws",
            Self::Google => "google",
            Self::Microsoft => "azure",
            Self::Cloudflare => "cloudflare",
        }
    }
}

impl std::fmt::Display for CloudProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Aws => write!(f, "AWS"),
            Self::Google => write!(f, "Google Cloud"),
            Self::Microsoft => write!(f, "Microsoft Azure"),
            Self::Cloudflare => write!(f, "Cloudflare"),
        }
    }
}

const PROVIDER_PREFIXES: &[(CloudProvider, &[&str])] = &[
    (
        CloudProvider::Cloudflare,
        &[
            "1.1.1.", "1.0.0.", "104.16.", "104.17.", "104.18.", "104.19.", "104.20.",
            "104.21.", "104.22.", "104.23.", "104.24.", "104.25.", "104.26.", "104.27.",
            "172.64.", "172.65.", "172.66.", "172.67.", "162.158.", "162.159.", "188.114.",
            "198.41.", "141.101.", "108.162.", "190.93.", "173.245.", "103.21.", "103.22.",
            "103.31.", "131.0.72.",
        ],
    ),
    (
        CloudProvider::Microsoft,
        &[
            "13.64.", "13.65.", "13.66.", "13.67.", "13.68.", "13.69.", "13.70.", "13.71.",
            "13.72.", "13.73.", "13.74.", "13.75.", "13.76.", "13.77.", "13.78.", "13.79.",
            "20.", "40.", "104.40.", "104.208.", "137.116.", "137.117.", "138.91.",
            "168.61.", "168.62.", "168.63.", "191.232.", "191.233.",
        ],
    ),
    (
        CloudProvider::Google,
        &[
            "8.8.", "8.34.", "8.35.", "34.", "35.", "104.154.", "104.196.", "104.199.",
            "108.59.", "108.177.", "130.211.", "142.250.", "142.251.", "172.217.",
            "172.253.", "216.58.", "216.239.", "74.125.", "64.233.",
        ],
    ),
    (
        CloudProvider::Aws,
        &[
            "3.", "13.", "15.", "18.", "23.20.", "44.", "50.16.", "50.17.", "52.", "54.",
            "63.32.", "99.77.", "99.78.", "107.20.", "107.21.", "107.22.", "107.23.",
            "176.32.", "177.71.", "184.72.", "204.236.", "205.251.",
        ],
    ),
];

const AWS_REGION_CIDRS: &[(&str, &[&str])] = &[
    (
        "us-east-1",
        &[
            "3.80.0.0/12", "18.204.0.0/14", "34.192.0.0/12", "44.192.0.0/11", "52.0.0.0/15",
            "52.2.0.0/15", "52.4.0.0/14", "54.80.0.0/13", "54.144.0.0/14", "107.20.0.0/14",
        ],
    ),
    (
        "us-east-2",
        &[
            "3.12.0.0/14", "3.128.0.0/12", "13.58.0.0/15", "18.188.0.0/14", "18.216.0.0/14",
            "52.14.0.0/16",
        ],
    ),
    (
        "us-west-1",
        &["13.52.0.0/16", "13.56.0.0/16", "52.8.0.0/16", "54.176.0.0/15", "184.72.0.0/18"],
    ),
    (
        "us-west-2",
        &[
            "34.208.0.0/12", "35.160.0.0/13", "44.224.0.0/11", "52.32.0.0/14", "54.68.0.0/14",
            "54.184.0.0/13",
        ],
    ),
    (
        "ca-central-1",
        &["3.96.0.0/14", "15.222.0.0/15", "35.182.0.0/15", "52.60.0.0/16"],
    ),
    (
        "sa-east-1",
        &["18.228.0.0/16", "52.67.0.0/16", "54.232.0.0/16", "177.71.128.0/17"],
    ),
    (
        "eu-west-1",
        &[
            "34.240.0.0/13", "52.16.0.0/15", "52.48.0.0/14", "54.72.0.0/15", "54.216.0.0/14",
            "63.32.0.0/14",
        ],
    ),
    (
        "eu-west-2",
        &["3.8.0.0/14", "18.130.0.0/16", "35.176.0.0/15", "52.56.0.0/16"],
    ),
    (
        "eu-central-1",
        &[
            "3.120.0.0/14", "18.184.0.0/15", "18.192.0.0/15", "35.156.0.0/14", "52.28.0.0/16",
            "52.57.0.0/16",
        ],
    ),
    (
        "ap-south-1",
        &["3.6.0.0/15", "13.126.0.0/15", "13.232.0.0/14", "15.206.0.0/15", "52.66.0.0/16"],
    ),
    (
        "ap-southeast-1",
        &["13.228.0.0/15", "18.136.0.0/16", "52.74.0.0/16", "54.169.0.0/16", "54.251.0.0/16"],
    ),
    (
        "ap-southeast-2",
        &["3.104.0.0/14", "13.54.0.0/15", "52.62.0.0/15", "54.252.0.0/16"],
    ),
    (
        "ap-northeast-1",
        &[
            "3.112.0.0/14", "13.112.0.0/14", "18.176.0.0/15", "52.68.0.0/15", "54.64.0.0/15",
            "54.238.0.0/16",
        ],
    ),
];

/// First octet, inclusive second-octet range, region.
const AWS_OCTET_HINTS: &[(u8, u8, u8, &str)] = &[
    (3, 64, 127, "us-east-1"),
    (13, 32, 63, "us-west-1"),
    (18, 128, 159, "eu-west-2"),
    (52, 0, 15, "us-east-1"),
    (52, 16, 31, "eu-west-1"),
    (52, 32, 47, "us-west-2"),
    (52, 48, 63, "eu-west-1"),
    (52, 64, 79, "ap-northeast-1"),
    (54, 64, 79, "ap-northeast-1"),
    (54, 80, 95, "us-east-1"),
    (54, 144, 159, "us-east-1"),
    (54, 160, 191, "us-west-2"),
    (54, 192, 223, "eu-west-1"),
    (54, 224, 255, "ap-southeast-1"),
];

const KNOWN_SERVICES: &[(&str, &str)] = &[
    ("8.8.8.8", "google-dns-primary"),
    ("8.8.4.4", "google-dns-secondary"),
    ("1.1.1.1", "cloudflare-dns-primary"),
    ("1.0.0.1", "cloudflare-dns-secondary"),
    ("9.9.9.9", "quad9-dns"),
    ("149.112.112.112", "quad9-dns-secondary"),
    ("208.67.222.222", "opendns-primary"),
    ("208.67.220.220", "opendns-secondary"),
    ("169.254.169.253", "aws-vpc-resolver"),
];

/// Coarse geographic bucket derived from an IP-geolocation label.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum GeoBucket {
    Us,
    Eu,
    Asia,
}

const US_COUNTRIES: &[&str] = &["US", "CA", "MX", "UNITED STATES", "CANADA", "MEXICO"];
const EU_COUNTRIES: &[&str] = &[
    "GB", "IE", "FR", "DE", "NL", "BE", "LU", "ES", "PT", "IT", "CH", "AT", "DK", "SE", "NO",
    "FI", "PL", "CZ", "SK", "HU", "RO", "BG", "GR", "UNITED KINGDOM", "IRELAND", "FRANCE",
    "GERMANY", "NETHERLANDS", "SPAIN", "ITALY", "SWEDEN",
];
const ASIA_COUNTRIES: &[&str] = &[
    "JP", "KR", "CN", "HK", "TW", "SG", "IN", "ID", "TH", "VN", "MY", "PH", "AU", "NZ",
    "JAPAN", "KOREA", "CHINA", "HONG KONG", "SINGAPORE", "INDIA", "AUSTRALIA",
];

impl GeoBucket {
    /// Map a country code or name to a bucket.
    #[must_use]
    pub fn from_location(label: &str) -> Option<Self> {
        let label = label.trim().to_uppercase();
        if label.is_empty() || label == "UNKNOWN LOCATION" {
            return None;
        }
        if US_COUNTRIES.contains(&label.as_str()) {
            Some(Self::Us)
        } else if EU_COUNTRIES.contains(&label.as_str()) {
            Some(Self::Eu)
        } else if ASIA_COUNTRIES.contains(&label.as_str()) {
            Some(Self::Asia)
        } else {
            None
        }
    }

    /// Region assumed for addresses in this bucket.
    #[must_use]
    pub fn default_region(&self) -> &'static str {
        match self {
            Self::Us => "us-east-1",
            Self::Eu => "eu-west-1",
            Self::Asia => "ap-southeast-1",
        }
    }

    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            Self::Us => "us",
            Self::Eu => "eu",
            Self::Asia => "asia",
        }
    }
}

/// A network block tested with a masked integer comparison.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cidr {
    network: u32,
    mask: u32,
}

impl Cidr {
    /// Parse `a.b.c.d/len`. A bare address is treated as `/32`.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        let net: Ipv4Net = if s.contains('/') {
            s.trim().parse().ok()?
        } else {
            Ipv4Net::new(s.trim().parse().ok()?, 32).ok()?
        };
        Some(Self {
            network: u32::from(net.network()),
            mask: u32::from(net.netmask()),
        })
    }

    /// Standard CIDR membership test: `(ip & mask) == (network & mask)`.
    #[must_use]
    pub fn contains(&self, ip: Ipv4Addr) -> bool {
        (u32::from(ip) & self.mask) == (self.network & self.mask)
    }

    /// First address of the block.
    #[must_use]
    pub fn first(&self) -> Ipv4Addr {
        Ipv4Addr::from(self.network & self.mask)
    }

    /// Last address of the block.
    #[must_use]
    pub fn last(&self) -> Ipv4Addr {
        Ipv4Addr::from((self.network & self.mask) | !self.mask)
    }

    #[cfg(test)]
    fn overlaps(&self, other: &Self) -> bool {
        self.contains(other.first()) || other.contains(self.first())
    }
}

/// Immutable lookup tables consulted by the classifier.
#[derive(Debug, Clone)]
pub struct RangeTables {
    /// Provider prefixes, longest first.
    prefixes: Vec<(&'static str, CloudProvider)>,
    aws_regions: Vec<(Cidr, &'static str)>,
    octet_hints: Vec<(u8, u8, u8, &'static str)>,
    known_services: HashMap<Ipv4Addr, &'static str>,
}

static SHARED_TABLES: Lazy<Arc<RangeTables>> = Lazy::new(|| Arc::new(RangeTables::builtin()));

impl RangeTables {
    /// Build the tables from the compiled-in data.
    #[must_use]
    pub fn builtin() -> Self {
        let mut prefixes: Vec<(&'static str, CloudProvider)> = PROVIDER_PREFIXES
            .iter()
            .flat_map(|(provider, list)| list.iter().map(move |p| (*p, *provider)))
            .collect();
        // stable sort keeps table order among equal lengths
        prefixes.sort_by(|a, b| b.0.len().cmp(&a.0.len()));

        let aws_regions = AWS_REGION_CIDRS
            .iter()
            .flat_map(|(region, cidrs)| {
                cidrs
                    .iter()
                    .filter_map(move |c| Cidr::parse(c).map(|cidr| (cidr, *region)))
            })
            .collect();

        let known_services = KNOWN_SERVICES
            .iter()
            .filter_map(|(ip, name)| ip.parse().ok().map(|ip| (ip, *name)))
            .collect();

        Self {
            prefixes,
            aws_regions,
            octet_hints: AWS_OCTET_HINTS.to_vec(),
            known_services,
        }
    }

    /// Process-wide shared copy of the builtin tables.
    #[must_use]
    pub fn shared() -> Arc<Self> {
        Arc::clone(&SHARED_TABLES)
    }

    /// Provider whose prefix matches the textual address.
    #[must_use]
    pub fn provider_for_prefix(&self, ip: &str) -> Option<CloudProvider> {
        self.prefixes
            .iter()
            .find(|(prefix, _)| ip.starts_with(prefix))
            .map(|(_, provider)| *provider)
    }

    /// AWS region whose CIDR contains the address.
    #[must_use]
    pub fn aws_region_for(&self, ip: Ipv4Addr) -> Option<&'static str> {
        self.aws_regions
            .iter()
            .find(|(cidr, _)| cidr.contains(ip))
            .map(|(_, region)| *region)
    }

    /// First/second octet guess for AWS addresses outside the CIDR table.
    #[must_use]
    pub fn aws_octet_hint(&self, ip: Ipv4Addr) -> Option<&'static str> {
        let [first, second, ..] = ip.octets();
        self.octet_hints
            .iter()
            .find(|(f, lo, hi, _)| *f == first && (*lo..=*hi).contains(&second))
            .map(|(_, _, _, region)| *region)
    }

    /// Fixed name for a well-known service address.
    #[must_use]
    pub fn known_service(&self, ip: Ipv4Addr) -> Option<&'static str> {
        self.known_services.get(&ip).copied()
    }

    /// All region CIDR blocks with their region.
    #[cfg(test)]
    pub(crate) fn aws_region_blocks(&self) -> impl Iterator<Item = (Cidr, &'static str)> + '_ {
        self.aws_regions.iter().copied()
    }
}

/// Inclusive address range written as `a.b.c.d-e.f.g.h` or `a.b.c.d-h`.
fn range_contains(pattern: &str, ip: Ipv4Addr) -> bool {
    let Some((start, end)) = pattern.split_once('-') else {
        return false;
    };
    let Ok(start) = start.trim().parse::<Ipv4Addr>() else {
        return false;
    };
    let end = end.trim();
    let end = if end.contains('.') {
        end.parse::<Ipv4Addr>().ok()
    } else {
        end.parse::<u8>().ok().map(|last| {
            let [a, b, c, _] = start.octets();
            Ipv4Addr::new(a, b, c, last)
        })
    };
    end.is_some_and(|end| (u32::from(start)..=u32::from(end)).contains(&u32::from(ip)))
}

/// Octet-wise pattern where `*` matches anything; a trailing `*` covers the rest.
fn wildcard_matches(pattern: &str, ip: Ipv4Addr) -> bool {
    if !pattern.contains('*') {
        return false;
    }
    let parts: Vec<&str> = pattern.trim().split('.').collect();
    if parts.is_empty() || parts.len() > 4 {
        return false;
    }
    let octets = ip.octets();
    for (idx, octet) in octets.iter().enumerate() {
        match parts.get(idx) {
            Some(&"*") => {}
            Some(part) => {
                if part.parse::<u8>().ok() != Some(*octet) {
                    return false;
                }
            }
            None => return parts.last() == Some(&"*"),
        }
    }
    true
}

fn cidr_key_contains(key: &str, ip: Ipv4Addr) -> bool {
    key.contains('/') && Cidr::parse(key).is_some_and(|c| c.contains(ip))
}

fn same_slash24(key: &str, ip: Ipv4Addr) -> bool {
    key.trim()
        .parse::<Ipv4Addr>()
        .is_ok_and(|k| k.octets()[..3] == ip.octets()[..3])
}

/// Match an address against configured endpoint keys.
///
/// Keys may be exact addresses, CIDR blocks, dash ranges or `*` wildcards.
/// Each kind is tried across all keys before the next kind, in the order
/// exact, CIDR, range, wildcard, then same-/24 as a last resort.
#[must_use]
pub fn match_expected_endpoint<'a, I>(ip: &str, keys: I) -> Option<&'a str>
where
    I: IntoIterator<Item = &'a String>,
{
    let keys: Vec<&'a str> = keys.into_iter().map(String::as_str).collect();
    let ip_text = ip.trim();
    if let Some(exact) = keys.iter().find(|k| k.trim() == ip_text) {
        return Some(exact);
    }

    let addr: Ipv4Addr = ip_text.parse().ok()?;
    let passes: [fn(&str, Ipv4Addr) -> bool; 4] = [
        cidr_key_contains,
        range_contains,
        wildcard_matches,
        same_slash24,
    ];
    passes
        .iter()
        .find_map(|pass| keys.iter().copied().find(|k| pass(k, addr)))
}

/// Like [`match_expected_endpoint`], returning [`DEFAULT_ENDPOINT`] when nothing matches.
#[must_use]
pub fn find_expected_endpoint_for_ip(ip: &str, expected: &BTreeMap<String, u32>) -> String {
    match_expected_endpoint(ip, expected.keys())
        .unwrap_or(DEFAULT_ENDPOINT)
        .to_string()
}
