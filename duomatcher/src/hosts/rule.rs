// Copyright 2020 LEXUGE
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program.  If not, see <http://www.gnu.org/licenses/>.

//! A single hosts-file rule: its priority, pattern kind, digest, and either
//! a literal answer address list or a named upstream group to route to.

use crate::error::{MatchError, Result};
use crate::server::DnsServer;
use once_cell::sync::Lazy;
use regex::Regex;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

/// Record type a query asks for. `A`/`Aaaa` participate in trusted-net
/// matching and hosts-engine address lookups; `Other` is every other
/// qtype (MX, TXT, ...), which passes straight through both.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueryType {
    A,
    Aaaa,
    Other,
}

/// Match priority, ordered worst to best so `Ord` gives "higher is better".
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Priority {
    Low,
    MediumLow,
    Medium,
    MediumHigh,
    High,
}

impl Priority {
    fn from_digit(d: char) -> Option<Self> {
        match d {
            '1' => Some(Priority::High),
            '2' => Some(Priority::MediumHigh),
            '3' => Some(Priority::Medium),
            '4' => Some(Priority::MediumLow),
            '5' => Some(Priority::Low),
            _ => None,
        }
    }
}

/// Pattern kind, ordered worst to best so `Ord` gives "higher is better"
/// (`Raw` beats `Wildcard` beats `Regex` at equal priority).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Kind {
    Regex,
    Wildcard,
    Raw,
}

static DIGEST_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"[A-Za-z0-9.-]{3,}").unwrap());

/// Sentinel digest under which every regex rule is filed.
pub const REGEX_DIGEST: &str = "/^regex$/";

/// One parsed `[hosts]` line.
#[derive(Debug, Clone)]
pub struct HostsRule {
    pub priority: Priority,
    pub kind: Kind,
    pub ipv4: Vec<Ipv4Addr>,
    pub ipv6: Vec<Ipv6Addr>,
    pub group: Option<Vec<DnsServer>>,
    pattern: String,
    matcher: Option<Regex>,
}

impl HostsRule {
    /// Parse one whitespace-tokenized rule line. `lookup_group` resolves a
    /// previously-defined `[DNS Config]` group name to its server list.
    pub fn parse(line: &str, lookup_group: impl Fn(&str) -> Option<Vec<DnsServer>>) -> Result<Self> {
        let mut tokens = line.split_whitespace();

        let mut token = tokens.next().ok_or_else(|| MatchError::InvalidServer(line.to_string()))?;

        let mut priority = None;
        if let Some(stripped) = token.strip_prefix('<').and_then(|s| s.strip_suffix('>')) {
            let mut chars = stripped.chars();
            let digit = chars.next().filter(|_| chars.next().is_none());
            priority = Some(
                digit
                    .and_then(Priority::from_digit)
                    .ok_or_else(|| MatchError::InvalidPriority(token.to_string()))?,
            );
            token = tokens.next().ok_or_else(|| MatchError::InvalidServer(line.to_string()))?;
        }

        let (ipv4, ipv6, group) = match parse_ip_list_token(token) {
            Some((v4, v6)) => (v4, v6, None),
            None => {
                let group = lookup_group(token).ok_or_else(|| MatchError::UnknownGroup(token.to_string()))?;
                (Vec::new(), Vec::new(), Some(group))
            }
        };

        let pattern = tokens
            .next()
            .ok_or_else(|| MatchError::InvalidServer(line.to_string()))?
            .to_string();

        if ipv4.is_empty() && ipv6.is_empty() && group.is_none() {
            return Err(MatchError::EmptyGroup(line.to_string()));
        }

        let (kind, matcher) = classify(&pattern)?;

        let priority = priority.unwrap_or_else(|| {
            let mut p = Priority::Low;
            if !ipv4.is_empty() || !ipv6.is_empty() {
                p = Priority::MediumHigh;
            }
            if kind == Kind::Regex {
                p = Priority::Medium;
            }
            if group.is_some() {
                p = Priority::MediumLow;
            }
            p
        });

        Ok(Self {
            priority,
            kind,
            ipv4,
            ipv6,
            group,
            pattern,
            matcher,
        })
    }

    /// The substring used to index this rule, or [`REGEX_DIGEST`] for a
    /// regex rule (which cannot be indexed by substring).
    pub fn digest(&self) -> &str {
        if self.kind == Kind::Regex {
            return REGEX_DIGEST;
        }
        longest_digest(&self.pattern)
    }

    /// Length of the address list relevant to `qtype` — the specificity
    /// tiebreaker in `HostsIndex::lookup`.
    pub fn specificity(&self, qtype: QueryType) -> usize {
        match qtype {
            QueryType::A => self.ipv4.len(),
            QueryType::Aaaa => self.ipv6.len(),
            QueryType::Other => 0,
        }
    }

    /// Can this rule answer a query of `qtype` directly, or route it via a
    /// group?
    pub fn usable_for(&self, qtype: QueryType) -> bool {
        self.specificity(qtype) > 0 || self.group.is_some()
    }

    /// Does the rule's pattern match `name`?
    pub fn matches_name(&self, name: &str) -> bool {
        match &self.matcher {
            Some(re) => re.is_match(name),
            None => self.pattern == name,
        }
    }
}

fn classify(pattern: &str) -> Result<(Kind, Option<Regex>)> {
    if pattern.len() >= 3 && pattern.starts_with('/') && pattern.ends_with('/') {
        let inner = &pattern[1..pattern.len() - 1];
        let re = Regex::new(inner).map_err(|e| MatchError::InvalidRegex(pattern.to_string(), e))?;
        return Ok((Kind::Regex, Some(re)));
    }
    if pattern.contains('*') || pattern.contains('?') {
        let mut expr = String::with_capacity(pattern.len() + 2);
        expr.push('^');
        for ch in pattern.chars() {
            match ch {
                '.' => expr.push_str(r"\."),
                '?' => expr.push_str("[A-Za-z0-9-]+"),
                '*' => expr.push_str("[A-Za-z0-9-.]+"),
                other => expr.push(other),
            }
        }
        expr.push('$');
        let re = Regex::new(&expr).map_err(|e| MatchError::InvalidRegex(pattern.to_string(), e))?;
        return Ok((Kind::Wildcard, Some(re)));
    }
    Ok((Kind::Raw, None))
}

fn longest_digest(pattern: &str) -> &str {
    let mut best: Option<regex::Match> = None;
    for m in DIGEST_RE.find_iter(pattern) {
        let replace = match &best {
            Some(cur) => m.as_str().len() > cur.as_str().len(),
            None => true,
        };
        if replace {
            best = Some(m);
        }
    }
    best.map(|m| m.as_str()).unwrap_or("")
}

fn parse_ip(token: &str) -> Option<IpAddr> {
    if let Ok(ip) = token.parse::<IpAddr>() {
        return Some(ip);
    }
    if let Ok(addr) = token.parse::<std::net::SocketAddr>() {
        return Some(addr.ip());
    }
    let inner = token.strip_prefix('[').and_then(|s| s.split(']').next())?;
    inner.parse::<IpAddr>().ok()
}

fn parse_ip_list_token(token: &str) -> Option<(Vec<Ipv4Addr>, Vec<Ipv6Addr>)> {
    let mut v4 = Vec::new();
    let mut v6 = Vec::new();
    for part in token.split(',') {
        match parse_ip(part.trim())? {
            IpAddr::V4(a) => v4.push(a),
            IpAddr::V6(a) => v6.push(a),
        }
    }
    if v4.is_empty() && v6.is_empty() {
        return None;
    }
    Some((v4, v6))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::Health;

    fn no_groups(_: &str) -> Option<Vec<DnsServer>> {
        None
    }

    #[test]
    fn raw_rule_with_explicit_priority() {
        let r = HostsRule::parse("<1> 10.0.0.5 internal.lan", no_groups).unwrap();
        assert_eq!(r.priority, Priority::High);
        assert_eq!(r.kind, Kind::Raw);
        assert_eq!(r.ipv4, vec!["10.0.0.5".parse::<Ipv4Addr>().unwrap()]);
        assert!(r.matches_name("internal.lan"));
        assert!(!r.matches_name("other.lan"));
    }

    #[test]
    fn wildcard_rule_defaults_to_medium_high() {
        let r = HostsRule::parse("8.8.8.8 *.example.org", no_groups).unwrap();
        assert_eq!(r.kind, Kind::Wildcard);
        assert_eq!(r.priority, Priority::MediumHigh);
        assert!(r.matches_name("www.example.org"));
        assert!(!r.matches_name("www.example.org.evil.com"));
    }

    #[test]
    fn wildcard_question_mark_does_not_cross_dots() {
        let r = HostsRule::parse("8.8.8.8 ?.example.org", no_groups).unwrap();
        assert!(r.matches_name("a.example.org"));
        assert!(!r.matches_name("a.b.example.org"));
    }

    #[test]
    fn regex_rule_defaults_to_medium() {
        let r = HostsRule::parse("8.8.8.8 /^[a-z]+\\.example\\.org$/", no_groups).unwrap();
        assert_eq!(r.kind, Kind::Regex);
        assert_eq!(r.priority, Priority::Medium);
        assert_eq!(r.digest(), REGEX_DIGEST);
    }

    #[test]
    fn group_only_rule_defaults_to_medium_low() {
        let servers = vec![DnsServer::parse_one("8.8.8.8", Health::Trusted).unwrap()];
        let lookup = |name: &str| if name == "mygroup" { Some(servers.clone()) } else { None };
        let r = HostsRule::parse("mygroup *.example.org", lookup).unwrap();
        assert_eq!(r.priority, Priority::MediumLow);
        assert!(r.group.is_some());
        assert!(r.usable_for(QueryType::A));
    }

    #[test]
    fn unknown_group_is_an_error() {
        assert!(HostsRule::parse("mygroup example.org", no_groups).is_err());
    }

    #[test]
    fn digest_is_longest_alnum_dot_dash_run() {
        let r = HostsRule::parse("8.8.8.8 *.example.org", no_groups).unwrap();
        assert_eq!(r.digest(), ".example.org");
    }

    #[test]
    fn usable_for_respects_address_family() {
        let r = HostsRule::parse("<1> 10.0.0.5 internal.lan", no_groups).unwrap();
        assert!(r.usable_for(QueryType::A));
        assert!(!r.usable_for(QueryType::Aaaa));
    }
}
