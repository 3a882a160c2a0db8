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

//! The hosts-file rule engine: grammar, digest-based indexing, and the
//! priority/kind/specificity lookup order.

mod rule;

pub use rule::{HostsRule, Kind, Priority, QueryType, REGEX_DIGEST};

use crate::error::{MatchError, Result};
use crate::server::{DnsServer, Health};
use hashbrown::HashMap;
use log::warn;
use std::rc::Rc;

enum Section {
    Preamble,
    Config,
    Hosts,
}

/// Parsed `[DNS Config]` groups plus the digest-indexed `[hosts]` rules.
///
/// Rules are kept behind `Rc` so a session can hold on to the matched rule
/// (`matched_rule_` in the original is a `shared_ptr<const HostsRule>`)
/// without cloning its address lists or compiled regex on every lookup.
#[derive(Debug, Default)]
pub struct HostsIndex {
    digest_map: HashMap<String, Vec<Rc<HostsRule>>>,
    groups: HashMap<String, Vec<DnsServer>>,
}

impl HostsIndex {
    /// Parse a whole hosts file's text. A `[hosts]` line that fails to parse
    /// (e.g. a bare pattern with no address or group token) is logged and
    /// skipped rather than aborting the whole load — a malformed `[DNS
    /// Config]` group line is still fatal, since every `[hosts]` line after
    /// it may depend on the group it was meant to define.
    pub fn from_text(text: &str) -> Result<Self> {
        let mut index = Self::default();
        let mut section = Section::Preamble;

        for line in text.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('!') {
                continue;
            }
            match line {
                "[DNS Config]" => {
                    section = Section::Config;
                    continue;
                }
                "[hosts]" => {
                    section = Section::Hosts;
                    continue;
                }
                _ => {}
            }

            match section {
                Section::Preamble => continue,
                Section::Config => index.parse_group_line(line)?,
                Section::Hosts => {
                    if let Err(e) = index.parse_rule_line(line) {
                        warn!("skipping unparsable hosts line {line:?}: {e}");
                    }
                }
            }
        }

        Ok(index)
    }

    fn parse_group_line(&mut self, line: &str) -> Result<()> {
        let (name, list) = line
            .split_once('=')
            .ok_or_else(|| MatchError::InvalidServer(line.to_string()))?;
        let name = name.trim().to_string();
        let servers = DnsServer::parse_list(list, Health::Trusted)?;
        if servers.is_empty() {
            return Err(MatchError::EmptyGroup(name));
        }
        self.groups.insert(name, servers);
        Ok(())
    }

    fn parse_rule_line(&mut self, line: &str) -> Result<()> {
        let groups = &self.groups;
        let rule = HostsRule::parse(line, |name| groups.get(name).cloned())?;
        let digest = rule.digest().to_string();
        self.digest_map.entry(digest).or_default().push(Rc::new(rule));
        Ok(())
    }

    /// Find the best rule matching `(name, qtype)`, per the priority →
    /// kind → specificity ordering.
    pub fn lookup(&self, name: &str, qtype: QueryType) -> Option<Rc<HostsRule>> {
        let mut candidates: Vec<&Rc<HostsRule>> = self
            .digest_map
            .get(REGEX_DIGEST)
            .into_iter()
            .flatten()
            .collect();

        for (digest, rules) in &self.digest_map {
            if digest != REGEX_DIGEST && name.contains(digest.as_str()) {
                candidates.extend(rules);
            }
        }

        candidates.sort_by(|a, b| {
            (b.priority, b.kind, b.specificity(qtype)).cmp(&(a.priority, a.kind, a.specificity(qtype)))
        });

        candidates
            .into_iter()
            .find(|rule| rule.matches_name(name) && rule.usable_for(qtype))
            .cloned()
    }
}
