//! Suffix routing table.
//!
//! Entries are kept ordered by descending suffix length so that the first
//! suffix match found by a linear scan is the most specific one. The table is
//! assembled with [`RoutingTableBuilder`] and frozen into a [`RoutingTable`],
//! which has no mutating methods and can be shared across tasks as-is.

use std::sync::Arc;

use super::name::DomainName;
use super::upstream::Upstream;

/// Collects upstream entries during configuration.
#[derive(Debug, Default)]
pub struct RoutingTableBuilder {
    entries: Vec<Upstream>,
}

impl RoutingTableBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an entry, keeping longer suffixes ahead of shorter ones.
    ///
    /// Entries with equal suffix length keep their insertion order.
    pub fn insert(&mut self, upstream: Upstream) -> &mut Self {
        let at = self
            .entries
            .partition_point(|entry| entry.domain.len() >= upstream.domain.len());
        self.entries.insert(at, upstream);
        self
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn build(self) -> RoutingTable {
        RoutingTable {
            entries: self.entries.into(),
        }
    }
}

impl FromIterator<Upstream> for RoutingTableBuilder {
    fn from_iter<I: IntoIterator<Item = Upstream>>(iter: I) -> Self {
        let mut builder = Self::new();
        for upstream in iter {
            builder.insert(upstream);
        }
        builder
    }
}

/// Read-only routing table. Cloning shares the entries.
#[derive(Debug, Clone)]
pub struct RoutingTable {
    entries: Arc<[Upstream]>,
}

impl RoutingTable {
    pub fn builder() -> RoutingTableBuilder {
        RoutingTableBuilder::new()
    }

    /// Find the most specific upstream whose suffix matches `domain`.
    pub fn resolve(&self, domain: &DomainName) -> Option<&Upstream> {
        self.entries
            .iter()
            .find(|entry| domain.has_suffix(&entry.domain))
    }

    /// Entries in lookup order.
    pub fn iter(&self) -> impl Iterator<Item = &Upstream> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dns::Transport;
    use std::net::SocketAddr;

    fn upstream(domain: &str, port: u16) -> Upstream {
        let address = SocketAddr::from(([127, 0, 0, 1], port));
        Upstream::new(domain, Transport::Datagram, address)
    }

    fn table() -> RoutingTable {
        [
            upstream(".", 1),
            upstream("example.com", 2),
            upstream("a.example.com", 3),
        ]
        .into_iter()
        .collect::<RoutingTableBuilder>()
        .build()
    }

    #[test]
    fn should_order_entries_by_descending_suffix_length() {
        let lengths: Vec<usize> = table().iter().map(|u| u.domain.len()).collect();
        assert_eq!(lengths, vec![14, 12, 1]);
        assert!(table().iter().last().unwrap().domain.is_root());
    }

    #[test]
    fn should_prefer_longest_matching_suffix() {
        let table = table();
        let hit = table.resolve(&"x.a.example.com".into()).unwrap();
        assert_eq!(hit.domain.to_string(), "a.example.com.");
    }

    #[test]
    fn should_fall_back_to_root() {
        let table = table();
        let hit = table.resolve(&"other.com".into()).unwrap();
        assert!(hit.domain.is_root());
    }

    #[test]
    fn should_match_exact_suffix_before_root() {
        let table = table();
        let hit = table.resolve(&"example.com".into()).unwrap();
        assert_eq!(hit.domain.to_string(), "example.com.");
        assert_eq!(hit.address.port(), 2);
    }

    #[test]
    fn should_report_no_route_without_default() {
        let table = [upstream("corp.local", 1)]
            .into_iter()
            .collect::<RoutingTableBuilder>()
            .build();
        assert!(table.resolve(&"example.com".into()).is_none());
        assert!(table.resolve(&DomainName::root()).is_none());
    }

    #[test]
    fn should_keep_insertion_order_for_equal_lengths() {
        let mut builder = RoutingTable::builder();
        builder.insert(upstream("aa.com", 1)).insert(upstream("bb.com", 2));
        let table = builder.build();
        let ports: Vec<u16> = table.iter().map(|u| u.address.port()).collect();
        assert_eq!(ports, vec![1, 2]);
    }

    #[test]
    fn should_share_entries_between_clones() {
        let table = table();
        let copy = table.clone();
        assert!(std::ptr::eq(
            table.iter().next().unwrap(),
            copy.iter().next().unwrap()
        ));
    }
}
