//! Static overlay configuration
//!
//! The overlay topology is fixed at startup by a whitespace-separated token
//! file. The first token selects the consistency method (0 = push,
//! 1 = pull-from-origin, 2 = pull-from-peers); if a pull method is selected
//! the next token is the TTR in seconds; the token after that is the flood
//! TTL. Every following line describes one member:
//!
//! ```text
//! 0 <id> <port> <comma-list of peer ports> <comma-list of leaf ports>
//! 1 <id> <port> <super-peer port>
//! ```
//!
//! Lines whose first token is neither member type are skipped, so one file can
//! carry commentary alongside mixed super-peer and leaf records. A comma-list
//! token with no positive entries (conventionally `0`) denotes an empty list.

use std::path::Path;

use crate::error::{MeshError, MeshResult};

/// Cache-consistency scheme a deployment runs; every member reads the same
/// value from the shared configuration file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsistencyMethod {
    /// Origin modifications are pushed through the super-peer graph as
    /// invalidations.
    Push,
    /// Leaves poll each cached file's origin node directly; super-peers stay
    /// passive.
    PullNode,
    /// Super-peers queue origin modifications and broadcast compare messages
    /// every TTR.
    PullPeer,
}

impl ConsistencyMethod {
    fn from_token(tok: &str) -> MeshResult<Self> {
        match tok {
            "0" => Ok(ConsistencyMethod::Push),
            "1" => Ok(ConsistencyMethod::PullNode),
            "2" => Ok(ConsistencyMethod::PullPeer),
            other => Err(MeshError::Config(format!(
                "unknown consistency method token {other:?}"
            ))),
        }
    }

    /// Pull methods carry a TTR token in the configuration header.
    pub fn uses_ttr(self) -> bool {
        matches!(self, ConsistencyMethod::PullNode | ConsistencyMethod::PullPeer)
    }
}

/// One super-peer record from the configuration file.
#[derive(Debug, Clone)]
pub struct SuperPeerRecord {
    /// CLI handle used to select this record at startup.
    pub id: i32,

    /// Listen port; also this super-peer's identity in flood message ids.
    pub port: i32,

    /// Neighbor super-peer ports forming the static peer graph.
    pub peers: Vec<i32>,

    /// Ports of the leaves attached to this super-peer.
    pub leaves: Vec<i32>,
}

/// One leaf record from the configuration file.
#[derive(Debug, Clone)]
pub struct LeafRecord {
    /// CLI handle used to select this record at startup.
    pub id: i32,

    /// Listen port; doubles as the leaf's protocol id, so search results are
    /// directly dialable.
    pub port: i32,

    /// Port of the one super-peer this leaf attaches to.
    pub super_peer_port: i32,
}

/// Parsed overlay configuration shared by every member of a deployment.
#[derive(Debug, Clone)]
pub struct OverlayConfig {
    pub consistency: ConsistencyMethod,

    /// Time-to-refresh in seconds; zero when the method is push.
    pub ttr: u64,

    /// Initial TTL for flooded query/invalidate/compare messages.
    pub ttl: i32,

    pub super_peers: Vec<SuperPeerRecord>,
    pub leaves: Vec<LeafRecord>,
}

impl OverlayConfig {
    /// Load and parse the configuration file at `path`.
    pub fn load(path: impl AsRef<Path>) -> MeshResult<Self> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            MeshError::Config(format!("cannot read {}: {e}", path.as_ref().display()))
        })?;
        Self::parse(&content)
    }

    /// Parse configuration text (separated from `load` for tests).
    pub fn parse(content: &str) -> MeshResult<Self> {
        let lines: Vec<Vec<&str>> = content
            .lines()
            .map(|l| l.split_whitespace().collect())
            .collect();

        let mut header = lines.iter().flatten().copied();
        let mut next_header = |what: &str| {
            header
                .next()
                .ok_or_else(|| MeshError::Config(format!("missing {what} token")))
        };

        let consistency = ConsistencyMethod::from_token(next_header("consistency method")?)?;
        let ttr = if consistency.uses_ttr() {
            parse_int::<u64>(next_header("ttr")?, "ttr")?
        } else {
            0
        };
        let ttl = parse_int::<i32>(next_header("ttl")?, "ttl")?;

        // Member records are parsed line-wise; the header tokens above always
        // sit on their own leading line(s), and anything that is not a member
        // record is skipped.
        let mut super_peers = Vec::new();
        let mut leaves = Vec::new();
        for toks in &lines {
            match toks.first().copied() {
                Some("0") if toks.len() >= 5 => super_peers.push(SuperPeerRecord {
                    id: parse_int(toks[1], "super-peer id")?,
                    port: parse_int(toks[2], "super-peer port")?,
                    peers: parse_port_list(toks[3]),
                    leaves: parse_port_list(toks[4]),
                }),
                Some("1") if toks.len() >= 4 => leaves.push(LeafRecord {
                    id: parse_int(toks[1], "leaf id")?,
                    port: parse_int(toks[2], "leaf port")?,
                    super_peer_port: parse_int(toks[3], "super-peer port")?,
                }),
                _ => {}
            }
        }

        Ok(OverlayConfig {
            consistency,
            ttr,
            ttl,
            super_peers,
            leaves,
        })
    }

    /// Find the super-peer record registered under CLI id `id`.
    pub fn super_peer(&self, id: i32) -> MeshResult<&SuperPeerRecord> {
        self.super_peers
            .iter()
            .find(|r| r.id == id)
            .ok_or(MeshError::UnknownMember(id))
    }

    /// Find the leaf record registered under CLI id `id`.
    pub fn leaf(&self, id: i32) -> MeshResult<&LeafRecord> {
        self.leaves
            .iter()
            .find(|r| r.id == id)
            .ok_or(MeshError::UnknownMember(id))
    }
}

fn parse_int<T: std::str::FromStr>(tok: &str, what: &str) -> MeshResult<T> {
    tok.parse::<T>()
        .map_err(|_| MeshError::Config(format!("invalid {what} token {tok:?}")))
}

/// Parse a comma-separated port list; non-positive and unparsable entries are
/// dropped, so the conventional `0` placeholder yields an empty list.
fn parse_port_list(tok: &str) -> Vec<i32> {
    tok.split(',')
        .filter_map(|t| t.trim().parse::<i32>().ok())
        .filter(|&p| p > 0)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "\
2 30 4
0 1 8000 8001,8002 8100,8101
0 2 8001 8000,8002 8102
0 3 8002 8000,8001 0
1 10 8100 8000
1 11 8101 8000
1 12 8102 8001
";

    #[test]
    fn parses_pull_peer_header_and_members() {
        let cfg = OverlayConfig::parse(SAMPLE).unwrap();
        assert_eq!(cfg.consistency, ConsistencyMethod::PullPeer);
        assert_eq!(cfg.ttr, 30);
        assert_eq!(cfg.ttl, 4);
        assert_eq!(cfg.super_peers.len(), 3);
        assert_eq!(cfg.leaves.len(), 3);

        let s1 = cfg.super_peer(1).unwrap();
        assert_eq!(s1.port, 8000);
        assert_eq!(s1.peers, vec![8001, 8002]);
        assert_eq!(s1.leaves, vec![8100, 8101]);

        let l = cfg.leaf(12).unwrap();
        assert_eq!(l.port, 8102);
        assert_eq!(l.super_peer_port, 8001);
    }

    #[test]
    fn push_header_has_no_ttr_token() {
        let cfg = OverlayConfig::parse("0 7\n0 1 8000 0 8100\n").unwrap();
        assert_eq!(cfg.consistency, ConsistencyMethod::Push);
        assert_eq!(cfg.ttr, 0);
        assert_eq!(cfg.ttl, 7);
    }

    #[test]
    fn zero_placeholder_is_an_empty_list() {
        let cfg = OverlayConfig::parse(SAMPLE).unwrap();
        assert!(cfg.super_peer(3).unwrap().leaves.is_empty());
    }

    #[test]
    fn foreign_lines_are_skipped() {
        let cfg = OverlayConfig::parse(
            "1 10 5\n# topology below\n0 1 8000 0 8100\nnoise noise\n1 10 8100 8000\n",
        )
        .unwrap();
        assert_eq!(cfg.consistency, ConsistencyMethod::PullNode);
        assert_eq!(cfg.ttr, 10);
        assert_eq!(cfg.super_peers.len(), 1);
        assert_eq!(cfg.leaves.len(), 1);
    }

    #[test]
    fn unknown_member_id_is_an_error() {
        let cfg = OverlayConfig::parse(SAMPLE).unwrap();
        assert!(matches!(cfg.leaf(99), Err(MeshError::UnknownMember(99))));
        assert!(matches!(
            cfg.super_peer(99),
            Err(MeshError::UnknownMember(99))
        ));
    }

    #[test]
    fn bad_method_token_is_an_error() {
        assert!(OverlayConfig::parse("9 4\n").is_err());
    }
}
