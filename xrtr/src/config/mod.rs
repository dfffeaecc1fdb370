//! Configuration directive parser (spec §6.2): one directive per line,
//! `KEY value1\`value2\`...`. A directive that fails to parse is rejected;
//! the prior configuration is kept and the error logged (spec §7).

use std::collections::HashSet;

use crate::wildmap::SrcDstWildcardMap;

const MAX_NODE_LIST_SPAN: u64 = 100;

#[derive(Debug)]
pub enum ConfigError {
    UnknownDirective(String),
    MissingField(&'static str),
    InvalidInt(String),
    InvalidBool(String),
    InvalidNodeList(String),
    NodeRangeTooWide(u64, u64),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::UnknownDirective(d) => write!(f, "unknown directive {d:?}"),
            ConfigError::MissingField(name) => write!(f, "missing field {name}"),
            ConfigError::InvalidInt(s) => write!(f, "invalid integer {s:?}"),
            ConfigError::InvalidBool(s) => write!(f, "invalid bool {s:?}"),
            ConfigError::InvalidNodeList(s) => write!(f, "invalid node list {s:?}"),
            ConfigError::NodeRangeTooWide(a, b) => {
                write!(f, "node range {a}-{b} exceeds max span {MAX_NODE_LIST_SPAN}")
            }
        }
    }
}

impl std::error::Error for ConfigError {}

/// One parsed directive, ready to apply to a [`crate::nodeagent::NodeAgent`]
/// (via a `ConfigureLink`/`PolicyUpdate` message) or to the Supervisor's
/// transport settings.
#[derive(Debug, Clone, PartialEq)]
pub enum Directive {
    RemoteAddress(String),
    RemotePort(u16),
    ForwardLink {
        link_id: String,
        throttle_bps: u64,
        nodes: HashSet<u64>,
    },
    FwdlinkTransmitEnable {
        src: WildNodeList,
        dst: WildNodeList,
    },
    FwdlinkTransmitDisable {
        src: WildNodeList,
        dst: WildNodeList,
    },
    LinkEnable {
        link_id: String,
        establish_conn: bool,
        sources: HashSet<u64>,
        dests: HashSet<u64>,
    },
    LinkDisable {
        link_id: String,
    },
    MaxExpirationFwd(u64),
    MaxExpirationRtn(u64),
    SourcePriority {
        priority: u16,
        nodes: HashSet<u64>,
    },
    DestPriority {
        priority: u16,
        nodes: HashSet<u64>,
    },
    AcceptCustody {
        accept: bool,
        src: WildNode,
        dst: WildNode,
    },
    AcceptCustodyClear,
}

/// A single node id, or `*` (matches anything on that side).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WildNode {
    Node(u64),
    Wild,
}

/// Either `*` or an explicit node list (comma-separated ids/ranges).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WildNodeList {
    Wild,
    Nodes(HashSet<u64>),
}

fn parse_node_list(s: &str) -> Result<HashSet<u64>, ConfigError> {
    let mut nodes = HashSet::new();
    for part in s.split(',') {
        let part = part.trim();
        if part.is_empty() {
            continue;
        }
        if let Some((a, b)) = part.split_once('-') {
            let a: u64 = a
                .parse()
                .map_err(|_| ConfigError::InvalidNodeList(s.to_owned()))?;
            let b: u64 = b
                .parse()
                .map_err(|_| ConfigError::InvalidNodeList(s.to_owned()))?;
            if b < a {
                return Err(ConfigError::InvalidNodeList(s.to_owned()));
            }
            if b - a > MAX_NODE_LIST_SPAN {
                return Err(ConfigError::NodeRangeTooWide(a, b));
            }
            nodes.extend(a..=b);
        } else {
            let n: u64 = part
                .parse()
                .map_err(|_| ConfigError::InvalidNodeList(s.to_owned()))?;
            nodes.insert(n);
        }
    }
    Ok(nodes)
}

fn parse_wild_node_list(s: &str) -> Result<WildNodeList, ConfigError> {
    if s.trim() == "*" {
        Ok(WildNodeList::Wild)
    } else {
        Ok(WildNodeList::Nodes(parse_node_list(s)?))
    }
}

fn parse_wild_node(s: &str) -> Result<WildNode, ConfigError> {
    let s = s.trim();
    if s == "*" {
        Ok(WildNode::Wild)
    } else {
        Ok(WildNode::Node(
            s.parse().map_err(|_| ConfigError::InvalidNodeList(s.to_owned()))?,
        ))
    }
}

fn parse_bool(s: &str) -> Result<bool, ConfigError> {
    match s.trim() {
        "true" => Ok(true),
        "false" => Ok(false),
        other => Err(ConfigError::InvalidBool(other.to_owned())),
    }
}

fn parse_u64(s: &str) -> Result<u64, ConfigError> {
    s.trim().parse().map_err(|_| ConfigError::InvalidInt(s.to_owned()))
}

fn parse_u16(s: &str) -> Result<u16, ConfigError> {
    s.trim().parse().map_err(|_| ConfigError::InvalidInt(s.to_owned()))
}

fn field<'a>(fields: &[&'a str], idx: usize, name: &'static str) -> Result<&'a str, ConfigError> {
    fields.get(idx).copied().ok_or(ConfigError::MissingField(name))
}

/// Parses one directive line. Blank lines and lines starting with `#` parse
/// to `Ok(None)` and are simply skipped.
pub fn parse_line(line: &str) -> Result<Option<Directive>, ConfigError> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return Ok(None);
    }

    let (key, rest) = line.split_once(char::is_whitespace).unwrap_or((line, ""));
    let fields: Vec<&str> = if rest.trim().is_empty() {
        Vec::new()
    } else {
        rest.trim().split('`').collect()
    };

    let directive = match key {
        "REMOTE_ADDRESS" => Directive::RemoteAddress(field(&fields, 0, "host")?.to_owned()),
        "REMOTE_PORT" => Directive::RemotePort(parse_u16(field(&fields, 0, "port")?)?),
        "FORWARD_LINK" => Directive::ForwardLink {
            link_id: field(&fields, 0, "link_id")?.to_owned(),
            throttle_bps: parse_u64(field(&fields, 1, "throttle_bps")?)?,
            nodes: parse_node_list(field(&fields, 2, "node_list")?)?,
        },
        "FWDLINK_TRANSMIT_ENABLE" => Directive::FwdlinkTransmitEnable {
            src: parse_wild_node_list(field(&fields, 0, "src_list")?)?,
            dst: parse_wild_node_list(field(&fields, 1, "dst_list")?)?,
        },
        "FWDLINK_TRANSMIT_DISABLE" => Directive::FwdlinkTransmitDisable {
            src: parse_wild_node_list(field(&fields, 0, "src_list")?)?,
            dst: parse_wild_node_list(field(&fields, 1, "dst_list")?)?,
        },
        "LINK_ENABLE" => Directive::LinkEnable {
            link_id: field(&fields, 0, "link_id")?.to_owned(),
            establish_conn: parse_bool(field(&fields, 1, "establish_conn")?)?,
            sources: parse_node_list(field(&fields, 2, "src_list")?)?,
            dests: parse_node_list(field(&fields, 3, "dst_list")?)?,
        },
        "LINK_DISABLE" => Directive::LinkDisable {
            link_id: field(&fields, 0, "link_id")?.to_owned(),
        },
        "MAX_EXPIRATION_FWD" => Directive::MaxExpirationFwd(parse_u64(field(&fields, 0, "secs")?)?),
        "MAX_EXPIRATION_RTN" => Directive::MaxExpirationRtn(parse_u64(field(&fields, 0, "secs")?)?),
        "SOURCE_PRIORITY" => Directive::SourcePriority {
            priority: parse_u16(field(&fields, 0, "priority")?)?,
            nodes: parse_node_list(field(&fields, 1, "node_list")?)?,
        },
        "DEST_PRIORITY" => Directive::DestPriority {
            priority: parse_u16(field(&fields, 0, "priority")?)?,
            nodes: parse_node_list(field(&fields, 1, "node_list")?)?,
        },
        "ACCEPT_CUSTODY" => {
            let first = field(&fields, 0, "true|false|clear")?;
            if first.trim() == "clear" {
                Directive::AcceptCustodyClear
            } else {
                Directive::AcceptCustody {
                    accept: parse_bool(first)?,
                    src: parse_wild_node(field(&fields, 1, "src")?)?,
                    dst: parse_wild_node(field(&fields, 2, "dst")?)?,
                }
            }
        }
        other => return Err(ConfigError::UnknownDirective(other.to_owned())),
    };
    Ok(Some(directive))
}

/// Parses an entire config file, one directive per line. Invalid lines are
/// logged and skipped rather than aborting the whole load (spec §7).
pub fn parse_file(text: &str) -> Vec<Directive> {
    let mut directives = Vec::new();
    for (lineno, line) in text.lines().enumerate() {
        match parse_line(line) {
            Ok(Some(d)) => directives.push(d),
            Ok(None) => {}
            Err(e) => log::error!("config line {}: {e}", lineno + 1),
        }
    }
    directives
}

/// Applies a `FWDLINK_TRANSMIT_ENABLE`/`DISABLE` or `ACCEPT_CUSTODY` directive
/// onto a [`SrcDstWildcardMap`] in place, following spec §4.1's lookup order.
pub fn apply_wildcard_directive(
    map: &mut SrcDstWildcardMap,
    src: &WildNodeList,
    dst: &WildNodeList,
    value: bool,
) {
    match (src, dst) {
        (WildNodeList::Wild, WildNodeList::Wild) => map.put_double_wild(value),
        (WildNodeList::Wild, WildNodeList::Nodes(dsts)) => {
            for &d in dsts {
                map.put_wild_src(d, value);
            }
        }
        (WildNodeList::Nodes(srcs), WildNodeList::Wild) => {
            for &s in srcs {
                map.put_wild_dst(s, value);
            }
        }
        (WildNodeList::Nodes(srcs), WildNodeList::Nodes(dsts)) => {
            for &s in srcs {
                for &d in dsts {
                    map.put_pair(s, d, value);
                }
            }
        }
    }
}

pub fn apply_accept_custody_directive(map: &mut SrcDstWildcardMap, src: &WildNode, dst: &WildNode, value: bool) {
    match (src, dst) {
        (WildNode::Wild, WildNode::Wild) => map.put_double_wild(value),
        (WildNode::Wild, WildNode::Node(d)) => map.put_wild_src(*d, value),
        (WildNode::Node(s), WildNode::Wild) => map.put_wild_dst(*s, value),
        (WildNode::Node(s), WildNode::Node(d)) => map.put_pair(*s, *d, value),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_forward_link_directive() {
        let d = parse_line("FORWARD_LINK fwd0`5000000`100-105,200").unwrap().unwrap();
        match d {
            Directive::ForwardLink {
                link_id,
                throttle_bps,
                nodes,
            } => {
                assert_eq!(link_id, "fwd0");
                assert_eq!(throttle_bps, 5_000_000);
                assert_eq!(nodes.len(), 7);
                assert!(nodes.contains(&200));
            }
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn rejects_node_range_wider_than_max_span() {
        let err = parse_line("FORWARD_LINK fwd0`1000`1-500").unwrap_err();
        assert!(matches!(err, ConfigError::NodeRangeTooWide(1, 500)));
    }

    #[test]
    fn parses_wildcard_transmit_enable() {
        let d = parse_line("FWDLINK_TRANSMIT_ENABLE *`*").unwrap().unwrap();
        assert_eq!(
            d,
            Directive::FwdlinkTransmitEnable {
                src: WildNodeList::Wild,
                dst: WildNodeList::Wild,
            }
        );
    }

    #[test]
    fn parses_accept_custody_clear() {
        let d = parse_line("ACCEPT_CUSTODY clear").unwrap().unwrap();
        assert_eq!(d, Directive::AcceptCustodyClear);
    }

    #[test]
    fn accept_custody_applies_in_lookup_precedence_order() {
        let mut map = SrcDstWildcardMap::new();
        apply_accept_custody_directive(&mut map, &WildNode::Node(10), &WildNode::Wild, true);
        assert!(map.check(10, 999));
        assert!(!map.check(11, 999));
    }

    #[test]
    fn unknown_directive_is_rejected() {
        assert!(matches!(
            parse_line("NOT_A_DIRECTIVE foo"),
            Err(ConfigError::UnknownDirective(_))
        ));
    }

    #[test]
    fn blank_and_comment_lines_are_skipped() {
        assert!(parse_line("").unwrap().is_none());
        assert!(parse_line("   ").unwrap().is_none());
        assert!(parse_line("# a comment").unwrap().is_none());
    }
}
