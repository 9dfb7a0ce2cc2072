use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::ValidationError;
use crate::services;

/// How a request names the ports it wants scanned.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum PortSpec {
    /// Inclusive range. Held as `u32` so out-of-range input is reported as a
    /// validation error rather than a decoding failure.
    Range { start: u32, end: u32 },
    /// Explicit port numbers.
    List(Vec<u32>),
    /// Names from the well-known group table.
    Groups(Vec<String>),
}

/// Resolve a port specification into an ascending list of distinct ports.
///
/// Fails before any probing if the range is inverted or out of bounds, a
/// listed port is out of bounds, or the selection comes out empty.
pub fn resolve(spec: &PortSpec) -> Result<Vec<u16>, ValidationError> {
    match spec {
        PortSpec::Range { start, end } => {
            let s = check_port("startPort", *start)?;
            let e = check_port("endPort", *end)?;
            if s > e {
                return Err(ValidationError::InvertedRange { start: *start, end: *end });
            }
            Ok((s..=e).collect())
        }
        PortSpec::List(list) => {
            let mut set = BTreeSet::new();
            for &p in list {
                set.insert(check_port("portList", p)?);
            }
            if set.is_empty() {
                return Err(ValidationError::InvalidPortList("no ports given".into()));
            }
            Ok(set.into_iter().collect())
        }
        PortSpec::Groups(names) => {
            let mut set = BTreeSet::new();
            for name in names {
                match services::group(name) {
                    Some(g) => set.extend(g.ports.iter().copied()),
                    None => warn!(group = %name, "ignoring unknown port group"),
                }
            }
            if set.is_empty() {
                return Err(ValidationError::EmptyPortSet);
            }
            Ok(set.into_iter().collect())
        }
    }
}

/// Parse a textual port list into a sorted, deduplicated list of ports.
///
/// Entries are separated by commas or newlines. Supported forms:
/// - single port number: `80`
/// - inclusive range: `8000-8010`
/// - comments: everything after `#` on a line is ignored
pub fn parse_port_list(s: &str) -> Result<Vec<u16>, ValidationError> {
    let mut seen = BTreeSet::new();

    for raw_line in s.lines() {
        let line = raw_line.split('#').next().unwrap_or("");
        for item in line.split(',').map(str::trim).filter(|i| !i.is_empty()) {
            if let Some((a, b)) = item.split_once('-') {
                let start = parse_port_str(a.trim())?;
                let end = parse_port_str(b.trim())?;
                if start > end {
                    return Err(ValidationError::InvalidPortList(format!(
                        "invalid range {start}-{end} (start > end)"
                    )));
                }
                seen.extend(start..=end);
                continue;
            }
            seen.insert(parse_port_str(item)?);
        }
    }

    if seen.is_empty() {
        return Err(ValidationError::InvalidPortList("no ports given".into()));
    }
    Ok(seen.into_iter().collect())
}

fn parse_port_str(s: &str) -> Result<u16, ValidationError> {
    let val: u32 = s
        .parse()
        .map_err(|_| ValidationError::InvalidPortList(format!("invalid port value: {s:?}")))?;
    check_port("portList", val)
}

fn check_port(field: &'static str, value: u32) -> Result<u16, ValidationError> {
    match u16::try_from(value) {
        Ok(p) if p != 0 => Ok(p),
        _ => Err(ValidationError::PortOutOfRange { field, value }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_single_ports_sorted() {
        let ports = parse_port_list("80, 22\n   443  \n").unwrap();
        assert_eq!(ports, vec![22, 80, 443]);
    }

    #[test]
    fn parse_ranges_and_dedup() {
        let ports = parse_port_list("8000-8002,80\n8001\n").unwrap();
        assert_eq!(ports, vec![80, 8000, 8001, 8002]);
    }

    #[test]
    fn parse_with_comments_and_whitespace() {
        let input = r#"
            # common web ports
            80  # http
            443 # https
            8000-8002   # dev servers

            # blank lines and spaces should be fine
        "#;
        let ports = parse_port_list(input).unwrap();
        assert_eq!(ports, vec![80, 443, 8000, 8001, 8002]);
    }

    #[test]
    fn invalid_values_error() {
        assert!(parse_port_list("70000\n").is_err());
        assert!(parse_port_list("0").is_err());
        assert!(parse_port_list("http").is_err());
        assert!(parse_port_list("# nothing").is_err());
    }

    #[test]
    fn range_bounds_name_the_field() {
        let err = resolve(&PortSpec::Range { start: 0, end: 10 }).unwrap_err();
        assert_eq!(err.field(), "startPort");
        let err = resolve(&PortSpec::Range { start: 1, end: 65536 }).unwrap_err();
        assert_eq!(err.field(), "endPort");
    }

    #[test]
    fn full_range_is_accepted() {
        let ports = resolve(&PortSpec::Range { start: 1, end: 65535 }).unwrap();
        assert_eq!(ports.len(), 65535);
        assert_eq!(ports.first(), Some(&1));
        assert_eq!(ports.last(), Some(&65535));
    }

    #[test]
    fn list_is_sorted_and_deduplicated() {
        let ports = resolve(&PortSpec::List(vec![443, 22, 443, 80])).unwrap();
        assert_eq!(ports, vec![22, 80, 443]);
    }

    #[test]
    fn unknown_groups_are_skipped_but_empty_selection_fails() {
        let ports =
            resolve(&PortSpec::Groups(vec!["Gopher".into(), "DNS".into()])).unwrap();
        assert_eq!(ports, vec![53]);
        assert_eq!(
            resolve(&PortSpec::Groups(vec!["Gopher".into()])),
            Err(ValidationError::EmptyPortSet)
        );
        assert_eq!(resolve(&PortSpec::Groups(vec![])), Err(ValidationError::EmptyPortSet));
    }
}
