//! Deny-list consulted before and during probing.
//!
//! An [`ExclusionFilter`] has two independent parts:
//!
//! - an exact-match set of hostnames, checked when a line is read from the
//!   candidate source, and
//! - a set of IP ranges given in CIDR notation, checked against the first
//!   address a candidate resolves to.
//!
//! The filter is built once at startup and has no mutation API, so it can be
//! shared across every worker behind an `Arc` without locking.
mod range_set;

pub use range_set::RangeSet;

use std::collections::HashSet;
use std::fs;
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use cidr_utils::cidr::{IpCidr, IpInet};
use log::debug;
use thiserror::Error;

/// Startup failures while building an [`ExclusionFilter`].
#[derive(Debug, Error)]
pub enum ExclusionError {
    #[error("cannot read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{origin}:{line}: invalid CIDR range {entry:?}: {reason}")]
    InvalidRange {
        origin: String,
        line: usize,
        entry: String,
        reason: String,
    },
}

/// Combined exact-host and IP-range deny-list.
#[derive(Debug, Default, Clone)]
pub struct ExclusionFilter {
    hosts: HashSet<String>,
    v4: RangeSet<u32>,
    v6: RangeSet<u128>,
}

impl ExclusionFilter {
    /// Builds a filter from in-memory lists.
    ///
    /// Host entries are stored verbatim. Range entries are CIDRs such as
    /// `10.0.0.0/8` or `2001:db8::/32`; host bits are ignored and a bare
    /// address is a single-address range. Blank lines and `#` comments are
    /// skipped in both lists.
    ///
    /// ```rust
    /// # use pinprobe::exclusion::ExclusionFilter;
    /// let filter = ExclusionFilter::build(["blocked.example"], ["10.0.0.0/8"]).unwrap();
    ///
    /// assert!(filter.contains_host("blocked.example"));
    /// assert!(filter.contains_ip("10.20.30.40".parse().unwrap()));
    /// assert!(!filter.contains_ip("11.0.0.0".parse().unwrap()));
    /// ```
    pub fn build<H, R>(hosts: H, ranges: R) -> Result<Self, ExclusionError>
    where
        H: IntoIterator,
        H::Item: AsRef<str>,
        R: IntoIterator,
        R::Item: AsRef<str>,
    {
        let hosts = collect_hosts(hosts);
        let (v4, v6) = parse_ranges("<ranges>", ranges)?;
        Ok(Self { hosts, v4, v6 })
    }

    /// Builds a filter from the optional host list and CIDR list files.
    ///
    /// Both files are read in full before the filter is returned. A missing
    /// path yields an empty part that never matches.
    pub fn from_files(
        hosts_path: Option<&Path>,
        ranges_path: Option<&Path>,
    ) -> Result<Self, ExclusionError> {
        let hosts = match hosts_path {
            Some(path) => collect_hosts(read_to_string(path)?.lines()),
            None => HashSet::new(),
        };

        let (v4, v6) = match ranges_path {
            Some(path) => {
                let content = read_to_string(path)?;
                parse_ranges(&path.display().to_string(), content.lines())?
            }
            None => (RangeSet::default(), RangeSet::default()),
        };

        let filter = Self { hosts, v4, v6 };
        debug!(
            "Exclusion filter holds {} hosts, {} IPv4 ranges, {} IPv6 ranges",
            filter.hosts.len(),
            filter.v4.len(),
            filter.v6.len()
        );
        Ok(filter)
    }

    /// Exact, case-sensitive hostname match.
    pub fn contains_host(&self, name: &str) -> bool {
        self.hosts.contains(name)
    }

    /// Whether `ip` lies inside any excluded range. IPv4-mapped IPv6
    /// addresses are checked against the IPv4 ranges.
    pub fn contains_ip(&self, ip: IpAddr) -> bool {
        match ip.to_canonical() {
            IpAddr::V4(addr) => self.v4.contains(u32::from(addr)),
            IpAddr::V6(addr) => self.v6.contains(u128::from(addr)),
        }
    }

    pub fn host_count(&self) -> usize {
        self.hosts.len()
    }

    /// Number of disjoint ranges across both address families.
    pub fn range_count(&self) -> usize {
        self.v4.len() + self.v6.len()
    }
}

fn read_to_string(path: &Path) -> Result<String, ExclusionError> {
    fs::read_to_string(path).map_err(|source| ExclusionError::Read {
        path: path.to_path_buf(),
        source,
    })
}

fn is_skipped(line: &str) -> bool {
    let trimmed = line.trim();
    trimmed.is_empty() || trimmed.starts_with('#')
}

fn collect_hosts<I>(lines: I) -> HashSet<String>
where
    I: IntoIterator,
    I::Item: AsRef<str>,
{
    lines
        .into_iter()
        .filter(|line| !is_skipped(line.as_ref()))
        .map(|line| line.as_ref().to_owned())
        .collect()
}

fn parse_ranges<I>(
    origin: &str,
    lines: I,
) -> Result<(RangeSet<u32>, RangeSet<u128>), ExclusionError>
where
    I: IntoIterator,
    I::Item: AsRef<str>,
{
    let mut v4 = Vec::new();
    let mut v6 = Vec::new();

    for (idx, line) in lines.into_iter().enumerate() {
        let line = line.as_ref();
        if is_skipped(line) {
            continue;
        }

        let cidr = parse_cidr(line.trim()).map_err(|reason| ExclusionError::InvalidRange {
            origin: origin.to_owned(),
            line: idx + 1,
            entry: line.to_owned(),
            reason,
        })?;

        match cidr {
            IpCidr::V4(net) => v4.push((
                u32::from(net.first_address()),
                u32::from(net.last_address()),
            )),
            IpCidr::V6(net) => v6.push((
                u128::from(net.first_address()),
                u128::from(net.last_address()),
            )),
        }
    }

    Ok((RangeSet::new(v4), RangeSet::new(v6)))
}

/// Parses a strict CIDR first, then falls back to an address/prefix pair
/// with host bits set, which is reduced to its network.
fn parse_cidr(entry: &str) -> Result<IpCidr, String> {
    IpCidr::from_str(entry).or_else(|strict| {
        IpInet::from_str(entry)
            .map(|inet| inet.network())
            .map_err(|_| strict.to_string())
    })
}

#[cfg(test)]
mod tests {
    use super::{ExclusionError, ExclusionFilter};
    use parameterized::parameterized;
    use std::io::Write;
    use std::net::IpAddr;
    use std::path::Path;

    const NO_ENTRIES: [&str; 0] = [];

    fn ip(s: &str) -> IpAddr {
        s.parse().unwrap()
    }

    #[test]
    fn empty_filter_never_matches() {
        let filter = ExclusionFilter::build(NO_ENTRIES, NO_ENTRIES).unwrap();
        assert!(!filter.contains_host("a.example"));
        assert!(!filter.contains_host(""));
        assert!(!filter.contains_ip(ip("0.0.0.0")));
        assert!(!filter.contains_ip(ip("::1")));
    }

    #[test]
    fn host_match_is_exact() {
        let filter = ExclusionFilter::build(["a.example", "B.example"], NO_ENTRIES).unwrap();
        assert!(filter.contains_host("a.example"));
        assert!(filter.contains_host("B.example"));
        assert!(!filter.contains_host("A.example"));
        assert!(!filter.contains_host("b.example"));
        assert!(!filter.contains_host("a.example."));
        assert!(!filter.contains_host("sub.a.example"));
    }

    #[parameterized(addr = {
        "192.168.0.0", "192.168.0.1", "192.168.0.255", "192.168.1.0",
        "192.167.255.255", "10.0.0.0", "10.255.255.255", "11.0.0.0", "9.255.255.255",
    }, expected = {
        true, true, true, false,
        false, true, true, false, false,
    })]
    fn ipv4_cidr_boundaries(addr: &str, expected: bool) {
        let filter = ExclusionFilter::build(NO_ENTRIES, ["192.168.0.0/24", "10.0.0.0/8"]).unwrap();
        assert_eq!(filter.contains_ip(ip(addr)), expected, "{addr}");
    }

    #[parameterized(addr = {
        "2001:db8::", "2001:db8:ffff:ffff:ffff:ffff:ffff:ffff", "2001:db9::", "2001:db7:ffff::",
    }, expected = {
        true, true, false, false,
    })]
    fn ipv6_cidr_boundaries(addr: &str, expected: bool) {
        let filter = ExclusionFilter::build(NO_ENTRIES, ["2001:db8::/32"]).unwrap();
        assert_eq!(filter.contains_ip(ip(addr)), expected, "{addr}");
    }

    #[test]
    fn address_families_do_not_cross() {
        let filter = ExclusionFilter::build(NO_ENTRIES, ["0.0.0.0/0"]).unwrap();
        assert!(filter.contains_ip(ip("255.255.255.255")));
        assert!(!filter.contains_ip(ip("::")));
    }

    #[parameterized(addr = {
        "::ffff:10.1.2.3", "::ffff:192.168.0.255", "::ffff:11.0.0.0", "::10.1.2.3",
    }, expected = {
        true, true, false, false,
    })]
    fn ipv4_mapped_addresses_use_ipv4_ranges(addr: &str, expected: bool) {
        let filter = ExclusionFilter::build(NO_ENTRIES, ["192.168.0.0/24", "10.0.0.0/8"]).unwrap();
        assert_eq!(filter.contains_ip(ip(addr)), expected, "{addr}");
    }

    #[test]
    fn overlapping_ranges_still_match() {
        let filter =
            ExclusionFilter::build(NO_ENTRIES, ["10.0.0.0/8", "10.1.0.0/16", "10.200.0.0/24"])
                .unwrap();
        assert_eq!(filter.range_count(), 1);
        assert!(filter.contains_ip(ip("10.250.0.1")));
        assert!(filter.contains_ip(ip("10.1.2.3")));
    }

    #[test]
    fn host_bits_and_bare_addresses() {
        let filter = ExclusionFilter::build(NO_ENTRIES, ["172.16.5.4/12", "8.8.8.8"]).unwrap();
        assert!(filter.contains_ip(ip("172.16.0.0")));
        assert!(filter.contains_ip(ip("172.31.255.255")));
        assert!(!filter.contains_ip(ip("172.32.0.0")));
        assert!(filter.contains_ip(ip("8.8.8.8")));
        assert!(!filter.contains_ip(ip("8.8.8.9")));
    }

    #[test]
    fn blank_and_comment_lines_are_skipped() {
        let filter = ExclusionFilter::build(
            ["", "# hosts", "a.example"],
            ["", "   ", "# private", "10.0.0.0/8"],
        )
        .unwrap();
        assert_eq!(filter.host_count(), 1);
        assert_eq!(filter.range_count(), 1);
    }

    #[test]
    fn malformed_range_reports_line() {
        let err = ExclusionFilter::build(NO_ENTRIES, ["10.0.0.0/8", "# ok", "10.0.0.0/33"])
            .unwrap_err();
        match &err {
            ExclusionError::InvalidRange { line, entry, .. } => {
                assert_eq!(*line, 3);
                assert_eq!(entry, "10.0.0.0/33");
            }
            other => panic!("unexpected error {other:?}"),
        }
        assert!(err.to_string().contains("<ranges>:3"));
    }

    #[test]
    fn garbage_range_is_rejected() {
        assert!(ExclusionFilter::build(NO_ENTRIES, ["not-a-cidr"]).is_err());
        assert!(ExclusionFilter::build(NO_ENTRIES, ["300.1.1.1/8"]).is_err());
    }

    #[test]
    fn from_files_reads_both_lists() {
        let mut hosts = tempfile::NamedTempFile::new().unwrap();
        writeln!(hosts, "a.example\nb.example").unwrap();
        let mut ranges = tempfile::NamedTempFile::new().unwrap();
        writeln!(ranges, "127.0.0.0/8\n::1/128").unwrap();

        let filter = ExclusionFilter::from_files(Some(hosts.path()), Some(ranges.path())).unwrap();
        assert_eq!(filter.host_count(), 2);
        assert!(filter.contains_ip(ip("127.0.0.1")));
        assert!(filter.contains_ip(ip("::1")));
    }

    #[test]
    fn from_files_names_file_of_bad_entry() {
        let mut ranges = tempfile::NamedTempFile::new().unwrap();
        writeln!(ranges, "127.0.0.0/8\nbogus").unwrap();

        let err = ExclusionFilter::from_files(None, Some(ranges.path())).unwrap_err();
        let message = err.to_string();
        assert!(message.contains(&ranges.path().display().to_string()));
        assert!(message.contains(":2:"));
    }

    #[test]
    fn from_files_missing_file() {
        let err = ExclusionFilter::from_files(Some(Path::new("fixtures/does_not_exist.txt")), None)
            .unwrap_err();
        assert!(matches!(err, ExclusionError::Read { .. }));
    }

    #[test]
    fn from_fixture_files() {
        let filter = ExclusionFilter::from_files(
            Some(Path::new("fixtures/exclude_hosts.txt")),
            Some(Path::new("fixtures/exclude_ranges.txt")),
        )
        .unwrap();
        assert!(filter.contains_host("blocked.example"));
        assert!(filter.contains_ip(ip("192.168.1.1")));
        assert!(!filter.contains_ip(ip("1.1.1.1")));
    }
}
