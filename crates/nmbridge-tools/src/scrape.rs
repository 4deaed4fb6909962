//! Parsers for the human-readable output of certmgr and csptest.

use std::sync::LazyLock;

use regex::Regex;

use crate::error::Result;
use crate::manager::Container;

/// Printed by both tools when an operation succeeded.
pub const SUCCESS_MARKER: &str = "[ErrorCode: 0x00000000]";
/// The key is marked non-exportable.
pub const NOT_EXPORTABLE_CODE: &str = "ErrorCode: 0x8009000b";
/// The destination container already exists.
pub const EXISTS_CODE: &str = "ErrorCode: 0x8009000f";

const THUMBPRINT_LEN: usize = 40;

static SHA1_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^SHA1 .*$").expect("thumbprint regex must compile"));

static CONTAINER_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^(?:Container|Контейнер) .*$").expect("container regex must compile")
});

static CONTAINER_NAMES_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^\\\\\.\\.*\|\\\\\.\\.*$").expect("container list regex must compile")
});

/// Value after the first `": "` separator of a labelled line.
fn label_value(line: &str) -> Option<&str> {
    line.split_once(": ").map(|(_, value)| value)
}

/// Thumbprint from the last `SHA1 ...: <hex>` line.
pub fn last_thumbprint(text: &str) -> Option<String> {
    let line = SHA1_PATTERN.find_iter(text).last()?.as_str();
    let value = label_value(line)?.trim();
    if value.is_empty() {
        return None;
    }
    Some(value.chars().take(THUMBPRINT_LEN).collect())
}

/// Container name from the first `Container ...: <name>` line.
pub fn container_line(text: &str) -> Option<String> {
    let line = CONTAINER_PATTERN.find(text)?.as_str();
    let value = label_value(line)?.trim();
    (!value.is_empty()).then(|| value.to_string())
}

fn split_container(line: &str) -> Option<Container> {
    let mut parts = line.split('|');
    let name = parts.next()?.trim();
    let unique = parts.next()?.trim();
    Some(Container {
        container_name: name.to_string(),
        unique_container_name: unique.to_string(),
    })
}

/// Every `name|unique name` pair in a container listing.
pub fn parse_container_list(text: &str) -> Vec<Container> {
    CONTAINER_NAMES_PATTERN
        .find_iter(text)
        .filter_map(|line| split_container(line.as_str()))
        .collect()
}

/// The first listed line containing `part`, if it is a container pair.
pub fn find_container(text: &str, part: &str) -> Result<Option<Container>> {
    let pattern = Regex::new(&format!(r"(?m)^.*{}.*$", regex::escape(part)))?;
    Ok(pattern
        .find(text)
        .and_then(|line| split_container(line.as_str())))
}

#[cfg(test)]
mod tests {
    use super::*;

    const INSTALL_OUTPUT: &str = "\
Certmgr 1.1 (c) \"Crypto-Pro\",  2007-2020.
program for managing certificates, CRLs and stores

Installing:
=============================================================================
1-------
Issuer              : CN=Test CA
Subject             : CN=Alice
Serial              : 0x7C0000A1
SHA1 Hash           : 3f1e2d4c5b6a79880123456789abcdef01234567
Container           : HDIMAGE\\\\alice.000\\1A2B
=============================================================================
2-------
Issuer              : CN=Root CA
Subject             : CN=Test CA
SHA1 Hash           : 0123456789abcdef0123456789abcdef01234567ee
=============================================================================

[ErrorCode: 0x00000000]
";

    const LIST_OUTPUT: &str = "\
CSP (Type:80) v5.0.10003 KC1 Release Ver:5.0.12000 OS:Linux CPU:AMD64 FastCode:READY:AVX.
AcquireContext: OK. HCRYPTPROV: 23452707
\\\\.\\HDIMAGE\\alice|\\\\.\\HDIMAGE\\HDIMAGE\\\\alice.000\\1A2B\r
\\\\.\\Aktiv Rutoken ECP 00 00\\bob|\\\\.\\Aktiv Rutoken ECP 00 00\\SCARD\\rutoken_ecp_3bd0\\0A00\\6F1C
OK.
Total: SYS: 0,010 sec USR: 0,020 sec UTC: 0,050 sec
[ErrorCode: 0x00000000]
";

    #[test]
    fn last_thumbprint_wins_and_is_truncated() {
        assert_eq!(
            last_thumbprint(INSTALL_OUTPUT).as_deref(),
            Some("0123456789abcdef0123456789abcdef01234567")
        );
        assert_eq!(last_thumbprint("no hashes here"), None);
    }

    #[test]
    fn container_line_reads_label() {
        assert_eq!(
            container_line(INSTALL_OUTPUT).as_deref(),
            Some("HDIMAGE\\\\alice.000\\1A2B")
        );
        assert_eq!(
            container_line("Контейнер           : REGISTRY\\\\bob\r\n").as_deref(),
            Some("REGISTRY\\\\bob")
        );
        assert_eq!(container_line("ContainerName: x"), None);
    }

    #[test]
    fn container_list_parses_pairs() {
        let containers = parse_container_list(LIST_OUTPUT);
        assert_eq!(
            containers,
            vec![
                Container {
                    container_name: "\\\\.\\HDIMAGE\\alice".to_string(),
                    unique_container_name: "\\\\.\\HDIMAGE\\HDIMAGE\\\\alice.000\\1A2B".to_string(),
                },
                Container {
                    container_name: "\\\\.\\Aktiv Rutoken ECP 00 00\\bob".to_string(),
                    unique_container_name:
                        "\\\\.\\Aktiv Rutoken ECP 00 00\\SCARD\\rutoken_ecp_3bd0\\0A00\\6F1C"
                            .to_string(),
                },
            ]
        );
    }

    #[test]
    fn find_container_matches_literal_part() {
        let found = find_container(LIST_OUTPUT, "alice.000").unwrap().unwrap();
        assert_eq!(found.container_name, "\\\\.\\HDIMAGE\\alice");

        // Regex metacharacters in the query are literal.
        assert_eq!(find_container(LIST_OUTPUT, "a.i.e").unwrap(), None);
    }

    #[test]
    fn find_container_requires_pair_line() {
        assert_eq!(find_container(LIST_OUTPUT, "AcquireContext").unwrap(), None);
    }

    #[test]
    fn empty_listing_has_no_containers() {
        assert!(parse_container_list("[ErrorCode: 0x00000000]\n").is_empty());
    }
}
