// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Identifier extraction from ledger execution logs.
//!
//! The ledger's only channel for returning a newly minted vault id is
//! human-readable log output. This module is the single place that knows
//! the recognized textual formats; nothing else in the service depends on
//! log text. The pattern list is ordered, and a log with no recognizable
//! pattern is a hard error — every downstream step (credential protection,
//! local bookkeeping) is keyed by this id, so proceeding without one is
//! never acceptable.

use std::sync::LazyLock;

use regex::Regex;

/// Recognized identifier formats, tried in order against each log line.
static ID_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        // "Vault ID: 424965"
        r"(?i)vault\s+id\s*[:#]\s*(\d+)",
        // "identifier: 123"
        r"(?i)identifier\s*:\s*(\d+)",
        // "entity #123"
        r"(?i)entity\s*#(\d+)",
        // ".../identifier_123"
        r"identifier_(\d+)",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("identifier pattern compiles"))
    .collect()
});

/// No log line matched any recognized identifier format.
#[derive(Debug, thiserror::Error)]
#[error("no recognizable identifier in {scanned} transaction log line(s)")]
pub struct IdentifierExtractionFailed {
    pub scanned: usize,
}

/// Scan log lines for the first recognizable identifier.
///
/// Patterns are tried in order; within a pattern, lines are scanned in
/// order and the first match wins.
pub fn extract_identifier(log_lines: &[String]) -> Result<u64, IdentifierExtractionFailed> {
    for pattern in ID_PATTERNS.iter() {
        for line in log_lines {
            if let Some(captures) = pattern.captures(line) {
                if let Some(id) = captures.get(1).and_then(|m| m.as_str().parse::<u64>().ok()) {
                    return Ok(id);
                }
            }
        }
    }

    Err(IdentifierExtractionFailed {
        scanned: log_lines.len(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lines(raw: &[&str]) -> Vec<String> {
        raw.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn extracts_vault_id_line() {
        let logs = lines(&["fee charged: 0.001", "Vault ID: 424965", "done"]);
        assert_eq!(extract_identifier(&logs).unwrap(), 424965);
    }

    #[test]
    fn extracts_identifier_colon_form() {
        let logs = lines(&["identifier: 123"]);
        assert_eq!(extract_identifier(&logs).unwrap(), 123);
    }

    #[test]
    fn extracts_entity_hash_form() {
        let logs = lines(&["created entity #987 for provider"]);
        assert_eq!(extract_identifier(&logs).unwrap(), 987);
    }

    #[test]
    fn extracts_path_suffix_form() {
        let logs = lines(&["stored at /storage/subscriptions/identifier_5501"]);
        assert_eq!(extract_identifier(&logs).unwrap(), 5501);
    }

    #[test]
    fn vault_id_preferred_over_later_patterns() {
        let logs = lines(&["identifier: 1", "Vault ID: 2"]);
        assert_eq!(extract_identifier(&logs).unwrap(), 2);
    }

    #[test]
    fn case_insensitive_match() {
        let logs = lines(&["vault id: 66"]);
        assert_eq!(extract_identifier(&logs).unwrap(), 66);
    }

    #[test]
    fn unrecognizable_logs_are_a_hard_error() {
        let logs = lines(&["nothing to see", "still nothing"]);
        let err = extract_identifier(&logs).unwrap_err();
        assert_eq!(err.scanned, 2);
    }

    #[test]
    fn empty_logs_are_a_hard_error() {
        let err = extract_identifier(&[]).unwrap_err();
        assert_eq!(err.scanned, 0);
    }
}
