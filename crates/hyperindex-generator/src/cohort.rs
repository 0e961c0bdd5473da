//! Cohort file loading
//!
//! One address per line. Blank lines and `#` comments are ignored. The file
//! is edited by hand between runs, so it is re-read at the start of every
//! cycle and bad lines are skipped rather than failing the run.

use std::collections::HashSet;
use std::path::Path;

use hyperindex_core::Wallet;

use crate::error::CohortError;

pub fn load_cohort(path: &Path) -> Result<Vec<Wallet>, CohortError> {
    let text = std::fs::read_to_string(path).map_err(|source| CohortError::Read {
        path: path.to_path_buf(),
        source,
    })?;

    let wallets = parse_cohort(&text);
    if wallets.is_empty() {
        return Err(CohortError::Empty {
            path: path.to_path_buf(),
        });
    }

    tracing::debug!(path = %path.display(), wallets = wallets.len(), "Loaded cohort");
    Ok(wallets)
}

/// Valid, distinct addresses in file order.
pub fn parse_cohort(text: &str) -> Vec<Wallet> {
    let mut seen = HashSet::new();
    let mut wallets = Vec::new();

    for (index, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let Some(wallet) = Wallet::parse(line) else {
            tracing::warn!(line = index + 1, value = %line, "Skipping invalid wallet address");
            continue;
        };

        // Addresses are case-insensitive hex
        if !seen.insert(wallet.as_str().to_lowercase()) {
            tracing::warn!(line = index + 1, wallet = %wallet, "Skipping duplicate wallet");
            continue;
        }
        wallets.push(wallet);
    }

    wallets
}

#[cfg(test)]
mod tests {
    use super::*;

    const A: &str = "0x1111111111111111111111111111111111111111";
    const B: &str = "0xabcdefabcdefabcdefabcdefabcdefabcdefabcd";

    #[test]
    fn test_parse_skips_comments_invalid_and_duplicates() {
        let text = format!(
            "# top traders\n\n{A}\nnot-an-address\n  {B}  \n{}\n0x1234\n",
            B.to_uppercase().replacen("0X", "0x", 1)
        );

        let wallets = parse_cohort(&text);

        let addresses: Vec<&str> = wallets.iter().map(|w| w.as_str()).collect();
        assert_eq!(addresses, vec![A, B]);
    }

    #[test]
    fn test_load_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = load_cohort(&dir.path().join("wallets.txt")).unwrap_err();
        assert!(matches!(err, CohortError::Read { .. }));
    }

    #[test]
    fn test_load_empty_cohort() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("wallets.txt");
        std::fs::write(&path, "# nobody yet\n\n").unwrap();

        let err = load_cohort(&path).unwrap_err();
        assert!(matches!(err, CohortError::Empty { .. }));
    }

    #[test]
    fn test_load_cohort() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("wallets.txt");
        std::fs::write(&path, format!("{A}\n{B}\n")).unwrap();

        assert_eq!(load_cohort(&path).unwrap().len(), 2);
    }
}
