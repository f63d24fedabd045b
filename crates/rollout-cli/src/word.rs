//! Deploy word selection
//!
//! Every deploy gets a short human-memorable identifier, used in the log file
//! name and by notification sinks. Words come from the configured wordlist;
//! when the list is unusable we fall back to a base-36 random id.

use std::fs;
use std::path::Path;

use rand::seq::IndexedRandom;
use tracing::debug;

use crate::util::b36encode;

fn valid_push_word(word: &str) -> bool {
    word.len() >= 5 && word.chars().all(|c| c.is_ascii_lowercase() || c == ':')
}

fn random_word(wordlist: &Path) -> Option<String> {
    let contents = fs::read_to_string(wordlist).ok()?;
    let words: Vec<&str> = contents
        .lines()
        .map(str::trim)
        .filter(|line| valid_push_word(line))
        .collect();
    words.choose(&mut rand::rng()).map(|w| w.to_string())
}

/// Pick the identifier for this deploy.
pub fn deploy_word(wordlist: &Path) -> String {
    match random_word(wordlist) {
        Some(word) => word,
        None => {
            debug!(wordlist = %wordlist.display(), "no usable words, falling back to a random id");
            b36encode(rand::random::<u64>())
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn picks_only_valid_words() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "ok").unwrap();
        writeln!(file, "Capitalized").unwrap();
        writeln!(file, "sensible").unwrap();
        for _ in 0..20 {
            assert_eq!(deploy_word(file.path()), "sensible");
        }
    }

    #[test]
    fn falls_back_to_base36_for_a_missing_list() {
        let word = deploy_word(Path::new("/nonexistent/wordlist"));
        assert!(!word.is_empty());
        assert!(word.chars().all(|c| c.is_ascii_alphanumeric()));
    }
}
