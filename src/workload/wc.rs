//! A MapReduce-compatible implementation of word count.
//!

use crate::*;
use anyhow::Result;

/// Emits `(word, "1")` for every maximal run of alphabetic characters.
pub fn map(_filename: &str, contents: &str) -> Result<Vec<KeyValue>> {
    let words = contents
        .split(|c: char| !c.is_alphabetic())
        .filter(|s| !s.is_empty())
        .map(|word| KeyValue::new(word, "1"))
        .collect();
    Ok(words)
}

/// The number of occurrences of `key`.
pub fn reduce(_key: &str, values: &[String]) -> Result<String> {
    Ok(values.len().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_on_anything_but_letters() {
        let kvs = map("x", "It's 2 o'clock,\tthe end").unwrap();
        let words: Vec<_> = kvs.iter().map(|kv| kv.key.as_str()).collect();
        assert_eq!(words, vec!["It", "s", "o", "clock", "the", "end"]);
        assert!(kvs.iter().all(|kv| kv.value == "1"));
    }

    #[test]
    fn counts_values() {
        let ones = vec!["1".to_string(); 3];
        assert_eq!(reduce("the", &ones).unwrap(), "3");
    }
}
