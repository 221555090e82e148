use unicode_normalization::UnicodeNormalization;

use crate::schema::{TokenFilter, Tokenizer};

impl TokenFilter {
    /// Applies the filter to a single string.
    pub fn process_single(&self, input: String) -> String {
        match self {
            TokenFilter::Downcase => input.nfc().collect::<String>().to_lowercase(),
        }
    }
}

/// Folds a chain of filters over one string.
pub fn apply_filters(filters: &[TokenFilter], input: &str) -> String {
    filters
        .iter()
        .fold(input.to_string(), |s, filter| filter.process_single(s))
}

impl Tokenizer {
    /// Splits the (already filtered) input into index tokens.
    pub fn tokenize(&self, input: &str) -> Vec<String> {
        match self {
            Tokenizer::Standard => input
                .split(|c: char| !c.is_alphanumeric())
                .filter(|t| !t.is_empty())
                .map(str::to_string)
                .collect(),
            Tokenizer::Ngram { token_length } => ngrams(input, *token_length),
        }
    }
}

/// Every `n`-character window of the input. Inputs shorter than `n` produce
/// the whole input as a single token so short values stay searchable.
fn ngrams(input: &str, n: usize) -> Vec<String> {
    let chars: Vec<char> = input.chars().collect();

    if n == 0 || chars.is_empty() {
        return Vec::new();
    }

    if chars.len() <= n {
        return vec![input.to_string()];
    }

    chars
        .windows(n)
        .map(|window| window.iter().collect())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn standard_tokenizer_splits_on_boundaries() {
        let tokens = Tokenizer::Standard.tokenize("alice@x.com says hi");
        assert_eq!(tokens, ["alice", "x", "com", "says", "hi"]);
    }

    #[test]
    fn ngram_tokenizer_windows() {
        let tokens = Tokenizer::Ngram { token_length: 3 }.tokenize("lice");
        assert_eq!(tokens, ["lic", "ice"]);
    }

    #[test]
    fn ngram_shorter_than_window_is_kept_whole() {
        let tokens = Tokenizer::Ngram { token_length: 3 }.tokenize("hi");
        assert_eq!(tokens, ["hi"]);
    }

    #[test]
    fn downcase_normalizes() {
        assert_eq!(
            TokenFilter::Downcase.process_single("Hello WORLD".into()),
            "hello world"
        );
    }
}
