use thiserror::Error;

pub type HashMap<K, V> = rustc_hash::FxHashMap<K, V>;
pub type HashSet<T> = rustc_hash::FxHashSet<T>;

// The four Icelandic cases, in canonical order, as terminal variant names
// (lowercase) and as BÍN inflection markers (uppercase).
pub const CASES: [&str; 4] = ["nf", "þf", "þgf", "ef"];
pub const CASES_BIN: [&str; 4] = ["NF", "ÞF", "ÞGF", "EF"];

pub const GENDERS: [&str; 3] = ["kk", "kvk", "hk"];

pub fn is_case(v: &str) -> bool {
  CASES.contains(&v)
}

pub fn is_gender(v: &str) -> bool {
  GENDERS.contains(&v)
}

// The compressed lexicon stores all text in Latin-1, which covers the full
// Icelandic alphabet. A word containing a character outside Latin-1 cannot
// occur in the lexicon, so encoding returns None for it instead of failing.

pub fn latin1_encode(s: &str) -> Option<Vec<u8>> {
  let mut result = Vec::with_capacity(s.len());
  for ch in s.chars() {
    let cp = ch as u32;
    if cp > 0xFF {
      return None;
    }
    result.push(cp as u8);
  }
  Some(result)
}

pub fn latin1_decode(b: &[u8]) -> String {
  b.iter().map(|&x| x as char).collect()
}

// Errors are split by origin: configuration text, grammar text, and binary
// data files. Load-time errors are fatal and carry the file name and line
// number of the offending input; per-sentence parse failures are ordinary
// values (see parser::ParseError) and do not appear here.

#[derive(Debug, Error, PartialEq)]
#[error("{}Line {line}: {text}", .fname.as_deref().map(|f| format!("{} - ", f)).unwrap_or_default())]
pub struct ConfigError {
  pub text: String,
  pub fname: Option<String>,
  pub line: u32,
}

impl ConfigError {
  pub fn new(text: impl Into<String>) -> Self {
    Self { text: text.into(), fname: None, line: 0 }
  }

  pub fn at(text: impl Into<String>, fname: &str, line: u32) -> Self {
    Self { text: text.into(), fname: Some(fname.to_string()), line }
  }

  pub fn augment(mut self, fname: &str, line: u32) -> Self {
    if self.fname.is_none() {
      self.fname = Some(fname.to_string());
    }
    if self.line == 0 {
      self.line = line;
    }
    self
  }
}

#[derive(Debug, Error)]
pub enum Error {
  #[error(transparent)]
  Config(#[from] ConfigError),
  #[error(transparent)]
  Grammar(#[from] crate::grammar::GrammarError),
  #[error("{path}: {reason}")]
  DataFile { path: String, reason: String },
  #[error(transparent)]
  Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn latin1_round_trips_icelandic() {
    let s = "þýður ðreki á ölkelduhálsi ÆÖÞ";
    let b = latin1_encode(s).unwrap();
    assert_eq!(latin1_decode(&b), s);
  }

  #[test]
  fn latin1_rejects_wide_chars() {
    assert_eq!(latin1_encode("skák ♞"), None);
    assert_eq!(latin1_encode("日本語"), None);
  }

  #[test]
  fn config_error_formats_location() {
    let e = ConfigError::new("bad syntax").augment("Verbs.conf", 17);
    assert_eq!(e.to_string(), "Verbs.conf - Line 17: bad syntax");
  }
}
