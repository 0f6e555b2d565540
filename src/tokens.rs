use crate::base::HashSet;

// Tokens as seen by the parser. Tokenization of raw text happens outside
// this crate; we consume a sequence of (kind, text, payload) records where
// the payload depends on the kind. A WORD token carries the list of its
// possible BÍN meanings, already annotated by the tokenizer layer.

#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum TokKind {
  Word,
  Punctuation,
  Number,
  Percent,
  Ordinal,
  Year,
  Currency,
  Amount,
  Measurement,
  Date,
  DateAbs,
  DateRel,
  Time,
  Timestamp,
  TimestampAbs,
  TimestampRel,
  Person,
  Entity,
  Unknown,
  SentBegin,
  SentEnd,
  ParaBegin,
  ParaEnd,
}

// One BÍN meaning of a word form:
// (stofn, utg, ordfl, fl, ordmynd, beyging).

#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct BinMeaning {
  pub stofn: String,
  pub utg: Option<u32>,
  pub ordfl: String,
  pub fl: String,
  pub ordmynd: String,
  pub beyging: String,
}

impl BinMeaning {
  pub fn new(stofn: &str, utg: Option<u32>, ordfl: &str, fl: &str, ordmynd: &str, beyging: &str) -> Self {
    Self {
      stofn: stofn.to_string(),
      utg,
      ordfl: ordfl.to_string(),
      fl: fl.to_string(),
      ordmynd: ordmynd.to_string(),
      beyging: beyging.to_string(),
    }
  }
}

#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct PersonName {
  pub name: String,
  pub gender: Option<String>,
  pub case: Option<String>,
}

#[derive(Clone, Debug)]
pub enum TokVal {
  None,
  Meanings(Vec<BinMeaning>),
  Person(Vec<PersonName>),
  Number { value: f64, cases: Option<Vec<String>>, genders: Option<Vec<String>> },
  Percent { value: f64, cases: Option<Vec<String>>, genders: Option<Vec<String>> },
  Ordinal(i64),
  Year(i32),
  Currency { iso: String, cases: Option<Vec<String>>, genders: Option<Vec<String>> },
  Amount { value: f64, iso: String, cases: Option<Vec<String>>, genders: Option<Vec<String>> },
  Measurement { unit: String, value: f64 },
  Date { y: i32, m: u32, d: u32 },
  Time { h: u32, m: u32, s: u32 },
  Timestamp { y: i32, mo: u32, d: u32, h: u32, m: u32, s: u32 },
}

#[derive(Clone, Debug)]
pub struct Tok {
  pub kind: TokKind,
  pub txt: String,
  pub val: TokVal,
}

impl Tok {
  pub fn new(kind: TokKind, txt: &str, val: TokVal) -> Self {
    Self { kind, txt: txt.to_string(), val }
  }

  pub fn word(txt: &str, meanings: Vec<BinMeaning>) -> Self {
    Self::new(TokKind::Word, txt, TokVal::Meanings(meanings))
  }

  pub fn punctuation(txt: &str) -> Self {
    Self::new(TokKind::Punctuation, txt, TokVal::None)
  }

  pub fn begin_sentence() -> Self {
    Self::new(TokKind::SentBegin, "", TokVal::None)
  }

  pub fn end_sentence() -> Self {
    Self::new(TokKind::SentEnd, "", TokVal::None)
  }

  pub fn meanings(&self) -> &[BinMeaning] {
    match &self.val {
      TokVal::Meanings(m) => m,
      _ => &[],
    }
  }
}

// A hashable key that partitions tokens by effective identity: tokens with
// equal keys behave identically in token/terminal matching, so they can
// share a matching-cache buffer. For WORD tokens the meanings list is part
// of the key, since the tokenizer may have cut it down based on context.

#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct TokenKey {
  pub kind: TokKind,
  pub txt: String,
  pub meanings: Option<Vec<BinMeaning>>,
}

// The punctuation symbols that the grammar knows how to match.
pub const UNDERSTOOD_PUNCTUATION: &str = ".?!,:;–-()[]";

// Abbreviations that mark non-Icelandic or parenthetical asides;
// the short prefixes flag a foreign-language gloss, e.g. "(e. word)".
const UNKNOWN_INSIDE_PARENS: [&str; 6] = ["e.", "d.", "þ.", "t.d.", "þ.e.", "m.a."];
const SKIP_PARENTHESIS_PREFIXES: [&str; 3] = ["e.", "d.", "þ."];

// A token wrapped for parsing: lowercase text and the original position in
// the unwrapped token sequence are precomputed, since the matcher and the
// error reporter need them constantly.

#[derive(Clone, Debug)]
pub struct BinToken {
  pub kind: TokKind,
  pub txt: String,
  pub lower: String,
  pub val: TokVal,
  pub is_upper: bool,
  pub index: usize,
}

impl BinToken {
  pub fn new(tok: &Tok, index: usize) -> Self {
    let lower = tok.txt.to_lowercase();
    let is_upper = tok.txt.chars().next() != lower.chars().next();
    Self { kind: tok.kind, txt: tok.txt.clone(), lower, val: tok.val.clone(), is_upper, index }
  }

  pub fn is_word(&self) -> bool {
    self.kind == TokKind::Word
  }

  pub fn meanings(&self) -> &[BinMeaning] {
    match &self.val {
      TokVal::Meanings(m) => m,
      _ => &[],
    }
  }

  pub fn has_meanings(&self) -> bool {
    !self.meanings().is_empty()
  }

  pub fn key(&self) -> TokenKey {
    let meanings = match &self.val {
      TokVal::Meanings(m) => Some(m.clone()),
      _ => None,
    };
    TokenKey { kind: self.kind, txt: self.txt.clone(), meanings }
  }
}

fn is_understood(tok: &Tok) -> bool {
  match tok.kind {
    TokKind::Punctuation => UNDERSTOOD_PUNCTUATION.contains(&tok.txt),
    TokKind::Unknown | TokKind::SentBegin | TokKind::SentEnd | TokKind::ParaBegin
    | TokKind::ParaEnd => false,
    _ => true,
  }
}

fn is_unknown_inside_parens(tok: &Tok) -> bool {
  tok.kind == TokKind::Unknown
    || (tok.kind == TokKind::Word && tok.meanings().is_empty())
    || UNKNOWN_INSIDE_PARENS.contains(&tok.txt.as_str())
}

// Pre-process a token stream before parsing, removing content that could
// never match a terminal: runs of unknown words inside parentheses,
// parenthesized foreign-language glosses marked by "e."/"d."/"þ.", and
// punctuation outside the understood whitelist. Each surviving token is
// wrapped with a back-index to its original position.

pub fn wrap_tokens(tokens: &[Tok]) -> Vec<BinToken> {
  let mut erased: HashSet<usize> = HashSet::default();
  let mut ix = 0;
  while ix < tokens.len() {
    let tok = &tokens[ix];
    if tok.kind == TokKind::Punctuation && tok.txt == "(" {
      // Scan to the matching right parenthesis
      let mut right = ix + 1;
      let mut next = tokens.len();
      while right < tokens.len() {
        let t = &tokens[right];
        if t.kind == TokKind::Punctuation && t.txt == ")" {
          let foreign = right > ix + 1
            && SKIP_PARENTHESIS_PREFIXES.contains(&tokens[ix + 1].txt.as_str());
          if foreign || tokens[ix + 1..right].iter().all(is_unknown_inside_parens) {
            for i in ix..=right {
              erased.insert(i);
            }
          }
          next = right + 1;
          break;
        }
        right += 1;
      }
      ix = next;
    } else {
      ix += 1;
    }
  }
  let mut wrapped = Vec::with_capacity(tokens.len());
  for (ix, tok) in tokens.iter().enumerate() {
    if !erased.contains(&ix) && is_understood(tok) {
      wrapped.push(BinToken::new(tok, ix));
    }
  }
  wrapped
}

#[cfg(test)]
mod tests {
  use super::*;

  fn unknown_word(txt: &str) -> Tok {
    Tok::word(txt, vec![])
  }

  fn known_word(txt: &str) -> Tok {
    Tok::word(txt, vec![BinMeaning::new(txt, None, "hk", "alm", txt, "NFET")])
  }

  #[test]
  fn wrapping_erases_unknown_parenthesis_runs() {
    let tokens = vec![
      known_word("orðið"),
      Tok::punctuation("("),
      unknown_word("gobbledygook"),
      unknown_word("moreso"),
      Tok::punctuation(")"),
      known_word("hér"),
    ];
    let wrapped = wrap_tokens(&tokens);
    let texts: Vec<_> = wrapped.iter().map(|t| t.txt.as_str()).collect();
    assert_eq!(texts, vec!["orðið", "hér"]);
    // Surviving tokens retain their original indices
    assert_eq!(wrapped[0].index, 0);
    assert_eq!(wrapped[1].index, 5);
  }

  #[test]
  fn wrapping_erases_foreign_glosses() {
    let tokens = vec![
      known_word("tölva"),
      Tok::punctuation("("),
      unknown_word("e."),
      known_word("computer"),
      Tok::punctuation(")"),
    ];
    let wrapped = wrap_tokens(&tokens);
    assert_eq!(wrapped.len(), 1);
    assert_eq!(wrapped[0].txt, "tölva");
  }

  #[test]
  fn wrapping_keeps_meaningful_parentheses() {
    let tokens = vec![
      Tok::punctuation("("),
      known_word("við"),
      Tok::punctuation(")"),
    ];
    let wrapped = wrap_tokens(&tokens);
    assert_eq!(wrapped.len(), 3);
  }

  #[test]
  fn wrapping_drops_exotic_punctuation() {
    let tokens = vec![known_word("a"), Tok::punctuation("«"), known_word("b")];
    assert_eq!(wrap_tokens(&tokens).len(), 2);
  }

  #[test]
  fn word_keys_include_meanings() {
    let a = BinToken::new(&known_word("ára"), 0);
    let b = BinToken::new(&unknown_word("ára"), 0);
    assert_ne!(a.key(), b.key());
    let c = BinToken::new(&known_word("ára"), 3);
    assert_eq!(a.key(), c.key());
  }

  #[test]
  fn uppercase_detection() {
    assert!(BinToken::new(&known_word("Jón"), 0).is_upper);
    assert!(!BinToken::new(&known_word("jón"), 0).is_upper);
  }
}
