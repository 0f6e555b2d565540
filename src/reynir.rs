use crate::base::{HashSet, Result};
use crate::config::Settings;
use crate::forest::Forest;
use crate::grammar::Grammar;
use crate::lexicon::BinLexicon;
use crate::matcher::Matcher;
use crate::parser::{ParseError, Parser};
use crate::reducer::Reducer;
use crate::tokens::{wrap_tokens, Tok, TokKind};
use lazy_static::lazy_static;
use log::{debug, info};
use std::sync::{Arc, Mutex, MutexGuard};

// The process-wide façade: one grammar, one configuration and one lexicon
// instance, shared by all parse jobs. The shared state is immutable after
// construction; jobs run concurrently on separate threads, each with its
// own parser chart, matching cache and reducer memo. The singleton is
// built lazily under a mutex and can be dropped on demand, so tests can
// reload with a different grammar.

pub struct ReynirOptions {
  pub grammar_text: String,
  pub config_text: String,
  // $if() conditions to enable while reading the grammar
  pub conditions: HashSet<String>,
  pub lexicon: Option<BinLexicon>,
}

pub struct Reynir {
  grammar: Grammar,
  settings: Settings,
  lexicon: Option<BinLexicon>,
}

// The result of parsing one sentence. Failures are recorded here rather
// than raised, so a job continues with the next sentence.
pub struct SentenceResult {
  pub tokens: Vec<Tok>,
  pub forest: Option<Forest>,
  // Number of derivations before reduction
  pub num_combinations: u64,
  pub score: i32,
  pub error: Option<ParseError>,
}

impl SentenceResult {
  pub fn parsed(&self) -> bool {
    self.forest.is_some()
  }
}

impl Reynir {
  pub fn build(options: ReynirOptions) -> Result<Reynir> {
    let settings = Settings::read_str(&options.config_text, "config")?;
    let grammar = Grammar::read_text(
      &options.grammar_text,
      "grammar",
      &options.conditions,
      &settings.static_phrase_set(),
    )?;
    info!(
      "Reynir core ready: {} nonterminals, {} terminals, lexicon {}",
      grammar.num_nonterminals(),
      grammar.num_terminals(),
      if options.lexicon.is_some() { "mapped" } else { "absent" }
    );
    Ok(Reynir { grammar, settings, lexicon: options.lexicon })
  }

  pub fn grammar(&self) -> &Grammar {
    &self.grammar
  }

  pub fn settings(&self) -> &Settings {
    &self.settings
  }

  pub fn lexicon(&self) -> Option<&BinLexicon> {
    self.lexicon.as_ref()
  }

  // Submit a token stream for parsing; sentences are delivered one at a
  // time through the returned job iterator
  pub fn submit(&self, tokens: Vec<Tok>) -> ParseJob {
    ParseJob {
      reynir: self,
      matcher: Matcher::new(&self.settings, self.grammar.num_terminals()),
      tokens,
      pos: 0,
      num_sentences: 0,
      num_parsed: 0,
    }
  }

  pub fn parse_sentence(&self, tokens: &[Tok]) -> SentenceResult {
    let mut matcher = Matcher::new(&self.settings, self.grammar.num_terminals());
    self.parse_one(&mut matcher, tokens.to_vec())
  }

  fn parse_one(&self, matcher: &mut Matcher, tokens: Vec<Tok>) -> SentenceResult {
    let wrapped = wrap_tokens(&tokens);
    if wrapped.is_empty() {
      return SentenceResult {
        tokens,
        forest: None,
        num_combinations: 0,
        score: 0,
        error: Some(ParseError { token_index: 0, prev_token: String::new() }),
      };
    }
    let parser = Parser::new(&self.grammar);
    match parser.parse(&wrapped, matcher) {
      Err(error) => SentenceResult {
        tokens,
        forest: None,
        num_combinations: 0,
        score: 0,
        error: Some(error),
      },
      Ok(output) => match Forest::compact(&output, &self.grammar) {
        None => SentenceResult {
          tokens,
          forest: None,
          num_combinations: 0,
          score: 0,
          error: Some(ParseError { token_index: 0, prev_token: String::new() }),
        },
        Some(mut forest) => {
          // The derivation count describes the forest before reduction
          let num_combinations = forest.num_combinations();
          let score = Reducer::new(&self.grammar, &self.settings).reduce(&mut forest, &wrapped, matcher);
          debug!("Sentence parsed: {} combinations, score {}", num_combinations, score);
          SentenceResult { tokens, forest: Some(forest), num_combinations, score, error: None }
        }
      },
    }
  }
}

// A parse job over a token stream. Sentences are delimited by
// SentBegin/SentEnd tokens; paragraph markers are skipped. The matching
// cache persists for the duration of the job, so identical tokens across
// sentences share their match results.
pub struct ParseJob<'a> {
  reynir: &'a Reynir,
  matcher: Matcher<'a>,
  tokens: Vec<Tok>,
  pos: usize,
  pub num_sentences: usize,
  pub num_parsed: usize,
}

impl<'a> ParseJob<'a> {
  fn next_sentence(&mut self) -> Option<Vec<Tok>> {
    let n = self.tokens.len();
    // Skip delimiters preceding the next sentence
    while self.pos < n
      && matches!(
        self.tokens[self.pos].kind,
        TokKind::SentBegin | TokKind::SentEnd | TokKind::ParaBegin | TokKind::ParaEnd
      )
    {
      self.pos += 1;
    }
    if self.pos >= n {
      return None;
    }
    let start = self.pos;
    while self.pos < n
      && !matches!(
        self.tokens[self.pos].kind,
        TokKind::SentBegin | TokKind::SentEnd | TokKind::ParaBegin | TokKind::ParaEnd
      )
    {
      self.pos += 1;
    }
    Some(self.tokens[start..self.pos].to_vec())
  }
}

impl<'a> Iterator for ParseJob<'a> {
  type Item = SentenceResult;

  fn next(&mut self) -> Option<SentenceResult> {
    let sentence = self.next_sentence()?;
    let result = {
      let reynir = self.reynir;
      reynir.parse_one(&mut self.matcher, sentence)
    };
    self.num_sentences += 1;
    if result.parsed() {
      self.num_parsed += 1;
    }
    Some(result)
  }
}

lazy_static! {
  static ref INSTANCE: Mutex<Option<Arc<Reynir>>> = Mutex::new(None);
}

fn instance_guard() -> MutexGuard<'static, Option<Arc<Reynir>>> {
  match INSTANCE.lock() {
    Ok(guard) => guard,
    Err(poisoned) => poisoned.into_inner(),
  }
}

// Build the process-wide instance on first use; subsequent calls return
// the existing one
pub fn init(options: ReynirOptions) -> Result<Arc<Reynir>> {
  let mut guard = instance_guard();
  if let Some(existing) = guard.as_ref() {
    return Ok(Arc::clone(existing));
  }
  let reynir = Arc::new(Reynir::build(options)?);
  *guard = Some(Arc::clone(&reynir));
  Ok(reynir)
}

pub fn instance() -> Option<Arc<Reynir>> {
  instance_guard().as_ref().map(Arc::clone)
}

// Drop the process-wide instance. Running jobs keep their Arc and finish
// undisturbed; the next init() builds a fresh core.
pub fn shutdown() {
  *instance_guard() = None;
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::tokens::BinMeaning;

  const GRAMMAR: &str = "\
    S -> Vp\n\
    Vp -> Np so_1_þf Np | Np so_0\n\
    Np -> no_nf | no_þf | pfn_nf\n";

  const CONFIG: &str = "\
    [verb_objects]\n\
    eiga þf\n\
    sofa\n";

  fn word(txt: &str, meanings: Vec<BinMeaning>) -> Tok {
    Tok::word(txt, meanings)
  }

  fn m(stofn: &str, ordfl: &str, beyging: &str) -> BinMeaning {
    BinMeaning::new(stofn, None, ordfl, "alm", stofn, beyging)
  }

  fn build() -> Reynir {
    let _ = env_logger::builder().is_test(true).try_init();
    let options = ReynirOptions {
      grammar_text: GRAMMAR.to_string(),
      config_text: CONFIG.to_string(),
      conditions: HashSet::default(),
      lexicon: None,
    };
    Reynir::build(options).unwrap()
  }

  fn sentence_tokens() -> Vec<Tok> {
    vec![
      word("hún", vec![m("hún", "pfn", "NFET")]),
      word("á", vec![m("eiga", "so", "GM-FH-NT-3P-ET")]),
      word("heiðurinn", vec![m("heiður", "kk", "ÞFETgr")]),
    ]
  }

  #[test]
  fn single_sentence_parses_and_reduces() {
    let reynir = build();
    let result = reynir.parse_sentence(&sentence_tokens());
    assert!(result.parsed());
    assert!(result.error.is_none());
    assert_eq!(result.num_combinations, 1);
    let forest = result.forest.unwrap();
    let dump = forest.dump(reynir.grammar());
    assert!(dump.starts_with("S\n"));
    assert!(dump.contains("so_1_þf: 1"));
  }

  #[test]
  fn job_iterates_sentences_and_records_failures() {
    let reynir = build();
    let mut tokens = vec![Tok::begin_sentence()];
    tokens.extend(sentence_tokens());
    tokens.push(Tok::end_sentence());
    tokens.push(Tok::begin_sentence());
    // An unparseable sentence: two verbs in a row
    tokens.push(word("á", vec![m("eiga", "so", "GM-FH-NT-3P-ET")]));
    tokens.push(word("á", vec![m("eiga", "so", "GM-FH-NT-3P-ET")]));
    tokens.push(Tok::end_sentence());
    tokens.push(Tok::begin_sentence());
    tokens.push(word("hún", vec![m("hún", "pfn", "NFET")]));
    tokens.push(word("sefur", vec![m("sofa", "so", "GM-FH-NT-3P-ET")]));
    tokens.push(Tok::end_sentence());

    let job = reynir.submit(tokens);
    let results: Vec<SentenceResult> = job.collect();
    assert_eq!(results.len(), 3);
    assert!(results[0].parsed());
    assert!(!results[1].parsed());
    assert!(results[1].error.is_some());
    assert!(results[2].parsed());
  }

  #[test]
  fn job_counts_parsed_sentences() {
    let reynir = build();
    let mut tokens = sentence_tokens();
    tokens.push(Tok::end_sentence());
    tokens.push(word("sofnar", vec![]));
    let mut job = reynir.submit(tokens);
    while job.next().is_some() {}
    assert_eq!(job.num_sentences, 2);
    assert_eq!(job.num_parsed, 1);
  }

  #[test]
  fn singleton_is_shared_and_resettable() {
    shutdown();
    let options = ReynirOptions {
      grammar_text: GRAMMAR.to_string(),
      config_text: CONFIG.to_string(),
      conditions: HashSet::default(),
      lexicon: None,
    };
    let a = init(options).unwrap();
    let b = instance().unwrap();
    assert!(Arc::ptr_eq(&a, &b));
    shutdown();
    assert!(instance().is_none());
    // A fresh init builds a new core
    let options = ReynirOptions {
      grammar_text: "S -> ao\n".to_string(),
      config_text: String::new(),
      conditions: HashSet::default(),
      lexicon: None,
    };
    let c = init(options).unwrap();
    assert!(!Arc::ptr_eq(&a, &c));
    assert_eq!(c.grammar().num_terminals(), 1);
    shutdown();
  }

  #[test]
  fn object_with_prepositional_phrase_parses_to_shape() {
    // 'Hún á heiðurinn að þessu': the verb phrase covers 'eiga' with an
    // object noun phrase that carries the preposition phrase 'að þessu'
    let options = ReynirOptions {
      grammar_text: "S -> Vp\n\
        Vp -> Np so_1_þf NpObj | Np so_0\n\
        Np -> pfn_nf\n\
        NpObj -> no_þf Pp?\n\
        Pp -> fs_þgf fn_þgf\n"
        .to_string(),
      config_text: "[prepositions]\nað þgf\n\n[verb_objects]\neiga þf\n".to_string(),
      conditions: HashSet::default(),
      lexicon: None,
    };
    let reynir = Reynir::build(options).unwrap();
    let tokens = vec![
      word("hún", vec![m("hún", "pfn", "NFET")]),
      word("á", vec![m("eiga", "so", "GM-FH-NT-3P-ET")]),
      word("heiðurinn", vec![m("heiður", "kk", "ÞFETgr")]),
      word("að", vec![m("að", "fs", "-")]),
      word("þessu", vec![m("þessi", "fn", "ÞGFET")]),
    ];
    let result = reynir.parse_sentence(&tokens);
    assert!(result.parsed());
    let dump = result.forest.unwrap().dump(reynir.grammar());
    // Vp > [ 'eiga' NpObj > { 'heiður' Pp > { 'að' ... } } ]
    assert!(dump.contains("Vp\n"));
    assert!(dump.contains("so_1_þf: 1"));
    assert!(dump.contains("NpObj\n"));
    assert!(dump.contains("Pp\n"));
    assert!(dump.contains("fs_þgf: 3"));
    assert!(dump.contains("fn_þgf: 4"));
  }

  #[test]
  fn verb_mood_is_visible_in_the_reduced_tree() {
    // 'Ég hefði farið' vs 'Ég hafði farið': the conditional auxiliary is
    // subjunctive (vh), the plain past indicative (fh), and the reduced
    // tree records which terminal matched
    let options = ReynirOptions {
      grammar_text: "S -> pfn_nf SagnaRuna\n\
        SagnaRuna -> so_vh so_sagnb | so_fh so_sagnb\n"
        .to_string(),
      config_text: String::new(),
      conditions: HashSet::default(),
      lexicon: None,
    };
    let reynir = Reynir::build(options).unwrap();
    let sentence = |aux: &str, beyging: &str| {
      vec![
        word("ég", vec![m("ég", "pfn", "NFET")]),
        word(aux, vec![m("hafa", "so", beyging)]),
        word("farið", vec![m("fara", "so", "GM-SAGNB")]),
      ]
    };
    let subjunctive = reynir.parse_sentence(&sentence("hefði", "GM-VH-ÞT-1P-ET"));
    let dump = subjunctive.forest.unwrap().dump(reynir.grammar());
    assert!(dump.contains("so_vh: 1"));
    assert!(!dump.contains("so_fh: 1"));
    let indicative = reynir.parse_sentence(&sentence("hafði", "GM-FH-ÞT-1P-ET"));
    let dump = indicative.forest.unwrap().dump(reynir.grammar());
    assert!(dump.contains("so_fh: 1"));
    assert!(!dump.contains("so_vh: 1"));
  }

  #[test]
  fn results_are_deterministic_across_runs() {
    let reynir = build();
    let r1 = reynir.parse_sentence(&sentence_tokens());
    let r2 = reynir.parse_sentence(&sentence_tokens());
    assert_eq!(r1.score, r2.score);
    assert_eq!(r1.num_combinations, r2.num_combinations);
    let (f1, f2) = (r1.forest.unwrap(), r2.forest.unwrap());
    assert_eq!(f1.dump(reynir.grammar()), f2.dump(reynir.grammar()));
  }
}
