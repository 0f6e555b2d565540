use crate::arena::Id;
use crate::base::{is_case, HashMap, HashSet};
use crate::config::Settings;
use crate::forest::{Forest, NodeKind};
use crate::grammar::Grammar;
use crate::matcher::{mm_verb_stem, MatchOutcome, Matcher, NAMED_ENTITY_FL};
use crate::terminal::Terminal;
use crate::tokens::BinToken;
use itertools::Itertools;

// Reduces a parse forest containing multiple possible parses to a single
// most likely tree. Five factors are combined: configured token-meaning
// preferences, general heuristics, production priorities from '>' in the
// grammar, explicit $score() pragmas, and verb-preposition matching where
// combinations of prepositions with verbs receive bonus scores. The last
// factor makes "frestaði mótinu vegna veðurs" attach "vegna veðurs" to
// the verb "fresta" rather than to the noun "mótinu".
//
// The forest is shared-packed, so subtree scores are memoized. Verb
// contexts limit this: a shared preposition phrase may score differently
// under different enclosing verbs, so memoization is keyed by
// (node, scope key), with a fresh scope key minted whenever evaluation
// enters a nonterminal tagged enable_prep_bonus, and reset at nodes that
// begin their own scope (begin_prep_scope, purge_prep, no_prep or a noun
// phrase).

const VERB_PREP_BONUS: i32 = 7;
const VERB_PREP_PENALTY: i32 = -2;
const LENGTH_BONUS_FACTOR: i32 = 10;

const PREP_SCOPE_TAGS: [&str; 4] = ["begin_prep_scope", "purge_prep", "no_prep", "enable_prep_bonus"];
const CONTAINED_VERBS_TAGS: [&str; 2] = ["begin_prep_scope", "purge_verb"];

// A verb occurrence: (verb terminal index, wrapped token position)
type VerbList = Vec<(i32, u32)>;

#[derive(Clone, Default)]
struct ResultD {
  sc: i32,
  // Verbs contained in the subtree ("so"), and the verb list to carry
  // into sibling subtrees ("sl")
  so: Option<VerbList>,
  sl: Option<VerbList>,
}

type ScoreDict = HashMap<u32, HashMap<i32, i32>>;

pub struct Reducer<'a> {
  grammar: &'a Grammar,
  settings: &'a Settings,
}

struct RedState<'a, 'b> {
  grammar: &'a Grammar,
  settings: &'a Settings,
  matcher: &'b Matcher<'a>,
  tokens: &'b [BinToken],
  scores: ScoreDict,
  visited: HashMap<(Id, u32), ResultD>,
  next_key: u32,
  prep_bonus_stack: Vec<Option<VerbList>>,
  current_verb_stack: Vec<Option<VerbList>>,
  bonus_cache: HashMap<(i32, String, i32, u32), i32>,
}

impl<'a> Reducer<'a> {
  pub fn new(grammar: &'a Grammar, settings: &'a Settings) -> Self {
    Self { grammar, settings }
  }

  // Prune every ambiguous completed nonterminal in the forest down to its
  // highest-scoring family of children, and return the root score.
  // Nonterminals tagged no_reduce keep all their families.
  pub fn reduce(&self, forest: &mut Forest, tokens: &[BinToken], matcher: &Matcher<'a>) -> i32 {
    let scores = self.calc_terminal_scores(forest, tokens);
    let mut state = RedState {
      grammar: self.grammar,
      settings: self.settings,
      matcher,
      tokens,
      scores,
      visited: HashMap::default(),
      next_key: 0,
      prep_bonus_stack: vec![None],
      current_verb_stack: vec![None],
      bonus_cache: HashMap::default(),
    };
    let result = state.calc_score(forest, forest.root, 0);
    result.sc
  }

  // First pass: score the terminal alternatives of each token covered by
  // the forest, from configured preferences and fixed heuristics
  fn calc_terminal_scores(&self, forest: &Forest, tokens: &[BinToken]) -> ScoreDict {
    let finals = forest.finals();
    let start = forest.node(forest.root).start;
    let mut scores: ScoreDict = HashMap::default();
    let noun_prefs = &self.settings.noun_preferences;

    let positions: Vec<u32> = finals.keys().copied().sorted_unstable().collect();
    for &i in &positions {
      let s = &finals[&i];
      let mut sc: HashMap<i32, i32> = s.iter().map(|&t| (t, 0)).collect();
      if s.len() <= 1 {
        scores.insert(i, sc);
        continue;
      }
      let token = &tokens[i as usize];
      let terminals: Vec<(i32, &Terminal)> =
        s.iter().map(|&t| (t, self.grammar.terminal(t))).collect();
      let firsts: HashSet<&str> = terminals.iter().map(|(_, t)| t.first.as_str()).collect();
      let same_first = firsts.len() == 1;
      let txt = token.lower.as_str();
      // The last part of a composite word ('jaðar-áhrifin' -> 'áhrifin')
      let mut composite = false;
      let txt_last = match token.meanings().first() {
        Some(m) if token.is_word() && m.ordmynd.contains('-') => {
          composite = true;
          m.ordmynd.rsplit('-').next().unwrap_or(txt)
        }
        _ => txt,
      };

      // Configured preference ordering for this word, if any; irrelevant
      // when all the terminal options have the same first part
      let prefs = if same_first { None } else { self.settings.preferences.get(txt_last) };
      if let Some(prefs) = prefs {
        let mut adj_worse: HashMap<i32, i32> = HashMap::default();
        let mut adj_better: HashMap<i32, i32> = HashMap::default();
        for (worse, better, factor) in prefs {
          for (wix, wt) in &terminals {
            if !worse.iter().any(|w| wt.first == *w) {
              continue;
            }
            for (bix, bt) in &terminals {
              if wix == bix || !better.iter().any(|b| bt.first == *b) {
                continue;
              }
              // Promote literal terminals more aggressively
              let (adj_w, adj_b) =
                if bt.is_literal() { (-2 * factor, 6 * factor) } else { (-2 * factor, 4 * factor) };
              let w_entry = adj_worse.entry(*wix).or_insert(0);
              *w_entry = (*w_entry).min(adj_w);
              let b_entry = adj_better.entry(*bix).or_insert(0);
              *b_entry = (*b_entry).max(adj_b);
            }
          }
        }
        for (t, adj) in adj_worse {
          *sc.entry(t).or_insert(0) += adj;
        }
        for (t, adj) in adj_better {
          *sc.entry(t).or_insert(0) += adj;
        }
      }

      for (tix, t) in &terminals {
        let entry = sc.entry(*tix).or_insert(0);
        if t.is_literal() {
          // Exact and semi-exact literal matches are favored
          *entry += 2;
        }
        match t.first.as_str() {
          "ao" | "eo" => *entry -= 1,
          "no" => {
            if t.is_singular() {
              *entry += 1;
            } else if t.is_abbrev() {
              // Prefer more specific terminals over abbreviations
              *entry -= 1;
            }
            if token.is_word() && token.is_upper && token.has_meanings() {
              // An uppercase word that can be a person or entity name
              // should not connect to a plain noun terminal
              if token.meanings().iter().any(|m| NAMED_ENTITY_FL.contains(&m.fl.as_str())) {
                *entry -= 5;
              }
            }
            // Relative priorities between genders of identical forms
            if let (Some(np), Some(gender)) = (noun_prefs.get(txt_last), t.gender()) {
              *entry += np.get(gender).copied().unwrap_or(0);
            }
          }
          "fs" => {
            if t.has_variant("nf") {
              // The 'artificial' nominative prepositions 'næstum', 'sem',
              // 'um' must not outweigh proper nominal phrases
              *entry -= 10;
              if txt == "sem" {
                *entry -= 8;
              }
            } else if txt == "við" && t.has_variant("þgf") {
              // við + þgf is rarer than við + þf
              *entry += 1;
            } else if txt == "sem" && t.has_variant("þf") {
              *entry -= 4;
            } else if txt == "á" && t.has_variant("þgf") {
              // á + þgf resolves a conflict with the verb 'eiga'
              *entry += 4;
            } else {
              *entry += 2;
            }
          }
          "lo" => {
            if composite {
              // Composite words are less likely to be adjectives
              *entry -= 3;
            }
            if txt.ends_with("andi")
              && token.meanings().iter().any(|m| {
                m.ordfl == "so" && (m.beyging == "LH-NT" || m.beyging == "LHNT")
              })
            {
              // For words ending in 'andi', strongly prefer the present
              // participle verb reading
              *entry -= 50;
            }
          }
          "so" => {
            if t.num_variants() > 0 && matches!(t.variant(0), "0" | "1" | "2") {
              // The more verb arguments matched, the better; apply the
              // most positive $score() adjustment from the verb frames
              let numcases: i32 = t.variant(0).parse().unwrap_or(0);
              let adjmax = token
                .meanings()
                .iter()
                .filter(|m| m.ordfl == "so")
                .filter_map(|m| {
                  self.settings.verb_frames.verb_score(&format!("{}{}", m.stofn, t.verb_cases))
                })
                .max();
              *entry += 2 * numcases + adjmax.unwrap_or(0);
            }
            if t.is_bh() {
              // Discourage the imperative
              *entry -= 4;
            } else if t.is_sagnb() {
              // sagnb means more than one piece clicks into place
              *entry += 6;
            } else if t.is_lh() {
              if t.has_variant("vb") {
                *entry -= 2;
              } else {
                *entry += 3;
              }
            } else if t.is_lh_nt() {
              *entry += 12;
            } else if t.is_mm() {
              // Better than matching a single case, so so_0_mm is
              // preferred to so_1_þgf
              *entry += 3;
            } else if t.is_vh() {
              *entry += 2;
            }
            if t.is_subj() {
              if t.has_variant("none") {
                *entry -= 3;
              } else {
                *entry += 1;
              }
            }
            if t.is_nh() {
              if i > 0 {
                if let Some(prev) = finals.get(&(i - 1)) {
                  if prev.iter().any(|&pt| self.grammar.terminal(pt).startswith("nhm")) {
                    // Adjacent nhm + so_nh: prop up both terminals
                    *entry += 4;
                    if let Some(prev_sc) = scores.get_mut(&(i - 1)) {
                      for (&pt, v) in prev_sc.iter_mut() {
                        if self.grammar.terminal(pt).startswith("nhm") {
                          *v += 2;
                          break;
                        }
                      }
                    }
                  }
                }
              }
              if terminals.iter().any(|(_, pt)| {
                pt.startswith("no") && pt.has_variant("ef") && pt.is_plural()
              }) {
                // Prefer so_nh when a genitive plural noun alternative
                // exists ('hafa', 'vera', 'mynda', ...)
                *entry += 4;
              }
            }
            if i > 0 && token.is_upper {
              // Uppercase mid-sentence: discourage a verb reading
              *entry -= 4;
            }
          }
          "tala" => {
            if t.has_variant("ef") {
              // Avoid reading plain numbers as possessive phrases
              *entry -= 4;
            }
          }
          "person" => {
            if t.has_variant("nf") {
              *entry += 2;
            }
          }
          "sérnafn" => {
            if !token.has_meanings() {
              // No BÍN meanings: sérnafn was the only option, alleviate
              // the grammar's penalty
              *entry += 12;
            } else {
              *entry -= 10;
              if i == start {
                *entry -= 6;
              }
            }
          }
          "fyrirtæki" => {
            // Corporation identifiers ('hf.', 'Corp.') rank high
            *entry += 24;
          }
          "abfn" => {
            // Number and gender information on a reflexive pronoun is good
            *entry += if t.num_variants() > 1 { 6 } else { 2 };
          }
          "gr" => *entry += 2,
          "nhm" => *entry += 4,
          first => {
            if first == "st" || (first == "sem" && t.colon_cat() == Some("st")) {
              if txt == "sem" {
                // Discourage "sem" as a pure conjunction
                *entry -= 6;
              }
            }
          }
        }
      }
      scores.insert(i, sc);
    }
    scores
  }
}

impl<'a, 'b> RedState<'a, 'b> {
  fn get_prep_bonus(&self) -> Option<&VerbList> {
    self.prep_bonus_stack.last().and_then(|x| x.as_ref())
  }

  fn get_current_verb(&self) -> Option<VerbList> {
    self.current_verb_stack.last().and_then(|x| x.clone())
  }

  fn set_current_verb(&mut self, val: Option<VerbList>) {
    if let Some(top) = self.current_verb_stack.last_mut() {
      *top = val;
    }
  }

  // Should evaluation mint a fresh memoization key for this child?
  fn enter_key_scope(&self, forest: &Forest, id: Id) -> bool {
    let node = forest.node(id);
    match node.kind {
      NodeKind::Nonterminal { nt, completed: true } => {
        self.grammar.nonterminal(nt).has_tag("enable_prep_bonus")
      }
      _ => false,
    }
  }

  // Is it safe to resume shared memoization from this child onwards?
  fn exit_key_scope(&self, forest: &Forest, id: Id) -> bool {
    let node = forest.node(id);
    match node.kind {
      NodeKind::Nonterminal { nt, completed: true } => {
        let nt = self.grammar.nonterminal(nt);
        nt.has_any_tag(&PREP_SCOPE_TAGS) || nt.is_noun_phrase
      }
      _ => false,
    }
  }

  fn calc_score(&mut self, forest: &mut Forest, id: Id, current_key: u32) -> ResultD {
    if let Some(v) = self.visited.get(&(id, current_key)) {
      return v.clone();
    }
    let (kind, start, end, has_families) = {
      let node = forest.node(id);
      (node.kind, node.start, node.end, !node.families.is_empty())
    };
    let v = match kind {
      NodeKind::Token { token, terminal } => self.visit_token(start, token, terminal),
      NodeKind::Nonterminal { nt, completed } if end > start && has_families => {
        let nt_info = if completed { Some(nt) } else { None };
        self.visit_nonterminal(forest, id, nt_info, current_key)
      }
      _ => ResultD::default(),
    };
    self.visited.insert((id, current_key), v.clone());
    forest.set_score(id, v.sc);
    v
  }

  fn visit_token(&mut self, start: u32, token_pos: u32, terminal_ix: i32) -> ResultD {
    let terminal = self.grammar.terminal(terminal_ix);
    let mut sc = self
      .scores
      .get(&start)
      .and_then(|m| m.get(&terminal_ix))
      .copied()
      .unwrap_or(0);
    let mut d = ResultD::default();
    if terminal.matches_category("fs") {
      // Inside a preposition bonus zone, award points if this
      // preposition matches an enclosing verb
      if let Some(prep_bonus) = self.prep_bonus_stack.last().cloned().flatten() {
        let mut final_bonus: Option<i32> = None;
        for (verb_terminal, verb_token) in prep_bonus {
          let key = (
            terminal_ix,
            self.tokens[token_pos as usize].lower.clone(),
            verb_terminal,
            verb_token,
          );
          let bonus = match self.bonus_cache.get(&key) {
            Some(&b) => b,
            None => {
              let b = self.verb_prep_bonus(terminal, &key.1, verb_terminal, verb_token);
              self.bonus_cache.insert(key, b);
              b
            }
          };
          // Award the highest bonus available
          final_bonus = Some(final_bonus.map_or(bonus, |f| f.max(bonus)));
        }
        if let Some(b) = final_bonus {
          sc += b;
        }
      }
    } else if terminal.matches_category("so") {
      // Verb terminal: pick up the verb
      d.so = Some(vec![(terminal_ix, token_pos)]);
    }
    d.sc = sc;
    d
  }

  // The verb/preposition match bonus, as and if applicable
  fn verb_prep_bonus(
    &self,
    prep_terminal: &Terminal,
    prep_text: &str,
    verb_terminal_ix: i32,
    verb_token: u32,
  ) -> i32 {
    let verb_terminal = self.grammar.terminal(verb_terminal_ix);
    let token = &self.tokens[verb_token as usize];
    let meaning = match self.matcher.match_meaning(token, verb_terminal) {
      MatchOutcome::Meaning(ix) => &token.meanings()[ix],
      _ => return VERB_PREP_PENALTY,
    };
    let mut verb = meaning.stofn.clone();
    if meaning.beyging.contains("MM") {
      // Use the MM-NH nominal form for middle-voice verbs, i.e.
      // "eignast" rather than "eiga" for "eignaðist"
      verb = mm_verb_stem(&verb);
    }
    let verb_with_cases = format!("{}{}", verb, verb_terminal.verb_cases);
    let prep_with_case = if prep_terminal.num_variants() > 0 {
      let prep_case = prep_terminal.variant(0);
      if is_case(prep_case) {
        format!("{}_{}", prep_text, prep_case)
      } else {
        // fs_nh: match all cases
        prep_text.to_string()
      }
    } else {
      // Literal terminal such as "á:fs": match all cases
      prep_text.to_string()
    };
    if self.settings.verb_frames.matches_preposition(&verb_with_cases, &prep_with_case) {
      VERB_PREP_BONUS
    } else {
      VERB_PREP_PENALTY
    }
  }

  fn visit_nonterminal(
    &mut self,
    forest: &mut Forest,
    id: Id,
    nt_info: Option<i32>,
    current_key: u32,
  ) -> ResultD {
    // Scope bookkeeping on entry, mirrored by the pops at the end
    let mut pushed_prep_bonus = false;
    let mut verb = self.get_current_verb();
    if let Some(nt_ix) = nt_info {
      let nt = self.grammar.nonterminal(nt_ix);
      if nt.has_tag("enable_prep_bonus") {
        self.prep_bonus_stack.push(verb.clone());
        pushed_prep_bonus = true;
      } else if nt.has_tag("begin_prep_scope") || nt.is_noun_phrase {
        self.prep_bonus_stack.push(None);
        pushed_prep_bonus = true;
        verb = None;
      }
    }
    self.current_verb_stack.push(verb.clone());
    let start_verb = verb;

    let families: Vec<(Option<u32>, Vec<Id>)> = forest
      .node(id)
      .families
      .iter()
      .map(|f| (f.prod, f.children.iter().flatten().copied().collect()))
      .collect();

    let mut results: Vec<ResultD> = Vec::with_capacity(families.len());
    for (prod, children) in &families {
      // Higher-priority productions (lower numbers) start with a bonus
      let prio =
        prod.map(|slot| self.grammar.production(slot as usize).priority as i32).unwrap_or(0);
      let mut d = ResultD { sc: -10 * prio, so: None, sl: None };
      self.set_current_verb(start_verb.clone());
      for &child in children {
        let child_key = if self.enter_key_scope(forest, child) {
          // Prepositions inside this subtree may score differently in
          // other verb contexts; do not share memoized results
          self.next_key += 1;
          self.next_key
        } else if current_key != 0 && self.exit_key_scope(forest, child) {
          0
        } else {
          current_key
        };
        let rd = self.calc_score(forest, child, child_key);
        d.sc += rd.sc;
        // Carry information about contained verbs up the tree
        if let Some(so) = rd.so {
          d.so.get_or_insert_with(Vec::new).extend(so);
        }
        if let Some(sl) = rd.sl {
          d.sl.get_or_insert_with(Vec::new).extend(sl.clone());
          self.set_current_verb(Some(sl));
        }
      }
      results.push(d);
    }

    let mut v = if results.is_empty() {
      ResultD::default()
    } else if results.len() == 1 {
      results.pop().unwrap_or_default()
    } else {
      // The best-scoring family wins; on equal scores the lowest family
      // index, for determinism
      let mut best_ix = 0;
      for ix in 1..results.len() {
        if results[ix].sc > results[best_ix].sc {
          best_ix = ix;
        }
      }
      let no_reduce = nt_info
        .map(|nt_ix| self.grammar.nonterminal(nt_ix).no_reduce)
        .unwrap_or(false);
      if !no_reduce {
        forest.reduce_to(id, best_ix);
      }
      results.swap_remove(best_ix)
    };

    if let Some(nt_ix) = nt_info {
      let nt = self.grammar.nonterminal(nt_ix);
      // $score(n) pragma adjustment
      v.sc += self.grammar.nt_score(nt_ix);
      if nt.has_tag("apply_length_bonus") {
        let node = forest.node(id);
        v.sc += (node.end as i32 - node.start as i32 - 1) * LENGTH_BONUS_FACTOR;
      }
      if nt.has_tag("apply_prep_bonus") && self.get_prep_bonus().is_some() {
        // A nonterminal we like to see in a verb/preposition context,
        // e.g. a date attached to a verb rather than a noun phrase
        v.sc += VERB_PREP_BONUS;
      }
      if nt.has_tag("pick_up_verb") {
        if let Some(so) = &v.so {
          v.sl = Some(so.clone());
        }
      }
      if nt.has_any_tag(&CONTAINED_VERBS_TAGS) {
        v.so = None;
        v.sl = None;
      }
    }

    if pushed_prep_bonus {
      self.prep_bonus_stack.pop();
    }
    self.current_verb_stack.pop();
    v
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::parser::Parser;
  use crate::tokens::{BinMeaning, Tok};

  fn load(text: &str) -> Grammar {
    Grammar::read_text(text, "test.grammar", &HashSet::default(), &HashSet::default()).unwrap()
  }

  fn tok(txt: &str, meanings: Vec<BinMeaning>, ix: usize) -> BinToken {
    let mut t = BinToken::new(&Tok::word(txt, meanings), 0);
    t.index = ix;
    t
  }

  fn m(stofn: &str, ordfl: &str, beyging: &str) -> BinMeaning {
    BinMeaning::new(stofn, None, ordfl, "alm", stofn, beyging)
  }

  fn reduce_forest(
    g: &Grammar,
    settings: &Settings,
    tokens: &[BinToken],
  ) -> (Forest, i32) {
    let mut matcher = Matcher::new(settings, g.num_terminals());
    let out = Parser::new(g).parse(tokens, &mut matcher).unwrap();
    let mut forest = Forest::compact(&out, g).unwrap();
    let score = Reducer::new(g, settings).reduce(&mut forest, tokens, &matcher);
    (forest, score)
  }

  #[test]
  fn ambiguity_is_reduced_to_one_family() {
    let g = load("E -> E E | ao\n");
    let settings = Settings::new();
    let tokens: Vec<BinToken> =
      (0..4).map(|i| tok("vel", vec![m("vel", "ao", "-")], i)).collect();
    let (forest, _) = reduce_forest(&g, &settings, &tokens);
    assert_eq!(forest.num_combinations(), 1);
    for (_, node) in forest.iter() {
      assert!(node.families.len() <= 1);
    }
  }

  #[test]
  fn equal_scores_pick_the_first_family() {
    let g = load("E -> E E | ao\n");
    let settings = Settings::new();
    let tokens: Vec<BinToken> =
      (0..3).map(|i| tok("vel", vec![m("vel", "ao", "-")], i)).collect();
    let (forest, _) = reduce_forest(&g, &settings, &tokens);
    let (forest2, _) = reduce_forest(&g, &settings, &tokens);
    // Determinism: the same derivation is chosen every time
    assert_eq!(forest.dump(&g), forest2.dump(&g));
  }

  #[test]
  fn reduction_is_idempotent() {
    let g = load("E -> E E | ao\n");
    let settings = Settings::new();
    let tokens: Vec<BinToken> =
      (0..4).map(|i| tok("vel", vec![m("vel", "ao", "-")], i)).collect();
    let mut matcher = Matcher::new(&settings, g.num_terminals());
    let out = Parser::new(&g).parse(&tokens, &mut matcher).unwrap();
    let mut forest = Forest::compact(&out, &g).unwrap();
    let reducer = Reducer::new(&g, &settings);
    let score1 = reducer.reduce(&mut forest, &tokens, &matcher);
    let dump1 = forest.dump(&g);
    let score2 = reducer.reduce(&mut forest, &tokens, &matcher);
    assert_eq!(score1, score2);
    assert_eq!(dump1, forest.dump(&g));
  }

  #[test]
  fn preferences_steer_terminal_choice() {
    let g = load(
      "S -> A eo\n\
       A -> ao | no_nf_et_hk\n",
    );
    let tokens = vec![
      tok("ekki", vec![m("ekki", "ao", "-"), m("ekki", "hk", "NFET")], 0),
      tok("fallega", vec![m("fallega", "ao", "-")], 1),
    ];
    // Without preferences: noun (+1 singular) beats adverb (-1)
    let settings = Settings::new();
    let (forest, _) = reduce_forest(&g, &settings, &tokens);
    assert!(forest.dump(&g).contains("no_nf_et_hk"));
    // With a preference promoting ao over no for this word
    let mut settings = Settings::new();
    settings.add_preference("ekki", &["no"], &["ao"], 1);
    let (forest, _) = reduce_forest(&g, &settings, &tokens);
    assert!(forest.dump(&g).contains("ao: 0"));
  }

  #[test]
  fn verb_preposition_bonus_steers_attachment() {
    // "fresta mótinu vegna veðurs": does "vegna veðurs" attach to the
    // verb or to the noun? The verb frame 'fresta þgf /vegna ef' says
    // the verb should win.
    let g = load(
      "S -> Vp\n\
       Vp -> Sagn NlObj | Sagn NlObj Innskot\n\
       Sagn -> so_1_þgf\n\
       NlObj -> no_þgf | no_þgf Innskot\n\
       Innskot -> Pp\n\
       Pp -> fs_ef no_ef\n\
       $tag(enable_prep_bonus) Innskot\n\
       $tag(pick_up_verb) Sagn\n",
    );
    let mut settings = Settings::new();
    settings.add_preposition("vegna", "ef", false).unwrap();
    settings.verb_frames.add_spec("fresta þgf /vegna ef").unwrap();
    let tokens = vec![
      tok("frestaði", vec![m("fresta", "so", "GM-FH-ÞT-3P-ET")], 0),
      tok("mótinu", vec![m("mót", "hk", "ÞGFETgr")], 1),
      tok("vegna", vec![m("vegna", "fs", "-")], 2),
      tok("veðurs", vec![m("veður", "hk", "EFET")], 3),
    ];
    let (forest, score) = reduce_forest(&g, &settings, &tokens);
    // The winning Vp derivation has three children: the preposition
    // phrase is a sibling of the object, i.e. attached to the verb
    let vp = forest
      .iter()
      .find(|(_, n)| {
        n.is_completed() && n.nonterminal() == g.nonterminal_index("Vp") && n.end == 4
      })
      .map(|(id, _)| id)
      .unwrap();
    let children = &forest.node(vp).families[0].children;
    assert_eq!(children.len(), 3);
    assert_eq!(score, VERB_PREP_BONUS);
  }

  #[test]
  fn prep_phrase_without_verb_frame_is_neutral_in_noun_scope() {
    // Same shape, but no verb frame: the noun attachment is not
    // penalized, while the verb attachment gets the -2 mismatch
    let g = load(
      "S -> Vp\n\
       Vp -> Sagn NlObj | Sagn NlObj Innskot\n\
       Sagn -> so_1_þgf\n\
       NlObj -> no_þgf | no_þgf Innskot\n\
       Innskot -> Pp\n\
       Pp -> fs_ef no_ef\n\
       $tag(enable_prep_bonus) Innskot\n\
       $tag(pick_up_verb) Sagn\n",
    );
    let mut settings = Settings::new();
    settings.add_preposition("vegna", "ef", false).unwrap();
    settings.verb_frames.add_spec("fresta þgf").unwrap();
    let tokens = vec![
      tok("frestaði", vec![m("fresta", "so", "GM-FH-ÞT-3P-ET")], 0),
      tok("mótinu", vec![m("mót", "hk", "ÞGFETgr")], 1),
      tok("vegna", vec![m("vegna", "fs", "-")], 2),
      tok("veðurs", vec![m("veður", "hk", "EFET")], 3),
    ];
    let (forest, score) = reduce_forest(&g, &settings, &tokens);
    let vp = forest
      .iter()
      .find(|(_, n)| {
        n.is_completed() && n.nonterminal() == g.nonterminal_index("Vp") && n.end == 4
      })
      .map(|(id, _)| id)
      .unwrap();
    // The noun attachment wins: two children, with the preposition
    // phrase inside the object noun phrase
    let children = &forest.node(vp).families[0].children;
    assert_eq!(children.len(), 2);
    assert_eq!(score, 0);
  }

  #[test]
  fn score_pragma_adjusts_derivations() {
    let g = load(
      "S -> A | B\n\
       A -> ao\n\
       B -> eo\n\
       $score(-4) A\n\
       $score(3) B\n",
    );
    let settings = Settings::new();
    let tokens = vec![tok("vel", vec![m("vel", "ao", "-")], 0)];
    let (forest, score) = reduce_forest(&g, &settings, &tokens);
    assert!(forest.dump(&g).contains("B\n"));
    // eo heuristic -1, then +3 from the pragma
    assert_eq!(score, 2);
  }

  #[test]
  fn length_bonus_rewards_wide_spans() {
    let g = load(
      "S -> A | B\n\
       A -> ao ao ao\n\
       B -> ao Rest\n\
       Rest -> ao ao\n\
       $tag(apply_length_bonus) A\n",
    );
    let settings = Settings::new();
    let tokens: Vec<BinToken> =
      (0..3).map(|i| tok("vel", vec![m("vel", "ao", "-")], i)).collect();
    let (forest, score) = reduce_forest(&g, &settings, &tokens);
    assert!(forest.dump(&g).contains("A\n"));
    // 10 * (3 - 1) = 20 for the length bonus
    assert_eq!(score, 20);
  }

  #[test]
  fn no_reduce_keeps_all_families() {
    let g = load(
      "S -> Q\n\
       Q -> E\n\
       E -> E E | ao\n\
       $tag(no_reduce) E\n",
    );
    let settings = Settings::new();
    let tokens: Vec<BinToken> =
      (0..3).map(|i| tok("vel", vec![m("vel", "ao", "-")], i)).collect();
    let (forest, _) = reduce_forest(&g, &settings, &tokens);
    assert!(forest.num_combinations() > 1);
  }
}
