use crate::arena::{Arena, Id};
use crate::base::{HashMap, HashSet};
use crate::grammar::Grammar;
use crate::matcher::Matcher;
use crate::tokens::BinToken;
use log::debug;

// An Earley parser handles all valid context-free grammars, irrespective
// of ambiguity, recursion and nullability. This is the improved version
// described by Scott & Johnstone ("Recognition is not parsing - SPPF-style
// parsing from cubic recognisers"), which runs in worst-case cubic time
// and space by packing all derivations into a binarized shared forest.
//
// The SPPF produced here is the raw binarized form: completed nonterminal
// nodes are labeled with the nonterminal, partial productions with a
// (production, dot) pair, and every family of children has at most two
// entries. forest::Forest compacts this into flat child lists.

// A parse failure is a value, not a panic: the parse job records the
// sentence and continues with the next one.
#[derive(Clone, Debug, PartialEq)]
pub struct ParseError {
  // Original (unwrapped) index of the token at which progress stopped
  pub token_index: usize,
  // Text of the token preceding the failure point
  pub prev_token: String,
}

#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum Label {
  // A completed nonterminal, by external index
  Sym(i32),
  // An interior node: production slot and dot position
  Inter(u32, u16),
  // A token/terminal match: wrapped token position and terminal index
  Token(u32, i32),
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RawFamily {
  pub prod: Option<u32>,
  pub left: Option<Id>,
  pub right: Option<Id>,
}

#[derive(Debug)]
pub struct RawNode {
  pub label: Label,
  pub start: u32,
  pub end: u32,
  pub families: Vec<RawFamily>,
}

#[derive(Debug)]
pub struct Sppf {
  pub nodes: Arena<RawNode>,
}

impl Sppf {
  pub fn node(&self, id: Id) -> &RawNode {
    self.nodes.get(id)
  }
}

#[derive(Debug)]
pub struct ParseOutput {
  pub sppf: Sppf,
  pub root: Id,
}

#[derive(Clone, Copy, Eq, Hash, PartialEq)]
struct Item {
  slot: u32,
  dot: u16,
  origin: u32,
  node: Option<Id>,
}

struct Column {
  items: Vec<Item>,
  seen: HashSet<Item>,
  // (end, symbol) -> items ending here that await that symbol next
  wanted: HashMap<i32, Vec<Item>>,
  predicted: HashSet<i32>,
}

impl Column {
  fn new() -> Self {
    Self {
      items: vec![],
      seen: HashSet::default(),
      wanted: HashMap::default(),
      predicted: HashSet::default(),
    }
  }

  fn add(&mut self, item: Item) {
    if self.seen.insert(item) {
      self.items.push(item);
    }
  }
}

pub struct Parser<'g> {
  grammar: &'g Grammar,
  root: i32,
}

impl<'g> Parser<'g> {
  pub fn new(grammar: &'g Grammar) -> Self {
    Self { grammar, root: grammar.root }
  }

  // Parse with an alternate root nonterminal, e.g. a secondary query root
  pub fn with_root(grammar: &'g Grammar, root: &str) -> Option<Self> {
    grammar.nonterminal_index(root).map(|ix| Self { grammar, root: ix })
  }

  pub fn parse(
    &self,
    tokens: &[BinToken],
    matcher: &mut Matcher,
  ) -> Result<ParseOutput, ParseError> {
    let n = tokens.len();
    let grammar = self.grammar;
    let mut nodes: Arena<RawNode> = Arena::with_capacity(256);
    let mut node_ids: HashMap<(Label, u32, u32), Id> = HashMap::default();
    let mut columns: Vec<Column> = (0..=n).map(|_| Column::new()).collect();
    let buffers: Vec<usize> = tokens.iter().map(|t| matcher.buffer_for(t)).collect();

    let find_or_create =
      |nodes: &mut Arena<RawNode>, node_ids: &mut HashMap<(Label, u32, u32), Id>, label: Label, start: u32, end: u32| -> Id {
        *node_ids.entry((label, start, end)).or_insert_with(|| {
          nodes.alloc(RawNode { label, start, end, families: vec![] })
        })
      };

    let add_family = |nodes: &mut Arena<RawNode>, id: Id, family: RawFamily| {
      let node = nodes.get_mut(id);
      if !node.families.contains(&family) {
        node.families.push(family);
      }
    };

    // make_node of the Scott algorithm: no node is needed for a prefix of
    // a single symbol; otherwise find or create the labeled node and add
    // the binarized (left, right) family
    let make_node = |nodes: &mut Arena<RawNode>,
                     node_ids: &mut HashMap<(Label, u32, u32), Id>,
                     slot: u32,
                     dot: u16,
                     end: u32,
                     left: Option<Id>,
                     right: Id|
     -> Id {
      let prod = grammar.production(slot as usize);
      if dot == 1 && (dot as usize) < prod.len() {
        return right;
      }
      let label = if dot as usize == prod.len() {
        Label::Sym(prod.lhs)
      } else {
        Label::Inter(slot, dot)
      };
      let start = match left {
        Some(l) => nodes.get(l).start,
        None => nodes.get(right).start,
      };
      let id = find_or_create(nodes, node_ids, label, start, end);
      add_family(nodes, id, RawFamily { prod: Some(slot), left, right: Some(right) });
      id
    };

    // Seed column 0 with the root productions
    for &slot in grammar.productions_of(self.root) {
      columns[0].add(Item { slot: slot as u32, dot: 0, origin: 0, node: None });
    }

    for i in 0..=n {
      // Derivations of nullable nonterminals completed at this position
      let mut nullable: HashMap<i32, Id> = HashMap::default();
      // Items whose next symbol is a terminal matching token i
      let mut scan: Vec<Item> = vec![];

      let mut ix = 0;
      while ix < columns[i].items.len() {
        let item = columns[i].items[ix];
        ix += 1;
        let prod = grammar.production(item.slot as usize);
        if (item.dot as usize) < prod.len() {
          let sym = prod.rhs[item.dot as usize];
          if sym < 0 {
            // Predict the nonterminal and register the awaiting item
            columns[i].wanted.entry(sym).or_default().push(item);
            if columns[i].predicted.insert(sym) {
              for &slot in grammar.productions_of(sym) {
                columns[i].add(Item { slot: slot as u32, dot: 0, origin: i as u32, node: None });
              }
            }
            if let Some(&v) = nullable.get(&sym) {
              // The nonterminal has already derived empty at this
              // position: advance past it immediately
              let y =
                make_node(&mut nodes, &mut node_ids, item.slot, item.dot + 1, i as u32, item.node, v);
              columns[i].add(Item { slot: item.slot, dot: item.dot + 1, origin: item.origin, node: Some(y) });
            }
          } else if i < n && matcher.matches(buffers[i], &tokens[i], grammar.terminal(sym)) {
            scan.push(item);
          }
        } else {
          // Completion of prod.lhs spanning [origin, i)
          let w = match item.node {
            Some(w) => w,
            None => {
              // Empty production: a nonterminal node with an empty family
              let id =
                find_or_create(&mut nodes, &mut node_ids, Label::Sym(prod.lhs), i as u32, i as u32);
              add_family(&mut nodes, id, RawFamily { prod: Some(item.slot), left: None, right: None });
              id
            }
          };
          if item.origin == i as u32 {
            nullable.entry(prod.lhs).or_insert(w);
          }
          let awaiting = columns[item.origin as usize]
            .wanted
            .get(&prod.lhs)
            .cloned()
            .unwrap_or_default();
          for parent in awaiting {
            let y = make_node(
              &mut nodes,
              &mut node_ids,
              parent.slot,
              parent.dot + 1,
              i as u32,
              parent.node,
              w,
            );
            columns[i].add(Item {
              slot: parent.slot,
              dot: parent.dot + 1,
              origin: parent.origin,
              node: Some(y),
            });
          }
        }
      }

      if i == n {
        break;
      }
      // Scan token i into column i + 1
      for item in scan {
        let prod = grammar.production(item.slot as usize);
        let term_ix = prod.rhs[item.dot as usize];
        let v = find_or_create(&mut nodes, &mut node_ids, Label::Token(i as u32, term_ix), i as u32, i as u32 + 1);
        let y = make_node(&mut nodes, &mut node_ids, item.slot, item.dot + 1, i as u32 + 1, item.node, v);
        columns[i + 1].add(Item {
          slot: item.slot,
          dot: item.dot + 1,
          origin: item.origin,
          node: Some(y),
        });
      }
      if columns[i + 1].items.is_empty() {
        // No progress past token i
        return Err(ParseError {
          token_index: tokens[i].index,
          prev_token: if i > 0 { tokens[i - 1].txt.clone() } else { String::new() },
        });
      }
    }

    match node_ids.get(&(Label::Sym(self.root), 0, n as u32)) {
      Some(&root) => {
        debug!("Parse succeeded: {} tokens, {} SPPF nodes", n, nodes.len());
        Ok(ParseOutput { sppf: Sppf { nodes }, root })
      }
      None => {
        let (token_index, prev_token) = match tokens.last() {
          Some(t) => (t.index, t.txt.clone()),
          None => (0, String::new()),
        };
        Err(ParseError { token_index, prev_token })
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::config::Settings;
  use crate::tokens::{BinMeaning, Tok};

  fn load(text: &str) -> Grammar {
    Grammar::read_text(text, "test.grammar", &HashSet::default(), &HashSet::default()).unwrap()
  }

  fn noun(txt: &str, beyging: &str) -> BinToken {
    BinToken::new(&Tok::word(txt, vec![BinMeaning::new(txt, None, "hk", "alm", txt, beyging)]), 0)
  }

  fn adverb(txt: &str) -> BinToken {
    BinToken::new(&Tok::word(txt, vec![BinMeaning::new(txt, None, "ao", "alm", txt, "-")]), 0)
  }

  fn with_index(mut t: BinToken, ix: usize) -> BinToken {
    t.index = ix;
    t
  }

  #[test]
  fn simple_sequence_parses() {
    let g = load("S -> no_nf ao\n");
    let s = Settings::new();
    let mut matcher = Matcher::new(&s, g.num_terminals());
    let tokens =
      vec![with_index(noun("orð", "NFET"), 0), with_index(adverb("fallega"), 1)];
    let out = Parser::new(&g).parse(&tokens, &mut matcher).unwrap();
    let root = out.sppf.node(out.root);
    assert_eq!((root.start, root.end), (0, 2));
    assert_eq!(root.label, Label::Sym(g.root));
    assert_eq!(root.families.len(), 1);
  }

  #[test]
  fn parse_error_reports_failing_token() {
    let g = load("S -> no_nf ao\n");
    let s = Settings::new();
    let mut matcher = Matcher::new(&s, g.num_terminals());
    let tokens = vec![
      with_index(noun("orð", "NFET"), 0),
      with_index(noun("orð", "NFET"), 1),
      with_index(adverb("fallega"), 2),
    ];
    let err = Parser::new(&g).parse(&tokens, &mut matcher).unwrap_err();
    assert_eq!(err.token_index, 1);
    assert_eq!(err.prev_token, "orð");
  }

  #[test]
  fn incomplete_input_is_an_error() {
    let g = load("S -> no_nf ao\n");
    let s = Settings::new();
    let mut matcher = Matcher::new(&s, g.num_terminals());
    let tokens = vec![with_index(noun("orð", "NFET"), 0)];
    let err = Parser::new(&g).parse(&tokens, &mut matcher).unwrap_err();
    assert_eq!(err.token_index, 0);
  }

  #[test]
  fn epsilon_productions_are_skippable() {
    let g = load(
      "S -> A ao\n\
       A -> no_nf | 0\n",
    );
    let s = Settings::new();
    let mut matcher = Matcher::new(&s, g.num_terminals());
    // With the noun present
    let tokens =
      vec![with_index(noun("orð", "NFET"), 0), with_index(adverb("fallega"), 1)];
    assert!(Parser::new(&g).parse(&tokens, &mut matcher).is_ok());
    // And without it
    let tokens = vec![with_index(adverb("fallega"), 0)];
    assert!(Parser::new(&g).parse(&tokens, &mut matcher).is_ok());
  }

  #[test]
  fn left_recursion_terminates() {
    let g = load("S -> S ao | ao\n");
    let s = Settings::new();
    let mut matcher = Matcher::new(&s, g.num_terminals());
    let tokens: Vec<BinToken> =
      (0..24).map(|i| with_index(adverb("vel"), i)).collect();
    let out = Parser::new(&g).parse(&tokens, &mut matcher).unwrap();
    assert_eq!(out.sppf.node(out.root).end, 24);
  }

  #[test]
  fn nullable_chains_complete() {
    let g = load(
      "S -> A B ao\n\
       A -> no_nf | 0\n\
       B -> no_þf | 0\n",
    );
    let s = Settings::new();
    let mut matcher = Matcher::new(&s, g.num_terminals());
    let tokens = vec![with_index(adverb("vel"), 0)];
    assert!(Parser::new(&g).parse(&tokens, &mut matcher).is_ok());
  }

  #[test]
  fn ambiguity_packs_into_families() {
    // A classic ambiguous grammar: with three tokens, E -> E E has two
    // derivations sharing one completed root node
    let g = load("E -> E E | ao\n");
    let s = Settings::new();
    let mut matcher = Matcher::new(&s, g.num_terminals());
    let tokens: Vec<BinToken> = (0..3).map(|i| with_index(adverb("vel"), i)).collect();
    let out = Parser::new(&g).parse(&tokens, &mut matcher).unwrap();
    let root = out.sppf.node(out.root);
    assert_eq!(root.families.len(), 2);
  }

  #[test]
  fn alternate_roots_parse_their_sublanguage() {
    let g = load(
      "S -> no_nf\n\
       Query -> ao ao\n\
       $root(Query)\n",
    );
    let s = Settings::new();
    let mut matcher = Matcher::new(&s, g.num_terminals());
    let tokens =
      vec![with_index(adverb("vel"), 0), with_index(adverb("vel"), 1)];
    assert!(Parser::new(&g).parse(&tokens, &mut matcher).is_err());
    let parser = Parser::with_root(&g, "Query").unwrap();
    assert!(parser.parse(&tokens, &mut matcher).is_ok());
  }
}
