use crate::arena::{Arena, Id};
use crate::base::{HashMap, HashSet};
use crate::grammar::Grammar;
use crate::parser::{Label, ParseOutput, Sppf};

// The public face of a parse forest. The raw SPPF coming out of the parser
// is binarized: long productions appear as chains of interior nodes with
// at most two children per family. Compaction coalesces those chains into
// flat child lists on the enclosing completed nonterminal, dropping the
// node count considerably. Ambiguity is preserved: an interior node with
// more than one family stays in place, with placeholder (None) children
// inserted so that the child list stays aligned with the production.
//
// Empty (zero-span) nodes are never materialized; they appear as None
// placeholders in their parents' child lists.

#[derive(Clone, Debug, PartialEq)]
pub struct Family {
  // Production slot in the grammar, where known
  pub prod: Option<u32>,
  pub children: Vec<Option<Id>>,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum NodeKind {
  // A token/terminal match; token is the wrapped token position
  Token { token: u32, terminal: i32 },
  // A nonterminal; interior (partial production) nodes have completed
  // set to false
  Nonterminal { nt: i32, completed: bool },
}

pub struct Node {
  pub kind: NodeKind,
  pub start: u32,
  pub end: u32,
  pub families: Vec<Family>,
  // Assigned by the reducer
  pub score: i32,
  highest_prio: u32,
}

impl Node {
  pub fn is_token(&self) -> bool {
    matches!(self.kind, NodeKind::Token { .. })
  }

  pub fn is_completed(&self) -> bool {
    matches!(self.kind, NodeKind::Nonterminal { completed: true, .. })
  }

  pub fn nonterminal(&self) -> Option<i32> {
    match self.kind {
      NodeKind::Nonterminal { nt, .. } => Some(nt),
      NodeKind::Token { .. } => None,
    }
  }

  pub fn is_ambiguous(&self) -> bool {
    self.families.len() >= 2
  }
}

pub struct Forest {
  nodes: Arena<Node>,
  pub root: Id,
}

impl Forest {
  pub fn node(&self, id: Id) -> &Node {
    self.nodes.get(id)
  }

  pub fn num_nodes(&self) -> usize {
    self.nodes.len()
  }

  pub fn iter(&self) -> impl Iterator<Item = (Id, &Node)> {
    self.nodes.iter()
  }

  pub fn set_score(&mut self, id: Id, score: i32) {
    self.nodes.get_mut(id).score = score;
  }

  // The key action of the reducer: eliminate all child families of a node
  // except the given one
  pub fn reduce_to(&mut self, id: Id, family_ix: usize) {
    let node = self.nodes.get_mut(id);
    if family_ix != 0 || node.families.len() != 1 {
      let family = node.families.swap_remove(family_ix);
      node.families.clear();
      node.families.push(family);
    }
  }

  // Build a compacted forest from a raw binarized SPPF
  pub fn compact(output: &ParseOutput, grammar: &Grammar) -> Option<Forest> {
    let mut builder = Compactor {
      sppf: &output.sppf,
      grammar,
      nodes: Arena::with_capacity(output.sppf.nodes.len()),
      memo: HashMap::default(),
    };
    let root = builder.convert(output.root)?;
    Some(Forest { nodes: builder.nodes, root })
  }

  // Count the possible derivation combinations in the forest. Shared
  // subtree counts are memoized; extremely ambiguous forests would
  // otherwise take astronomically long to enumerate.
  pub fn num_combinations(&self) -> u64 {
    let mut memo: HashMap<Id, u64> = HashMap::default();
    self.num_comb(self.root, &mut memo)
  }

  fn num_comb(&self, id: Id, memo: &mut HashMap<Id, u64>) -> u64 {
    if let Some(&n) = memo.get(&id) {
      return n;
    }
    let node = self.node(id);
    if node.is_token() {
      return 1;
    }
    let mut comb: u64 = 0;
    for family in &node.families {
      let mut product: u64 = 1;
      for child in family.children.iter().flatten() {
        product = product.saturating_mul(self.num_comb(*child, memo));
      }
      comb = comb.saturating_add(product);
    }
    let result = if comb > 0 { comb } else { 1 };
    memo.insert(id, result);
    result
  }

  // The set of terminals matched at each token position, and the position
  // of each matched token; the reducer scores these option sets
  pub fn finals(&self) -> HashMap<u32, HashSet<i32>> {
    let mut finals: HashMap<u32, HashSet<i32>> = HashMap::default();
    for (_, node) in self.iter() {
      if let NodeKind::Token { token, terminal } = node.kind {
        finals.entry(token).or_default().insert(terminal);
      }
    }
    finals
  }

  // An indented text representation for debugging and tests; interior
  // nodes do not add indentation
  pub fn dump(&self, grammar: &Grammar) -> String {
    let mut out = String::new();
    self.dump_node(self.root, grammar, 0, &mut out);
    out
  }

  fn dump_node(&self, id: Id, grammar: &Grammar, level: usize, out: &mut String) {
    let node = self.node(id);
    let interior = matches!(node.kind, NodeKind::Nonterminal { completed: false, .. });
    let child_level = match node.kind {
      NodeKind::Token { token, terminal } => {
        out.push_str(&"  ".repeat(level));
        out.push_str(&format!("{}: {}\n", grammar.terminal(terminal).name, token));
        return;
      }
      NodeKind::Nonterminal { nt, .. } => {
        if !interior {
          out.push_str(&"  ".repeat(level));
          out.push_str(&grammar.nonterminal(nt).name);
          out.push('\n');
          level + 1
        } else {
          level
        }
      }
    };
    for (ix, family) in node.families.iter().enumerate() {
      if node.families.len() > 1 {
        out.push_str(&"  ".repeat(child_level));
        out.push_str(&format!("Option {}:\n", ix + 1));
      }
      for child in family.children.iter().flatten() {
        self.dump_node(*child, grammar, child_level, out);
      }
    }
  }
}

struct Compactor<'a> {
  sppf: &'a Sppf,
  grammar: &'a Grammar,
  nodes: Arena<Node>,
  memo: HashMap<Id, Id>,
}

impl<'a> Compactor<'a> {
  fn lhs_of(&self, slot: u32) -> i32 {
    self.grammar.production(slot as usize).lhs
  }

  fn convert(&mut self, raw: Id) -> Option<Id> {
    if let Some(&done) = self.memo.get(&raw) {
      return Some(done);
    }
    let rn = self.sppf.node(raw);
    if rn.start >= rn.end {
      // Empty node: becomes a placeholder in its parent
      return None;
    }
    let (nt, completed) = match rn.label {
      Label::Token(token, terminal) => {
        let id = self.nodes.alloc(Node {
          kind: NodeKind::Token { token, terminal },
          start: rn.start,
          end: rn.end,
          families: vec![],
          score: 0,
          highest_prio: 0,
        });
        self.memo.insert(raw, id);
        return Some(id);
      }
      Label::Sym(nt) => (nt, true),
      Label::Inter(slot, _) => (self.lhs_of(slot), false),
    };
    let id = self.nodes.alloc(Node {
      kind: NodeKind::Nonterminal { nt, completed },
      start: rn.start,
      end: rn.end,
      families: vec![],
      score: 0,
      highest_prio: 0,
    });
    // Memoize before visiting families so shared children re-use the node
    self.memo.insert(raw, id);

    let families: Vec<_> = rn.families.clone();
    for family in families {
      // Coalesce chains of unambiguous interior nodes of this nonterminal
      // into one flat child list
      let mut ch: Vec<Option<Id>> = vec![];
      self.push_pair(nt, family.left, family.right, &mut ch);
      self.add_family(id, family.prod, ch);
    }
    Some(id)
  }

  fn push_pair(&mut self, nt: i32, left: Option<Id>, right: Option<Id>, ch: &mut Vec<Option<Id>>) {
    match (left, right) {
      (Some(l), Some(r)) => {
        self.push_child(nt, Some(l), ch);
        self.push_child(nt, Some(r), ch);
      }
      (None, Some(r)) => self.push_child(nt, Some(r), ch),
      (l, None) => self.push_child(nt, l, ch),
    }
  }

  fn push_child(&mut self, nt: i32, child: Option<Id>, ch: &mut Vec<Option<Id>>) {
    let raw = match child {
      Some(raw) => raw,
      None => {
        ch.push(None);
        return;
      }
    };
    if let Label::Inter(slot, dot) = self.sppf.node(raw).label {
      if self.lhs_of(slot) == nt {
        let families = self.sppf.node(raw).families.clone();
        if families.len() == 1 {
          // Unambiguous interior node: splice its children in place
          self.push_pair(nt, families[0].left, families[0].right, ch);
        } else {
          // Ambiguous interior node: keep it, with placeholders standing
          // in for the part of the production hidden inside it
          if dot > 2 {
            for _ in 0..dot - 2 {
              ch.push(None);
            }
          }
          ch.push(self.convert(raw));
          ch.push(None);
        }
        return;
      }
    }
    ch.push(self.convert(raw));
  }

  // Add a family of children, in parallel with other families. Families
  // carrying a production with a lower priority (higher number) than one
  // already present are dropped outright; a higher-priority family
  // replaces everything gathered so far.
  fn add_family(&mut self, id: Id, prod: Option<u32>, children: Vec<Option<Id>>) {
    let prio = prod.map(|slot| self.grammar.production(slot as usize).priority).unwrap_or(0);
    let node = self.nodes.get_mut(id);
    if !node.families.is_empty() && prio > node.highest_prio {
      return;
    }
    let replace = node.families.is_empty() || prio < node.highest_prio;
    let family = Family { prod, children };
    let node = self.nodes.get_mut(id);
    if replace {
      node.families.clear();
    }
    node.families.push(family);
    node.highest_prio = prio;
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::config::Settings;
  use crate::matcher::Matcher;
  use crate::parser::Parser;
  use crate::tokens::{BinMeaning, BinToken, Tok};

  fn load(text: &str) -> Grammar {
    Grammar::read_text(text, "test.grammar", &HashSet::default(), &HashSet::default()).unwrap()
  }

  fn adverb(txt: &str, ix: usize) -> BinToken {
    let mut t =
      BinToken::new(&Tok::word(txt, vec![BinMeaning::new(txt, None, "ao", "alm", txt, "-")]), 0);
    t.index = ix;
    t
  }

  fn parse(g: &Grammar, tokens: &[BinToken]) -> Forest {
    let s = Settings::new();
    let mut matcher = Matcher::new(&s, g.num_terminals());
    let out = Parser::new(g).parse(tokens, &mut matcher).unwrap();
    Forest::compact(&out, g).unwrap()
  }

  #[test]
  fn long_productions_coalesce_into_flat_children() {
    let g = load("S -> ao ao ao ao\n");
    let tokens: Vec<BinToken> = (0..4).map(|i| adverb("vel", i)).collect();
    let forest = parse(&g, &tokens);
    let root = forest.node(forest.root);
    assert!(root.is_completed());
    assert_eq!(root.families.len(), 1);
    let children = &root.families[0].children;
    assert_eq!(children.len(), 4);
    for (i, child) in children.iter().enumerate() {
      let child = forest.node(child.unwrap());
      assert_eq!(child.kind, NodeKind::Token { token: i as u32, terminal: 1 });
    }
  }

  #[test]
  fn derivation_counts_follow_catalan_numbers() {
    let g = load("E -> E E | ao\n");
    for (n, expected) in [(1usize, 1u64), (2, 1), (3, 2), (4, 5), (5, 14)] {
      let tokens: Vec<BinToken> = (0..n).map(|i| adverb("vel", i)).collect();
      let forest = parse(&g, &tokens);
      assert_eq!(forest.num_combinations(), expected, "n = {}", n);
    }
  }

  #[test]
  fn empty_optional_children_become_placeholders() {
    let g = load(
      "S -> A ao\n\
       A -> no_nf | 0\n",
    );
    let tokens = vec![adverb("vel", 0)];
    let forest = parse(&g, &tokens);
    let root = forest.node(forest.root);
    let children = &root.families[0].children;
    assert_eq!(children.len(), 2);
    assert!(children[0].is_none());
    assert!(children[1].is_some());
  }

  #[test]
  fn shared_subtrees_are_single_nodes() {
    let g = load("E -> E E | ao\n");
    let tokens: Vec<BinToken> = (0..3).map(|i| adverb("vel", i)).collect();
    let forest = parse(&g, &tokens);
    // Completed (E, i, j) spans: (0,1) (1,2) (2,3) (0,2) (1,3) (0,3);
    // plus three token nodes; ambiguity adds no extra nodes
    let completed =
      forest.iter().filter(|(_, n)| n.is_completed()).count();
    assert_eq!(completed, 6);
    assert_eq!(forest.num_combinations(), 2);
  }

  #[test]
  fn finals_report_matched_terminals_per_position() {
    let g = load("S -> A A\nA -> ao | eo\n");
    let tokens = vec![adverb("vel", 0), adverb("illa", 1)];
    let forest = parse(&g, &tokens);
    let finals = forest.finals();
    assert_eq!(finals.len(), 2);
    // Both adverbs match both ao and eo at each position
    assert_eq!(finals[&0].len(), 2);
    assert_eq!(finals[&1].len(), 2);
  }

  #[test]
  fn priority_filtering_drops_worse_families_during_compaction() {
    let g = load("S -> A\nA -> ao ao > eo eo\n");
    let tokens = vec![adverb("vel", 0), adverb("vel", 1)];
    let forest = parse(&g, &tokens);
    // The A node has two possible derivations, but the prioritized one
    // (ao ao, priority 1) wins over (eo eo, priority 2) at build time
    let a = forest
      .iter()
      .find(|(_, n)| n.is_completed() && n.nonterminal() == Some(g.nonterminal_index("A").unwrap()))
      .map(|(id, _)| id)
      .unwrap();
    let a = forest.node(a);
    assert_eq!(a.families.len(), 1);
    let prod = g.production(a.families[0].prod.unwrap() as usize);
    assert_eq!(prod.priority, 1);
  }

  #[test]
  fn dump_is_indented_by_depth() {
    let g = load("S -> A ao\nA -> ao\n");
    let tokens = vec![adverb("vel", 0), adverb("vel", 1)];
    let forest = parse(&g, &tokens);
    let dump = forest.dump(&g);
    assert!(dump.starts_with("S\n"));
    assert!(dump.contains("\n  A\n"));
    assert!(dump.contains("\n    ao: 0\n"));
  }
}
