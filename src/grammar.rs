use crate::base::{HashMap, HashSet};
use crate::terminal::Terminal;
use itertools::Itertools;
use log::{debug, warn};
use thiserror::Error;

// A grammar maps nonterminals to lists of productions. The text form is
// line-oriented:
//
//   A -> A B terminal C
//       | A '/' D
//       | 0
//   B -> terminal "+" C
//
// Nonterminals start with an uppercase letter; terminals with a lowercase
// letter or a quote. 0 (or ø / ∅) is an empty production. '>' instead of
// '|' separates productions by falling priority. Variant axes are declared
// as "/name = opt1 opt2 ..." and attached with "/name" suffixes; a rule
// with variants is expanded over the cross-product of its axes. Pragmas:
// $score(n) NT..., $tag(word) NT..., $root(NT), $if(cond)/$endif(cond).

#[derive(Debug, Error, PartialEq)]
#[error("{}Line {line}: {text}", .fname.as_deref().map(|f| format!("{} - ", f)).unwrap_or_default())]
pub struct GrammarError {
  pub text: String,
  pub fname: Option<String>,
  pub line: u32,
}

impl GrammarError {
  pub fn new(text: impl Into<String>) -> Self {
    Self { text: text.into(), fname: None, line: 0 }
  }

  pub fn at(text: impl Into<String>, fname: &str, line: u32) -> Self {
    Self { text: text.into(), fname: Some(fname.to_string()), line }
  }

  fn augment(mut self, fname: &str, line: u32) -> Self {
    if self.fname.is_none() {
      self.fname = Some(fname.to_string());
    }
    if self.line == 0 {
      self.line = line;
    }
    self
  }
}

#[derive(Clone, Debug)]
pub struct Nonterminal {
  pub name: String,
  // Negative external index, assigned after load in sorted name order
  pub index: i32,
  pub fname: String,
  pub line: u32,
  tags: HashSet<String>,
  pub no_reduce: bool,
  // Noun phrase nonterminals ("Nl...") close verb-preposition scopes
  pub is_noun_phrase: bool,
  // Explicitly nullable helper nonterminals created for X? and X*
  pub is_optional: bool,
}

impl Nonterminal {
  pub fn has_tag(&self, tag: &str) -> bool {
    self.tags.contains(tag)
  }

  pub fn has_any_tag(&self, tags: &[&str]) -> bool {
    tags.iter().any(|t| self.tags.contains(*t))
  }

  pub fn has_tags(&self) -> bool {
    !self.tags.is_empty()
  }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Production {
  // Stable index in generation order; survives pruning with gaps
  pub index: u32,
  pub priority: u32,
  // External index of the left-hand-side nonterminal
  pub lhs: i32,
  // External item indices: negative = nonterminal, positive = terminal
  pub rhs: Vec<i32>,
}

impl Production {
  pub fn len(&self) -> usize {
    self.rhs.len()
  }

  pub fn is_empty(&self) -> bool {
    self.rhs.is_empty()
  }
}

#[derive(Debug)]
pub struct Grammar {
  // Indexed by (-external - 1)
  nonterminals: Vec<Nonterminal>,
  // Indexed by (external - 1)
  terminals: Vec<Terminal>,
  productions: Vec<Production>,
  // Per nonterminal (same order as nonterminals): slots into productions
  nt_prods: Vec<Vec<usize>>,
  nt_ids: HashMap<String, i32>,
  t_ids: HashMap<String, i32>,
  pub root: i32,
  pub secondary_roots: Vec<i32>,
  nt_scores: HashMap<i32, i32>,
}

impl Grammar {
  pub fn num_nonterminals(&self) -> usize {
    self.nonterminals.len()
  }

  pub fn num_terminals(&self) -> usize {
    self.terminals.len()
  }

  pub fn num_productions(&self) -> usize {
    self.productions.len()
  }

  pub fn nonterminal(&self, ix: i32) -> &Nonterminal {
    &self.nonterminals[(-ix - 1) as usize]
  }

  pub fn terminal(&self, ix: i32) -> &Terminal {
    &self.terminals[(ix - 1) as usize]
  }

  pub fn terminals(&self) -> &[Terminal] {
    &self.terminals
  }

  pub fn nonterminal_index(&self, name: &str) -> Option<i32> {
    self.nt_ids.get(name).copied()
  }

  pub fn terminal_index(&self, name: &str) -> Option<i32> {
    self.t_ids.get(name).copied()
  }

  // Production slots of a nonterminal, in declaration order
  pub fn productions_of(&self, nt_ix: i32) -> &[usize] {
    &self.nt_prods[(-nt_ix - 1) as usize]
  }

  pub fn production(&self, slot: usize) -> &Production {
    &self.productions[slot]
  }

  pub fn nt_score(&self, nt_ix: i32) -> i32 {
    self.nt_scores.get(&nt_ix).copied().unwrap_or(0)
  }

  pub fn read_text(
    text: &str,
    fname: &str,
    conditions: &HashSet<String>,
    static_phrases: &HashSet<String>,
  ) -> Result<Grammar, GrammarError> {
    let mut builder = Builder::new(conditions, static_phrases);
    builder.read(text, fname)?;
    builder.finalize(fname)
  }
}

// ---------------------------------------------------------------------------
// Grammar text reader

#[derive(Clone, Copy, PartialEq)]
enum BSym {
  Nt(usize),
  T(usize),
}

struct NtB {
  name: String,
  fname: String,
  line: u32,
  tags: HashSet<String>,
  optional: bool,
  referenced: bool,
  defined: bool,
}

struct ProdB {
  index: u32,
  rhs: Vec<BSym>,
}

struct Builder<'a> {
  nts: Vec<NtB>,
  nt_ids: HashMap<String, usize>,
  ts: Vec<Terminal>,
  t_ids: HashMap<String, usize>,
  // Per nonterminal: (priority, production)
  prods: Vec<Vec<(u32, ProdB)>>,
  next_prod: u32,
  root: Option<usize>,
  secondary_roots: Vec<usize>,
  scores: HashMap<usize, i32>,
  variants: Vec<(String, Vec<String>)>,
  variant_ids: HashMap<String, usize>,
  conditions: &'a HashSet<String>,
  static_phrases: &'a HashSet<String>,
}

fn is_identifier(s: &str) -> bool {
  let mut chars = s.chars();
  match chars.next() {
    Some(c) if c.is_alphabetic() || c == '_' => {}
    _ => return false,
  }
  chars.all(|c| c.is_alphanumeric() || c == '_')
}

impl<'a> Builder<'a> {
  fn new(conditions: &'a HashSet<String>, static_phrases: &'a HashSet<String>) -> Self {
    Self {
      nts: vec![],
      nt_ids: HashMap::default(),
      ts: vec![],
      t_ids: HashMap::default(),
      prods: vec![],
      next_prod: 0,
      root: None,
      secondary_roots: vec![],
      scores: HashMap::default(),
      variants: vec![],
      variant_ids: HashMap::default(),
      conditions,
      static_phrases,
    }
  }

  fn nt(&mut self, name: &str, fname: &str, line: u32) -> usize {
    if let Some(&id) = self.nt_ids.get(name) {
      return id;
    }
    let id = self.nts.len();
    self.nts.push(NtB {
      name: name.to_string(),
      fname: fname.to_string(),
      line,
      tags: HashSet::default(),
      optional: name.ends_with('?') || name.ends_with('*'),
      referenced: false,
      defined: false,
    });
    self.prods.push(vec![]);
    self.nt_ids.insert(name.to_string(), id);
    id
  }

  fn term(&mut self, name: &str, fname: &str, line: u32) -> Result<usize, GrammarError> {
    if let Some(&id) = self.t_ids.get(name) {
      return Ok(id);
    }
    let id = self.ts.len();
    let t = Terminal::new(name).map_err(|e| e.augment(fname, line))?;
    self.ts.push(t);
    self.t_ids.insert(name.to_string(), id);
    Ok(id)
  }

  fn new_prod(&mut self, rhs: Vec<BSym>) -> ProdB {
    let index = self.next_prod;
    self.next_prod += 1;
    ProdB { index, rhs }
  }

  fn add_rhs(&mut self, nt: usize, priority: u32, prod: ProdB) {
    self.nts[nt].defined = true;
    if prod.rhs.is_empty() && self.prods[nt].iter().any(|(_, p)| p.rhs.is_empty()) {
      // Avoid duplicate epsilon productions
      return;
    }
    self.prods[nt].push((priority, prod));
  }

  fn variant_options(&self, name: &str) -> &[String] {
    &self.variants[self.variant_ids[name]].1
  }

  // All names generated by appending each combination of the given variant
  // axes to the base name
  fn variant_names(&self, base: &str, vts: &[String]) -> Vec<String> {
    let mut result = vec![base.to_string()];
    for v in vts {
      let mut next = vec![];
      for vopt in self.variant_options(v) {
        for r in &result {
          next.push(format!("{}_{}", r, vopt));
        }
      }
      result = next;
    }
    result
  }

  // Cross product of the option lists of the given axes, with the last
  // axis varying slowest
  fn variant_values(&self, vlist: &[String]) -> Vec<Vec<String>> {
    if vlist.is_empty() {
      return vec![vec![String::new()]];
    }
    if vlist.len() == 1 {
      return self.variant_options(&vlist[0]).iter().map(|x| vec![x.clone()]).collect();
    }
    let mut result = vec![];
    for tail in self.variant_values(&vlist[1..]) {
      for vopt in self.variant_options(&vlist[0]) {
        let mut row = vec![vopt.clone()];
        row.extend(tail.iter().cloned());
        result.push(row);
      }
    }
    result
  }

  fn highest_priority(&self, nt_name: &str) -> u32 {
    match self.nt_ids.get(nt_name) {
      Some(&id) => self.prods[id].iter().map(|(prio, _)| *prio).max().unwrap_or(0),
      None => 0,
    }
  }

  fn read(&mut self, text: &str, fname: &str) -> Result<(), GrammarError> {
    let mut line_num: u32 = 0;
    let mut current_line = String::new();
    let mut current_line_num: u32 = 0;
    // Stack of ($if condition, active) pairs
    let mut cond_stack: Vec<(String, bool)> = vec![(String::new(), true)];

    for raw in text.lines() {
      line_num += 1;
      let mut s = raw;
      if let Some(ix) = s.find('#') {
        s = &s[..ix];
      }
      let s = s.trim_end();
      if s.is_empty() {
        continue;
      }
      if s.starts_with(char::is_whitespace) {
        // Continuation of the previous logical line
        current_line.push_str(s);
        continue;
      }
      if cond_stack.last().map(|x| x.1).unwrap_or(true) && !current_line.is_empty() {
        self
          .parse_line(&current_line, fname, current_line_num)
          .map_err(|e| e.augment(fname, current_line_num))?;
        current_line.clear();
      }
      let s = s.trim();
      if let Some(cond) = pragma_arg(s, "$if(") {
        if !is_identifier(cond) {
          return Err(GrammarError::at("$if() condition must be a valid identifier", fname, line_num));
        }
        let active = cond_stack.last().map(|x| x.1).unwrap_or(true) && self.conditions.contains(cond);
        cond_stack.push((cond.to_string(), active));
        current_line.clear();
        continue;
      }
      if let Some(cond) = pragma_arg(s, "$endif(") {
        if !is_identifier(cond) {
          return Err(GrammarError::at("$endif() condition must be a valid identifier", fname, line_num));
        }
        if cond_stack.len() < 2 {
          return Err(GrammarError::at("$endif() with no matching $if()", fname, line_num));
        }
        let top = cond_stack.pop().map(|x| x.0).unwrap_or_default();
        if top != cond {
          return Err(GrammarError::at(
            format!("$endif({}) does not match $if({})", cond, top),
            fname,
            line_num,
          ));
        }
        current_line.clear();
        continue;
      }
      current_line = s.to_string();
      current_line_num = line_num;
    }
    if cond_stack.last().map(|x| x.1).unwrap_or(true) && !current_line.is_empty() {
      self
        .parse_line(&current_line, fname, current_line_num)
        .map_err(|e| e.augment(fname, current_line_num))?;
    }
    Ok(())
  }

  fn parse_line(&mut self, s: &str, fname: &str, line: u32) -> Result<(), GrammarError> {
    let s = s.trim();
    if s.is_empty() {
      return Ok(());
    }
    if let Some(rest) = s.strip_prefix('/') {
      return self.parse_variant_decl(rest, fname, line);
    }
    if s.starts_with('$') {
      return self.parse_pragma(s, fname, line);
    }
    self.parse_rule(s, fname, line)
  }

  fn parse_variant_decl(&mut self, s: &str, fname: &str, line: u32) -> Result<(), GrammarError> {
    // /varname = opt1 opt2 opt3...
    let (name, opts) = s
      .split_once('=')
      .ok_or_else(|| GrammarError::at("Invalid variant syntax", fname, line))?;
    let name = name.trim();
    if name.contains('_') || !is_identifier(name) {
      return Err(GrammarError::at(format!("Invalid variant name '{}'", name), fname, line));
    }
    let opts: Vec<String> = opts.split_whitespace().map(|x| x.to_string()).collect();
    for opt in &opts {
      if opt.contains('_') || !is_identifier(opt) {
        return Err(GrammarError::at(
          format!("Invalid option '{}' in variant '{}'", opt, name),
          fname,
          line,
        ));
      }
    }
    if let Some(&id) = self.variant_ids.get(name) {
      self.variants[id].1 = opts;
    } else {
      self.variant_ids.insert(name.to_string(), self.variants.len());
      self.variants.push((name.to_string(), opts));
    }
    Ok(())
  }

  fn parse_pragma(&mut self, s: &str, fname: &str, line: u32) -> Result<(), GrammarError> {
    if let Some(rest) = s.strip_prefix("$score(") {
      let (param, nts) = split_pragma(rest, fname, line)?;
      let score: i32 = param
        .parse()
        .map_err(|_| GrammarError::at(format!("Invalid pragma argument '{}'", param), fname, line))?;
      return self.apply_to_nonterminals(&nts, fname, line, |b, nt| {
        b.scores.insert(nt, score);
      });
    }
    if let Some(rest) = s.strip_prefix("$tag(") {
      let (param, nts) = split_pragma(rest, fname, line)?;
      let tag = param.to_string();
      return self.apply_to_nonterminals(&nts, fname, line, |b, nt| {
        b.nts[nt].tags.insert(tag.clone());
      });
    }
    if let Some(root_nt) = pragma_arg(s, "$root(") {
      if !is_identifier(root_nt) {
        return Err(GrammarError::at(
          format!("Invalid nonterminal name '{}'", root_nt),
          fname,
          line,
        ));
      }
      let id = *self
        .nt_ids
        .get(root_nt)
        .ok_or_else(|| GrammarError::at(format!("Unknown nonterminal '{}'", root_nt), fname, line))?;
      self.nts[id].referenced = true;
      self.secondary_roots.push(id);
      return Ok(());
    }
    Err(GrammarError::at(format!("Unknown pragma '{}'", s), fname, line))
  }

  fn apply_to_nonterminals(
    &mut self,
    nts: &str,
    fname: &str,
    line: u32,
    mut func: impl FnMut(&mut Self, usize),
  ) -> Result<(), GrammarError> {
    let mut count = 0;
    for nt_name in nts.split_whitespace() {
      let parts: Vec<&str> = nt_name.split('/').collect();
      let vts: Vec<String> = parts[1..].iter().map(|x| x.to_string()).collect();
      for vname in &vts {
        if !self.variant_ids.contains_key(vname.as_str()) {
          return Err(GrammarError::at(
            format!("Unknown variant '{}' for nonterminal '{}'", vname, parts[0]),
            fname,
            line,
          ));
        }
      }
      for vname in self.variant_names(parts[0], &vts) {
        let id = *self.nt_ids.get(&vname).ok_or_else(|| {
          GrammarError::at(format!("Unknown nonterminal '{}'", vname), fname, line)
        })?;
        func(self, id);
        count += 1;
      }
    }
    if count == 0 {
      return Err(GrammarError::at("Pragma does not affect any nonterminal", fname, line));
    }
    Ok(())
  }

  fn parse_rule(&mut self, s: &str, fname: &str, line: u32) -> Result<(), GrammarError> {
    let (head, body) = if s.contains('→') {
      s.split_once('→').map(|(a, b)| (a, b))
    } else {
      s.split_once("->")
    }
    .ok_or_else(|| GrammarError::at("Invalid syntax", fname, line))?;

    // Split the nonterminal spec into name and variants: NtName/var1/var2
    let ntv: Vec<&str> = head.trim().split('/').collect();
    let nt_name = ntv[0].to_string();
    let current_variants: Vec<String> = ntv[1..].iter().map(|x| x.to_string()).collect();
    if !is_identifier(&nt_name) {
      return Err(GrammarError::at(format!("Invalid nonterminal name '{}'", nt_name), fname, line));
    }
    for vname in &current_variants {
      if !self.variant_ids.contains_key(vname.as_str()) {
        return Err(GrammarError::at(
          format!("Unknown variant '{}' for nonterminal '{}'", vname, nt_name),
          fname,
          line,
        ));
      }
    }

    // Create all variant expansions of this nonterminal up front
    for nt_var in self.variant_names(&nt_name, &current_variants) {
      let id = self.nt(&nt_var, fname, line);
      self.nts[id].defined = true;
      if self.root.is_none() {
        // The first nonterminal becomes the root, implicitly referenced
        self.root = Some(id);
        self.nts[id].referenced = true;
      }
    }

    let mut sep = '|';
    let mut priority: u32 = 0;
    if body.contains('>') {
      if body.contains('|') {
        return Err(GrammarError::at("Cannot mix '|' and '>' between productions", fname, line));
      }
      sep = '>';
      // Additional prioritized productions always rank below pre-existing ones
      priority = self.highest_priority(&nt_name) + 1;
    }

    for prod in body.split(sep) {
      // Extra separators are tolerated; empty alternatives are skipped
      let prod = prod.trim();
      if !prod.is_empty() {
        self.parse_rhs(&nt_name, &current_variants, prod, priority, fname, line)?;
        if sep == '>' {
          priority += 1;
        }
      }
    }
    Ok(())
  }

  fn parse_rhs(
    &mut self,
    nt_id: &str,
    vts: &[String],
    s: &str,
    priority: u32,
    fname: &str,
    line: u32,
  ) -> Result<(), GrammarError> {
    let tokens: Vec<&str> = s.split_whitespace().collect();
    if tokens.is_empty() {
      return Err(GrammarError::at("Invalid syntax for production", fname, line));
    }

    // Each parsed item: (name or None for epsilon, repeat char, variants)
    let mut rhs: Vec<(Option<String>, Option<char>, Vec<String>)> = vec![];
    // Variants occurring on items but not on the nonterminal itself
    let mut vfree: Vec<String> = vec![];

    for &token in &tokens {
      if matches!(token, "0" | "ø" | "∅") {
        if tokens.len() != 1 {
          return Err(GrammarError::at(
            "Empty (epsilon) rule must be of the form NT -> 0",
            fname,
            line,
          ));
        }
        rhs.push((None, None, vec![]));
        break;
      }

      let mut r = token;
      let mut repeat = None;
      if let Some(last) = r.chars().last() {
        if matches!(last, '*' | '+' | '?') {
          repeat = Some(last);
          r = &r[..r.len() - last.len_utf8()];
        }
      }

      // Variant specifiers; "/" and '/' denote a literal slash
      let (name, item_vars): (&str, Vec<String>) = if r == "\"/\"" || r == "'/'" {
        (r, vec![])
      } else {
        let mut parts = r.split('/');
        let name = parts.next().unwrap_or("");
        (name, parts.map(|x| x.to_string()).collect())
      };
      for vspec in &item_vars {
        if !self.variant_ids.contains_key(vspec.as_str()) {
          return Err(GrammarError::at(format!("Unknown variant '{}'", vspec), fname, line));
        }
        if !vts.contains(vspec) && !vfree.contains(vspec) {
          vfree.push(vspec.clone());
        }
      }

      if name.starts_with('"') || name.starts_with('\'') {
        let q = name.chars().next().unwrap_or('"');
        let valid = name == "\"\"" || (name.chars().count() >= 3 && name[1..].contains(q));
        if !valid {
          return Err(GrammarError::at(format!("Invalid literal terminal {}", name), fname, line));
        }
      } else if !is_identifier(name) {
        return Err(GrammarError::at(format!("Invalid identifier '{}'", name), fname, line));
      }
      rhs.push((Some(name.to_string()), repeat, item_vars));
    }

    // Generate one production per combination of all variant axes in play
    let mut vall: Vec<String> = vts.to_vec();
    vall.extend(vfree.iter().cloned());
    let vall_pos: HashMap<&str, usize> =
      vall.iter().enumerate().map(|(i, v)| (v.as_str(), i)).collect();

    for vval in self.variant_values(&vall) {
      let nt_suffix = if vts.is_empty() {
        String::new()
      } else {
        let parts: Vec<&str> = vts.iter().map(|vx| vval[vall_pos[vx.as_str()]].as_str()).collect();
        format!("_{}", parts.join("_"))
      };

      let mut result: Vec<BSym> = vec![];
      for (rname, repeat, v) in &rhs {
        let rname = match rname {
          None => continue, // epsilon
          Some(r) => r,
        };
        let suffix = if v.is_empty() {
          String::new()
        } else {
          let parts: Vec<&str> = v.iter().map(|vx| vval[vall_pos[vx.as_str()]].as_str()).collect();
          format!("_{}", parts.join("_"))
        };
        let sym = format!("{}{}", rname, suffix);
        let first = rname.chars().next().unwrap_or(' ');
        let mut n = if first == '"' || first == '\'' {
          BSym::T(self.term(&sym, fname, line)?)
        } else if first.is_uppercase() {
          let id = self.nt(&sym, fname, line);
          self.nts[id].referenced = true;
          BSym::Nt(id)
        } else {
          BSym::T(self.term(&sym, fname, line)?)
        };

        // Convert EBNF repetition to plain BNF:
        //   A -> B C* D   becomes   A -> B C* D;  C* -> C* C | 0
        //   A -> B C+ D   becomes   A -> B C+ D;  C+ -> C+ C | C
        //   A -> B C? D   becomes   A -> B C? D;  C? -> C | 0
        // Left recursion is deliberate: the Earley algorithm handles it
        // more efficiently than right recursion.
        if let Some(rep) = repeat {
          let new_nt_id = format!("{}{}", sym, rep);
          if !self.nt_ids.contains_key(&new_nt_id) {
            let new_nt = self.nt(&new_nt_id, fname, line);
            self.nts[new_nt].referenced = true;
            let mut first_rhs = vec![];
            if *rep != '?' {
              first_rhs.push(BSym::Nt(new_nt));
            }
            first_rhs.push(n);
            let p = self.new_prod(first_rhs);
            self.add_rhs(new_nt, 0, p);
            let second_rhs = if *rep == '+' { vec![n] } else { vec![] };
            let p = self.new_prod(second_rhs);
            self.add_rhs(new_nt, 0, p);
          }
          n = BSym::Nt(self.nt_ids[&new_nt_id]);
        }
        result.push(n);
      }

      let nt_id_full = format!("{}{}", nt_id, nt_suffix);
      let target = *self.nt_ids.get(&nt_id_full).ok_or_else(|| {
        GrammarError::at(format!("Unknown nonterminal '{}'", nt_id_full), fname, line)
      })?;
      if result.len() == 1 && result[0] == BSym::Nt(target) {
        return Err(GrammarError::at(
          format!("Nonterminal {} deriving itself", nt_id_full),
          fname,
          line,
        ));
      }
      let p = self.new_prod(result);
      self.add_rhs(target, priority, p);
    }
    Ok(())
  }

  fn finalize(mut self, fname: &str) -> Result<Grammar, GrammarError> {
    // Every nonterminal must be defined and have at least one production
    for (id, nt) in self.nts.iter().enumerate() {
      if !nt.referenced && Some(id) != self.root {
        debug!("Nonterminal {} is never referenced in a production", nt.name);
      }
      if !nt.defined {
        return Err(GrammarError::at(
          format!("Nonterminal {} is referenced but not defined", nt.name),
          &nt.fname,
          nt.line,
        ));
      }
      if self.prods[id].is_empty() {
        return Err(GrammarError::at(
          format!("Nonterminal {} has no productions", nt.name),
          &nt.fname,
          nt.line,
        ));
      }
    }

    // Consecutive strong literals must not form a known static phrase;
    // such a phrase is tokenized as a single token and could never match
    for plist in &self.prods {
      for (_, p) in plist {
        let mut phrase: Vec<&str> = vec![];
        for item in &p.rhs {
          let text = match item {
            BSym::T(t) => self.ts[*t].literal_text(),
            BSym::Nt(_) => "",
          };
          if text.is_empty() {
            phrase.clear();
            continue;
          }
          phrase.push(text);
          if phrase.len() >= 2 && self.static_phrases.contains(&phrase.join(" ")) {
            return Err(GrammarError::new(format!(
              "Consecutive literal terminals match static phrase; use \"{}\" instead",
              phrase.join("_")
            )));
          }
        }
      }
    }

    // Worklist fixpoint: every nonterminal must derive a terminal string
    let mut derives: Vec<bool> = vec![false; self.nts.len()];
    loop {
      let mut changed = false;
      for id in 0..self.nts.len() {
        if derives[id] {
          continue;
        }
        let ok = self.prods[id].iter().any(|(_, p)| {
          p.rhs.iter().all(|item| match item {
            BSym::T(_) => true,
            BSym::Nt(n) => derives[*n],
          })
        });
        if ok {
          derives[id] = true;
          changed = true;
        }
      }
      if !changed {
        break;
      }
    }
    let stuck: Vec<&str> =
      (0..self.nts.len()).filter(|&i| !derives[i]).map(|i| self.nts[i].name.as_str()).collect();
    if !stuck.is_empty() {
      return Err(GrammarError::at(
        format!("Nonterminals {} do not derive terminal strings", stuck.join(", ")),
        fname,
        0,
      ));
    }

    // Short-circuit variant nonterminals that consist of a single
    // one-nonterminal production, replacing them at their use sites.
    // Nonterminals with scores or tags keep their identity.
    let mut shortcuts: HashMap<usize, usize> = HashMap::default();
    for (id, nt) in self.nts.iter().enumerate() {
      if !nt.name.contains('_') || !nt.tags.is_empty() || self.scores.get(&id).copied().unwrap_or(0) != 0 {
        continue;
      }
      let plist = &self.prods[id];
      if plist.len() == 1 && plist[0].1.rhs.len() == 1 {
        if let BSym::Nt(target) = plist[0].1.rhs[0] {
          shortcuts.insert(id, target);
        }
      }
    }
    let resolve = |shortcuts: &HashMap<usize, usize>, mut id: usize| -> usize {
      let mut hops = 0;
      while let Some(&next) = shortcuts.get(&id) {
        id = next;
        hops += 1;
        if hops > shortcuts.len() {
          break; // defensive bound; cycles cannot pass the self-derivation check
        }
      }
      id
    };
    for plist in self.prods.iter_mut() {
      for (_, p) in plist.iter_mut() {
        for item in p.rhs.iter_mut() {
          if let BSym::Nt(n) = item {
            if shortcuts.contains_key(n) {
              *item = BSym::Nt(resolve(&shortcuts, *n));
            }
          }
        }
      }
    }

    // Prune nonterminals unreachable from the root and secondary roots
    let root = self.root.ok_or_else(|| GrammarError::at("Grammar has no root", fname, 0))?;
    let mut reachable: Vec<bool> = vec![false; self.nts.len()];
    let mut agenda = vec![root];
    agenda.extend(self.secondary_roots.iter().copied());
    while let Some(id) = agenda.pop() {
      if reachable[id] {
        continue;
      }
      reachable[id] = true;
      for (_, p) in &self.prods[id] {
        for item in &p.rhs {
          if let BSym::Nt(n) = item {
            if !reachable[*n] {
              agenda.push(*n);
            }
          }
        }
      }
    }
    let unreachable: Vec<&str> = (0..self.nts.len())
      .filter(|&i| !reachable[i])
      .map(|i| self.nts[i].name.as_str())
      .sorted_unstable()
      .collect();
    if !unreachable.is_empty() {
      warn!(
        "Removing {} nonterminals unreachable from the root: {}",
        unreachable.len(),
        unreachable.join(", ")
      );
    }

    // Assign dense indices in sorted name order so that the binary grammar
    // is deterministic and reproducible
    let mut nt_sorted: Vec<usize> = (0..self.nts.len()).filter(|&i| reachable[i]).collect();
    nt_sorted.sort_by(|&a, &b| self.nts[a].name.cmp(&self.nts[b].name));
    let mut nt_external: HashMap<usize, i32> = HashMap::default();
    for (pos, &id) in nt_sorted.iter().enumerate() {
      nt_external.insert(id, -1 - pos as i32);
    }

    let mut t_sorted: Vec<usize> = (0..self.ts.len()).collect();
    t_sorted.sort_by(|&a, &b| self.ts[a].name.cmp(&self.ts[b].name));
    let mut t_external: HashMap<usize, i32> = HashMap::default();
    for (pos, &id) in t_sorted.iter().enumerate() {
      t_external.insert(id, 1 + pos as i32);
    }

    let mut terminals = Vec::with_capacity(t_sorted.len());
    let mut t_ids = HashMap::default();
    for &id in &t_sorted {
      let mut t = self.ts[id].clone();
      t.index = t_external[&id];
      t_ids.insert(t.name.clone(), t.index);
      terminals.push(t);
    }

    let mut nonterminals = Vec::with_capacity(nt_sorted.len());
    let mut nt_ids = HashMap::default();
    let mut nt_prods = Vec::with_capacity(nt_sorted.len());
    let mut productions = vec![];
    let mut nt_scores = HashMap::default();
    for &id in &nt_sorted {
      let b = &self.nts[id];
      let external = nt_external[&id];
      let nt = Nonterminal {
        name: b.name.clone(),
        index: external,
        fname: b.fname.clone(),
        line: b.line,
        no_reduce: b.tags.contains("no_reduce"),
        is_noun_phrase: b.name.starts_with("Nl"),
        is_optional: b.optional,
        tags: b.tags.clone(),
      };
      nt_ids.insert(nt.name.clone(), external);
      if let Some(&score) = self.scores.get(&id) {
        if score != 0 {
          nt_scores.insert(external, score);
        }
      }
      let mut slots = vec![];
      for (prio, p) in &self.prods[id] {
        let rhs: Vec<i32> = p
          .rhs
          .iter()
          .map(|item| match item {
            BSym::Nt(n) => nt_external[n],
            BSym::T(t) => t_external[t],
          })
          .collect();
        slots.push(productions.len());
        productions.push(Production { index: p.index, priority: *prio, lhs: external, rhs });
      }
      nt_prods.push(slots);
      nonterminals.push(nt);
    }

    let root_ix = nt_external[&root];
    let secondary_roots = self.secondary_roots.iter().map(|id| nt_external[id]).collect();
    debug!(
      "Grammar loaded: {} nonterminals, {} terminals, {} productions",
      nonterminals.len(),
      terminals.len(),
      productions.len()
    );
    Ok(Grammar {
      nonterminals,
      terminals,
      productions,
      nt_prods,
      nt_ids,
      t_ids,
      root: root_ix,
      secondary_roots,
      nt_scores,
    })
  }
}

fn pragma_arg<'b>(s: &'b str, prefix: &str) -> Option<&'b str> {
  let rest = s.strip_prefix(prefix)?;
  let rest = rest.strip_suffix(')')?;
  Some(rest.trim())
}

// Split a pragma body "param) NT1 NT2..." at the rightmost right paren
fn split_pragma<'b>(s: &'b str, fname: &str, line: u32) -> Result<(&'b str, String), GrammarError> {
  let ix = s
    .rfind(')')
    .ok_or_else(|| GrammarError::at("Expected right parenthesis in pragma", fname, line))?;
  Ok((s[..ix].trim(), s[ix + 1..].to_string()))
}

#[cfg(test)]
mod tests {
  use super::*;

  fn load(text: &str) -> Result<Grammar, GrammarError> {
    Grammar::read_text(text, "test.grammar", &HashSet::default(), &HashSet::default())
  }

  #[test]
  fn simple_grammar_loads() {
    let g = load(
      "S -> A no_nf\n\
       A -> so_0 | 0\n",
    )
    .unwrap();
    assert_eq!(g.num_nonterminals(), 2);
    assert_eq!(g.num_terminals(), 2);
    assert_eq!(g.num_productions(), 3);
    let root = g.nonterminal(g.root);
    assert_eq!(root.name, "S");
  }

  #[test]
  fn indices_are_sorted_and_dense() {
    let g = load(
      "S -> B | C\n\
       C -> no_nf\n\
       B -> so_0\n",
    )
    .unwrap();
    // Sorted name order: B = -1, C = -2, S = -3
    assert_eq!(g.nonterminal_index("B"), Some(-1));
    assert_eq!(g.nonterminal_index("C"), Some(-2));
    assert_eq!(g.nonterminal_index("S"), Some(-3));
    assert_eq!(g.terminal_index("no_nf"), Some(1));
    assert_eq!(g.terminal_index("so_0"), Some(2));
  }

  #[test]
  fn priority_separator_assigns_rising_numbers() {
    let g = load(
      "S -> A\n\
       A -> no_nf > no_þf > no_ef\n",
    )
    .unwrap();
    let a = g.nonterminal_index("A").unwrap();
    let prios: Vec<u32> = g.productions_of(a).iter().map(|&s| g.production(s).priority).collect();
    assert_eq!(prios, vec![1, 2, 3]);
  }

  #[test]
  fn mixing_separators_is_an_error() {
    let e = load("S -> A | B > C\nA -> x\nB -> x\nC -> x\n").unwrap_err();
    assert!(e.text.contains("Cannot mix"));
    assert_eq!(e.line, 1);
  }

  #[test]
  fn ebnf_suffixes_expand() {
    let g = load("S -> ao* no_nf? so_0+\n").unwrap();
    for name in ["ao*", "no_nf?", "so_0+"] {
      assert!(g.nonterminal_index(name).is_some(), "missing {}", name);
    }
    let star = g.nonterminal_index("ao*").unwrap();
    let star_prods: Vec<&Production> =
      g.productions_of(star).iter().map(|&s| g.production(s)).collect();
    assert_eq!(star_prods.len(), 2);
    // Left recursion: ao* -> ao* ao
    assert_eq!(star_prods[0].rhs, vec![star, g.terminal_index("ao").unwrap()]);
    assert!(star_prods[1].rhs.is_empty());
    let opt = g.nonterminal_index("no_nf?").unwrap();
    assert!(g.nonterminal(opt).is_optional);
  }

  #[test]
  fn variant_axes_expand_cross_product() {
    let g = load(
      "/fall = nf þf\n\
       /tala = et ft\n\
       S -> Nl/fall/tala\n\
       Nl/fall/tala -> no/fall/tala\n",
    )
    .unwrap();
    for name in ["Nl_nf_et", "Nl_nf_ft", "Nl_þf_et", "Nl_þf_ft"] {
      assert!(g.nonterminal_index(name).is_some(), "missing {}", name);
    }
    for name in ["no_nf_et", "no_þf_ft"] {
      assert!(g.terminal_index(name).is_some(), "missing {}", name);
    }
  }

  #[test]
  fn free_variants_multiply_productions_only() {
    let g = load(
      "/fall = nf þf\n\
       S -> no/fall\n",
    )
    .unwrap();
    // S itself is not replicated; it gets one production per case option
    let s = g.nonterminal_index("S").unwrap();
    assert_eq!(g.productions_of(s).len(), 2);
  }

  #[test]
  fn unknown_variant_is_an_error() {
    let e = load("S -> no/fall\n").unwrap_err();
    assert!(e.text.contains("Unknown variant"));
  }

  #[test]
  fn self_derivation_is_an_error() {
    let e = load("S -> S\n").unwrap_err();
    assert!(e.text.contains("deriving itself"));
  }

  #[test]
  fn underivable_nonterminal_is_an_error() {
    let e = load(
      "S -> A\n\
       A -> A no_nf\n",
    )
    .unwrap_err();
    assert!(e.text.contains("do not derive terminal strings"));
  }

  #[test]
  fn undefined_nonterminal_is_an_error() {
    let e = load("S -> A no_nf\n").unwrap_err();
    assert!(e.text.contains("referenced but not defined"));
  }

  #[test]
  fn unreachable_nonterminals_are_pruned() {
    let g = load(
      "S -> no_nf\n\
       Dead -> so_0\n",
    )
    .unwrap();
    assert_eq!(g.nonterminal_index("Dead"), None);
    assert_eq!(g.num_nonterminals(), 1);
  }

  #[test]
  fn root_pragma_keeps_secondary_roots() {
    let g = load(
      "S -> no_nf\n\
       Query -> so_0\n\
       $root(Query)\n",
    )
    .unwrap();
    let q = g.nonterminal_index("Query").unwrap();
    assert_eq!(g.secondary_roots, vec![q]);
  }

  #[test]
  fn epsilon_productions_are_deduplicated() {
    let g = load("S -> A\nA -> no_nf | 0 | 0\n").unwrap();
    let a = g.nonterminal_index("A").unwrap();
    assert_eq!(g.productions_of(a).len(), 2);
  }

  #[test]
  fn score_and_tag_pragmas_apply() {
    let g = load(
      "/fall = nf þf\n\
       S -> Vp/fall\n\
       Vp/fall -> so_0 no/fall\n\
       $score(-4) Vp/fall\n\
       $tag(enable_prep_bonus) Vp/fall\n",
    )
    .unwrap();
    let vp = g.nonterminal_index("Vp_nf").unwrap();
    assert_eq!(g.nt_score(vp), -4);
    assert!(g.nonterminal(vp).has_tag("enable_prep_bonus"));
  }

  #[test]
  fn shortcutting_replaces_trivial_variant_nonterminals() {
    let g = load(
      "/fall = nf\n\
       S -> Wrap/fall\n\
       Wrap/fall -> Inner/fall\n\
       Inner/fall -> no/fall\n",
    )
    .unwrap();
    // Wrap_nf -> Inner_nf is a pure single-production chain, so the use
    // site in S now points directly at Inner_nf and Wrap_nf is pruned
    assert_eq!(g.nonterminal_index("Wrap_nf"), None);
    let s = g.nonterminal_index("S").unwrap();
    let p = g.production(g.productions_of(s)[0]);
    assert_eq!(p.rhs, vec![g.nonterminal_index("Inner_nf").unwrap()]);
  }

  #[test]
  fn tagged_nonterminals_are_not_shortcut() {
    let g = load(
      "/fall = nf\n\
       S -> Wrap/fall\n\
       Wrap/fall -> Inner/fall\n\
       Inner/fall -> no/fall\n\
       $tag(keep) Wrap/fall\n",
    )
    .unwrap();
    assert!(g.nonterminal_index("Wrap_nf").is_some());
  }

  #[test]
  fn conditional_sections_obey_conditions() {
    let text = "S -> A\n\
       $if(extra)\n\
       A -> no_nf | so_0\n\
       $endif(extra)\n\
       $if(missing)\n\
       A -> ao\n\
       $endif(missing)\n";
    let mut conds = HashSet::default();
    conds.insert("extra".to_string());
    let g = Grammar::read_text(text, "t", &conds, &HashSet::default()).unwrap();
    let a = g.nonterminal_index("A").unwrap();
    assert_eq!(g.productions_of(a).len(), 2);
  }

  #[test]
  fn static_phrase_juxtaposition_is_an_error() {
    let mut phrases = HashSet::default();
    phrases.insert("að minnsta kosti".to_string());
    let e = Grammar::read_text(
      "S -> \"að\" \"minnsta\" \"kosti\"\n",
      "t",
      &HashSet::default(),
      &phrases,
    )
    .unwrap_err();
    assert!(e.text.contains("static phrase"));
  }

  #[test]
  fn continuation_lines_join() {
    let g = load("S ->\n    no_nf\n  | so_0\n").unwrap();
    let s = g.nonterminal_index("S").unwrap();
    assert_eq!(g.productions_of(s).len(), 2);
  }

  #[test]
  fn production_indices_are_stable_in_generation_order() {
    let g = load("S -> A B\nA -> no_nf\nB -> so_0\n").unwrap();
    let s = g.nonterminal_index("S").unwrap();
    let a = g.nonterminal_index("A").unwrap();
    let b = g.nonterminal_index("B").unwrap();
    let ps = g.production(g.productions_of(s)[0]).index;
    let pa = g.production(g.productions_of(a)[0]).index;
    let pb = g.production(g.productions_of(b)[0]).index;
    assert!(ps < pa && pa < pb);
  }
}
