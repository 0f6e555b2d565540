use crate::base::{latin1_encode, Error, HashMap, Result};
use crate::tokens::BinMeaning;
use log::info;
use std::collections::{BTreeMap, BTreeSet};

// Compressor for the BÍN dictionary: packs (stofn, utg, ordfl, fl, ordmynd,
// beyging) rows into a binary image that is read directly via mmap, with no
// unpacking into higher-level structures. Word forms go into a radix trie
// mapping each form to its list of (stem, meaning) pairs; the inflected
// forms of each stem in the four cases are stored as shared delta chains.
//
// All strings are Latin-1 and Latin-1 ordinals are used directly as sort
// keys. The alphabet is restricted to 127 characters so a trie fragment
// character fits in 7 bits.

pub const LEXICON_VERSION: &[u8; 16] = b"Reynir 001.04.00";

const STEM_BITS: u32 = 20;
const MEANING_BITS: u32 = 11;
const UTG_BITS: u32 = 23;
const NO_VALUE: u32 = 0x007F_FFFF;

// A node within the form trie. Children are kept sorted by the first byte
// of their fragment.
struct Node {
  fragment: Vec<u8>,
  value: Option<u32>,
  children: Vec<Node>,
}

impl Node {
  fn new(fragment: Vec<u8>, value: Option<u32>) -> Self {
    Self { fragment, value, children: vec![] }
  }

  // Add the remaining key fragment below this node; returns the existing
  // value if the key was already present
  fn add(&mut self, fragment: &[u8], value: u32) -> Option<u32> {
    if fragment.is_empty() {
      if let Some(prev) = self.value {
        return Some(prev);
      }
      self.value = Some(value);
      return None;
    }
    if self.children.is_empty() {
      self.children.push(Node::new(fragment.to_vec(), Some(value)));
      return None;
    }
    let ch = fragment[0];
    match self.children.binary_search_by(|c| c.fragment[0].cmp(&ch)) {
      Err(pos) => {
        // No child shares a first character: insert into the sorted list
        self.children.insert(pos, Node::new(fragment.to_vec(), Some(value)));
        None
      }
      Ok(mid) => {
        let child = &mut self.children[mid];
        let mut common = 1;
        while common < fragment.len()
          && common < child.fragment.len()
          && fragment[common] == child.fragment[common]
        {
          common += 1;
        }
        if common == child.fragment.len() {
          // We have 'abcd' and the child is 'ab': add 'cd' below it
          return child.add(&fragment[common..], value);
        }
        // The fragment is a proper prefix of the child, or diverges from it
        // after `common` characters: split the child
        let child = std::mem::replace(
          &mut self.children[mid],
          Node::new(vec![], None),
        );
        let mut tail = child;
        let head_fragment = tail.fragment[..common].to_vec();
        tail.fragment = tail.fragment[common..].to_vec();
        let node = if common == fragment.len() {
          // 'ab' vs child 'abcd': new parent 'ab' with child 'cd'
          let mut node = Node::new(head_fragment, Some(value));
          node.children.push(tail);
          node
        } else {
          // 'abd' vs child 'acd': internal parent 'a' with children 'bd', 'cd'
          let mut node = Node::new(head_fragment, None);
          let new_child = Node::new(fragment[common..].to_vec(), Some(value));
          if new_child.fragment[0] < tail.fragment[0] {
            node.children.push(new_child);
            node.children.push(tail);
          } else {
            node.children.push(tail);
            node.children.push(new_child);
          }
          node
        };
        self.children[mid] = node;
        None
      }
    }
  }

  fn lookup(&self, fragment: &[u8]) -> Option<u32> {
    if fragment.is_empty() {
      return self.value;
    }
    for child in &self.children {
      if fragment.starts_with(&child.fragment) {
        return child.lookup(&fragment[child.fragment.len()..]);
      }
    }
    None
  }
}

// Radix trie functioning as an automatic generator of form indices
struct Trie {
  root: Node,
  count: u32,
}

impl Trie {
  fn new() -> Self {
    Self { root: Node::new(vec![], None), count: 0 }
  }

  fn add(&mut self, key: &[u8]) -> u32 {
    match self.root.add(key, self.count) {
      Some(prev) => prev,
      None => {
        self.count += 1;
        self.count - 1
      }
    }
  }

  fn get(&self, key: &[u8]) -> Option<u32> {
    self.root.lookup(key)
  }
}

pub struct BinCompressor {
  forms: Trie,
  // Stems are identified by (text, utg); index order is first-seen order
  stems: Vec<(Vec<u8>, Option<u32>, u32)>, // (text, utg, subcat index)
  stem_ids: HashMap<(Vec<u8>, Option<u32>), u32>,
  // Meanings are (ordfl, beyging) pairs
  meanings: Vec<(Vec<u8>, Vec<u8>)>,
  meaning_ids: HashMap<(Vec<u8>, Vec<u8>), u32>,
  subcats: Vec<Vec<u8>>,
  subcat_ids: HashMap<Vec<u8>, u32>,
  alphabet: BTreeSet<u8>,
  // form index -> set of (stem index, meaning index)
  lookup_form: BTreeMap<u32, BTreeSet<(u32, u32)>>,
  // stem index -> word forms per case, in NF/ÞF/ÞGF/EF order
  lookup_stem: BTreeMap<u32, [BTreeSet<Vec<u8>>; 4]>,
  rows: u64,
}

const CASES_LATIN: [&[u8]; 4] = [b"NF", b"\xDEF", b"\xDEGF", b"EF"]; // NF ÞF ÞGF EF

impl BinCompressor {
  pub fn new() -> Self {
    Self {
      forms: Trie::new(),
      stems: vec![],
      stem_ids: HashMap::default(),
      meanings: vec![],
      meaning_ids: HashMap::default(),
      subcats: vec![],
      subcat_ids: HashMap::default(),
      alphabet: BTreeSet::new(),
      lookup_form: BTreeMap::new(),
      lookup_stem: BTreeMap::new(),
      rows: 0,
    }
  }

  // Add a single dictionary row. Rows with non-Latin-1 text are skipped;
  // they cannot occur in Icelandic word forms.
  pub fn add(&mut self, m: &BinMeaning) {
    let stem = match latin1_encode(&m.stofn) {
      Some(b) => b,
      None => return,
    };
    let form = match latin1_encode(&m.ordmynd) {
      Some(b) => b,
      None => return,
    };
    let ordfl = match latin1_encode(&m.ordfl) {
      Some(b) => b,
      None => return,
    };
    let fl = match latin1_encode(&m.fl) {
      Some(b) => b,
      None => return,
    };
    let mut beyging = match latin1_encode(&m.beyging) {
      Some(b) => b,
      None => return,
    };
    // Cut off the alternate-declension suffix of the meaning, e.g. ÞGF2
    if matches!(beyging.last(), Some(b'2') | Some(b'3')) {
      beyging.pop();
    }
    self.alphabet.extend(form.iter().copied());

    let subcat_ix = match self.subcat_ids.get(&fl) {
      Some(&ix) => ix,
      None => {
        let ix = self.subcats.len() as u32;
        self.subcat_ids.insert(fl.clone(), ix);
        self.subcats.push(fl);
        ix
      }
    };
    let stem_key = (stem.clone(), m.utg);
    let stem_ix = match self.stem_ids.get(&stem_key) {
      Some(&ix) => ix,
      None => {
        let ix = self.stems.len() as u32;
        self.stem_ids.insert(stem_key, ix);
        self.stems.push((stem.clone(), m.utg, subcat_ix));
        ix
      }
    };
    let meaning_key = (ordfl, beyging);
    let meaning_ix = match self.meaning_ids.get(&meaning_key) {
      Some(&ix) => ix,
      None => {
        let ix = self.meanings.len() as u32;
        self.meaning_ids.insert(meaning_key.clone(), ix);
        self.meanings.push(meaning_key.clone());
        ix
      }
    };
    let form_ix = self.forms.add(&form);
    self.lookup_form.entry(form_ix).or_default().insert((stem_ix, meaning_ix));
    let beyging = &meaning_key.1;
    for (cix, case) in CASES_LATIN.iter().enumerate() {
      if contains_subslice(beyging, case) {
        self.lookup_stem.entry(stem_ix).or_insert_with(Default::default)[cix].insert(form.clone());
      }
    }
    self.rows += 1;
  }

  // Lookup against the uncompressed structures; used to verify the image
  pub fn lookup_uncompressed(&self, form: &str) -> Vec<(String, Option<u32>)> {
    let form = match latin1_encode(form) {
      Some(b) => b,
      None => return vec![],
    };
    let fix = match self.forms.get(&form) {
      Some(ix) => ix,
      None => return vec![],
    };
    self
      .lookup_form
      .get(&fix)
      .map(|pairs| {
        pairs
          .iter()
          .map(|&(six, _)| {
            let (stem, utg, _) = &self.stems[six as usize];
            (crate::base::latin1_decode(stem), *utg)
          })
          .collect()
      })
      .unwrap_or_default()
  }

  pub fn write(&self) -> Result<Vec<u8>> {
    let too_big = |what: &str| Error::DataFile {
      path: "<lexicon image>".to_string(),
      reason: format!("{} exceeds the packed field width", what),
    };
    if self.stems.len() as u64 >= 1 << STEM_BITS {
      return Err(too_big("stem count"));
    }
    if self.meanings.len() as u64 >= 1 << MEANING_BITS {
      return Err(too_big("meaning count"));
    }
    if self.subcats.len() > 0xFF {
      return Err(too_big("subcategory count"));
    }
    let alphabet: Vec<u8> = self.alphabet.iter().copied().collect();
    if alphabet.len() + 1 >= 1 << 7 {
      return Err(too_big("alphabet"));
    }

    let mut buf = Buffer::new();
    buf.bytes(LEXICON_VERSION);
    // Placeholders for the seven section offsets:
    // mapping, forms, stems, variants, meanings, alphabet, subcats
    let mapping_ptr = buf.placeholder();
    let forms_ptr = buf.placeholder();
    let stems_ptr = buf.placeholder();
    let variants_ptr = buf.placeholder();
    let meanings_ptr = buf.placeholder();
    let alphabet_ptr = buf.placeholder();
    let subcats_ptr = buf.placeholder();

    // Alphabet
    buf.tag(b"[alphabet]");
    buf.fixup(alphabet_ptr);
    buf.u32(alphabet.len() as u32);
    buf.aligned(&alphabet);

    // Form -> (stem, meaning) mapping. Each form owns a consecutive run of
    // entries; the high bit marks the last entry of the run.
    buf.tag(b"[mapping]");
    buf.fixup(mapping_ptr);
    let mut first_entry = Vec::with_capacity(self.forms.count as usize);
    let mut count: u32 = 0;
    for fix in 0..self.forms.count {
      first_entry.push(count);
      let pairs = self.lookup_form.get(&fix).ok_or_else(|| Error::DataFile {
        path: "<lexicon image>".to_string(),
        reason: format!("form {} has no meanings", fix),
      })?;
      let total = pairs.len();
      for (i, &(six, mix)) in pairs.iter().enumerate() {
        let last = if i + 1 == total { 0x8000_0000u32 } else { 0 };
        buf.u32(last | (six << MEANING_BITS) | mix);
        count += 1;
      }
    }

    // The radix trie over the forms
    buf.fixup(forms_ptr);
    self.write_forms(&mut buf, &alphabet, &first_entry)?;

    // Stems: count, index table, then the records. Each record packs a
    // has-variants flag, utg + 1, and the subcategory index, followed by
    // the stem text and, if flagged, an offset into the variants section.
    buf.tag(b"[stems]");
    buf.fixup(stems_ptr);
    buf.u32(self.stems.len() as u32);
    let table_at = buf.len();
    for _ in 0..self.stems.len() {
      buf.u32(0xFFFF_FFFF);
    }
    let mut variant_bytes: Vec<u8> = vec![];
    let mut variant_offsets: HashMap<Vec<u8>, u32> = HashMap::default();
    for (ix, (stem, utg, subcat)) in self.stems.iter().enumerate() {
      let record_at = buf.len() as u32;
      buf.u32_at(table_at + 4 * ix, record_at);
      let utg_plus = utg.map(|x| x + 1).unwrap_or(0);
      if utg_plus >= 1 << UTG_BITS {
        return Err(too_big("utg number"));
      }
      let case_forms = self.lookup_stem.get(&(ix as u32));
      let has_variants = case_forms.is_some();
      let mut packed = (utg_plus << 8) | subcat;
      if has_variants {
        packed |= 0x8000_0000;
      }
      buf.u32(packed);
      buf.string(stem);
      if let Some(case_forms) = case_forms {
        let mut bundle = vec![];
        for set in case_forms.iter() {
          bundle.extend(compress_set(set, stem));
        }
        let offset = match variant_offsets.get(&bundle) {
          Some(&off) => off,
          None => {
            let off = variant_bytes.len() as u32;
            variant_bytes.extend_from_slice(&bundle);
            variant_offsets.insert(bundle, off);
            off
          }
        };
        buf.u32(offset);
      }
    }
    info!(
      "Lexicon image: {} rows, {} forms, {} stems, {} meanings, {} shared variant bundles",
      self.rows,
      self.forms.count,
      self.stems.len(),
      self.meanings.len(),
      variant_offsets.len()
    );

    // Case variants
    buf.tag(b"[variants]");
    buf.fixup(variants_ptr);
    buf.bytes(&variant_bytes);
    buf.pad16();

    // Meanings: records first, then the index table; the section offset
    // points at the table
    buf.tag(b"[meanings]");
    buf.u32(self.meanings.len() as u32);
    let mut meaning_offsets = Vec::with_capacity(self.meanings.len());
    for (ordfl, beyging) in &self.meanings {
      meaning_offsets.push(buf.len() as u32);
      let mut record = ordfl.clone();
      record.push(b' ');
      record.extend_from_slice(beyging);
      if record.len() > 23 {
        return Err(too_big("meaning record"));
      }
      buf.spaced(&record);
    }
    buf.bytes(&[b' '; 24]);
    buf.fixup(meanings_ptr);
    for off in meaning_offsets {
      buf.u32(off);
    }

    // Subcategories, space-separated; a stem's subcat index counts into
    // this list
    buf.tag(b"[subcats]");
    buf.fixup(subcats_ptr);
    let joined = self.subcats.join(&b' ');
    buf.u32(joined.len() as u32);
    buf.aligned(&joined);

    Ok(buf.out)
  }

  // Write the forms trie as packed 32-bit nodes. Parent nodes hold
  // absolute offsets of their children, fixed up as each child is written.
  fn write_forms(&self, buf: &mut Buffer, alphabet: &[u8], first_entry: &[u32]) -> Result<()> {
    let mut todo: Vec<(&Node, usize)> = vec![];
    write_node(buf, &self.forms.root, 0, &mut todo, alphabet, first_entry)?;
    while let Some((node, parent_loc)) = todo.pop() {
      write_node(buf, node, parent_loc, &mut todo, alphabet, first_entry)?;
    }
    Ok(())
  }
}

fn write_node<'n>(
  buf: &mut Buffer,
  node: &'n Node,
  parent_loc: usize,
  todo: &mut Vec<(&'n Node, usize)>,
  alphabet: &[u8],
  first_entry: &[u32],
) -> Result<()> {
  let loc = buf.len() as u32;
  let val = match node.value {
    None => NO_VALUE,
    Some(v) => {
      let v = first_entry[v as usize];
      if v >= NO_VALUE {
        return Err(Error::DataFile {
          path: "<lexicon image>".to_string(),
          reason: "mapping index exceeds trie value width".to_string(),
        });
      }
      v
    }
  };
  let childless = if node.children.is_empty() { 0x4000_0000u32 } else { 0 };
  if node.fragment.len() <= 1 {
    let chix = match node.fragment.first() {
      None => 0u32,
      Some(&c) => alphabet.iter().position(|&a| a == c).map(|p| p as u32 + 1).ok_or_else(|| {
        Error::DataFile {
          path: "<lexicon image>".to_string(),
          reason: "trie fragment character missing from alphabet".to_string(),
        }
      })?,
    };
    buf.u32(0x8000_0000 | childless | (chix << 23) | val);
  } else {
    buf.u32(childless | val);
  }
  if !node.children.is_empty() {
    buf.u32(node.children.len() as u32);
    for child in &node.children {
      todo.push((child, buf.len()));
      buf.u32(0xFFFF_FFFF);
    }
  }
  if node.fragment.len() > 1 {
    buf.aligned(&node.fragment);
  }
  if parent_loc > 0 {
    buf.u32_at(parent_loc, loc);
  }
  Ok(())
}

impl Default for BinCompressor {
  fn default() -> Self {
    Self::new()
  }
}

fn contains_subslice(haystack: &[u8], needle: &[u8]) -> bool {
  haystack.windows(needle.len().max(1)).any(|w| w == needle)
}

// Write a set of strings as a delta chain against a base string (the stem).
// Each entry is (characters to cut from the end of the previous string,
// length of the appended divergent part, the divergent bytes); 0xFF ends
// the chain. Declension patterns repeat heavily across stems, so identical
// bundles are stored once and shared by offset.
fn compress_set(set: &BTreeSet<Vec<u8>>, base: &[u8]) -> Vec<u8> {
  let mut out = vec![];
  let mut last: Vec<u8> = base.to_vec();
  for w in set {
    let mut i = 0;
    while i < last.len() && i < w.len() && last[i] == w[i] {
      i += 1;
    }
    out.push((last.len() - i) as u8);
    out.push((w.len() - i) as u8);
    out.extend_from_slice(&w[i..]);
    last = w.clone();
  }
  out.push(0xFF);
  out
}

// A growable little-endian byte buffer with backpatching
struct Buffer {
  out: Vec<u8>,
}

impl Buffer {
  fn new() -> Self {
    Self { out: vec![] }
  }

  fn len(&self) -> usize {
    self.out.len()
  }

  fn bytes(&mut self, b: &[u8]) {
    self.out.extend_from_slice(b);
  }

  fn u32(&mut self, v: u32) {
    self.out.extend_from_slice(&v.to_le_bytes());
  }

  fn u32_at(&mut self, pos: usize, v: u32) {
    self.out[pos..pos + 4].copy_from_slice(&v.to_le_bytes());
  }

  fn placeholder(&mut self) -> usize {
    let pos = self.len();
    self.u32(0);
    pos
  }

  fn fixup(&mut self, ptr: usize) {
    let here = self.len() as u32;
    self.u32_at(ptr, here);
  }

  // 16-byte section tag, zero padded, for eyeballing hex dumps
  fn tag(&mut self, t: &[u8]) {
    let mut padded = [0u8; 16];
    padded[..t.len()].copy_from_slice(t);
    self.bytes(&padded);
  }

  // Zero-terminated string padded to a u32 boundary
  fn aligned(&mut self, s: &[u8]) {
    self.bytes(s);
    self.out.push(0);
    while self.out.len() % 4 != 0 {
      self.out.push(0);
    }
  }

  // String padded with at least one space to a u32 boundary
  fn spaced(&mut self, s: &[u8]) {
    self.bytes(s);
    let pad = 4 - (s.len() & 3);
    for _ in 0..pad {
      self.out.push(b' ');
    }
  }

  // Length-byte-prefixed string padded to a u32 boundary
  fn string(&mut self, s: &[u8]) {
    self.out.push(s.len() as u8);
    self.bytes(s);
    while self.out.len() % 4 != 0 {
      self.out.push(0);
    }
  }

  fn pad16(&mut self) {
    while self.out.len() % 16 != 0 {
      self.out.push(0);
    }
  }
}
