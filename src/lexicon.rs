use crate::base::{latin1_decode, latin1_encode, Error, HashSet, Result};
use crate::cache::LfuCache;
use crate::compress::LEXICON_VERSION;
use crate::tokens::BinMeaning;
use log::info;
use memmap2::Mmap;
use std::fs::File;
use std::path::Path;

// Read-only lookups over the compressed BÍN image. The image is memory
// mapped and shared between processes; lookups walk the packed structures
// directly and return value copies. A small LFU cache sits in front of
// meaning decoding, since a handful of meaning records dominate traffic.

const NO_VALUE: u32 = 0x007F_FFFF;
const MEANING_MASK: u32 = (1 << 11) - 1;
const STEM_MASK: u32 = (1 << 20) - 1;
const UTG_MASK: u32 = (1 << 23) - 1;

// Three-valued utg filter: `Any` imposes no constraint; `Exact(None)`
// requires a stem without an utg number; `Exact(Some(n))` requires n.
// Downstream callers rely on the distinction between Any and Exact(None).
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum UtgFilter {
  Any,
  Exact(Option<u32>),
}

impl UtgFilter {
  fn admits(&self, utg: Option<u32>) -> bool {
    match self {
      UtgFilter::Any => true,
      UtgFilter::Exact(wanted) => *wanted == utg,
    }
  }
}

pub struct CaseFilter<'a> {
  // singular forces the result to the singular even if the original word
  // form is plural; it does not force plural when false. The same applies
  // to indefinite, which strips the attached article and weak adjective
  // declensions.
  pub singular: bool,
  pub indefinite: bool,
  pub cat: Option<&'a str>,
  pub stem: Option<&'a str>,
  pub utg: UtgFilter,
  pub pred: Option<&'a dyn Fn(&str) -> bool>,
}

impl Default for CaseFilter<'_> {
  fn default() -> Self {
    Self { singular: false, indefinite: false, cat: None, stem: None, utg: UtgFilter::Any, pred: None }
  }
}

enum Backing {
  Map(Mmap),
  Mem(Vec<u8>),
}

impl Backing {
  fn bytes(&self) -> &[u8] {
    match self {
      Backing::Map(m) => m,
      Backing::Mem(v) => v,
    }
  }
}

pub struct BinLexicon {
  data: Backing,
  mapping_offset: usize,
  forms_offset: usize,
  stems_offset: usize,
  variants_offset: usize,
  meanings_offset: usize,
  alphabet: Vec<u8>,
  subcats: Vec<String>,
  meaning_cache: LfuCache<u32, (String, String)>,
}

impl BinLexicon {
  pub fn open(path: &Path) -> Result<BinLexicon> {
    let file = File::open(path)?;
    let map = unsafe { Mmap::map(&file)? };
    let lexicon = Self::from_backing(Backing::Map(map), &path.display().to_string())?;
    info!("Lexicon image mapped from {}", path.display());
    Ok(lexicon)
  }

  pub fn from_bytes(bytes: Vec<u8>) -> Result<BinLexicon> {
    Self::from_backing(Backing::Mem(bytes), "<memory>")
  }

  fn from_backing(data: Backing, path: &str) -> Result<BinLexicon> {
    let b = data.bytes();
    if b.len() < 16 + 7 * 4 || &b[..16] != LEXICON_VERSION {
      return Err(Error::DataFile {
        path: path.to_string(),
        reason: "invalid lexicon signature; the file may be corrupted or incompletely extracted"
          .to_string(),
      });
    }
    let u32_at = |off: usize| -> u32 {
      u32::from_le_bytes([b[off], b[off + 1], b[off + 2], b[off + 3]])
    };
    let mapping_offset = u32_at(16) as usize;
    let forms_offset = u32_at(20) as usize;
    let stems_offset = u32_at(24) as usize;
    let variants_offset = u32_at(28) as usize;
    let meanings_offset = u32_at(32) as usize;
    let alphabet_offset = u32_at(36) as usize;
    let subcats_offset = u32_at(40) as usize;
    let alphabet_len = u32_at(alphabet_offset) as usize;
    let alphabet = b[alphabet_offset + 4..alphabet_offset + 4 + alphabet_len].to_vec();
    let subcats_len = u32_at(subcats_offset) as usize;
    let subcats_raw = &b[subcats_offset + 4..subcats_offset + 4 + subcats_len];
    let subcats = latin1_decode(subcats_raw)
      .split(' ')
      .map(|x| x.to_string())
      .collect();
    Ok(BinLexicon {
      data,
      mapping_offset,
      forms_offset,
      stems_offset,
      variants_offset,
      meanings_offset,
      alphabet,
      subcats,
      meaning_cache: LfuCache::new(512),
    })
  }

  fn bytes(&self) -> &[u8] {
    self.data.bytes()
  }

  fn u32_at(&self, off: usize) -> u32 {
    let b = self.bytes();
    u32::from_le_bytes([b[off], b[off + 1], b[off + 2], b[off + 3]])
  }

  // The first byte of the fragment leading into the node at `off`
  fn node_first_byte(&self, off: usize) -> Option<u8> {
    let hdr = self.u32_at(off);
    if hdr & 0x8000_0000 != 0 {
      let chix = ((hdr >> 23) & 0x7F) as usize;
      if chix == 0 {
        None
      } else {
        Some(self.alphabet[chix - 1])
      }
    } else {
      let childless = hdr & 0x4000_0000 != 0;
      let frag_at = if childless {
        off + 4
      } else {
        let n = self.u32_at(off + 4) as usize;
        off + 8 + 4 * n
      };
      Some(self.bytes()[frag_at])
    }
  }

  // Walk the packed radix trie; returns the index of the first mapping
  // entry of the word form, if present
  fn trie_lookup(&self, word: &[u8]) -> Option<u32> {
    let b = self.bytes();
    let mut off = self.forms_offset;
    let mut key = word;
    loop {
      let hdr = self.u32_at(off);
      let childless = hdr & 0x4000_0000 != 0;
      let val = hdr & NO_VALUE;
      if hdr & 0x8000_0000 != 0 {
        // Single-character node; the root has an empty fragment
        let chix = ((hdr >> 23) & 0x7F) as usize;
        if chix != 0 {
          match key.first() {
            Some(&c) if c == self.alphabet[chix - 1] => key = &key[1..],
            _ => return None,
          }
        }
      } else {
        // Multi-character node: children block first, then the
        // zero-terminated fragment
        let frag_at = if childless {
          off + 4
        } else {
          let n = self.u32_at(off + 4) as usize;
          off + 8 + 4 * n
        };
        let mut frag_end = frag_at;
        while b[frag_end] != 0 {
          frag_end += 1;
        }
        let fragment = &b[frag_at..frag_end];
        if !key.starts_with(fragment) {
          return None;
        }
        key = &key[fragment.len()..];
      }
      if key.is_empty() {
        return if val == NO_VALUE { None } else { Some(val) };
      }
      if childless {
        return None;
      }
      let n = self.u32_at(off + 4) as usize;
      let mut next = None;
      for i in 0..n {
        let child_off = self.u32_at(off + 8 + 4 * i) as usize;
        if self.node_first_byte(child_off) == Some(key[0]) {
          next = Some(child_off);
          break;
        }
      }
      match next {
        Some(child_off) => off = child_off,
        None => return None,
      }
    }
  }

  // The (stem index, meaning index) pairs of a word form
  fn raw_lookup(&self, word: &str) -> Vec<(u32, u32)> {
    let latin = match latin1_encode(word) {
      Some(b) => b,
      None => return vec![],
    };
    let mut ix = match self.trie_lookup(&latin) {
      Some(ix) => ix,
      None => return vec![],
    };
    let mut result = vec![];
    loop {
      let entry = self.u32_at(self.mapping_offset + 4 * ix as usize);
      result.push(((entry >> 11) & STEM_MASK, entry & MEANING_MASK));
      if entry & 0x8000_0000 != 0 {
        break;
      }
      ix += 1;
    }
    result
  }

  // Decode a meaning record into (ordfl, beyging)
  fn meaning(&self, ix: u32) -> (String, String) {
    self.meaning_cache.lookup(&ix, |&ix| {
      let off = self.u32_at(self.meanings_offset + 4 * ix as usize) as usize;
      let raw = &self.bytes()[off..off + 24];
      let text = latin1_decode(raw);
      let mut parts = text.split_whitespace();
      let ordfl = parts.next().unwrap_or("").to_string();
      let beyging = parts.next().unwrap_or("").to_string();
      (ordfl, beyging)
    })
  }

  // Decode a stem record into (text, utg, subcat index, variants offset)
  fn stem(&self, ix: u32) -> (String, Option<u32>, u32, Option<u32>) {
    let b = self.bytes();
    let off = self.u32_at(self.stems_offset + 4 + 4 * ix as usize) as usize;
    let packed = self.u32_at(off);
    let has_variants = packed & 0x8000_0000 != 0;
    let utg_plus = (packed >> 8) & UTG_MASK;
    let utg = if utg_plus == 0 { None } else { Some(utg_plus - 1) };
    let subcat = packed & 0xFF;
    let len = b[off + 4] as usize;
    let text = latin1_decode(&b[off + 5..off + 5 + len]);
    let variants = if has_variants {
      let mut skip = 1 + len;
      if skip % 4 != 0 {
        skip += 4 - skip % 4;
      }
      Some(self.u32_at(off + 4 + skip))
    } else {
      None
    };
    (text, utg, subcat, variants)
  }

  fn subcat_name(&self, ix: u32) -> &str {
    self.subcats.get(ix as usize).map(|x| x.as_str()).unwrap_or("")
  }

  pub fn contains(&self, word: &str) -> bool {
    latin1_encode(word).and_then(|b| self.trie_lookup(&b)).is_some()
  }

  // The distinct stem indices of a word form; exposed for inflection
  // queries that start from a known form
  pub fn stem_indices(&self, word: &str) -> Vec<u32> {
    let mut seen = HashSet::default();
    let mut result = vec![];
    for (six, _) in self.raw_lookup(word) {
      if seen.insert(six) {
        result.push(six);
      }
    }
    result
  }

  // All word forms of the given stem in the given case ("NF", "ÞF",
  // "ÞGF" or "EF"), decoded from the delta-chained variant bundle
  pub fn case_variants(&self, stem_ix: u32, case: &str) -> Vec<String> {
    let b = self.bytes();
    let (stem, _, _, variants) = self.stem(stem_ix);
    let rel = match variants {
      Some(rel) => rel,
      None => return vec![],
    };
    let base = match latin1_encode(&stem) {
      Some(x) => x,
      None => return vec![],
    };
    let mut p = self.variants_offset + rel as usize;
    for this_case in crate::base::CASES_BIN {
      let mut forms: Vec<Vec<u8>> = vec![];
      let mut last = base.clone();
      loop {
        let cut = b[p] as usize;
        p += 1;
        if cut == 0xFF {
          break;
        }
        let common = last.len() - cut;
        let lw = b[p] as usize;
        p += 1;
        let mut w = last[..common].to_vec();
        w.extend_from_slice(&b[p..p + lw]);
        p += lw;
        forms.push(w.clone());
        last = w;
      }
      if case == this_case {
        return forms.iter().map(|x| latin1_decode(x)).collect();
      }
    }
    vec![]
  }

  // Meanings of a word form, optionally constrained by word category
  // (where "no" admits any noun gender), lemma, utg and a predicate over
  // the beyging field
  pub fn lookup(
    &self,
    word: &str,
    cat: Option<&str>,
    stem: Option<&str>,
    utg: UtgFilter,
    pred: Option<&dyn Fn(&str) -> bool>,
  ) -> Vec<BinMeaning> {
    let mut result = vec![];
    for (six, mix) in self.raw_lookup(word) {
      let (ordfl, beyging) = self.meaning(mix);
      if let Some(cat) = cat {
        let ok = if cat == "no" {
          crate::base::is_gender(&ordfl)
        } else {
          ordfl == cat
        };
        if !ok {
          continue;
        }
      }
      let (stem_text, word_utg, subcat, _) = self.stem(six);
      if let Some(stem) = stem {
        if stem_text != stem {
          continue;
        }
      }
      if !utg.admits(word_utg) {
        continue;
      }
      if let Some(pred) = pred {
        if !pred(&beyging) {
          continue;
        }
      }
      result.push(BinMeaning {
        stofn: stem_text,
        utg: word_utg,
        ordfl,
        fl: self.subcat_name(subcat).to_string(),
        ordmynd: word.to_string(),
        beyging,
      });
    }
    result
  }

  // Meanings in the requested case, derived from the lemmas of the given
  // word form. The candidate forms of each lemma are re-looked-up and kept
  // when their simplified beyging signature equals that of the original
  // meaning. Note that the word form is case-sensitive.
  pub fn lookup_case(&self, word: &str, case: &str, filter: &CaseFilter) -> Vec<BinMeaning> {
    let mut seen: HashSet<BinMeaning> = HashSet::default();
    let mut result: Vec<BinMeaning> = vec![];
    for (six, mix) in self.raw_lookup(word) {
      let (ordfl, beyging) = self.meaning(mix);
      if let Some(cat) = filter.cat {
        let ok = if cat == "no" { crate::base::is_gender(&ordfl) } else { ordfl == cat };
        if !ok {
          continue;
        }
      }
      let (stem_text, word_utg, _, _) = self.stem(six);
      if let Some(stem) = filter.stem {
        if stem_text != stem {
          continue;
        }
      }
      if !filter.utg.admits(word_utg) {
        continue;
      }
      let wanted = simplify_beyging(&beyging, filter.singular, filter.indefinite);
      for form in self.case_variants(six, case) {
        for m in self.lookup(&form, Some(&ordfl), Some(&stem_text), UtgFilter::Exact(word_utg), None)
        {
          if !m.beyging.contains(case) {
            continue;
          }
          if filter.singular && !m.beyging.contains("ET") {
            continue;
          }
          if filter.indefinite
            && (m.beyging.contains("gr") || m.beyging.contains("FVB") || m.beyging.contains("EVB"))
          {
            continue;
          }
          if let Some(pred) = filter.pred {
            if !pred(&m.beyging) {
              continue;
            }
          }
          if simplify_beyging(&m.beyging, filter.singular, filter.indefinite) != wanted {
            continue;
          }
          if seen.insert(m.clone()) {
            result.push(m);
          }
        }
      }
    }
    result.sort_by(|a, b| {
      (&a.ordmynd, &a.stofn, &a.beyging).cmp(&(&b.ordmynd, &b.stofn, &b.beyging))
    });
    result
  }

  pub fn nominative(&self, word: &str, filter: &CaseFilter) -> Vec<BinMeaning> {
    self.lookup_case(word, "NF", filter)
  }

  pub fn accusative(&self, word: &str, filter: &CaseFilter) -> Vec<BinMeaning> {
    self.lookup_case(word, "ÞF", filter)
  }

  pub fn dative(&self, word: &str, filter: &CaseFilter) -> Vec<BinMeaning> {
    self.lookup_case(word, "ÞGF", filter)
  }

  pub fn genitive(&self, word: &str, filter: &CaseFilter) -> Vec<BinMeaning> {
    self.lookup_case(word, "EF", filter)
  }
}

// Remove case markers (and the alternate-declension digits) from a beyging
// string; optionally neutralize number, the definite article and weak
// declensions, so that forms of the same paradigm slot compare equal
fn simplify_beyging(beyging: &str, singular: bool, indefinite: bool) -> String {
  let mut b = beyging.to_string();
  for s in ["NF", "ÞF", "ÞGF", "EF", "2", "3"] {
    b = b.replace(s, "");
  }
  if singular {
    for s in ["ET", "FT"] {
      b = b.replace(s, "");
    }
  }
  if indefinite {
    b = b.replace("gr", "");
    // Neutralize weak vs strong declension of adjectives, keeping degree
    b = b.replace("EVB", "ESB").replace("FVB", "FSB");
  }
  b
}
