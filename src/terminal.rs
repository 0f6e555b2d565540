use crate::base::{HashMap, HashSet};
use crate::grammar::GrammarError;
use lazy_static::lazy_static;

// Terminals carry their matching requirements in their names, as
// underscore-separated variant suffixes: "no_þgf_et_kk" is a noun terminal
// requiring dative case, singular number and masculine gender. Variants map
// to bits so that checks against BÍN inflection strings reduce to a couple
// of mask operations.

// Variant names in bit order, paired with the BÍN inflection marker that
// must be present in the 'beyging' field for the variant to hold. The last
// two (abbrev, subj) have no corresponding BÍN marker.
const VARIANTS: [(&str, Option<&str>); 32] = [
  ("nf", Some("NF")),       // nominative
  ("þf", Some("ÞF")),       // accusative
  ("þgf", Some("ÞGF")),     // dative
  ("ef", Some("EF")),       // genitive
  ("kk", Some("KK")),       // masculine
  ("kvk", Some("KVK")),     // feminine
  ("hk", Some("HK")),       // neutral
  ("et", Some("ET")),       // singular
  ("ft", Some("FT")),       // plural
  ("mst", Some("MST")),     // comparative
  ("est", Some("EST")),     // superlative
  ("esb", Some("ESB")),     // superlative, strong declension
  ("evb", Some("EVB")),     // superlative, weak declension
  ("p1", Some("1P")),       // first person
  ("p2", Some("2P")),       // second person
  ("p3", Some("3P")),       // third person
  ("op", Some("OP")),       // impersonal verb
  ("gm", Some("GM")),       // active voice
  ("mm", Some("MM")),       // middle voice
  ("sb", Some("SB")),       // strong declension
  ("vb", Some("VB")),       // weak declension
  ("nh", Some("NH")),       // infinitive
  ("fh", Some("FH")),       // indicative
  ("bh", Some("BH")),       // imperative
  ("lh", Some("LH")),       // present participle (with nt)
  ("vh", Some("VH")),       // subjunctive
  ("nt", Some("NT")),       // present tense
  ("sagnb", Some("SAGNB")), // supine
  ("lhþt", Some("LHÞT")),   // past participle
  ("gr", Some("gr")),       // definite article suffix
  ("abbrev", None),
  ("subj", None),
];

pub const VBIT_NF: u64 = 1 << 0;
pub const VBIT_KK: u64 = 1 << 4;
pub const VBIT_KVK: u64 = 1 << 5;
pub const VBIT_HK: u64 = 1 << 6;
pub const VBIT_ET: u64 = 1 << 7;
pub const VBIT_FT: u64 = 1 << 8;
pub const VBIT_GM: u64 = 1 << 17;
pub const VBIT_MM: u64 = 1 << 18;
pub const VBIT_VB: u64 = 1 << 20;
pub const VBIT_NH: u64 = 1 << 21;
pub const VBIT_BH: u64 = 1 << 23;
pub const VBIT_LH: u64 = 1 << 28; // lhþt
pub const VBIT_VH: u64 = 1 << 25;
pub const VBIT_SAGNB: u64 = 1 << 27;
pub const VBIT_GR: u64 = 1 << 29;
pub const VBIT_ABBREV: u64 = 1 << 30;
pub const VBIT_SUBJ: u64 = 1 << 31;
pub const VBIT_LHNT: u64 = (1 << 24) | (1 << 26); // lh + nt

pub const VBIT_CASES: u64 = 0b1111;
pub const VBIT_GENDERS: u64 = VBIT_KK | VBIT_KVK | VBIT_HK;
pub const VBIT_NUMBER: u64 = VBIT_ET | VBIT_FT;

// Mask these bits off a variant set to get the feature set checked
// against BÍN meanings.
const FBIT_MASK: u64 = VBIT_ABBREV | VBIT_SUBJ;

// Variants whose BÍN marker is required verbatim when they appear on a
// verb terminal.
const VERB_VARIANTS: [&str; 18] = [
  "p1", "p2", "p3", "nh", "vh", "lh", "bh", "fh", "sagnb", "lhþt", "nt", "kk", "kvk", "hk", "sb",
  "vb", "gm", "mm",
];

lazy_static! {
  static ref VBIT: HashMap<&'static str, u64> = {
    let mut map = HashMap::default();
    for (i, (name, _)) in VARIANTS.iter().enumerate() {
      map.insert(*name, 1u64 << i);
    }
    map
  };
  static ref FBIT: Vec<(&'static str, u64)> = {
    let mut list = vec![];
    for (i, (_, marker)) in VARIANTS.iter().enumerate() {
      if let Some(m) = marker {
        list.push((*m, 1u64 << i));
      }
    }
    list
  };
  static ref VERB_FORMS: HashMap<&'static str, &'static str> = {
    let mut map = HashMap::default();
    for v in VERB_VARIANTS.iter() {
      let marker = VARIANTS.iter().find(|(name, _)| name == v).and_then(|(_, m)| *m);
      if let Some(m) = marker {
        map.insert(*v, m);
      }
    }
    map
  };
}

pub fn vbit(variant: &str) -> u64 {
  VBIT.get(variant).copied().unwrap_or(0)
}

// Convert a BÍN 'beyging' field to a feature bit set. The check is a
// substring test per marker, so inclusive markers such as LHÞT also light
// the LH bit; matching is one-directional (terminal bits must be a subset
// of the meaning bits) so the extra bits are harmless.
pub fn fbits(beyging: &str) -> u64 {
  let mut bits = 0;
  for (marker, bit) in FBIT.iter() {
    if beyging.contains(marker) {
      bits |= bit;
    }
  }
  bits
}

pub fn verb_form_marker(variant: &str) -> Option<&'static str> {
  VERB_FORMS.get(variant).copied()
}

// Map a BÍN word category (ordfl) to the terminal name that matches it;
// the three noun genders collapse into "no".
pub fn bin_kind(ordfl: &str) -> &str {
  match ordfl {
    "kk" | "kvk" | "hk" => "no",
    other => other,
  }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Literal {
  // Double-quoted literals are "strong": they match the exact lowercase
  // source text. Single-quoted literals match by lemma.
  pub strong: bool,
  // Optional word category restriction from a ":cat" suffix
  pub cat: Option<String>,
  // The category used for matching ("stt" matches BÍN "st")
  pub match_cat: Option<String>,
}

#[derive(Clone, Debug)]
pub struct Terminal {
  pub name: String,
  // Positive external index, assigned when the grammar is finalized
  pub index: i32,
  // First segment of the name; for literals, the unquoted text
  pub first: String,
  variants: Vec<String>,
  vset: HashSet<String>,
  pub vbits: u64,
  fbits: u64,
  // Argument-case suffix for verb terminals: "so_2_þf_þgf" -> "_þf_þgf"
  pub verb_cases: String,
  pub literal: Option<Literal>,
}

impl Terminal {
  pub fn new(name: &str) -> Result<Terminal, GrammarError> {
    let (first_raw, var_str) = split_name(name)?;
    let variants: Vec<String> =
      var_str.split('_').filter(|x| !x.is_empty()).map(|x| x.to_string()).collect();
    let vset: HashSet<String> = variants.iter().cloned().collect();
    let vbits = variants.iter().fold(0u64, |a, v| a | vbit(v));
    let mut fbits = vbits & !FBIT_MASK;
    let verb_cases = if !variants.is_empty() && matches!(variants[0].as_str(), "0" | "1" | "2") {
      let ncases: usize = variants[0].parse().unwrap_or(0);
      variants.iter().skip(1).take(ncases).map(|c| format!("_{}", c)).collect()
    } else {
      String::new()
    };

    let (first, literal) = if first_raw.starts_with('\'') || first_raw.starts_with('"') {
      let strong = first_raw.starts_with('"');
      let inner = &first_raw[1..first_raw.len() - 1];
      let mut text = inner.to_string();
      let mut cat = None;
      let mut match_cat = None;
      if inner.len() > 1 && inner.contains(':') {
        let parts: Vec<&str> = inner.split(':').collect();
        if parts.len() > 2 {
          return Err(GrammarError::new(
            "A literal terminal can only have one word category specification",
          ));
        }
        text = parts[0].to_string();
        cat = Some(parts[1].to_string());
        match_cat = Some(match parts[1] {
          // 'stt' marks 'sem' and 'er' in particular contexts but the
          // underlying BÍN category is 'st'
          "stt" => "st".to_string(),
          other => other.to_string(),
        });
        match parts[1] {
          // Genders are not annotated on personal pronouns in BÍN
          "pfn" => fbits &= !VBIT_GENDERS,
          // Cases on fs/so literals signal context, not inflection
          "fs" | "so" => fbits &= !VBIT_CASES,
          _ => {}
        }
      }
      if strong && !variants.is_empty() {
        return Err(GrammarError::new(
          "An exact literal terminal with double quotes cannot have variants",
        ));
      }
      (text, Some(Literal { strong, cat, match_cat }))
    } else {
      (first_raw.to_string(), None)
    };

    Ok(Terminal { name: name.to_string(), index: 0, first, variants, vset, vbits, fbits, verb_cases, literal })
  }

  pub fn is_literal(&self) -> bool {
    self.literal.is_some()
  }

  pub fn is_strong_literal(&self) -> bool {
    self.literal.as_ref().map(|x| x.strong).unwrap_or(false)
  }

  // The exact text a strong literal matches, or empty
  pub fn literal_text(&self) -> &str {
    match &self.literal {
      Some(lit) if lit.strong => &self.first,
      _ => "",
    }
  }

  pub fn startswith(&self, part: &str) -> bool {
    self.literal.is_none() && self.first == part
  }

  pub fn matches_category(&self, cat: &str) -> bool {
    match &self.literal {
      Some(lit) => lit.match_cat.as_deref() == Some(cat),
      None => self.first == cat,
    }
  }

  pub fn colon_cat(&self) -> Option<&str> {
    self.literal.as_ref().and_then(|x| x.cat.as_deref())
  }

  // Match the first part of the terminal against a token meaning:
  // word category for normal terminals, lemma or exact text for literals.
  pub fn matches_first(&self, t_kind: &str, t_val: &str, t_lit: &str) -> bool {
    match &self.literal {
      Some(lit) => {
        if let Some(mc) = &lit.match_cat {
          if mc != t_kind {
            return false;
          }
        }
        if lit.strong {
          self.first == t_lit
        } else {
          self.first == t_val
        }
      }
      None => self.first == bin_kind(t_kind),
    }
  }

  // True when this terminal can reject a token by its text alone,
  // without looking at any meanings
  pub fn shortcut_rejects(&self, t_lower: &str) -> bool {
    self.is_strong_literal() && self.first != t_lower
  }

  pub fn num_variants(&self) -> usize {
    self.variants.len()
  }

  pub fn variants(&self) -> &[String] {
    &self.variants
  }

  pub fn variant(&self, index: usize) -> &str {
    &self.variants[index]
  }

  pub fn variant_last(&self) -> &str {
    self.variants.last().map(|x| x.as_str()).unwrap_or("")
  }

  pub fn has_variant(&self, v: &str) -> bool {
    self.vset.contains(v)
  }

  pub fn has_vbits(&self, bits: u64) -> bool {
    (self.vbits & bits) == bits
  }

  pub fn has_any_vbits(&self, bits: u64) -> bool {
    (self.vbits & bits) != 0
  }

  // True if the given meaning feature bits satisfy every variant
  // requirement of this terminal
  pub fn fbits_match(&self, fbits: u64) -> bool {
    (self.fbits & !fbits) == 0
  }

  pub fn fbits_match_mask(&self, mask: u64, fbits: u64) -> bool {
    (self.fbits & mask & !fbits) == 0
  }

  pub fn gender(&self) -> Option<&'static str> {
    if self.vbits & VBIT_KK != 0 {
      Some("kk")
    } else if self.vbits & VBIT_KVK != 0 {
      Some("kvk")
    } else if self.vbits & VBIT_HK != 0 {
      Some("hk")
    } else {
      None
    }
  }

  pub fn is_singular(&self) -> bool {
    self.vbits & VBIT_ET != 0
  }

  pub fn is_plural(&self) -> bool {
    self.vbits & VBIT_FT != 0
  }

  pub fn is_abbrev(&self) -> bool {
    self.vbits & VBIT_ABBREV != 0
  }

  pub fn is_nh(&self) -> bool {
    self.vbits & VBIT_NH != 0
  }

  pub fn is_mm(&self) -> bool {
    self.vbits & VBIT_MM != 0
  }

  pub fn is_gm(&self) -> bool {
    self.vbits & VBIT_GM != 0
  }

  pub fn is_subj(&self) -> bool {
    self.vbits & VBIT_SUBJ != 0
  }

  pub fn is_sagnb(&self) -> bool {
    self.vbits & VBIT_SAGNB != 0
  }

  pub fn is_lh(&self) -> bool {
    // Past participle (LHÞT)
    self.vbits & VBIT_LH != 0
  }

  pub fn is_lh_nt(&self) -> bool {
    // Present participle (LH-NT)
    self.vbits & VBIT_LHNT == VBIT_LHNT
  }

  pub fn is_vh(&self) -> bool {
    self.vbits & VBIT_VH != 0
  }

  pub fn is_bh(&self) -> bool {
    self.vbits & VBIT_BH != 0
  }
}

// Split a terminal name into its first segment and the variant suffix
// string. Literal text may itself contain underscores ("á_morgun"), so the
// split happens after the closing quote for literals.
fn split_name(name: &str) -> Result<(&str, &str), GrammarError> {
  let quote = match name.chars().next() {
    Some(q @ ('\'' | '"')) => q,
    _ => {
      let ix = name.find('_').unwrap_or(name.len());
      return Ok((&name[..ix], &name[ix..]));
    }
  };
  let endq = name.rfind(quote).filter(|&i| i > 0).ok_or_else(|| {
    GrammarError::new(format!("Invalid literal terminal {}", name))
  })?;
  Ok((&name[..=endq], &name[endq + 1..]))
}
