use crate::base::{HashMap, CASES, GENDERS};
use crate::config::Settings;
use crate::terminal::{
  self, fbits, Terminal, VBIT_ABBREV, VBIT_CASES, VBIT_ET, VBIT_FT, VBIT_GR, VBIT_HK, VBIT_KK,
  VBIT_KVK, VBIT_NUMBER,
};
use crate::tokens::{BinMeaning, BinToken, TokKind, TokVal, TokenKey};

// Decides whether a token satisfies a terminal, connecting the BÍN
// annotations of the token with the declared category and variants of the
// terminal. The parser calls this on every (token, terminal) pair it
// considers, so results are cached per distinct token in a tri-state
// buffer with one slot per terminal.

// Adverbs that can never be an "eo" (a qualifier adverb)
const NOT_EO: [&str; 4] = ["og", "eða", "sem", "ekkert"];

// Prepositions that must nevertheless be allowed as adverbs,
// e.g. 'Fyrirtækið hefur skilað inn ársreikningi'
const NOT_NOT_EO: [&str; 16] = [
  "inn", "eftir", "til", "upp", "um", "fram", "nær", "nærri", "út", "meðal", "neðan", "jafnframt",
  "samt", "af", "fyrir", "því",
];

// Words that are not eligible as proper names even when capitalized
const NOT_PROPER_NAME: [&str; 40] = [
  "ég", "þú", "hann", "hún", "það", "við", "þið", "þau", "þeir", "þær", "mér", "mig", "mín",
  "þig", "þér", "þín", "þeim", "þeirra", "þetta", "þessi", "í", "á", "af", "um", "að", "með",
  "til", "frá", "búist", "annars", "samkvæmt", "en", "og", "sem", "ekkert", "hæð", "svo",
  "veggir", "þarna", "allt",
];

// Interrogative adverbs
const SPAO: [&str; 8] = ["hvar", "hvenær", "hvernig", "hvaðan", "hvert", "hví", "hve", "hversu"];

// Temporal sentential adverbs
const TAO: [&str; 27] = [
  "daglega", "dagsdaglega", "alltaf", "aldrei", "fyrr", "fyrrum", "loks", "loksins", "mánaðarlega",
  "nú", "núna", "næst", "oft", "reglulega", "seint", "snemma", "sjaldan", "stundum", "síðar",
  "síðla", "títt", "undanfarið", "vikulega", "árla", "árlega", "áður", "þá",
];

const CORPORATION_ENDINGS: [&str; 37] = [
  "ehf.", "ehf", "hf.", "hf", "bs.", "bs", "sf.", "sf", "slhf.", "slhf", "slf.", "slf", "svf.",
  "svf", "ohf.", "ohf", "Inc", "Inc.", "Incorporated", "Corp", "Corp.", "Corporation", "Ltd",
  "Ltd.", "Limited", "Co", "Co.", "Company", "Group", "AS", "ASA", "SA", "S.A.", "GmbH", "AG",
  "SARL", "S.à.r.l.",
];

// Numbers that may be used in the singular even if nominally plural,
// e.g. the media company 365
const SINGULAR_SPECIAL_CASES: [i64; 1] = [365];

const GENDERS_MAP: [(&str, &str); 3] = [("kk", "KK"), ("kvk", "KVK"), ("hk", "HK")];

// BÍN categories of person and entity names
pub const NAMED_ENTITY_FL: [&str; 8] = ["ism", "erm", "gæl", "nafn", "föð", "móð", "ætt", "entity"];

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum MatchOutcome {
  No,
  // A match with no associated BÍN meaning (non-word tokens, unknown words)
  Yes,
  // A match through the meaning at the given index of the token
  Meaning(usize),
}

impl MatchOutcome {
  pub fn matched(&self) -> bool {
    !matches!(self, MatchOutcome::No)
  }
}

// The stem of a middle-voice ('miðmynd') verb: "eignast" for "eigna".
// Middle voice stems are always formed by appending "st" to the regular
// nominal form, unless it already ends with "st".
pub fn mm_verb_stem(verb: &str) -> String {
  if verb.ends_with("st") {
    verb.to_string()
  } else {
    format!("{}st", verb)
  }
}

pub struct Matcher<'a> {
  settings: &'a Settings,
  num_terminals: usize,
  buffers: HashMap<TokenKey, usize>,
  // Tri-state per terminal: 0 unknown, 1 match, 2 no match
  slabs: Vec<Vec<u8>>,
}

impl<'a> Matcher<'a> {
  pub fn new(settings: &'a Settings, num_terminals: usize) -> Self {
    Self { settings, num_terminals, buffers: HashMap::default(), slabs: vec![] }
  }

  // The matching-cache buffer for a token; tokens with equal keys share
  // one buffer
  pub fn buffer_for(&mut self, token: &BinToken) -> usize {
    let key = token.key();
    if let Some(&id) = self.buffers.get(&key) {
      return id;
    }
    let id = self.slabs.len();
    self.slabs.push(vec![0; self.num_terminals + 1]);
    self.buffers.insert(key, id);
    id
  }

  pub fn matches(&mut self, buffer: usize, token: &BinToken, terminal: &Terminal) -> bool {
    let slot = terminal.index as usize;
    match self.slabs[buffer][slot] {
      1 => true,
      2 => false,
      _ => {
        let matched = self.match_meaning(token, terminal).matched();
        self.slabs[buffer][slot] = if matched { 1 } else { 2 };
        matched
      }
    }
  }

  // Full match computation, returning the matched meaning where one
  // exists; the reducer needs it for verb-preposition bonuses
  pub fn match_meaning(&self, token: &BinToken, terminal: &Terminal) -> MatchOutcome {
    if terminal.shortcut_rejects(&token.lower) {
      return MatchOutcome::No;
    }
    match token.kind {
      TokKind::Word => self.match_word(token, terminal),
      TokKind::Punctuation => self.match_punctuation(token, terminal),
      TokKind::Person => self.match_person(token, terminal),
      TokKind::Entity => bool_outcome(terminal.startswith("entity")),
      TokKind::Currency => self.match_currency(token, terminal),
      TokKind::Amount => self.match_amount(token, terminal),
      TokKind::Number => self.match_number(token, terminal),
      TokKind::Percent => self.match_percent(token, terminal),
      TokKind::Ordinal => bool_outcome(terminal.startswith("raðnr")),
      TokKind::Year => self.match_year(terminal),
      TokKind::Date => bool_outcome(terminal.startswith("dags")),
      TokKind::DateAbs => bool_outcome(terminal.startswith("dagsföst")),
      TokKind::DateRel => bool_outcome(terminal.startswith("dagsafs")),
      TokKind::Time => bool_outcome(terminal.startswith("tími")),
      TokKind::Timestamp => bool_outcome(terminal.startswith("tímapunktur")),
      TokKind::TimestampAbs => bool_outcome(terminal.startswith("tímapunkturfast")),
      TokKind::TimestampRel => bool_outcome(terminal.startswith("tímapunkturafs")),
      TokKind::Measurement => bool_outcome(terminal.startswith("mælieining")),
      _ => MatchOutcome::No,
    }
  }

  fn match_punctuation(&self, token: &BinToken, terminal: &Terminal) -> MatchOutcome {
    if terminal.is_literal() {
      bool_outcome(terminal.matches_first("punctuation", &token.txt, &token.txt))
    } else {
      bool_outcome(terminal.name == "punctuation")
    }
  }

  fn match_person(&self, token: &BinToken, terminal: &Terminal) -> MatchOutcome {
    let names = match &token.val {
      TokVal::Person(names) => names,
      _ => return MatchOutcome::No,
    };
    if terminal.startswith("sérnafn") {
      // A simple person name may match a proper-name terminal
      if !token.is_upper || token.lower.contains(' ') {
        return MatchOutcome::No;
      }
      if terminal.num_variants() == 0 {
        return MatchOutcome::Yes;
      }
      let case = terminal.variant(0);
      return bool_outcome(names.iter().any(|n| n.case.as_deref() == Some(case)));
    }
    if !terminal.startswith("person") {
      return MatchOutcome::No;
    }
    if terminal.num_variants() == 0 {
      return MatchOutcome::Yes;
    }
    let case = terminal.variant(0);
    let gender = if terminal.num_variants() > 1 { Some(terminal.variant(1)) } else { None };
    bool_outcome(names.iter().any(|n| {
      n.case.as_deref() == Some(case)
        && (gender.is_none() || n.gender.as_deref() == gender)
    }))
  }

  fn match_currency(&self, token: &BinToken, terminal: &Terminal) -> MatchOutcome {
    let (cases, genders) = match &token.val {
      TokVal::Currency { cases, genders, .. } => (cases, genders),
      _ => return MatchOutcome::No,
    };
    if !terminal.startswith("no") || terminal.is_abbrev() {
      // A currency name matches a noun terminal, but not an abbreviation
      return MatchOutcome::No;
    }
    if let Some(cases) = cases {
      for c in CASES {
        if terminal.has_variant(c) && !cases.iter().any(|x| x == c) {
          return MatchOutcome::No;
        }
      }
    }
    match genders {
      Some(genders) => {
        for g in GENDERS {
          if terminal.has_variant(g) && !genders.iter().any(|x| x == g) {
            return MatchOutcome::No;
          }
        }
        MatchOutcome::Yes
      }
      // Match only the neutral gender if no gender is given
      None => bool_outcome(!terminal.has_any_vbits(VBIT_KK | VBIT_KVK)),
    }
  }

  // In Icelandic, an integer is singular iff its modulo 100 ends in 1,
  // except 11
  fn correct_singular_or_plural(&self, value: f64, terminal: &Terminal) -> bool {
    let i = value as i64;
    let whole = (i as f64 - value).abs() < f64::EPSILON;
    let m = i.abs() % 100;
    let singular = whole && m != 11 && m % 10 == 1;
    if terminal.is_singular() && !singular {
      return SINGULAR_SPECIAL_CASES.contains(&i);
    }
    if terminal.is_plural() && singular {
      return false;
    }
    true
  }

  fn match_number(&self, token: &BinToken, terminal: &Terminal) -> MatchOutcome {
    let (value, cases, genders) = match &token.val {
      TokVal::Number { value, cases, genders } => (*value, cases, genders),
      _ => return MatchOutcome::No,
    };
    if terminal.startswith("tala") {
      // A 'tala' terminal matches regardless of case and gender variants;
      // those are informational only
      return bool_outcome(self.correct_singular_or_plural(value, terminal));
    }
    if !terminal.startswith("töl") && !terminal.startswith("to") {
      return MatchOutcome::No;
    }
    if cases.is_none() && genders.is_none() {
      return MatchOutcome::No;
    }
    if !self.correct_singular_or_plural(value, terminal) {
      return MatchOutcome::No;
    }
    if terminal.startswith("to") {
      // "to" requires both case and gender info
      let genders = match (cases, genders) {
        (Some(_), Some(g)) => g,
        _ => return MatchOutcome::No,
      };
      for g in GENDERS {
        if terminal.has_variant(g) && !genders.iter().any(|x| x == g) {
          return MatchOutcome::No;
        }
      }
    }
    if let Some(cases) = cases {
      for c in CASES {
        if terminal.has_variant(c) && !cases.iter().any(|x| x == c) {
          return MatchOutcome::No;
        }
      }
    }
    MatchOutcome::Yes
  }

  fn match_amount(&self, token: &BinToken, terminal: &Terminal) -> MatchOutcome {
    let (value, cases, genders) = match &token.val {
      TokVal::Amount { value, cases, genders, .. } => (*value, cases, genders),
      _ => return MatchOutcome::No,
    };
    if !terminal.startswith("no") {
      return MatchOutcome::No;
    }
    if terminal.has_any_vbits(VBIT_ABBREV | VBIT_GR) {
      // An amount matches neither an abbreviation nor a definite article
      return MatchOutcome::No;
    }
    if !self.correct_singular_or_plural(value, terminal) {
      return MatchOutcome::No;
    }
    if let Some(cases) = cases {
      for c in CASES {
        if terminal.has_variant(c) && !cases.iter().any(|x| x == c) {
          return MatchOutcome::No;
        }
      }
    }
    match genders {
      None => bool_outcome(!terminal.has_any_vbits(VBIT_KK | VBIT_KVK)),
      Some(genders) => {
        for g in GENDERS {
          if terminal.has_variant(g) && !genders.iter().any(|x| x == g) {
            return MatchOutcome::No;
          }
        }
        MatchOutcome::Yes
      }
    }
  }

  fn match_percent(&self, token: &BinToken, terminal: &Terminal) -> MatchOutcome {
    if terminal.startswith("töl") || terminal.startswith("prósenta") {
      return MatchOutcome::Yes;
    }
    if !terminal.startswith("no") || terminal.is_abbrev() {
      return MatchOutcome::No;
    }
    // As a noun, a percentage is neutral and indefinite
    if !terminal.has_variant("hk") || terminal.has_variant("gr") {
      return MatchOutcome::No;
    }
    let cases = match &token.val {
      TokVal::Percent { cases, .. } => cases,
      _ => return MatchOutcome::No,
    };
    if let Some(cases) = cases {
      for c in CASES {
        if terminal.has_variant(c) && !cases.iter().any(|x| x == c) {
          return MatchOutcome::No;
        }
      }
    }
    // No singular/plural check: '35% skattur' and '1% allra blóma' are
    // both valid
    MatchOutcome::Yes
  }

  fn match_year(&self, terminal: &Terminal) -> MatchOutcome {
    if !["töl", "ártal", "tala"].iter().any(|t| terminal.startswith(t)) {
      return MatchOutcome::No;
    }
    // Years are singular and neutral; no case is associated
    bool_outcome(!terminal.has_any_vbits(VBIT_FT | VBIT_KK | VBIT_KVK))
  }

  fn match_word(&self, token: &BinToken, terminal: &Terminal) -> MatchOutcome {
    let meanings = token.meanings();
    if !meanings.is_empty() {
      for (ix, m) in meanings.iter().enumerate() {
        let hit = if terminal.is_literal() {
          self.match_default(token, terminal, m)
        } else {
          match terminal.first.as_str() {
            "so" => m.ordfl == "so" && self.verb_matches(&m.stofn, terminal, &m.beyging),
            "no" => self.match_noun(terminal, m),
            "gata" => self.match_street(terminal, m),
            "abfn" => {
              m.ordfl == "abfn" && terminal.fbits_match_mask(VBIT_CASES, fbits(&m.beyging))
            }
            "pfn" => {
              // Check case and number only; gender is not annotated on
              // personal pronouns in BÍN
              m.ordfl == "pfn"
                && terminal.fbits_match_mask(VBIT_CASES | VBIT_NUMBER, fbits(&m.beyging))
            }
            "stt" => m.ordfl == "st" && (m.stofn == "sem" || m.stofn == "er"),
            "spao" => is_spao(m),
            "tao" => is_tao(m),
            "eo" => self.match_eo(token, m),
            "ao" => {
              m.ordfl == "ao" && !is_spao(m) && !is_tao(m) && terminal.fbits_match(fbits(&m.beyging))
            }
            "fs" => self.match_preposition(token, terminal, m),
            "person" => self.match_static_person(terminal, m),
            "fyrirtæki" => CORPORATION_ENDINGS.contains(&token.txt.as_str()),
            "töl" => terminal.matches_first(&m.ordfl, &m.stofn, &token.lower),
            "sérnafn" => self.match_proper_name(token, terminal, m),
            _ => self.match_default(token, terminal, m),
          }
        };
        if hit {
          return MatchOutcome::Meaning(ix);
        }
      }
      return MatchOutcome::No;
    }

    // Unknown word with no BÍN meanings: may be foreign, an unknown name...
    if token.is_upper
      && terminal.startswith("sérnafn")
      && terminal.num_variants() == 0
      && !token.lower.contains(' ')
    {
      return MatchOutcome::Yes;
    }
    // Otherwise allow a match with a singular, indefinite neuter noun
    bool_outcome(
      terminal.startswith("no")
        && terminal.has_vbits(VBIT_ET | VBIT_HK)
        && !terminal.has_vbits(VBIT_GR),
    )
  }

  fn match_noun(&self, terminal: &Terminal, m: &BinMeaning) -> bool {
    if terminal::bin_kind(&m.ordfl) != "no" {
      return false;
    }
    let no_info = m.beyging == "-";
    if terminal.is_abbrev() {
      // Only match abbreviations; gender, case and number do not matter
      return no_info;
    }
    if m.fl == "nafn" {
      // Names are only matched by person terminals
      return false;
    }
    for v in terminal.variants() {
      if GENDERS.contains(&v.as_str()) {
        if m.ordfl != *v {
          return false;
        }
      } else if no_info {
        // No case or number info: probably a foreign word; match
        // everything except a demand for the definite article
        if v == "gr" {
          return false;
        }
      } else if let Some(marker) = variant_marker(v) {
        if !m.beyging.contains(marker) {
          return false;
        }
      }
    }
    true
  }

  fn match_street(&self, terminal: &Terminal, m: &BinMeaning) -> bool {
    if m.fl != "göt" || terminal::bin_kind(&m.ordfl) != "no" {
      return false;
    }
    for v in terminal.variants() {
      if GENDERS.contains(&v.as_str()) {
        if m.ordfl != *v {
          return false;
        }
      } else if let Some(marker) = variant_marker(v) {
        if !m.beyging.contains(marker) {
          return false;
        }
      }
    }
    true
  }

  // 'Einkunnarorð': an adverb that cannot also be a preposition or a
  // pronoun, and is therefore an unambiguous qualifier
  fn match_eo(&self, token: &BinToken, m: &BinMeaning) -> bool {
    if !m.ordfl.ends_with("ao") {
      return false;
    }
    let txt = token.lower.as_str();
    if TAO.contains(&txt) || SPAO.contains(&txt) || NOT_EO.contains(&txt) {
      return false;
    }
    if NOT_NOT_EO.contains(&txt) {
      return true;
    }
    !self.settings.prepositions.contains_key(txt)
      && !token.meanings().iter().any(|mm| mm.ordfl == "fn")
  }

  // Prepositions are matched against the configured preposition table,
  // not against the BÍN annotation of the token
  fn match_preposition(&self, token: &BinToken, terminal: &Terminal, m: &BinMeaning) -> bool {
    if terminal.num_variants() == 0 {
      return false;
    }
    // For abbreviated prepositions such as 'skv.', the expanded form is
    // in the stem
    let fs = if token.lower.contains('.') { m.stofn.as_str() } else { token.lower.as_str() };
    let var0 = terminal.variant(0);
    if var0 == "nh" {
      return self.settings.prepositions_nh.contains(fs);
    }
    match self.settings.prepositions.get(fs) {
      Some(cases) => cases.contains(var0),
      None => false,
    }
  }

  // Person names coming from static phrases
  fn match_static_person(&self, terminal: &Terminal, m: &BinMeaning) -> bool {
    if m.fl != "nafn" {
      return false;
    }
    if terminal.has_vbits(VBIT_HK) {
      // Person names are never neutral
      return false;
    }
    if m.beyging != "-" {
      for c in CASES {
        if let Some(marker) = variant_marker(c) {
          if m.beyging.contains(marker) && !terminal.has_variant(c) {
            return false;
          }
        }
      }
    }
    if terminal.has_vbits(VBIT_KK) && m.ordfl != "kk" {
      return false;
    }
    if terminal.has_vbits(VBIT_KVK) && m.ordfl != "kvk" {
      return false;
    }
    true
  }

  // Allow a proper-name interpretation only for an uppercase token that
  // has no uppercase meaning in BÍN; "Ísland" stays a noun
  fn match_proper_name(&self, token: &BinToken, terminal: &Terminal, m: &BinMeaning) -> bool {
    if !token.is_upper
      || NOT_PROPER_NAME.contains(&token.lower.as_str())
      || token.lower.contains(' ')
    {
      return false;
    }
    if terminal.num_variants() == 0 {
      return true;
    }
    // sérnafn_case: accept nouns or adjectives in the given case
    let case_bits = fbits(&m.beyging) & VBIT_CASES;
    matches!(terminal::bin_kind(&m.ordfl), "no" | "lo") && terminal.fbits_match(case_bits)
  }

  fn match_default(&self, token: &BinToken, terminal: &Terminal, m: &BinMeaning) -> bool {
    let meaning_fbits = if m.beyging == "-" {
      if m.ordfl == "lo" {
        // An adjective with no declension info is assumed to be an
        // abbreviation ("hæstv.") and matches any lo terminal
        return terminal.matches_first(&m.ordfl, &m.stofn, &token.lower);
      }
      0
    } else {
      // For nouns, make the gender checkable by adding its marker to the
      // inflection before decoding
      let gender = GENDERS_MAP
        .iter()
        .find(|(g, _)| *g == m.ordfl)
        .map(|(_, marker)| *marker)
        .unwrap_or("");
      fbits(&format!("{}{}", m.beyging, gender))
    };
    if !terminal.fbits_match(meaning_fbits) {
      return false;
    }
    terminal.matches_first(&m.ordfl, &m.stofn, &token.lower)
  }

  // Does the verb stem match the terminal, including its argument count
  // (so_0/so_1/so_2), argument cases and required variants?
  pub fn verb_matches(&self, verb: &str, terminal: &Terminal, form: &str) -> bool {
    // An unknown composite verb contains hyphens; look up its last part
    let verb = verb.rsplit('-').next().unwrap_or(verb);

    let subject_matches = |subj: &str| -> bool {
      self.settings.verb_subjects.get(verb).map(|s| s.contains(subj)).unwrap_or(false)
    };

    if terminal.is_subj() {
      // Verb with subject in a non-nominative case:
      // 'Mig langar að fara til Frakklands'
      if terminal.is_nh() && !form.contains("NH") {
        return false;
      }
      if terminal.is_mm() {
        // For subj_mm we don't care about anything but the middle voice
        return form.contains("MM");
      }
      if terminal.is_gm() && !form.contains("GM") {
        return false;
      }
      if terminal.is_singular() && !form.contains("ET") {
        return false;
      }
      if terminal.is_plural() && !form.contains("FT") {
        return false;
      }
      let form_lh = form.contains("LHÞT");
      if terminal.is_lh() {
        return form_lh && subject_matches("lhþt");
      }
      if form_lh {
        // lhþt is only allowed when the terminal requests it
        return false;
      }
      let form_sagnb = form.contains("SAGNB");
      if terminal.has_variant("none") {
        if terminal.is_sagnb() != form_sagnb {
          return false;
        }
        return subject_matches("none");
      }
      if form_sagnb && !terminal.is_sagnb() {
        return false;
      }
      if terminal.has_variant("op") && !form.contains("OP") {
        return false;
      }
      // The subject case is the last variant of the terminal
      return subject_matches(terminal.variant_last());
    }

    if terminal.is_singular() && form.contains("FT") {
      return false;
    }
    if terminal.is_plural() && form.contains("ET") {
      return false;
    }
    // Person, mood, voice and other variant requirements
    for v in terminal.variants() {
      if let Some(marker) = terminal::verb_form_marker(v) {
        if !form.contains(marker) {
          return false;
        }
      }
    }
    // Restrictive variants: don't accept meanings carrying these unless
    // the terminal explicitly asks for them
    for v in ["sagnb", "lhþt", "bh"] {
      if let Some(marker) = variant_marker(v) {
        if form.contains(marker) && !terminal.has_variant(v) {
          return false;
        }
      }
    }
    if terminal.is_lh() && form.contains("VB") && !terminal.has_variant("vb") {
      // Only the strong declensions of lhþt unless weak is requested
      return false;
    }
    if terminal.has_variant("bh") && form.contains("ST") {
      // Skip 'stýfður boðháttur' ("bóna"), which is ambiguous against
      // the infinitive; only explicit imperatives ("bónaðu") match
      return false;
    }
    if terminal.num_variants() == 0 || !matches!(terminal.variant(0), "0" | "1" | "2") {
      if terminal.is_lh() {
        // lhþt may specify a case without it being an argument case
        for c in CASES {
          if let Some(marker) = variant_marker(c) {
            if terminal.has_variant(c) && !form.contains(marker) {
              return false;
            }
          }
        }
      }
      return true;
    }

    let is_mm = form.contains("MM");
    let nargs: usize = terminal.variant(0).parse().unwrap_or(0);
    // For middle-voice forms, look up the MM-NH stem instead of the
    // regular one: "eignaðist hest" resolves to "eignast", not "eigna"
    let verb_key = if is_mm { mm_verb_stem(verb) } else { verb.to_string() };
    let frames = &self.settings.verb_frames;
    if frames.has_arg_count(&verb_key, nargs) {
      if nargs == 0 || terminal.num_variants() < 2 {
        return true;
      }
      // Some verbs take legitimate arguments in the middle voice
      // ('krefjast', 'undirgangast'), and BÍN annotation of MM is not
      // consistent; reject >1 arguments in the middle voice regardless.
      // TODO: revisit when the BÍN MM annotations have been reconciled
      if nargs > 1 && is_mm {
        return false;
      }
      // Do the terminal's argument cases agree with a registered frame?
      for argspec in frames.arg_cases(&verb_key, nargs) {
        if argspec.len() + 1 <= terminal.num_variants()
          && argspec.iter().enumerate().all(|(ix, c)| terminal.variant(1 + ix) == c)
        {
          return true;
        }
      }
      return false;
    }
    // Not registered with this argument count; refuse the match if the
    // verb definitely takes fewer arguments
    for i in 0..nargs {
      if frames.has_arg_count(&verb_key, i) {
        return false;
      }
    }
    true
  }
}

fn bool_outcome(b: bool) -> MatchOutcome {
  if b {
    MatchOutcome::Yes
  } else {
    MatchOutcome::No
  }
}

fn is_spao(m: &BinMeaning) -> bool {
  m.ordfl.ends_with("ao") && SPAO.contains(&m.stofn.as_str())
}

fn is_tao(m: &BinMeaning) -> bool {
  m.ordfl.ends_with("ao") && TAO.contains(&m.stofn.as_str())
}

fn variant_marker(v: &str) -> Option<&'static str> {
  match v {
    "nf" => Some("NF"),
    "þf" => Some("ÞF"),
    "þgf" => Some("ÞGF"),
    "ef" => Some("EF"),
    "et" => Some("ET"),
    "ft" => Some("FT"),
    "gr" => Some("gr"),
    "sagnb" => Some("SAGNB"),
    "lhþt" => Some("LHÞT"),
    "bh" => Some("BH"),
    "mst" => Some("MST"),
    "est" => Some("EST"),
    _ => None,
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::tokens::{PersonName, Tok};

  fn settings() -> Settings {
    let mut s = Settings::new();
    s.add_preposition("á", "þf", false).unwrap();
    s.add_preposition("á", "þgf", false).unwrap();
    s.add_preposition("vegna", "ef", false).unwrap();
    s.add_preposition("um að", "þf", true).unwrap();
    s.verb_frames.add_spec("eiga þf").unwrap();
    s.verb_frames.add_spec("fresta þgf /vegna ef").unwrap();
    s.verb_frames.add_spec("skrifa þgf þf").unwrap();
    s.verb_frames.add_spec("skrifast þgf þf").unwrap();
    s.verb_frames.add_spec("krefjast ef").unwrap();
    s.add_verb_subject("langa", "þf");
    s
  }

  fn term(name: &str) -> Terminal {
    let mut t = Terminal::new(name).unwrap();
    t.index = 1;
    t
  }

  fn word(txt: &str, meanings: Vec<BinMeaning>) -> BinToken {
    BinToken::new(&Tok::word(txt, meanings), 0)
  }

  fn m(stofn: &str, ordfl: &str, fl: &str, beyging: &str) -> BinMeaning {
    BinMeaning::new(stofn, None, ordfl, fl, stofn, beyging)
  }

  #[test]
  fn noun_terminal_checks_gender_case_number() {
    let s = settings();
    let matcher = Matcher::new(&s, 8);
    let tok = word("hesti", vec![m("hestur", "kk", "alm", "ÞGFET")]);
    assert!(matcher.match_meaning(&tok, &term("no_þgf_et_kk")).matched());
    assert!(!matcher.match_meaning(&tok, &term("no_nf_et_kk")).matched());
    assert!(!matcher.match_meaning(&tok, &term("no_þgf_et_kvk")).matched());
    assert!(!matcher.match_meaning(&tok, &term("no_þgf_ft_kk")).matched());
    assert!(matcher.match_meaning(&tok, &term("no_þgf")).matched());
  }

  #[test]
  fn abbreviation_nouns_match_only_abbrev_terminals() {
    let s = settings();
    let matcher = Matcher::new(&s, 8);
    let tok = word("hr.", vec![m("herra", "kk", "skst", "-")]);
    assert!(matcher.match_meaning(&tok, &term("no_abbrev")).matched());
    assert!(!matcher.match_meaning(&tok, &term("no_gr")).matched());
    // A noun with inflection info does not match abbrev
    let tok = word("hesti", vec![m("hestur", "kk", "alm", "ÞGFET")]);
    assert!(!matcher.match_meaning(&tok, &term("no_abbrev")).matched());
  }

  #[test]
  fn verb_argument_count_gates_matches() {
    let s = settings();
    let matcher = Matcher::new(&s, 8);
    let tok = word("á", vec![m("eiga", "so", "alm", "GM-FH-NT-3P-ET")]);
    // "eiga" is registered with one accusative argument
    assert!(matcher.match_meaning(&tok, &term("so_1_þf_et_p3")).matched());
    assert!(!matcher.match_meaning(&tok, &term("so_1_þgf_et_p3")).matched());
    assert!(!matcher.match_meaning(&tok, &term("so_2_þgf_þf_et_p3")).matched());
    // A verb may always stand without arguments
    assert!(matcher.match_meaning(&tok, &term("so_0_et_p3")).matched());
  }

  #[test]
  fn verb_variant_requirements() {
    let s = settings();
    let matcher = Matcher::new(&s, 8);
    let vh = word("ætti", vec![m("eiga", "so", "alm", "GM-VH-ÞT-3P-ET")]);
    assert!(matcher.match_meaning(&vh, &term("so_1_þf_vh_et_p3")).matched());
    assert!(!matcher.match_meaning(&vh, &term("so_1_þf_fh_et_p3")).matched());
    // sagnb is excluded unless requested
    let sagnb = word("átt", vec![m("eiga", "so", "alm", "GM-SAGNB")]);
    assert!(!matcher.match_meaning(&sagnb, &term("so_1_þf")).matched());
    assert!(matcher.match_meaning(&sagnb, &term("so_1_þf_sagnb")).matched());
  }

  #[test]
  fn middle_voice_uses_mm_stem_and_rejects_two_args() {
    let s = settings();
    let matcher = Matcher::new(&s, 8);
    // "krafðist" is MM of "krefja"; frame lookup goes through "krefjast"
    let tok = word("krafðist", vec![m("krefja", "so", "alm", "MM-FH-ÞT-3P-ET")]);
    assert!(matcher.match_meaning(&tok, &term("so_1_ef_et_p3")).matched());
    // Two arguments in the middle voice are rejected outright
    let tok2 = word("skrifaðist", vec![m("skrifa", "so", "alm", "MM-FH-ÞT-3P-ET")]);
    assert!(!matcher.match_meaning(&tok2, &term("so_2_þgf_þf_et_p3")).matched());
  }

  #[test]
  fn subject_case_verbs() {
    let s = settings();
    let matcher = Matcher::new(&s, 8);
    let tok = word("langar", vec![m("langa", "so", "alm", "OP-GM-FH-NT-ET")]);
    assert!(matcher.match_meaning(&tok, &term("so_subj_op_þf")).matched());
    assert!(!matcher.match_meaning(&tok, &term("so_subj_op_þgf")).matched());
  }

  #[test]
  fn preposition_matching_is_config_driven() {
    let s = settings();
    let matcher = Matcher::new(&s, 8);
    let tok = word("á", vec![m("á", "fs", "alm", "-")]);
    assert!(matcher.match_meaning(&tok, &term("fs_þgf")).matched());
    assert!(matcher.match_meaning(&tok, &term("fs_þf")).matched());
    assert!(!matcher.match_meaning(&tok, &term("fs_ef")).matched());
    let tok = word("vegna", vec![m("vegna", "fs", "alm", "-")]);
    assert!(matcher.match_meaning(&tok, &term("fs_ef")).matched());
    // The nh variant requires membership in the nh set
    let tok = word("um að", vec![m("um að", "fs", "alm", "-")]);
    assert!(matcher.match_meaning(&tok, &term("fs_nh")).matched());
  }

  #[test]
  fn eo_excludes_prepositions_and_pronouns() {
    let s = settings();
    let matcher = Matcher::new(&s, 8);
    // "á" is a configured preposition, so it cannot be an eo
    let tok = word("á", vec![m("á", "ao", "alm", "-")]);
    assert!(!matcher.match_meaning(&tok, &term("eo")).matched());
    // but "fallega" is fine
    let tok = word("fallega", vec![m("fallega", "ao", "alm", "-")]);
    assert!(matcher.match_meaning(&tok, &term("eo")).matched());
    // temporal adverbs match tao, not eo or plain ao
    let tok = word("aldrei", vec![m("aldrei", "ao", "alm", "-")]);
    assert!(matcher.match_meaning(&tok, &term("tao")).matched());
    assert!(!matcher.match_meaning(&tok, &term("eo")).matched());
    assert!(!matcher.match_meaning(&tok, &term("ao")).matched());
  }

  #[test]
  fn literal_terminals_match_by_stem_or_text() {
    let s = settings();
    let matcher = Matcher::new(&s, 8);
    let tok = word("á", vec![m("eiga", "so", "alm", "GM-FH-NT-3P-ET")]);
    assert!(matcher.match_meaning(&tok, &term("'eiga'")).matched());
    assert!(matcher.match_meaning(&tok, &term("\"á\"")).matched());
    assert!(!matcher.match_meaning(&tok, &term("\"í\"")).matched());
    assert!(matcher.match_meaning(&tok, &term("'eiga:so'_et_p3")).matched());
    assert!(!matcher.match_meaning(&tok, &term("'eiga:so'_ft_p3")).matched());
  }

  #[test]
  fn unknown_words_match_proper_name_or_neuter_noun() {
    let s = settings();
    let matcher = Matcher::new(&s, 8);
    let upper = word("Xanadu", vec![]);
    assert!(matcher.match_meaning(&upper, &term("sérnafn")).matched());
    assert!(!matcher.match_meaning(&upper, &term("sérnafn_nf")).matched());
    let lower = word("gizmo", vec![]);
    assert!(!matcher.match_meaning(&lower, &term("sérnafn")).matched());
    assert!(matcher.match_meaning(&lower, &term("no_et_hk_nf")).matched());
    assert!(!matcher.match_meaning(&lower, &term("no_et_hk_nf_gr")).matched());
    assert!(!matcher.match_meaning(&lower, &term("no_et_kvk_nf")).matched());
  }

  #[test]
  fn known_uppercase_words_do_not_match_sernafn() {
    let s = settings();
    let matcher = Matcher::new(&s, 8);
    let tok = word("Ísland", vec![m("ísland", "hk", "lönd", "NFET")]);
    assert!(!matcher.match_meaning(&tok, &term("sérnafn")).matched());
  }

  #[test]
  fn person_tokens_check_case_and_gender() {
    let s = settings();
    let matcher = Matcher::new(&s, 8);
    let name = PersonName {
      name: "Jón".to_string(),
      gender: Some("kk".to_string()),
      case: Some("nf".to_string()),
    };
    let tok = BinToken::new(&Tok::new(TokKind::Person, "Jón", TokVal::Person(vec![name])), 0);
    assert!(matcher.match_meaning(&tok, &term("person_nf_kk")).matched());
    assert!(!matcher.match_meaning(&tok, &term("person_þf_kk")).matched());
    assert!(!matcher.match_meaning(&tok, &term("person_nf_kvk")).matched());
    assert!(matcher.match_meaning(&tok, &term("sérnafn")).matched());
  }

  #[test]
  fn year_and_number_tokens() {
    let s = settings();
    let matcher = Matcher::new(&s, 8);
    let year = BinToken::new(&Tok::new(TokKind::Year, "2014", TokVal::Year(2014)), 0);
    assert!(matcher.match_meaning(&year, &term("ártal")).matched());
    assert!(!matcher.match_meaning(&year, &term("töl_ft")).matched());
    let num = BinToken::new(
      &Tok::new(
        TokKind::Number,
        "21",
        TokVal::Number { value: 21.0, cases: Some(vec!["nf".to_string()]), genders: None },
      ),
      0,
    );
    // 21 is grammatically singular in Icelandic
    assert!(matcher.match_meaning(&num, &term("tala_et")).matched());
    assert!(!matcher.match_meaning(&num, &term("tala_ft")).matched());
    assert!(matcher.match_meaning(&num, &term("töl_nf")).matched());
    assert!(!matcher.match_meaning(&num, &term("töl_þf")).matched());
  }

  #[test]
  fn punctuation_matches_its_literal() {
    let s = settings();
    let matcher = Matcher::new(&s, 8);
    let tok = BinToken::new(&Tok::punctuation(","), 0);
    assert!(matcher.match_meaning(&tok, &term("\",\"")).matched());
    assert!(!matcher.match_meaning(&tok, &term("\".\"")).matched());
  }

  #[test]
  fn matching_cache_is_tristate() {
    let s = settings();
    let mut matcher = Matcher::new(&s, 8);
    let tok = word("hesti", vec![m("hestur", "kk", "alm", "ÞGFET")]);
    let buffer = matcher.buffer_for(&tok);
    let t = term("no_þgf");
    assert!(matcher.matches(buffer, &tok, &t));
    assert_eq!(matcher.slabs[buffer][1], 1);
    // Identical tokens share the buffer
    let tok2 = word("hesti", vec![m("hestur", "kk", "alm", "ÞGFET")]);
    assert_eq!(matcher.buffer_for(&tok2), buffer);
    assert!(matcher.matches(buffer, &tok2, &t));
  }

  #[test]
  fn matched_meaning_index_is_reported() {
    let s = settings();
    let matcher = Matcher::new(&s, 8);
    let tok = word(
      "á",
      vec![m("á", "kvk", "alm", "NFET"), m("eiga", "so", "alm", "GM-FH-NT-3P-ET")],
    );
    match matcher.match_meaning(&tok, &term("so_1_þf_et_p3")) {
      MatchOutcome::Meaning(ix) => assert_eq!(ix, 1),
      other => panic!("unexpected outcome {:?}", other),
    }
  }
}
