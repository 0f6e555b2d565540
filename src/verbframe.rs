use crate::base::{is_case, ConfigError, HashMap, HashSet};

// A verb frame is a registered combination of a verb lemma, argument cases
// and licensed prepositions (eventually with a particle and a score). The
// frames drive both parsing admissibility (can this verb take these
// argument cases?) and reducer scoring (does this preposition idiomatically
// attach to this verb?).

const SKIP_VARS: [&str; 8] = ["gr", "ft", "est", "mst", "et", "kk", "kvk", "hk"];
const SUBCLAUSES: [&str; 4] = ["nh", "nhx", "falls", "spurns"];
const REFLEXIVE: [&str; 3] = ["sig", "sér", "sín"];

#[derive(Clone, Debug)]
pub struct VerbFrame {
  pub verb: String,
  pub cases: Vec<String>,
  // Preposition keys: "prep_case", e.g. "vegna_ef"
  preps: HashSet<String>,
  pub particle: Option<String>,
  pub score: Option<i32>,
}

impl VerbFrame {
  // Does this frame agree with the given preposition[+case]? A bare
  // preposition (no case suffix) matches the preposition in any case.
  fn matches_pp(&self, prep_with_case: &str) -> bool {
    if self.preps.contains(prep_with_case) {
      return true;
    }
    self.preps.iter().any(|key| {
      key
        .rsplit_once('_')
        .map(|(base, case)| base == prep_with_case && is_case(case))
        .unwrap_or(false)
    })
  }

  fn matches_pcl(&self, particle: &str) -> bool {
    self.particle.as_deref() == Some(particle)
  }
}

#[derive(Debug, Default)]
pub struct VerbFrames {
  // Frames by 'verb_case1_case2' key, e.g. 'skrifa_þgf_þf'
  case_frames: HashMap<String, Vec<VerbFrame>>,
  // Verb lemma -> argument case lists, by argument count 0..=2
  args_by_count: [HashMap<String, Vec<Vec<String>>>; 3],
  verbs: HashSet<String>,
}

impl VerbFrames {
  pub fn new() -> Self {
    Self::default()
  }

  // Handle one verb specification:
  //   verb [case [case]] [/preposition case]... [*particle] [$score(n)]
  // Entries using constructs outside this core (reflexive pronouns,
  // clause arguments) are accepted but not registered, as the frame
  // machinery cannot express them.
  pub fn add_spec(&mut self, spec: &str) -> Result<(), ConfigError> {
    let mut s = spec.trim().to_string();
    let mut complex = false;

    // $score(n) pragma, at the end
    let mut score = None;
    if let Some(ix) = s.rfind("$score(") {
      let sc = s[ix..].trim();
      if !sc.ends_with(')') {
        return Err(ConfigError::new("Invalid score pragma; form should be $score(n)"));
      }
      let inner = sc["$score(".len()..sc.len() - 1].trim();
      score = Some(inner.parse::<i32>().map_err(|_| {
        ConfigError::new(format!("Invalid score ('{}') for verb form", inner))
      })?);
      s = s[..ix].trim().to_string();
    }

    // $error(...) entries describe wrong usage for correction tools;
    // they do not define admissible frames
    if s.contains("$error(") {
      if !s.ends_with(')') {
        return Err(ConfigError::new("Invalid error pragma; form should be $error(...)"));
      }
      return Ok(());
    }

    // *particle, a single word
    let mut particle = None;
    if let Some(ix) = s.rfind('*') {
      let p = s[ix + 1..].trim();
      if p.is_empty() {
        return Err(ConfigError::new("Particle should be at least one letter"));
      }
      if p.contains(char::is_whitespace) {
        return Err(ConfigError::new("Particle should only be one word"));
      }
      particle = Some(p.to_string());
      s = s[..ix].trim().to_string();
    }

    // /preposition case arguments
    let mut preps: Vec<(String, String)> = vec![];
    let mut parts = s.split('/');
    let head = parts.next().unwrap_or("").trim().to_string();
    for p in parts {
      let mut words = p.split_whitespace();
      let prep = words.next().ok_or_else(|| {
        ConfigError::new("Preposition specification must name a preposition")
      })?;
      let case = words.next().ok_or_else(|| {
        ConfigError::new("Preposition should have exactly one argument")
      })?;
      let case = argument_case(case, &mut complex)
        .ok_or_else(|| ConfigError::new(format!("Invalid preposition argument: '{}'", case)))?;
      preps.push((prep.replace('_', " "), case));
    }

    // The verb and its argument cases
    let mut words = head.split_whitespace();
    let verb = words
      .next()
      .ok_or_else(|| ConfigError::new("Verb specification must name a verb"))?
      .to_string();
    if !verb.chars().all(char::is_alphabetic) {
      return Err(ConfigError::new(format!("Verb '{}' is not a valid word", verb)));
    }
    let mut cases = vec![];
    for arg in words {
      match argument_case(arg, &mut complex) {
        Some(case) => cases.push(case),
        None => return Err(ConfigError::new(format!("Invalid verb argument: '{}'", arg))),
      }
    }
    if cases.len() > 2 {
      return Err(ConfigError::new("A verb frame takes at most two arguments"));
    }
    if complex {
      // Constructs we cannot express; skip the frame
      return Ok(());
    }

    let frame = VerbFrame {
      verb: verb.clone(),
      cases: cases.clone(),
      preps: preps.into_iter().map(|(p, c)| format!("{}_{}", p, c)).collect(),
      particle,
      score,
    };
    let key = frame_key(&verb, &cases);
    self.case_frames.entry(key).or_default().push(frame);
    self.args_by_count[cases.len()].entry(verb.clone()).or_default().push(cases);
    self.verbs.insert(verb);
    Ok(())
  }

  pub fn known(&self, verb: &str) -> bool {
    self.verbs.contains(verb)
  }

  // Is the verb registered with exactly this argument count?
  pub fn has_arg_count(&self, verb: &str, nargs: usize) -> bool {
    nargs <= 2 && self.args_by_count[nargs].contains_key(verb)
  }

  // The registered argument case lists of a verb for a given count
  pub fn arg_cases(&self, verb: &str, nargs: usize) -> &[Vec<String>] {
    if nargs > 2 {
      return &[];
    }
    self.args_by_count[nargs].get(verb).map(|x| x.as_slice()).unwrap_or(&[])
  }

  pub fn matches_arguments(&self, verb_with_cases: &str) -> bool {
    self.case_frames.contains_key(verb_with_cases)
  }

  // Does the verb-with-cases key match the preposition [+case]?
  pub fn matches_preposition(&self, verb_with_cases: &str, prep_with_case: &str) -> bool {
    self
      .case_frames
      .get(verb_with_cases)
      .map(|frames| frames.iter().any(|vf| vf.matches_pp(prep_with_case)))
      .unwrap_or(false)
  }

  pub fn matches_particle(&self, verb_with_cases: &str, particle: &str) -> bool {
    self
      .case_frames
      .get(verb_with_cases)
      .map(|frames| frames.iter().any(|vf| vf.matches_pcl(particle)))
      .unwrap_or(false)
  }

  // The highest score of any frame with these argument cases
  pub fn verb_score(&self, verb_with_cases: &str) -> Option<i32> {
    self.case_frames.get(verb_with_cases)?.iter().filter_map(|vf| vf.score).max()
  }
}

fn frame_key(verb: &str, cases: &[String]) -> String {
  let mut key = verb.to_string();
  for c in cases {
    key.push('_');
    key.push_str(c);
  }
  key
}

// Reduce an argument specifier to a plain case if possible. Specifiers
// that denote reflexive pronouns, clauses or fixed phrases flag the frame
// as complex.
fn argument_case(arg: &str, complex: &mut bool) -> Option<String> {
  if is_case(arg) {
    return Some(arg.to_string());
  }
  if REFLEXIVE.contains(&arg) || SUBCLAUSES.contains(&arg) {
    *complex = true;
    return Some(String::new());
  }
  if arg.contains('_') {
    // Detailed specifier such as "ef_ft": strip trailing qualifiers and
    // keep the base case
    let mut parts: Vec<&str> = arg.split('_').collect();
    while parts.last().map(|p| SKIP_VARS.contains(p)).unwrap_or(false) {
      parts.pop();
    }
    if let Some(last) = parts.last() {
      if is_case(last) {
        return Some(last.to_string());
      }
    }
  }
  None
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn frames_register_by_case_key() {
    let mut vf = VerbFrames::new();
    vf.add_spec("fresta þgf /vegna ef").unwrap();
    vf.add_spec("skrifa þgf þf").unwrap();
    vf.add_spec("ganga").unwrap();
    assert!(vf.known("fresta") && vf.known("skrifa") && vf.known("ganga"));
    assert!(vf.matches_arguments("fresta_þgf"));
    assert!(vf.matches_arguments("skrifa_þgf_þf"));
    assert!(vf.matches_arguments("ganga"));
    assert!(!vf.matches_arguments("fresta_þf"));
    assert!(vf.has_arg_count("fresta", 1));
    assert!(!vf.has_arg_count("fresta", 2));
    assert_eq!(vf.arg_cases("skrifa", 2), &[vec!["þgf".to_string(), "þf".to_string()]]);
  }

  #[test]
  fn preposition_matching_honors_case() {
    let mut vf = VerbFrames::new();
    vf.add_spec("fresta þgf /vegna ef").unwrap();
    assert!(vf.matches_preposition("fresta_þgf", "vegna_ef"));
    assert!(!vf.matches_preposition("fresta_þgf", "vegna_þgf"));
    assert!(!vf.matches_preposition("fresta_þgf", "um_þf"));
    // A bare preposition matches regardless of case
    assert!(vf.matches_preposition("fresta_þgf", "vegna"));
  }

  #[test]
  fn scores_take_the_maximum() {
    let mut vf = VerbFrames::new();
    vf.add_spec("telja þf $score(-2)").unwrap();
    vf.add_spec("telja þf $score(3)").unwrap();
    vf.add_spec("telja þgf").unwrap();
    assert_eq!(vf.verb_score("telja_þf"), Some(3));
    assert_eq!(vf.verb_score("telja_þgf"), None);
    assert_eq!(vf.verb_score("telja_ef"), None);
  }

  #[test]
  fn particles_and_detailed_cases() {
    let mut vf = VerbFrames::new();
    vf.add_spec("skila *inn").unwrap();
    assert!(vf.matches_particle("skila", "inn"));
    assert!(!vf.matches_particle("skila", "út"));
    vf.add_spec("deila /milli ef_ft").unwrap();
    assert!(vf.matches_preposition("deila", "milli_ef"));
  }

  #[test]
  fn complex_and_error_frames_are_skipped() {
    let mut vf = VerbFrames::new();
    vf.add_spec("minnast sín").unwrap();
    assert!(!vf.known("minnast"));
    vf.add_spec("halda falls").unwrap();
    assert!(!vf.known("halda"));
    vf.add_spec("hlakka þf $error(OBJ-CASE, nf)").unwrap();
    assert!(!vf.known("hlakka"));
  }

  #[test]
  fn malformed_specs_are_errors() {
    let mut vf = VerbFrames::new();
    assert!(vf.add_spec("fresta xyz").is_err());
    assert!(vf.add_spec("123verb þf").is_err());
    assert!(vf.add_spec("telja þf $score(abc)").is_err());
    assert!(vf.add_spec("fresta /vegna").is_err());
  }
}
