use crate::base::{is_case, is_gender, ConfigError, HashMap, HashSet};
use crate::verbframe::VerbFrames;
use lazy_static::lazy_static;
use regex::Regex;

// The configuration tables consumed by the matcher and the reducer. The
// tables can be populated programmatically, or read from configuration
// text in the section/entry format of GreynirPackage.conf:
//
//   [section_name]
//   # comment
//   entry ...

type PreferenceTuple = (Vec<String>, Vec<String>, i32);

#[derive(Debug, Default)]
pub struct Settings {
  pub verb_frames: VerbFrames,
  // Verb lemma -> set of subject cases ("subj_..." terminals)
  pub verb_subjects: HashMap<String, HashSet<String>>,
  // Preposition -> set of cases it controls
  pub prepositions: HashMap<String, HashSet<String>>,
  // Prepositions that can precede an infinitive verb phrase
  pub prepositions_nh: HashSet<String>,
  // Plain prepositions requiring matching with BÍN meanings
  pub prepositions_common: HashSet<String>,
  // Word -> (worse terminal prefixes, better prefixes, factor)
  pub preferences: HashMap<String, Vec<PreferenceTuple>>,
  // Word form -> relative priorities of noun genders
  pub noun_preferences: HashMap<String, HashMap<String, i32>>,
  // Well-known person names
  pub name_preferences: HashSet<String>,
  // Static multi-word phrase -> (ordfl, fl, beyging)
  pub static_phrases: HashMap<String, (String, String, String)>,
  // Phrases whose word meanings are context-cut by the tokenizer
  pub ambiguous_phrases: Vec<Vec<String>>,
  // Person name forms that must not be recognized -> cases
  pub disallowed_names: HashMap<String, HashSet<String>>,
  pub undeclinable_adjectives: HashSet<String>,
}

impl Settings {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn add_preposition(&mut self, prep: &str, case: &str, nh: bool) -> Result<(), ConfigError> {
    let mut prep = prep;
    if let Some(stripped) = prep.strip_suffix('*') {
      // Star-marked prepositions are 'plain' and require BÍN matching
      prep = stripped;
      if prep.is_empty() {
        return Err(ConfigError::new("Asterisk should be affixed to a preposition"));
      }
      if prep.contains(' ') {
        return Err(ConfigError::new("An asterisk-marked preposition must be a single word"));
      }
      self.prepositions_common.insert(prep.to_string());
    }
    if !is_case(case) {
      return Err(ConfigError::new(format!("Invalid preposition case '{}'", case)));
    }
    self.prepositions.entry(prep.to_string()).or_default().insert(case.to_string());
    if nh {
      self.prepositions_nh.insert(prep.to_string());
    }
    Ok(())
  }

  pub fn add_verb_subject(&mut self, verb: &str, case: &str) {
    self.verb_subjects.entry(verb.to_string()).or_default().insert(case.to_string());
  }

  pub fn add_preference(&mut self, word: &str, worse: &[&str], better: &[&str], factor: i32) {
    self.preferences.entry(word.to_string()).or_default().push((
      worse.iter().map(|x| x.to_string()).collect(),
      better.iter().map(|x| x.to_string()).collect(),
      factor,
    ));
  }

  pub fn add_noun_preference(
    &mut self,
    word: &str,
    worse: &str,
    better: &str,
  ) -> Result<(), ConfigError> {
    if !is_gender(worse) || !is_gender(better) {
      return Err(ConfigError::new("Noun priorities must specify genders (kk, kvk, hk)"));
    }
    let d = self.noun_preferences.entry(word.to_string()).or_default();
    let worse_score = d.get(worse).copied();
    let better_score = d.get(better).copied();
    let (w, b) = match (worse_score, better_score) {
      (Some(_), Some(_)) => {
        return Err(ConfigError::new(format!("Conflicting priorities for noun {}", word)));
      }
      (Some(ws), None) => (ws, ws + 4),
      (None, Some(bs)) => (bs - 4, bs),
      (None, None) => (-2, 2),
    };
    d.insert(worse.to_string(), w);
    d.insert(better.to_string(), b);
    Ok(())
  }

  pub fn add_static_phrase(&mut self, phrase: &str, ordfl: &str, fl: &str, beyging: &str) -> Result<(), ConfigError> {
    if self.static_phrases.contains_key(phrase) {
      return Err(ConfigError::new(format!("Static phrase '{}' is defined more than once", phrase)));
    }
    self
      .static_phrases
      .insert(phrase.to_string(), (ordfl.to_string(), fl.to_string(), beyging.to_string()));
    Ok(())
  }

  pub fn add_name_preference(&mut self, name: &str) {
    self.name_preferences.insert(name.to_string());
  }

  pub fn add_disallowed_name(&mut self, name: &str, cases: &[&str]) {
    self
      .disallowed_names
      .insert(name.to_string(), cases.iter().map(|x| x.to_string()).collect());
  }

  pub fn add_undeclinable_adjective(&mut self, word: &str) {
    self.undeclinable_adjectives.insert(word.to_string());
  }

  // The phrase strings used by the grammar loader's consecutive-literal
  // check
  pub fn static_phrase_set(&self) -> HashSet<String> {
    self.static_phrases.keys().cloned().collect()
  }

  pub fn read_str(text: &str, fname: &str) -> Result<Settings, ConfigError> {
    lazy_static! {
      static ref SECTION: Regex = Regex::new(r"^\[\s*([a-z_]+)\s*\]$").unwrap();
      static ref QUOTED: Regex = Regex::new(r#"^"([^"]*)"\s*(.*)$"#).unwrap();
    }
    let mut settings = Settings::new();
    let mut section: Option<String> = None;
    for (ix, raw) in text.lines().enumerate() {
      let line_num = ix as u32 + 1;
      let line = match raw.find('#') {
        Some(pos) => &raw[..pos],
        None => raw,
      };
      let line = line.trim();
      if line.is_empty() {
        continue;
      }
      if let Some(cap) = SECTION.captures(line) {
        section = Some(cap[1].to_string());
        continue;
      }
      let result: Result<(), ConfigError> = match section.as_deref() {
        None => Err(ConfigError::new("Expected a [section] before entries")),
        Some("prepositions") => {
          // prep [more words] case [nh]; multiword prepositions arrive
          // from the tokenizer as single phrase tokens with spaces
          let mut words: Vec<&str> = line.split_whitespace().collect();
          let nh = words.last() == Some(&"nh");
          if nh {
            words.pop();
          }
          if words.len() < 2 {
            Err(ConfigError::new("Preposition entry must be 'prep case [nh]'"))
          } else {
            let case = words.pop().unwrap_or("");
            settings.add_preposition(&words.join(" "), case, nh)
          }
        }
        Some("verb_objects") => settings.verb_frames.add_spec(line),
        Some("verb_subjects") => {
          let words: Vec<&str> = line.split_whitespace().collect();
          match words.as_slice() {
            [verb, case] => {
              settings.add_verb_subject(verb, case);
              Ok(())
            }
            _ => Err(ConfigError::new("Verb subject entry must be 'verb case'")),
          }
        }
        Some("preferences") => {
          // word worse... < better... [factor]
          match line.split_once('<') {
            None => Err(ConfigError::new("Preference entry must contain '<'")),
            Some((left, right)) => {
              let mut left_words = left.split_whitespace();
              let word = left_words.next().unwrap_or("");
              let worse: Vec<&str> = left_words.collect();
              let mut better: Vec<&str> = right.split_whitespace().collect();
              let factor = match better.last().and_then(|x| x.parse::<i32>().ok()) {
                Some(f) => {
                  better.pop();
                  f
                }
                None => 1,
              };
              if word.is_empty() || worse.is_empty() || better.is_empty() {
                Err(ConfigError::new("Preference entry must list worse and better terminals"))
              } else {
                settings.add_preference(word, &worse, &better, factor);
                Ok(())
              }
            }
          }
        }
        Some("noun_preferences") => {
          let words: Vec<&str> = line.split_whitespace().collect();
          match words.as_slice() {
            [word, worse, "<", better] => settings.add_noun_preference(word, worse, better),
            _ => Err(ConfigError::new("Noun preference entry must be 'word worse < better'")),
          }
        }
        Some("names") => {
          settings.add_name_preference(line);
          Ok(())
        }
        Some("static_phrases") => match QUOTED.captures(line) {
          Some(cap) => {
            let rest: Vec<&str> = cap[2].split_whitespace().collect();
            match rest.as_slice() {
              [ordfl, fl, beyging] => settings.add_static_phrase(&cap[1], ordfl, fl, beyging),
              _ => Err(ConfigError::new("Static phrase entry must be '\"phrase\" ordfl fl beyging'")),
            }
          }
          None => Err(ConfigError::new("Static phrase must be enclosed in double quotes")),
        },
        Some("ambiguous_phrases") => match QUOTED.captures(line) {
          Some(cap) => {
            let words: Vec<String> = cap[1].split_whitespace().map(|x| x.to_string()).collect();
            if words.len() < 2 {
              Err(ConfigError::new("Ambiguous phrase must have at least two words"))
            } else {
              settings.ambiguous_phrases.push(words);
              Ok(())
            }
          }
          None => Err(ConfigError::new("Ambiguous phrase must be enclosed in double quotes")),
        },
        Some("disallowed_names") => {
          let words: Vec<&str> = line.split_whitespace().collect();
          if words.len() < 2 || !words[1..].iter().all(|c| is_case(c)) {
            Err(ConfigError::new("Disallowed name entry must be 'name case...'"))
          } else {
            settings.add_disallowed_name(words[0], &words[1..]);
            Ok(())
          }
        }
        Some("undeclinable_adjectives") => {
          settings.add_undeclinable_adjective(line);
          Ok(())
        }
        Some(other) => Err(ConfigError::new(format!("Unknown section '{}'", other))),
      };
      result.map_err(|e| e.augment(fname, line_num))?;
    }
    Ok(settings)
  }
}
