use crate::base::{Error, Result};
use crate::grammar::Grammar;
use log::debug;
use std::fs;
use std::path::Path;

// Binary form of a grammar: a versioned header with counts and the root
// index, followed by the production list of each nonterminal in descending
// index order. All values little-endian. The symbol names are not stored;
// they are implied by the deterministic sorted-name index assignment done
// when the text grammar is read.

pub const GRAMMAR_BINARY_VERSION: &[u8; 16] = b"Greynir00.00.01\n";

#[derive(Clone, Debug, PartialEq)]
pub struct BinaryProduction {
  pub index: u32,
  pub priority: u32,
  pub rhs: Vec<i32>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct BinaryGrammar {
  pub num_terminals: u32,
  pub num_nonterminals: u32,
  pub root: i32,
  // Production lists, position ix holding nonterminal index -1 - ix
  pub nonterminals: Vec<Vec<BinaryProduction>>,
}

pub fn write_binary(grammar: &Grammar) -> Vec<u8> {
  let mut out = Vec::with_capacity(16 + 16 * grammar.num_productions());
  out.extend_from_slice(GRAMMAR_BINARY_VERSION);
  out.extend_from_slice(&(grammar.num_terminals() as u32).to_le_bytes());
  out.extend_from_slice(&(grammar.num_nonterminals() as u32).to_le_bytes());
  out.extend_from_slice(&grammar.root.to_le_bytes());
  for ix in 0..grammar.num_nonterminals() {
    let nt_ix = -1 - ix as i32;
    let slots = grammar.productions_of(nt_ix);
    out.extend_from_slice(&(slots.len() as u32).to_le_bytes());
    for &slot in slots {
      let p = grammar.production(slot);
      out.extend_from_slice(&p.index.to_le_bytes());
      out.extend_from_slice(&p.priority.to_le_bytes());
      out.extend_from_slice(&(p.rhs.len() as u32).to_le_bytes());
      for item in &p.rhs {
        out.extend_from_slice(&item.to_le_bytes());
      }
    }
  }
  out
}

struct Reader<'a> {
  data: &'a [u8],
  pos: usize,
  path: &'a str,
}

impl<'a> Reader<'a> {
  fn take(&mut self, n: usize) -> Result<&'a [u8]> {
    if self.pos + n > self.data.len() {
      return Err(Error::DataFile {
        path: self.path.to_string(),
        reason: "truncated binary grammar".to_string(),
      });
    }
    let slice = &self.data[self.pos..self.pos + n];
    self.pos += n;
    Ok(slice)
  }

  fn u32(&mut self) -> Result<u32> {
    let b = self.take(4)?;
    Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
  }

  fn i32(&mut self) -> Result<i32> {
    let b = self.take(4)?;
    Ok(i32::from_le_bytes([b[0], b[1], b[2], b[3]]))
  }
}

pub fn read_binary(data: &[u8], path: &str) -> Result<BinaryGrammar> {
  let mut r = Reader { data, pos: 0, path };
  let header = r.take(16)?;
  if header != GRAMMAR_BINARY_VERSION {
    return Err(Error::DataFile {
      path: path.to_string(),
      reason: "invalid binary grammar signature".to_string(),
    });
  }
  let num_terminals = r.u32()?;
  let num_nonterminals = r.u32()?;
  let root = r.i32()?;
  let mut nonterminals = Vec::with_capacity(num_nonterminals as usize);
  for _ in 0..num_nonterminals {
    let count = r.u32()?;
    let mut plist = Vec::with_capacity(count as usize);
    for _ in 0..count {
      let index = r.u32()?;
      let priority = r.u32()?;
      let length = r.u32()?;
      let mut rhs = Vec::with_capacity(length as usize);
      for _ in 0..length {
        let item = r.i32()?;
        if item == 0 {
          return Err(Error::DataFile {
            path: path.to_string(),
            reason: "production item with index 0".to_string(),
          });
        }
        rhs.push(item);
      }
      plist.push(BinaryProduction { index, priority, rhs });
    }
    nonterminals.push(plist);
  }
  Ok(BinaryGrammar { num_terminals, num_nonterminals, root, nonterminals })
}

// Project a loaded grammar onto the binary representation; used to verify
// write/read round trips
pub fn project(grammar: &Grammar) -> BinaryGrammar {
  let mut nonterminals = Vec::with_capacity(grammar.num_nonterminals());
  for ix in 0..grammar.num_nonterminals() {
    let nt_ix = -1 - ix as i32;
    let plist = grammar
      .productions_of(nt_ix)
      .iter()
      .map(|&slot| {
        let p = grammar.production(slot);
        BinaryProduction { index: p.index, priority: p.priority, rhs: p.rhs.clone() }
      })
      .collect();
    nonterminals.push(plist);
  }
  BinaryGrammar {
    num_terminals: grammar.num_terminals() as u32,
    num_nonterminals: grammar.num_nonterminals() as u32,
    root: grammar.root,
    nonterminals,
  }
}

// Write a fresh binary grammar file if it is missing, older than the text
// grammar, or if force is set. Returns true if a file was written.
pub fn refresh_binary_file(
  grammar: &Grammar,
  text_path: &Path,
  binary_path: &Path,
  force: bool,
) -> Result<bool> {
  let stale = force || {
    match (fs::metadata(text_path), fs::metadata(binary_path)) {
      (Ok(text_meta), Ok(bin_meta)) => match (text_meta.modified(), bin_meta.modified()) {
        (Ok(text_time), Ok(bin_time)) => bin_time < text_time,
        _ => true,
      },
      (_, Err(_)) => true,
      (Err(_), _) => true,
    }
  };
  if !stale {
    return Ok(false);
  }
  debug!("Writing binary grammar file {}", binary_path.display());
  fs::write(binary_path, write_binary(grammar))?;
  Ok(true)
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::base::HashSet;

  fn load(text: &str) -> Grammar {
    Grammar::read_text(text, "test.grammar", &HashSet::default(), &HashSet::default()).unwrap()
  }

  const GRAMMAR: &str = "/fall = nf þf\n\
    S -> Vp\n\
    Vp -> so_0 Nl/fall > so_1_þf\n\
    Nl/fall -> no/fall | 0\n";

  #[test]
  fn round_trip_preserves_tables() {
    let g = load(GRAMMAR);
    let bytes = write_binary(&g);
    let read = read_binary(&bytes, "mem").unwrap();
    assert_eq!(read, project(&g));
  }

  #[test]
  fn writing_is_deterministic() {
    let a = write_binary(&load(GRAMMAR));
    let b = write_binary(&load(GRAMMAR));
    assert_eq!(a, b);
  }

  #[test]
  fn bad_signature_is_rejected() {
    let mut bytes = write_binary(&load(GRAMMAR));
    bytes[0] ^= 0xFF;
    assert!(read_binary(&bytes, "mem").is_err());
  }

  #[test]
  fn truncation_is_rejected() {
    let bytes = write_binary(&load(GRAMMAR));
    assert!(read_binary(&bytes[..bytes.len() - 2], "mem").is_err());
  }

  #[test]
  fn stale_file_is_rewritten() {
    let dir = tempfile::tempdir().unwrap();
    let text_path = dir.path().join("test.grammar");
    let bin_path = dir.path().join("test.grammar.bin");
    fs::write(&text_path, GRAMMAR).unwrap();
    let g = load(GRAMMAR);
    assert!(refresh_binary_file(&g, &text_path, &bin_path, false).unwrap());
    // Second time around the binary is fresh
    assert!(!refresh_binary_file(&g, &text_path, &bin_path, false).unwrap());
    assert!(refresh_binary_file(&g, &text_path, &bin_path, true).unwrap());
    let read = read_binary(&fs::read(&bin_path).unwrap(), "file").unwrap();
    assert_eq!(read, project(&g));
  }
}
