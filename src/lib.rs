// Natural-language parsing for Icelandic: a compressed morphological
// lexicon (BÍN), a context-free grammar compiler, an Earley-Scott parser
// producing a shared packed parse forest, and a scoring reducer that
// prunes the forest down to the single most likely tree.

pub mod arena;
pub mod base;
pub mod binary;
pub mod cache;
pub mod compress;
pub mod config;
pub mod dawg;
pub mod forest;
pub mod grammar;
pub mod lexicon;
pub mod matcher;
pub mod parser;
pub mod reducer;
pub mod reynir;
pub mod terminal;
pub mod tokens;
pub mod verbframe;

pub use crate::base::{Error, Result};
pub use crate::compress::BinCompressor;
pub use crate::config::Settings;
pub use crate::dawg::CompoundSplitter;
pub use crate::forest::Forest;
pub use crate::grammar::{Grammar, GrammarError};
pub use crate::lexicon::{BinLexicon, CaseFilter, UtgFilter};
pub use crate::parser::{ParseError, Parser};
pub use crate::reducer::Reducer;
pub use crate::reynir::{init, instance, shutdown, ParseJob, Reynir, ReynirOptions, SentenceResult};
pub use crate::tokens::{BinMeaning, BinToken, Tok, TokKind, TokVal};
