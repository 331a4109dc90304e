//! 自然语言理解：词表、回复分类、姓名提取与校验

pub mod extractor;
pub mod name;
pub mod vocab;

pub use extractor::{Extraction, NameExtractor, NamePatterns, PatternError};
pub use vocab::{tokenize, PhraseSet, Reply, ReplyClassifier, Token, Vocabulary};
