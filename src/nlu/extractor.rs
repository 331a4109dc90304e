//! 姓名提取
//!
//! 从自由文本中提取候选姓名。模板按优先级分三族：
//! 1. 介词/自我介绍："as NAME"、"for NAME"、"my name is NAME"、"I'm NAME"、"call me NAME"、
//!    "change my name to NAME"
//! 2. 第三人称关系："my son named NAME"、"my son"、"enroll my daughter's voice"
//! 3. 直接姓名：整句（去掉开场短语）就是一个姓名
//!
//! 模板由词表编译一次（锚点短语 + 捕获槽），词表不可用时回退到内置英文词表。
//! 只命中关系词而没有姓名时（"my son"），不返回姓名，只标记第三人称与关系词，由调用方追问姓名。

use thiserror::Error;

use super::name;
use super::vocab::{tokenize, PhraseSet, Token, Vocabulary};

/// 提取结果
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Extraction {
    /// 已规范化、已通过校验的姓名
    pub name: Option<String>,
    /// 是否为第三人称注册
    pub third_person: bool,
    pub relationship: Option<String>,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PatternError {
    #[error("vocabulary list '{0}' is empty")]
    EmptyList(&'static str),
}

/// 模板族，数值越小优先级越高
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum PatternFamily {
    Prepositional,
    Relationship,
    Direct,
}

/// 模板片段
#[derive(Debug, Clone)]
enum Part {
    /// 必须命中其中一个短语
    Anchor(PhraseSet),
    /// 可有可无
    Optional(PhraseSet),
    /// 关系词；`possessive` 为真时要求带 's 后缀（"daughter's"）
    Relationship { possessive: bool },
    /// 姓名捕获槽，只能位于模板末尾
    Name,
}

/// 锚点短语 + 捕获槽组成的模板
#[derive(Debug, Clone)]
struct PatternTemplate {
    family: PatternFamily,
    parts: Vec<Part>,
    /// 只允许从句首匹配
    anchored: bool,
    /// 姓名槽必须吃完整句（允许尾部客套词）
    whole: bool,
}

#[derive(Debug, Default)]
struct Hit {
    name: Option<String>,
    relationship: Option<String>,
}

/// 编译后的模板集合
#[derive(Debug, Clone)]
pub struct NamePatterns {
    templates: Vec<PatternTemplate>,
    starters: PhraseSet,
    relationships: PhraseSet,
    /// 姓名槽遇到这些词即停止
    boundaries: PhraseSet,
    fillers: PhraseSet,
    /// 直接姓名模板中不可出现的词（yes / no / cancel ...）
    reserved: PhraseSet,
}

impl NamePatterns {
    /// 由词表编译模板；任一必需词表为空时失败
    pub fn compile(vocab: &Vocabulary) -> Result<Self, PatternError> {
        if let Some(list) = vocab.first_empty_list() {
            return Err(PatternError::EmptyList(list));
        }

        let intros = PhraseSet::new(&vocab.name_intros);
        let third_intros = PhraseSet::new(&vocab.third_person_intros);
        let possessives = PhraseSet::new(&vocab.possessives);
        let voice_terms = PhraseSet::new(&vocab.voice_terms);

        let templates = vec![
            PatternTemplate {
                family: PatternFamily::Prepositional,
                parts: vec![Part::Anchor(intros), Part::Name],
                anchored: false,
                whole: false,
            },
            PatternTemplate {
                family: PatternFamily::Prepositional,
                parts: vec![
                    Part::Anchor(PhraseSet::new(&vocab.restart)),
                    Part::Anchor(PhraseSet::new(&vocab.rename_intros)),
                    Part::Name,
                ],
                anchored: false,
                whole: false,
            },
            PatternTemplate {
                family: PatternFamily::Relationship,
                parts: vec![
                    Part::Optional(possessives.clone()),
                    Part::Relationship { possessive: false },
                    Part::Anchor(third_intros),
                    Part::Name,
                ],
                anchored: false,
                whole: false,
            },
            PatternTemplate {
                family: PatternFamily::Relationship,
                parts: vec![
                    Part::Optional(possessives.clone()),
                    Part::Relationship { possessive: true },
                    Part::Anchor(voice_terms),
                ],
                anchored: false,
                whole: false,
            },
            PatternTemplate {
                family: PatternFamily::Relationship,
                parts: vec![Part::Anchor(possessives), Part::Relationship { possessive: false }],
                anchored: false,
                whole: false,
            },
            PatternTemplate {
                family: PatternFamily::Relationship,
                parts: vec![Part::Relationship { possessive: false }],
                anchored: true,
                whole: false,
            },
            PatternTemplate {
                family: PatternFamily::Direct,
                parts: vec![Part::Name],
                anchored: true,
                whole: true,
            },
        ];

        let mut boundaries: Vec<String> = Vec::new();
        boundaries.extend(vocab.possessives.iter().cloned());
        boundaries.extend(vocab.relationships.iter().cloned());
        boundaries.extend(vocab.trailing_fillers.iter().cloned());
        boundaries.extend(vocab.enroll_actions.iter().cloned());
        boundaries.extend(vocab.voice_terms.iter().cloned());
        boundaries.extend(vocab.third_person_intros.iter().cloned());
        boundaries.extend(vocab.name_intros.iter().filter(|w| !w.contains(' ')).cloned());
        boundaries.extend(["and", "or", "the", "a", "an"].iter().map(|w| w.to_string()));

        let mut reserved: Vec<String> = Vec::new();
        for list in [
            &vocab.affirm,
            &vocab.deny,
            &vocab.cancel,
            &vocab.restart,
            &vocab.stop,
            &vocab.pause,
            &vocab.resume,
            &vocab.list_terms,
        ] {
            reserved.extend(list.iter().cloned());
        }

        Ok(Self {
            templates,
            starters: PhraseSet::new(&vocab.phrase_starters),
            relationships: PhraseSet::new(&vocab.relationships),
            boundaries: PhraseSet::new(&boundaries),
            fillers: PhraseSet::new(&vocab.trailing_fillers),
            reserved: PhraseSet::new(&reserved),
        })
    }

    fn is_relationship(&self, token: &Token, possessive: bool) -> Option<String> {
        if possessive {
            let stem = token.lower.strip_suffix("'s")?;
            self.relationships.contains_word(stem).then(|| stem.to_string())
        } else {
            self.relationships
                .contains_word(&token.lower)
                .then(|| token.lower.clone())
        }
    }

    fn is_name_token(&self, token: &Token, first: bool) -> bool {
        if first && name::canonical_title(&token.word).is_some() {
            return true;
        }
        let mut chars = token.word.chars();
        let starts = chars.next().is_some_and(char::is_alphabetic);
        let ends = token.word.chars().last().is_some_and(char::is_alphabetic);
        starts
            && ends
            && token.word.chars().all(|c| c.is_alphabetic() || c == '-' || c == '\'')
            && !self.boundaries.contains_word(&token.lower)
    }

    /// 从 `at` 开始贪婪捕获姓名词，返回捕获的词数
    fn capture_name(&self, tokens: &[Token], at: usize) -> usize {
        let mut len = 0;
        let mut chars = 0;
        while at + len < tokens.len() {
            let token = &tokens[at + len];
            if !self.is_name_token(token, len == 0) {
                break;
            }
            chars += token.word.chars().count() + usize::from(len > 0);
            if chars > name::MAX_NAME_LENGTH {
                break;
            }
            len += 1;
        }
        len
    }

    /// 去掉句尾客套词后的有效长度
    fn trimmed_len(&self, tokens: &[Token]) -> usize {
        let mut end = tokens.len();
        while end > 0 && self.fillers.contains_word(&tokens[end - 1].lower) {
            end -= 1;
        }
        end
    }

    fn match_template(&self, template: &PatternTemplate, tokens: &[Token]) -> Option<Hit> {
        let starts = if template.anchored { 0..1 } else { 0..tokens.len() };
        starts
            .filter(|&s| s < tokens.len())
            .find_map(|start| self.match_from(template, tokens, start))
    }

    fn match_from(&self, template: &PatternTemplate, tokens: &[Token], start: usize) -> Option<Hit> {
        let mut at = start;
        let mut hit = Hit::default();
        for part in &template.parts {
            match part {
                Part::Anchor(set) => at += set.match_at(tokens, at)?,
                Part::Optional(set) => at += set.match_at(tokens, at).unwrap_or(0),
                Part::Relationship { possessive } => {
                    hit.relationship = Some(self.is_relationship(tokens.get(at)?, *possessive)?);
                    at += 1;
                }
                Part::Name => {
                    let len = self.capture_name(tokens, at);
                    if len == 0 {
                        return None;
                    }
                    if template.whole && at + len != self.trimmed_len(tokens) {
                        return None;
                    }
                    let raw = tokens[at..at + len]
                        .iter()
                        .map(|t| t.word.as_str())
                        .collect::<Vec<_>>()
                        .join(" ");
                    let candidate = name::normalize(&raw);
                    if !name::validate(&candidate) {
                        return None;
                    }
                    hit.name = Some(candidate);
                    at += len;
                }
            }
        }
        Some(hit)
    }
}

/// 姓名提取器
#[derive(Debug, Clone)]
pub struct NameExtractor {
    patterns: NamePatterns,
}

impl Default for NameExtractor {
    fn default() -> Self {
        Self::english()
    }
}

impl NameExtractor {
    pub fn new(patterns: NamePatterns) -> Self {
        Self { patterns }
    }

    /// 内置英文模板
    pub fn english() -> Self {
        match NamePatterns::compile(&Vocabulary::english()) {
            Ok(patterns) => Self { patterns },
            Err(e) => unreachable!("built-in vocabulary must compile: {e}"),
        }
    }

    /// 使用 locale 词表；缺失或编译失败时回退英文
    pub fn from_locale(vocab: Option<&Vocabulary>) -> Self {
        match vocab.map(NamePatterns::compile) {
            Some(Ok(patterns)) => Self { patterns },
            Some(Err(e)) => {
                tracing::warn!("Locale name patterns unusable ({}), falling back to English", e);
                Self::english()
            }
            None => Self::english(),
        }
    }

    /// 提取姓名与第三人称标记
    pub fn extract(&self, utterance: &str) -> Extraction {
        let tokens = tokenize(utterance);
        let mut out = Extraction::default();
        if tokens.is_empty() {
            return out;
        }

        let skip = self.patterns.starters.match_at(&tokens, 0).unwrap_or(0);
        let cleaned = &tokens[skip..];
        let direct_allowed = self.patterns.reserved.find(cleaned).is_none();

        for template in &self.patterns.templates {
            let hit = match template.family {
                PatternFamily::Direct if !direct_allowed || cleaned.is_empty() => None,
                PatternFamily::Direct => self.patterns.match_template(template, cleaned),
                _ => self.patterns.match_template(template, &tokens),
            };
            let Some(hit) = hit else { continue };

            if let Some(relationship) = hit.relationship {
                if out.relationship.is_none() {
                    out.third_person = true;
                    out.relationship = Some(relationship);
                }
            }
            if out.name.is_none() {
                out.name = hit.name;
            }
        }

        if let Some(name) = &out.name {
            tracing::debug!("Extracted name: {}", name);
        } else if out.third_person {
            tracing::debug!("Third-person enrollment without name: {:?}", out.relationship);
        }
        out
    }
}
