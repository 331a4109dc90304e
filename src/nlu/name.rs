//! 姓名校验与规范化
//!
//! - `validate`：长度 2..=50、仅字母（任意文字）/空格/连字符/撇号、首尾为字母、不允许连续 3 个以上分隔符、
//!   不允许通用占位名（test / admin / root / user）；允许一个可识别的前置称谓（Dr. / Mr. / Ms. / Mrs. / Miss）
//! - `normalize`：合并空白、逐词首字母大写（连字符与撇号分段各自大写）、称谓改写为标准拼写
//! - `unsupported_title`：不支持的称谓（professor、captain ...）在接受姓名时单独检查

use std::sync::OnceLock;

use regex::Regex;

pub const MIN_NAME_LENGTH: usize = 2;
pub const MAX_NAME_LENGTH: usize = 50;

const DENYLIST: [&str; 4] = ["test", "admin", "root", "user"];

/// 可识别称谓（小写、不含句点）及其标准写法
const RECOGNIZED_TITLES: [(&str, &str); 5] = [
    ("dr", "Dr."),
    ("mr", "Mr."),
    ("ms", "Ms."),
    ("mrs", "Mrs."),
    ("miss", "Miss"),
];

const UNSUPPORTED_TITLES: [&str; 7] = [
    "professor",
    "captain",
    "sergeant",
    "lieutenant",
    "colonel",
    "general",
    "admiral",
];

static SEPARATOR_RUN_RE: OnceLock<Regex> = OnceLock::new();
static WHITESPACE_RE: OnceLock<Regex> = OnceLock::new();

fn separator_run_re() -> &'static Regex {
    SEPARATOR_RUN_RE.get_or_init(|| Regex::new(r"[\s\-']{3,}").unwrap())
}

fn whitespace_re() -> &'static Regex {
    WHITESPACE_RE.get_or_init(|| Regex::new(r"\s+").unwrap())
}

/// 若 `word`（大小写不敏感，句点可选）是可识别称谓，返回其标准写法
pub fn canonical_title(word: &str) -> Option<&'static str> {
    let bare = word.strip_suffix('.').unwrap_or(word).to_lowercase();
    RECOGNIZED_TITLES
        .iter()
        .find(|(t, _)| *t == bare)
        .map(|(_, canonical)| *canonical)
}

/// 拆出前置称谓：返回 (称谓标准写法, 剩余部分)；剩余部分为空时不视为称谓
fn split_title(name: &str) -> (Option<&'static str>, &str) {
    let trimmed = name.trim_start();
    let (first, rest) = match trimmed.find(char::is_whitespace) {
        Some(idx) => (&trimmed[..idx], trimmed[idx..].trim_start()),
        None => return (None, trimmed),
    };
    match canonical_title(first) {
        Some(title) if !rest.is_empty() => (Some(title), rest),
        _ => (None, trimmed),
    }
}

/// 姓名是否满足字符、长度与占位名规则
pub fn validate(name: &str) -> bool {
    let name = name.trim();
    let length = name.chars().count();
    if !(MIN_NAME_LENGTH..=MAX_NAME_LENGTH).contains(&length) {
        return false;
    }

    let (_, body) = split_title(name);
    if body.is_empty() {
        return false;
    }

    if !body.chars().all(|c| c.is_alphabetic() || c == ' ' || c == '-' || c == '\'') {
        return false;
    }

    let first = body.chars().next();
    let last = body.chars().last();
    if !matches!((first, last), (Some(f), Some(l)) if f.is_alphabetic() && l.is_alphabetic()) {
        return false;
    }

    if separator_run_re().is_match(body) {
        return false;
    }

    let lower = name.to_lowercase();
    !DENYLIST.contains(&lower.as_str())
}

/// 大小写映射只接受一对一的结果（"ß" -> "SS" 之类保持原字符），保证字符数不变且幂等
fn single_char(mut mapped: impl Iterator<Item = char>, original: char) -> char {
    match (mapped.next(), mapped.next()) {
        (Some(c), None) => c,
        _ => original,
    }
}

/// 首字母大写、其余小写
fn capitalize(segment: &str) -> String {
    let mut chars = segment.chars();
    match chars.next() {
        Some(first) => std::iter::once(single_char(first.to_uppercase(), first))
            .chain(chars.map(|c| single_char(c.to_lowercase(), c)))
            .collect(),
        None => String::new(),
    }
}

/// 连字符、撇号分段各自首字母大写："o'connor" -> "O'Connor"，"jean-luc" -> "Jean-Luc"
fn capitalize_word(word: &str) -> String {
    let mut out = String::with_capacity(word.len());
    let mut segment = String::new();
    for c in word.chars() {
        if c == '-' || c == '\'' {
            out.push_str(&capitalize(&segment));
            out.push(c);
            segment.clear();
        } else {
            segment.push(c);
        }
    }
    out.push_str(&capitalize(&segment));
    out
}

/// 规范化姓名（幂等）
pub fn normalize(name: &str) -> String {
    let collapsed = whitespace_re().replace_all(name.trim(), " ");
    collapsed
        .split(' ')
        .enumerate()
        .map(|(i, word)| match canonical_title(word) {
            Some(title) if i == 0 => title.to_string(),
            _ => capitalize_word(word),
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// 首个词若为不支持的称谓，返回该称谓（小写、去句点）
pub fn unsupported_title(name: &str) -> Option<&'static str> {
    let first = name.split_whitespace().next()?;
    let bare = first.strip_suffix('.').unwrap_or(first).to_lowercase();
    UNSUPPORTED_TITLES.iter().find(|t| **t == bare).copied()
}
