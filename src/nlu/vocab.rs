//! 语言词表与回复分类
//!
//! 词表（Vocabulary）来自 locale 配置中已解析的映射；缺省或不可用时使用内置英文词表。
//! 所有匹配都基于分词后的词序列，不把词表拼接成正则，词表中的任何符号都只按字面比较。

use serde::Deserialize;

/// 分词后的单个词：`word` 保留原始大小写（去掉两端标点与句末句点），`lower` 为小写形式
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub word: String,
    pub lower: String,
}

/// 按空白切分并去掉两端标点；弯引号统一为 `'`
pub fn tokenize(text: &str) -> Vec<Token> {
    text.split_whitespace()
        .filter_map(|raw| {
            let unified: String = raw
                .chars()
                .map(|c| if c == '\u{2019}' || c == '\u{2018}' { '\'' } else { c })
                .collect();
            let word = unified
                .trim_matches(|c: char| !(c.is_alphanumeric() || c == '\'' || c == '-' || c == '.'))
                .trim_matches('\'')
                .trim_end_matches('.')
                .to_string();
            if word.is_empty() {
                None
            } else {
                let lower = word.to_lowercase();
                Some(Token { word, lower })
            }
        })
        .collect()
}

/// 一组短语（每个短语是一串小写词），支持在词序列中查找
#[derive(Debug, Clone, Default)]
pub struct PhraseSet {
    phrases: Vec<Vec<String>>,
}

impl PhraseSet {
    pub fn new<S: AsRef<str>>(phrases: &[S]) -> Self {
        let mut phrases: Vec<Vec<String>> = phrases
            .iter()
            .map(|p| tokenize(p.as_ref()).into_iter().map(|t| t.lower).collect::<Vec<_>>())
            .filter(|p: &Vec<String>| !p.is_empty())
            .collect();
        // 同一起点优先匹配更长的短语
        phrases.sort_by(|a, b| b.len().cmp(&a.len()));
        Self { phrases }
    }

    pub fn is_empty(&self) -> bool {
        self.phrases.is_empty()
    }

    /// 在 `tokens[at..]` 开头匹配，返回匹配的词数
    pub fn match_at(&self, tokens: &[Token], at: usize) -> Option<usize> {
        self.phrases
            .iter()
            .find(|p| {
                at + p.len() <= tokens.len()
                    && p.iter().zip(&tokens[at..]).all(|(w, t)| *w == t.lower)
            })
            .map(|p| p.len())
    }

    /// 最早出现的位置与长度
    pub fn find(&self, tokens: &[Token]) -> Option<(usize, usize)> {
        (0..tokens.len()).find_map(|i| self.match_at(tokens, i).map(|len| (i, len)))
    }

    pub fn contains_word(&self, lower: &str) -> bool {
        self.phrases.iter().any(|p| p.len() == 1 && p[0] == lower)
    }
}

/// 已解析的 locale 词表；缺失的字段回退到英文默认值
#[derive(Debug, Clone, Deserialize)]
pub struct Vocabulary {
    #[serde(default = "english::enroll_actions")]
    pub enroll_actions: Vec<String>,
    #[serde(default = "english::possessives")]
    pub possessives: Vec<String>,
    #[serde(default = "english::voice_terms")]
    pub voice_terms: Vec<String>,
    /// 直接引出姓名的介词/短语（as、for、my name is ...）
    #[serde(default = "english::name_intros")]
    pub name_intros: Vec<String>,
    /// 句首可剥离的开场短语
    #[serde(default = "english::phrase_starters")]
    pub phrase_starters: Vec<String>,
    /// 第三人称场景下引出姓名的词（named、called ...）
    #[serde(default = "english::third_person_intros")]
    pub third_person_intros: Vec<String>,
    #[serde(default = "english::relationships")]
    pub relationships: Vec<String>,
    /// 姓名之后不应被收进姓名的尾词
    #[serde(default = "english::trailing_fillers")]
    pub trailing_fillers: Vec<String>,
    #[serde(default = "english::affirm")]
    pub affirm: Vec<String>,
    #[serde(default = "english::deny")]
    pub deny: Vec<String>,
    #[serde(default = "english::cancel")]
    pub cancel: Vec<String>,
    #[serde(default = "english::restart")]
    pub restart: Vec<String>,
    /// 紧跟重来短语引出新姓名的词（"change my name to NAME"）
    #[serde(default = "english::rename_intros")]
    pub rename_intros: Vec<String>,
    #[serde(default = "english::stop")]
    pub stop: Vec<String>,
    #[serde(default = "english::pause")]
    pub pause: Vec<String>,
    #[serde(default = "english::resume")]
    pub resume: Vec<String>,
    #[serde(default = "english::list_terms")]
    pub list_terms: Vec<String>,
    #[serde(default = "english::remember_me")]
    pub remember_me: Vec<String>,
}

impl Default for Vocabulary {
    fn default() -> Self {
        Self::english()
    }
}

impl Vocabulary {
    /// 内置英文词表
    pub fn english() -> Self {
        Self {
            enroll_actions: english::enroll_actions(),
            possessives: english::possessives(),
            voice_terms: english::voice_terms(),
            name_intros: english::name_intros(),
            phrase_starters: english::phrase_starters(),
            third_person_intros: english::third_person_intros(),
            relationships: english::relationships(),
            trailing_fillers: english::trailing_fillers(),
            affirm: english::affirm(),
            deny: english::deny(),
            cancel: english::cancel(),
            restart: english::restart(),
            rename_intros: english::rename_intros(),
            stop: english::stop(),
            pause: english::pause(),
            resume: english::resume(),
            list_terms: english::list_terms(),
            remember_me: english::remember_me(),
        }
    }

    /// 返回第一个为空（或只含标点）的词表名
    pub fn first_empty_list(&self) -> Option<&'static str> {
        let lists: [(&'static str, &Vec<String>); 10] = [
            ("enroll_actions", &self.enroll_actions),
            ("possessives", &self.possessives),
            ("voice_terms", &self.voice_terms),
            ("name_intros", &self.name_intros),
            ("relationships", &self.relationships),
            ("affirm", &self.affirm),
            ("deny", &self.deny),
            ("cancel", &self.cancel),
            ("restart", &self.restart),
            ("stop", &self.stop),
        ];
        lists
            .into_iter()
            .find(|(_, list)| PhraseSet::new(list).is_empty())
            .map(|(name, _)| name)
    }
}

/// 用户回复的分类结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reply {
    Affirm,
    Deny,
    Cancel,
    Restart,
    Stop,
    Pause,
    Resume,
    Other,
}

/// 把一句话归类为确认 / 否定 / 取消 / 重来 / 停止 / 暂停 / 继续
#[derive(Debug, Clone)]
pub struct ReplyClassifier {
    affirm: PhraseSet,
    deny: PhraseSet,
    cancel: PhraseSet,
    restart: PhraseSet,
    stop: PhraseSet,
    pause: PhraseSet,
    resume: PhraseSet,
    enroll_actions: PhraseSet,
    voice_terms: PhraseSet,
    relationships: PhraseSet,
    remember_me: PhraseSet,
    list_terms: PhraseSet,
}

impl ReplyClassifier {
    pub fn new(vocab: &Vocabulary) -> Self {
        Self {
            affirm: PhraseSet::new(&vocab.affirm),
            deny: PhraseSet::new(&vocab.deny),
            cancel: PhraseSet::new(&vocab.cancel),
            restart: PhraseSet::new(&vocab.restart),
            stop: PhraseSet::new(&vocab.stop),
            pause: PhraseSet::new(&vocab.pause),
            resume: PhraseSet::new(&vocab.resume),
            enroll_actions: PhraseSet::new(&vocab.enroll_actions),
            voice_terms: PhraseSet::new(&vocab.voice_terms),
            relationships: PhraseSet::new(&vocab.relationships),
            remember_me: PhraseSet::new(&vocab.remember_me),
            list_terms: PhraseSet::new(&vocab.list_terms),
        }
    }

    /// 取消与重来优先于其他分类；确认/否定同时出现时取先出现者
    pub fn classify(&self, utterance: &str) -> Reply {
        let tokens = tokenize(utterance);
        if tokens.is_empty() {
            return Reply::Other;
        }
        if self.cancel.find(&tokens).is_some() {
            return Reply::Cancel;
        }
        if self.restart.find(&tokens).is_some() {
            return Reply::Restart;
        }
        if self.pause.find(&tokens).is_some() {
            return Reply::Pause;
        }
        if self.stop.find(&tokens).is_some() {
            return Reply::Stop;
        }
        if self.resume.find(&tokens).is_some() {
            return Reply::Resume;
        }
        match (self.affirm.find(&tokens), self.deny.find(&tokens)) {
            (Some((a, _)), Some((d, _))) => {
                if a < d {
                    Reply::Affirm
                } else {
                    Reply::Deny
                }
            }
            (Some(_), None) => Reply::Affirm,
            (None, Some(_)) => Reply::Deny,
            (None, None) => Reply::Other,
        }
    }

    /// 是否为注册请求："enroll my voice"、"save my voice"、"remember me"、"enroll my son" 等
    pub fn is_enrollment_request(&self, utterance: &str) -> bool {
        let tokens = tokenize(utterance);
        if self.remember_me.find(&tokens).is_some() {
            return true;
        }
        let names_someone = tokens.iter().any(|t| {
            let stem = t.lower.strip_suffix("'s").unwrap_or(&t.lower);
            t.lower == "me" || self.relationships.contains_word(stem)
        });
        self.enroll_actions.find(&tokens).is_some()
            && (self.voice_terms.find(&tokens).is_some() || names_someone)
    }

    /// 是否为查询已注册用户的请求："list enrolled voices"、"who is enrolled"
    pub fn is_list_request(&self, utterance: &str) -> bool {
        let tokens = tokenize(utterance);
        self.list_terms.find(&tokens).is_some()
            && (self.voice_terms.find(&tokens).is_some()
                || tokens.iter().any(|t| t.lower == "enrolled" || t.lower == "users"))
    }
}

mod english {
    fn list(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    pub fn enroll_actions() -> Vec<String> {
        list(&["enroll", "register", "save", "remember", "record", "add", "train", "learn", "set up", "create"])
    }

    pub fn possessives() -> Vec<String> {
        list(&["my", "our"])
    }

    pub fn voice_terms() -> Vec<String> {
        list(&["voice", "voices", "voiceprint", "voice print", "voice profile", "speaker profile"])
    }

    pub fn name_intros() -> Vec<String> {
        list(&["as", "for", "my name is", "i'm", "i am", "call me", "name is"])
    }

    pub fn phrase_starters() -> Vec<String> {
        list(&[
            "my name is",
            "my name's",
            "the name is",
            "name is",
            "call me",
            "it's",
            "it is",
            "i'm",
            "i am",
            "this is",
            "you can call me",
        ])
    }

    pub fn third_person_intros() -> Vec<String> {
        list(&["named", "called", "whose name is", "by the name of"])
    }

    pub fn relationships() -> Vec<String> {
        list(&[
            "son", "daughter", "wife", "husband", "mom", "mother", "mum", "dad", "father", "brother",
            "sister", "friend", "partner", "grandma", "grandmother", "grandpa", "grandfather", "child",
            "kid", "boyfriend", "girlfriend", "roommate", "colleague", "aunt", "uncle", "cousin",
            "niece", "nephew", "guest",
        ])
    }

    pub fn trailing_fillers() -> Vec<String> {
        list(&["please", "now", "thanks", "thank you", "today", "okay", "ok"])
    }

    pub fn affirm() -> Vec<String> {
        list(&[
            "yes", "yeah", "yep", "yup", "sure", "ok", "okay", "go ahead", "please do", "do it",
            "continue", "proceed", "correct", "affirmative", "of course", "let's go",
        ])
    }

    pub fn deny() -> Vec<String> {
        list(&["no", "nope", "nah", "not now", "don't", "do not", "negative", "later", "skip it"])
    }

    pub fn cancel() -> Vec<String> {
        list(&[
            "cancel",
            "abort",
            "quit",
            "stop enrollment",
            "stop the enrollment",
            "stop everything",
            "never mind",
            "nevermind",
            "forget it",
        ])
    }

    pub fn restart() -> Vec<String> {
        list(&[
            "start over",
            "restart",
            "start again",
            "begin again",
            "change my name",
            "change the name",
            "change name",
            "wrong name",
        ])
    }

    pub fn rename_intros() -> Vec<String> {
        list(&["to"])
    }

    pub fn stop() -> Vec<String> {
        list(&["stop", "stop recording", "done", "finished", "i'm done"])
    }

    pub fn pause() -> Vec<String> {
        list(&["pause", "hold on", "wait a minute", "take a break"])
    }

    pub fn resume() -> Vec<String> {
        list(&["resume", "unpause", "i'm back", "carry on"])
    }

    pub fn list_terms() -> Vec<String> {
        list(&["list", "show", "who", "which", "how many"])
    }

    pub fn remember_me() -> Vec<String> {
        list(&["remember me", "learn my voice", "know my voice"])
    }
}
