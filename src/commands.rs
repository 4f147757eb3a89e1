//! Command resolution for inbound chat text.
//!
//! Users type free text with typos, so each category carries a list of known
//! phrasings and the resolver picks the category whose best phrasing is most
//! similar to the input. Reserved keywords are checked first and never go
//! through fuzzy matching.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Scores two strings in `[0, 1]`, 1 meaning identical.
pub type Similarity = fn(&str, &str) -> f64;

/// Default minimum score a category must exceed to count as a match.
pub const DEFAULT_THRESHOLD: f64 = 0.4;

/// A recognized user intent with its phrasings and canned reply.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandCategory {
    pub name: String,
    pub variants: Vec<String>,
    /// Reply template; `{name}` is replaced with the sender's display name.
    pub reply: String,
}

/// Exact-match keyword that bypasses the fuzzy table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Keyword {
    pub trigger: String,
    pub reply: String,
}

/// Category table plus matching parameters. Loaded from config or defaulted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandTable {
    #[serde(default = "default_threshold")]
    pub threshold: f64,
    #[serde(default = "default_keywords")]
    pub keywords: Vec<Keyword>,
    pub categories: Vec<CommandCategory>,
}

fn default_threshold() -> f64 {
    DEFAULT_THRESHOLD
}

fn default_keywords() -> Vec<Keyword> {
    vec![Keyword {
        trigger: "ping".to_string(),
        reply: "pong".to_string(),
    }]
}

impl Default for CommandTable {
    fn default() -> Self {
        fn category(name: &str, variants: &[&str], reply: &str) -> CommandCategory {
            CommandCategory {
                name: name.to_string(),
                variants: variants.iter().map(|v| v.to_string()).collect(),
                reply: reply.to_string(),
            }
        }

        Self {
            threshold: DEFAULT_THRESHOLD,
            keywords: default_keywords(),
            categories: vec![
                category(
                    "merhaba",
                    &[
                        "merhaba",
                        "merhabalar",
                        "mrb",
                        "mrhb",
                        "selam",
                        "selamlar",
                        "slm",
                        "selamün aleyküm",
                        "günaydın",
                        "iyi günler",
                        "iyi akşamlar",
                        "merhaba nasılsınız",
                    ],
                    "Merhaba {name}! 👋 Size nasıl yardımcı olabiliriz?\n\n\
                     📍 *adres* - Adres ve konum\n\
                     📅 *randevu* - Randevu almak için\n\
                     📞 *iletişim* - İletişim bilgileri\n\
                     🏠 *menü* - Ana menüye dön",
                ),
                category(
                    "adres",
                    &[
                        "adres",
                        "adresiniz",
                        "adres nedir",
                        "adresiniz nedir",
                        "neredesiniz",
                        "nerdesiniz",
                        "konum",
                        "konumunuz",
                        "yol tarifi",
                    ],
                    "📍 Adresimizi ve konumumuzu web sitemizden görebilirsiniz. \
                     Yol tarifi için bu mesaja yanıt vermeniz yeterli.",
                ),
                category(
                    "randevu",
                    &[
                        "randevu",
                        "randevu al",
                        "randevu almak istiyorum",
                        "randevular",
                        "rndv",
                        "rezervasyon",
                        "müsait misiniz",
                    ],
                    "📅 Randevu için lütfen uygun olduğunuz gün ve saati yazın {name}, \
                     en kısa sürede dönüş yapacağız.",
                ),
                category(
                    "iletisim",
                    &[
                        "iletişim",
                        "iletisim",
                        "telefon",
                        "telefon numarası",
                        "numara",
                        "iletişim bilgileri",
                        "size nasıl ulaşırım",
                    ],
                    "📞 Bize bu numaradan her zaman yazabilirsiniz. \
                     Mesai saatleri içinde arayarak da ulaşabilirsiniz.",
                ),
                category(
                    "menu",
                    &[
                        "menü", "menu", "ana menü", "anamenu", "başa dön", "geri", "yardım", "0",
                    ],
                    "🏠 Ana menü:\n\n\
                     📍 *adres* - Adres ve konum\n\
                     📅 *randevu* - Randevu almak için\n\
                     📞 *iletişim* - İletişim bilgileri",
                ),
            ],
        }
    }
}

/// Outcome of resolving one inbound text.
#[derive(Debug, Clone, PartialEq)]
pub enum CommandMatch {
    /// A reserved keyword matched literally.
    Keyword { trigger: String, reply: String },
    /// Best fuzzy match above the threshold.
    Category { name: String, score: f64 },
    /// Nothing cleared the threshold.
    None,
}

/// Lowercase and trim raw message text before resolution.
pub fn normalize_text(text: &str) -> String {
    text.trim().to_lowercase()
}

/// Resolves normalized text against a [`CommandTable`].
pub struct CommandResolver {
    table: CommandTable,
    similarity: Similarity,
}

impl CommandResolver {
    pub fn new(table: CommandTable) -> Self {
        Self::with_similarity(table, levenshtein_ratio)
    }

    pub fn with_similarity(table: CommandTable, similarity: Similarity) -> Self {
        Self { table, similarity }
    }

    pub fn table(&self) -> &CommandTable {
        &self.table
    }

    /// Resolve `text`, which must already be lowercased and trimmed.
    pub fn resolve(&self, text: &str) -> CommandMatch {
        if let Some(keyword) = self.table.keywords.iter().find(|k| k.trigger == text) {
            return CommandMatch::Keyword {
                trigger: keyword.trigger.clone(),
                reply: keyword.reply.clone(),
            };
        }

        let mut best: Option<(&str, f64)> = None;
        for category in &self.table.categories {
            let score = category
                .variants
                .iter()
                .map(|variant| (self.similarity)(text, variant))
                .fold(0.0_f64, f64::max);

            // Strictly greater keeps the first category on ties.
            if best.is_none_or(|(_, top)| score > top) {
                best = Some((&category.name, score));
            }
        }

        match best {
            Some((name, score)) if score > self.table.threshold => CommandMatch::Category {
                name: name.to_string(),
                score,
            },
            _ => CommandMatch::None,
        }
    }
}

/// Category name → reply template.
pub struct ReplyCatalog {
    replies: HashMap<String, String>,
}

impl ReplyCatalog {
    pub fn from_table(table: &CommandTable) -> Self {
        let replies = table
            .categories
            .iter()
            .map(|c| (c.name.clone(), c.reply.clone()))
            .collect();
        Self { replies }
    }

    pub fn template(&self, category: &str) -> Option<&str> {
        self.replies.get(category).map(String::as_str)
    }
}

/// Fill in `{name}`; without a name the placeholder and the space before it go away.
pub fn render(template: &str, sender_name: Option<&str>) -> String {
    match sender_name {
        Some(name) => template.replace("{name}", name),
        None => template.replace(" {name}", "").replace("{name}", ""),
    }
}

/// Returns true if the template wants a sender name.
pub fn wants_name(template: &str) -> bool {
    template.contains("{name}")
}

/// Normalized Levenshtein similarity over Unicode scalar values.
pub fn levenshtein_ratio(a: &str, b: &str) -> f64 {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    let longest = a.len().max(b.len());
    if longest == 0 {
        return 1.0;
    }
    1.0 - levenshtein(&a, &b) as f64 / longest as f64
}

fn levenshtein(a: &[char], b: &[char]) -> usize {
    let mut prev: Vec<usize> = (0..=b.len()).collect();
    let mut cur = vec![0; b.len() + 1];

    for (i, ca) in a.iter().enumerate() {
        cur[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let substitution = prev[j] + usize::from(ca != cb);
            cur[j + 1] = substitution.min(prev[j + 1] + 1).min(cur[j] + 1);
        }
        std::mem::swap(&mut prev, &mut cur);
    }

    prev[b.len()]
}
