//! Configuration.
//!
//! Pattern tables, stop words, correction patterns and thresholds are all
//! plain data here; components receive an immutable config at construction
//! instead of reaching into module-level state, so several independently
//! configured extractors or pipelines can coexist in one process.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::knowledge::DEFAULT_MODEL;

/// Default acceptance threshold for token correction.
const DEFAULT_ACCEPTANCE_THRESHOLD: f32 = 0.8;
/// Default number of candidates consulted per corrected token.
const DEFAULT_CANDIDATES: usize = 3;
/// Default result count for fuzzy search.
const DEFAULT_FUZZY_K: usize = 10;
/// Default maximum term length in characters.
const DEFAULT_MAX_TERM_CHARS: usize = 15;

/// One category of the extraction pattern library.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CategoryPatterns {
    pub name: String,
    pub patterns: Vec<String>,
}

impl CategoryPatterns {
    pub fn new(name: &str, patterns: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            patterns: patterns.iter().map(|p| p.to_string()).collect(),
        }
    }
}

/// Configuration for [`crate::extractor::TermExtractor`].
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ExtractorConfig {
    /// Categorized pattern library, applied in order.
    #[serde(default = "default_categories")]
    pub categories: Vec<CategoryPatterns>,

    /// Generic words that never count as domain terms.
    #[serde(default = "default_stop_words")]
    pub stop_words: Vec<String>,

    /// Maximum accepted term length in characters.
    #[serde(default = "default_max_term_chars")]
    pub max_term_chars: usize,
}

impl Default for ExtractorConfig {
    fn default() -> Self {
        Self {
            categories: default_categories(),
            stop_words: default_stop_words(),
            max_term_chars: DEFAULT_MAX_TERM_CHARS,
        }
    }
}

/// Configuration for the term index and embedding model.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct IndexConfig {
    /// Embedding model name (see `FastembedProvider` for supported names).
    #[serde(default = "default_model")]
    pub model: String,

    /// Directory for downloaded model files.
    #[serde(default = "default_cache_dir")]
    pub cache_dir: PathBuf,

    /// Result count for fuzzy search.
    #[serde(default = "default_fuzzy_k")]
    pub fuzzy_k: usize,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            model: default_model(),
            cache_dir: default_cache_dir(),
            fuzzy_k: DEFAULT_FUZZY_K,
        }
    }
}

/// A literal mis-recognition pattern, substituted before token correction.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CorrectionPattern {
    pub pattern: String,
    pub replacement: String,
}

/// Configuration for [`crate::correction::CorrectionPipeline`].
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CorrectionConfig {
    /// A token is replaced only when the top fused score is strictly greater
    /// than this threshold.
    #[serde(default = "default_acceptance_threshold")]
    pub acceptance_threshold: f32,

    /// Candidates consulted per token.
    #[serde(default = "default_candidates")]
    pub candidates: usize,

    /// Known mis-recognition substitutions applied before index lookups.
    #[serde(default = "default_correction_patterns")]
    pub patterns: Vec<CorrectionPattern>,
}

impl Default for CorrectionConfig {
    fn default() -> Self {
        Self {
            acceptance_threshold: DEFAULT_ACCEPTANCE_THRESHOLD,
            candidates: DEFAULT_CANDIDATES,
            patterns: default_correction_patterns(),
        }
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub extractor: ExtractorConfig,
    #[serde(default)]
    pub index: IndexConfig,
    #[serde(default)]
    pub correction: CorrectionConfig,
}

impl Config {
    /// Load configuration from a YAML file, creating it with defaults first
    /// if it does not exist.
    pub fn load(path: &Path) -> Self {
        if !path.exists() {
            let default = Self::default();
            let serialized = serde_yml::to_string(&default).expect("default config serializes");
            if let Err(e) = std::fs::write(path, serialized) {
                log::warn!("could not write default config to {}: {e}", path.display());
            }
            return default;
        }

        let config_str = std::fs::read_to_string(path).expect("config file is readable");
        let config: Self = serde_yml::from_str(&config_str).expect("config is malformed");
        config.validate();
        config
    }

    fn validate(&self) {
        if !(0.0..=1.0).contains(&self.correction.acceptance_threshold)
            || self.correction.acceptance_threshold == 0.0
        {
            panic!(
                "correction.acceptance_threshold must be in (0.0, 1.0], got {}",
                self.correction.acceptance_threshold
            );
        }
        if self.correction.candidates == 0 {
            panic!("correction.candidates must be greater than 0");
        }
        if self.index.fuzzy_k == 0 {
            panic!("index.fuzzy_k must be greater than 0");
        }
        if self.extractor.max_term_chars < 2 {
            panic!(
                "extractor.max_term_chars must be at least 2, got {}",
                self.extractor.max_term_chars
            );
        }
    }
}

fn default_model() -> String {
    DEFAULT_MODEL.to_string()
}

fn default_cache_dir() -> PathBuf {
    PathBuf::from(".termbase")
}

fn default_fuzzy_k() -> usize {
    DEFAULT_FUZZY_K
}

fn default_acceptance_threshold() -> f32 {
    DEFAULT_ACCEPTANCE_THRESHOLD
}

fn default_candidates() -> usize {
    DEFAULT_CANDIDATES
}

fn default_max_term_chars() -> usize {
    DEFAULT_MAX_TERM_CHARS
}

/// Built-in pattern library for Japanese construction vocabulary.
fn default_categories() -> Vec<CategoryPatterns> {
    vec![
        CategoryPatterns::new(
            "構造",
            &[
                r"RC[造構法工事]*",
                r"PC[造構法工事]*",
                r"SRC[造構法工事]*",
                r"鉄筋[コンクリート造構法]*",
                r"鉄[骨筋][造構法]*",
                r"木[造構法]*",
                r"鋼[造構法]*",
                r"混合構造",
                r"基礎[工事構造]*",
                r"杭[工事基礎]*",
                r"直接基礎",
                r"梁[構造]*",
                r"柱[構造]*",
                r"スラブ[構造]*",
                r"壁[構造]*",
                r"床[構造]*",
                r"屋根[構造]*",
            ],
        ),
        CategoryPatterns::new(
            "工事",
            &[
                r"基礎工事",
                r"杭工事",
                r"土工事",
                r"躯体工事",
                r"型枠工事",
                r"配筋工事",
                r"コンクリート工事",
                r"鉄骨工事",
                r"防水工事",
                r"仕上工事",
                r"設備工事",
                r"電気工事",
                r"機械工事",
                r"外構工事",
                r"解体工事",
            ],
        ),
        CategoryPatterns::new(
            "材料",
            &[
                r"コンクリート[強度種類]*",
                r"鉄筋[材料種類]*",
                r"鋼[材料種類]*",
                r"木[材料種類]*",
                r"セメント[種類]*",
                r"骨材[種類]*",
                r"添加[剤材料]*",
                r"防水[材料]*",
                r"断熱[材料]*",
                r"仕上[材料]*",
            ],
        ),
        CategoryPatterns::new(
            "管理",
            &[
                r"品質管理",
                r"安全管理",
                r"工程管理",
                r"施工管理",
                r"原価管理",
                r"環境管理",
                r"労務管理",
                r"検査[方法種類]*",
                r"試験[方法種類]*",
                r"測定[方法種類]*",
                r"監理[業務]*",
            ],
        ),
        CategoryPatterns::new(
            "設計",
            &[
                r"構造設計",
                r"意匠設計",
                r"設備設計",
                r"構造計算",
                r"応力解析",
                r"耐震設計",
                r"図面[種類]*",
                r"仕様[書類]*",
                r"詳細図",
                r"施工図[面]*",
                r"竣工図[面]*",
            ],
        ),
        CategoryPatterns::new(
            "法規",
            &[
                r"建築基準法",
                r"消防法",
                r"都市計画法",
                r"確認申請",
                r"建築許可",
                r"完了検査",
                r"検査済証",
                r"建築確認",
                r"用途変更",
                r"構造計算[適合判定]*",
            ],
        ),
    ]
}

fn default_stop_words() -> Vec<String> {
    [
        "について", "により", "による", "として", "までに", "ための", "である", "であり",
        "です", "ます", "した", "する", "され", "など", "また", "さらに", "ページ", "図面",
        "参照", "以下", "以上", "記載", "場合", "時期", "方法", "状況", "条件", "工事",
        "材料", "構造", "設備", "管理", "施工", "基礎",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

/// Common speech-recognition mistakes for construction jargon.
fn default_correction_patterns() -> Vec<CorrectionPattern> {
    [
        ("アールシー", "RC"),
        ("ピーシー", "PC"),
        ("エスアールシー", "SRC"),
        ("てっきん", "鉄筋"),
        ("こんくりーと", "コンクリート"),
        ("きそ", "基礎"),
        ("せこう", "施工"),
        ("ずめん", "図面"),
        ("けんせつ", "建設"),
        ("こうじ", "工事"),
    ]
    .iter()
    .map(|(pattern, replacement)| CorrectionPattern {
        pattern: pattern.to_string(),
        replacement: replacement.to_string(),
    })
    .collect()
}
