//! Matching of client language preferences against a model's languages.

/// Selects the model language that best fits a client's preferences.
///
/// Built once per model from its language list and default language.
#[derive(Debug, Clone, Default)]
pub struct LangMatcher {
    codes: Vec<String>,
    default_code: String,
}

impl LangMatcher {
    pub fn new(codes: Vec<String>, default_code: impl Into<String>) -> Self {
        Self {
            codes,
            default_code: default_code.into(),
        }
    }

    /// Model language codes in model order.
    pub fn codes(&self) -> &[String] {
        &self.codes
    }

    pub fn default_code(&self) -> &str {
        &self.default_code
    }

    /// Return the best model language code for the preferred languages.
    ///
    /// Each preference is tried in order, first as an exact tag then by its
    /// primary subtag (`fr-CA` matches `fr`). Without a match the model
    /// default language is used, then the first model language, then an
    /// empty string.
    pub fn best_match<S: AsRef<str>>(&self, preferred: &[S]) -> String {
        for pref in preferred {
            let pref = normalize_tag(pref.as_ref());
            if pref.is_empty() {
                continue;
            }
            if let Some(code) = self.codes.iter().find(|c| normalize_tag(c) == pref) {
                return code.clone();
            }
            let primary = primary_subtag(&pref);
            if let Some(code) = self
                .codes
                .iter()
                .find(|c| primary_subtag(&normalize_tag(c)) == primary)
            {
                return code.clone();
            }
        }

        if !self.default_code.is_empty() {
            return self.default_code.clone();
        }
        self.codes.first().cloned().unwrap_or_default()
    }
}

/// Split an `Accept-Language` header into tags ordered by quality.
///
/// Entries with equal quality keep their header order; `q=0` entries and
/// the `*` wildcard are dropped.
pub fn parse_accept_language(header: &str) -> Vec<String> {
    let mut entries: Vec<(String, f32)> = header
        .split(',')
        .filter_map(|part| {
            let mut pieces = part.split(';');
            let tag = pieces.next()?.trim();
            if tag.is_empty() || tag == "*" {
                return None;
            }
            let quality = pieces
                .filter_map(|p| p.trim().strip_prefix("q="))
                .find_map(|q| q.trim().parse::<f32>().ok())
                .unwrap_or(1.0);
            (quality > 0.0).then(|| (tag.to_string(), quality))
        })
        .collect();

    // stable sort keeps header order among equal weights
    entries.sort_by(|a, b| b.1.total_cmp(&a.1));
    entries.into_iter().map(|(tag, _)| tag).collect()
}

fn normalize_tag(tag: &str) -> String {
    tag.trim().replace('_', "-").to_ascii_lowercase()
}

fn primary_subtag(tag: &str) -> &str {
    tag.split('-').next().unwrap_or(tag)
}
