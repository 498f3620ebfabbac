use once_cell::sync::Lazy;
use regex::Regex;

/// Applicant categories recognized in free-text eligibility language.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Audience {
    LocalEducationAgency,
    Nonprofit,
    Individual,
}

impl Audience {
    pub fn label(self) -> &'static str {
        match self {
            Self::LocalEducationAgency => "school districts / local education agencies",
            Self::Nonprofit => "nonprofit organizations",
            Self::Individual => "individuals",
        }
    }
}

static AUDIENCE_PATTERNS: Lazy<Vec<(Audience, Regex)>> = Lazy::new(|| {
    [
        (
            Audience::LocalEducationAgency,
            r"(?i)\b(local education(al)? agenc(y|ies)|LEAs?|school districts?|K-?12|public schools?|state education(al)? agenc(y|ies))\b",
        ),
        (Audience::Nonprofit, r"(?i)(\bnon-?profits?\b|\bnot-for-profits?\b|\b501\s*\(c\)\s*\(3\))"),
        (Audience::Individual, r"(?i)\bindividuals?\b"),
    ]
    .into_iter()
    .map(|(audience, pattern)| (audience, Regex::new(pattern).expect("valid regex")))
    .collect()
});

static EXCLUSION_PATTERNS: Lazy<Vec<(Audience, Regex)>> = Lazy::new(|| {
    [
        (
            Audience::LocalEducationAgency,
            r"(?i)\b(school districts?|LEAs?|local education(al)? agenc(y|ies))\s+(are|is|will)\s+not\s+(be\s+)?eligible\b",
        ),
        (
            Audience::Nonprofit,
            r"(?i)\bnon-?profits?( organizations?)?\s+(are|is|will)\s+not\s+(be\s+)?eligible\b",
        ),
        (
            Audience::Individual,
            r"(?i)\bindividuals?\s+(are|is|will)\s+not\s+(be\s+)?eligible\b",
        ),
    ]
    .into_iter()
    .map(|(audience, pattern)| (audience, Regex::new(pattern).expect("valid regex")))
    .collect()
});

static UNRESTRICTED_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(unrestricted|all (types of )?applicants|open to all|any (type of )?(entity|organization))\b")
        .expect("valid regex")
});

#[derive(Debug, Clone, Default, PartialEq)]
pub struct EligibilitySignals {
    pub named: Vec<Audience>,
    pub excluded: Vec<Audience>,
    pub unrestricted: bool,
}

impl EligibilitySignals {
    pub fn names(&self, audience: Audience) -> bool {
        self.named.contains(&audience)
    }

    pub fn excludes(&self, audience: Audience) -> bool {
        self.excluded.contains(&audience)
    }

    pub fn is_silent(&self) -> bool {
        self.named.is_empty() && self.excluded.is_empty() && !self.unrestricted
    }
}

/// Exclusion phrases also mention the audience, so an excluded audience is
/// never counted as named.
pub fn extract_signals(text: &str) -> EligibilitySignals {
    let excluded: Vec<Audience> = EXCLUSION_PATTERNS
        .iter()
        .filter(|(_, regex)| regex.is_match(text))
        .map(|(audience, _)| *audience)
        .collect();

    let named = AUDIENCE_PATTERNS
        .iter()
        .filter(|(audience, regex)| !excluded.contains(audience) && regex.is_match(text))
        .map(|(audience, _)| *audience)
        .collect();

    let unrestricted = UNRESTRICTED_PATTERN.is_match(text);

    EligibilitySignals {
        named,
        excluded,
        unrestricted,
    }
}
