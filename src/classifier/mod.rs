//! Keyword-based domain classification for incoming requests.
//!
//! Every domain owns a fixed list of literal keywords. A request scores one
//! point per keyword that occurs anywhere in its lower-cased text (plain
//! substring match, no word boundaries). The highest score wins; on a tie
//! the domain declared first in [`Domain::ALL`] wins. A request that matches
//! nothing falls back to the classifier's default domain.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Application domains the generator has dedicated templates for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Domain {
    Ecommerce,
    Saas,
    Dashboard,
    Landing,
}

impl Domain {
    /// Declaration order. This is also the tie-break order.
    pub const ALL: [Domain; 4] = [
        Domain::Ecommerce,
        Domain::Saas,
        Domain::Dashboard,
        Domain::Landing,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ecommerce => "ecommerce",
            Self::Saas => "saas",
            Self::Dashboard => "dashboard",
            Self::Landing => "landing",
        }
    }

    pub fn keywords(&self) -> &'static [&'static str] {
        match self {
            Self::Ecommerce => &[
                "shop",
                "store",
                "cart",
                "product",
                "checkout",
                "ecommerce",
                "e-commerce",
                "buy",
                "sell",
                "payment",
                "order",
                "inventory",
            ],
            Self::Saas => &[
                "saas",
                "subscription",
                "tenant",
                "billing",
                "plan",
                "pricing",
                "signup",
                "onboarding",
                "workspace",
                "team",
            ],
            Self::Dashboard => &[
                "dashboard",
                "analytics",
                "chart",
                "metric",
                "report",
                "kpi",
                "admin",
                "monitor",
                "graph",
                "statistics",
            ],
            Self::Landing => &[
                "landing",
                "homepage",
                "portfolio",
                "marketing",
                "hero",
                "waitlist",
                "launch",
                "showcase",
                "agency",
                "personal",
            ],
        }
    }
}

impl fmt::Display for Domain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Domain {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "ecommerce" => Ok(Self::Ecommerce),
            "saas" => Ok(Self::Saas),
            "dashboard" => Ok(Self::Dashboard),
            "landing" => Ok(Self::Landing),
            other => Err(format!(
                "Invalid domain '{}'. Valid values: ecommerce, saas, dashboard, landing",
                other
            )),
        }
    }
}

/// Classifies free-form requests into a [`Domain`].
#[derive(Debug, Clone, Copy)]
pub struct DomainClassifier {
    default_domain: Domain,
}

impl Default for DomainClassifier {
    fn default() -> Self {
        Self::new(Domain::Landing)
    }
}

impl DomainClassifier {
    pub fn new(default_domain: Domain) -> Self {
        Self { default_domain }
    }

    pub fn default_domain(&self) -> Domain {
        self.default_domain
    }

    /// Raw keyword hit counts per domain, in declaration order.
    pub fn scores(&self, text: &str) -> Vec<(Domain, usize)> {
        let lowered = text.to_lowercase();
        Domain::ALL
            .iter()
            .map(|domain| {
                let hits = domain
                    .keywords()
                    .iter()
                    .filter(|kw| lowered.contains(*kw))
                    .count();
                (*domain, hits)
            })
            .collect()
    }

    /// Pick the best-scoring domain for `text`.
    pub fn detect(&self, text: &str) -> Domain {
        let mut best: Option<(Domain, usize)> = None;
        for (domain, hits) in self.scores(text) {
            // Strictly greater keeps the earliest domain on ties.
            if hits > 0 && best.is_none_or(|(_, top)| hits > top) {
                best = Some((domain, hits));
            }
        }
        best.map(|(domain, _)| domain).unwrap_or(self.default_domain)
    }
}
