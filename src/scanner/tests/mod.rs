//! Cross-module tests: matcher compilation, quote tracking, projection and
//! collection working together.

mod property_tests;

use crate::scanner::{MatchCollector, MatcherSet, NameResolver, Profile, QuoteSpanState, ScanOptions, ScanOutcome};

/// Compiled profile shared by one test
pub(super) struct Harness {
    pub profile: Profile,
    pub set: MatcherSet,
    pub resolver: NameResolver,
}

impl Harness {
    pub fn new(profile: Profile) -> Self {
        let profile = profile.normalized();
        Self {
            set: MatcherSet::compile(&profile),
            resolver: NameResolver::from_profile(&profile),
            profile,
        }
    }

    pub fn collector(&self) -> MatchCollector<'_> {
        MatchCollector::new(&self.set, &self.profile, &self.resolver)
    }

    /// One full pass with fresh quote state
    pub fn scan(&self, text: &str, options: &ScanOptions) -> ScanOutcome {
        let mut quotes = QuoteSpanState::new();
        quotes.scan(text, true);
        self.collector().collect(text, &quotes, None, options)
    }
}
