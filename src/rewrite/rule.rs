/*   Copyright 2025 The canary-split Authors
 *
 *  Licensed under the Apache License, Version 2.0 (the "License");
 *  you may not use this file except in compliance with the License.
 *  You may obtain a copy of the License at
 *
 *      http://www.apache.org/licenses/LICENSE-2.0
 *
 *  Unless required by applicable law or agreed to in writing, software
 *  distributed under the License is distributed on an "AS IS" BASIS,
 *  WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 *  See the License for the specific language governing permissions and
 *  limitations under the License.
 *
 *  SPDX-License-Identifier: Apache-2.0
 *
 *  Rewrite rules: a validated (match kind, algorithm, fraction, suffix,
 *  replacement) tuple and the evaluation that applies it to one query.
 */

use super::selector;
use super::selector::{Algorithm, EntropySource};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchKind {
    Suffix,
}

impl MatchKind {
    pub fn from_config_name(name: &str) -> Option<Self> {
        match name {
            "suffix" => Some(MatchKind::Suffix),
            _ => None,
        }
    }

    pub fn config_name(&self) -> &'static str {
        match self {
            MatchKind::Suffix => "suffix",
        }
    }
}

#[derive(Debug, PartialEq)]
pub enum Error {
    WrongFieldCount(usize),
    UnknownMatchKind(String),
    UnknownAlgorithm(String),
    FractionNotNumeric(String),
    FractionOutOfRange(f64),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::WrongFieldCount(n) => {
                write!(f, "Expected 5 fields in canary rewrite directive, got {}", n)
            }
            Error::UnknownMatchKind(kind) => write!(f, "Unknown match kind {}", kind),
            Error::UnknownAlgorithm(algorithm) => write!(f, "Unknown algorithm {}", algorithm),
            Error::FractionNotNumeric(text) => {
                write!(f, "Expected floating point fraction but got {}", text)
            }
            Error::FractionOutOfRange(fraction) => {
                write!(f, "Fraction {} is outside 0.0..=1.0", fraction)
            }
        }
    }
}

impl std::error::Error for Error {}

/// One configured rewrite.  Immutable after construction, so it can be shared
/// between handler tasks without locking.
#[derive(Debug, Clone)]
pub struct RewriteRule {
    kind: MatchKind,
    pattern: String,
    replacement: String,
    fraction: f64,
    algorithm: Algorithm,
}

impl RewriteRule {
    /// Validate the five directive fields and build the rule.  All validation
    /// happens here; a constructed rule never fails at evaluation time.
    pub fn construct(
        kind: &str,
        algorithm: &str,
        fraction: &str,
        pattern: &str,
        replacement: &str,
    ) -> Result<Self, Error> {
        let kind =
            MatchKind::from_config_name(kind).ok_or_else(|| Error::UnknownMatchKind(kind.into()))?;
        let algorithm = Algorithm::from_config_name(algorithm)
            .ok_or_else(|| Error::UnknownAlgorithm(algorithm.into()))?;
        let fraction: f64 = fraction
            .parse()
            .map_err(|_| Error::FractionNotNumeric(fraction.into()))?;
        if !(0.0..=1.0).contains(&fraction) {
            return Err(Error::FractionOutOfRange(fraction));
        }
        Ok(RewriteRule {
            kind,
            pattern: pattern.into(),
            replacement: replacement.into(),
            fraction,
            algorithm,
        })
    }

    /// Parse a whitespace-separated directive of the form
    /// `<match-kind> <algorithm> <fraction> <match-suffix> <replacement-suffix>`.
    pub fn from_directive(directive: &str) -> Result<Self, Error> {
        let fields: Vec<&str> = directive.split_whitespace().collect();
        match fields[..] {
            [kind, algorithm, fraction, pattern, replacement] => {
                RewriteRule::construct(kind, algorithm, fraction, pattern, replacement)
            }
            _ => Err(Error::WrongFieldCount(fields.len())),
        }
    }

    pub fn algorithm(&self) -> Algorithm {
        self.algorithm
    }

    pub fn fraction(&self) -> f64 {
        self.fraction
    }

    /// Apply the rule to one query.  Returns the rewritten name when the name
    /// matches the pattern and the client falls inside the configured
    /// fraction; `None` means the caller keeps the original name.  The
    /// selector is only consulted after the name matches, so non-matching
    /// queries consume no entropy.
    pub fn evaluate(
        &self,
        client_key: &str,
        query_name: &str,
        entropy: &dyn EntropySource,
    ) -> Option<String> {
        match self.kind {
            MatchKind::Suffix => self.evaluate_suffix(client_key, query_name, entropy),
        }
    }

    fn evaluate_suffix(
        &self,
        client_key: &str,
        query_name: &str,
        entropy: &dyn EntropySource,
    ) -> Option<String> {
        let prefix = query_name.strip_suffix(&self.pattern)?;
        if !selector::should_select(client_key, self.fraction, self.algorithm, entropy) {
            return None;
        }
        let mut rewritten = String::with_capacity(prefix.len() + self.replacement.len());
        rewritten.push_str(prefix);
        rewritten.push_str(&self.replacement);
        Some(rewritten)
    }
}

#[cfg(test)]
use super::selector::FixedEntropy;

/* Entropy that fails the test if consumed.  Used to prove evaluation paths
 * that must not draw.
 */
#[cfg(test)]
struct PanicEntropy;

#[cfg(test)]
impl EntropySource for PanicEntropy {
    fn draw(&self) -> f64 {
        panic!("entropy consumed on a path that must not sample");
    }
}

#[test]
fn construct_accepts_valid_fields() {
    let rule =
        RewriteRule::construct("suffix", "consistent_hashing", "0.5", "fabric.dog", "fabric.dog-canary")
            .expect("valid rule");
    assert_eq!(rule.algorithm(), Algorithm::StableHash);
    assert_eq!(rule.fraction(), 0.5);
}

#[test]
fn construct_rejects_unknown_match_kind() {
    let err = RewriteRule::construct("prefix", "random", "0.5", "fabric.dog", "fabric.dog-canary")
        .unwrap_err();
    assert_eq!(err, Error::UnknownMatchKind("prefix".into()));
    assert_eq!(err.to_string(), "Unknown match kind prefix");
}

#[test]
fn construct_rejects_unknown_algorithm() {
    let err = RewriteRule::construct("suffix", "weighted", "0.5", "fabric.dog", "fabric.dog-canary")
        .unwrap_err();
    assert_eq!(err, Error::UnknownAlgorithm("weighted".into()));
    assert_eq!(err.to_string(), "Unknown algorithm weighted");
}

#[test]
fn construct_rejects_non_numeric_fraction() {
    let err = RewriteRule::construct("suffix", "random", "half", "fabric.dog", "fabric.dog-canary")
        .unwrap_err();
    assert_eq!(err, Error::FractionNotNumeric("half".into()));
    assert_eq!(err.to_string(), "Expected floating point fraction but got half");
}

#[test]
fn construct_rejects_out_of_range_fraction() {
    for fraction in ["-0.1", "1.5", "2", "NaN"] {
        let err = RewriteRule::construct("suffix", "random", fraction, "fabric.dog", "fabric.dog-canary")
            .unwrap_err();
        assert!(
            matches!(err, Error::FractionOutOfRange(_)),
            "{} accepted",
            fraction
        );
    }
    let err = RewriteRule::construct("suffix", "random", "1.5", "a", "b").unwrap_err();
    assert_eq!(err.to_string(), "Fraction 1.5 is outside 0.0..=1.0");
}

#[test]
fn directive_parses_five_fields() {
    let rule = RewriteRule::from_directive("suffix consistent_hashing 0.5 fabric.dog fabric.dog-canary")
        .expect("valid directive");
    assert_eq!(rule.fraction(), 0.5);
    assert_eq!(rule.algorithm(), Algorithm::StableHash);
}

#[test]
fn directive_rejects_wrong_field_count() {
    for (directive, count) in [
        ("", 0),
        ("suffix", 1),
        ("suffix random 0.5 fabric.dog", 4),
        ("suffix random 0.5 fabric.dog fabric.dog-canary extra", 6),
    ] {
        let err = RewriteRule::from_directive(directive).unwrap_err();
        assert_eq!(err, Error::WrongFieldCount(count));
    }
    let err = RewriteRule::from_directive("suffix random").unwrap_err();
    assert_eq!(
        err.to_string(),
        "Expected 5 fields in canary rewrite directive, got 2"
    );
}

#[test]
fn non_matching_name_never_samples() {
    let rule = RewriteRule::from_directive("suffix random 1.0 fabric.dog fabric.dog-canary")
        .expect("valid directive");
    /* PanicEntropy would abort the test if the selector ran. */
    assert_eq!(rule.evaluate("10.0.0.1:53", "example.org", &PanicEntropy), None);
    assert_eq!(rule.evaluate("10.0.0.1:53", "fabric.dog.example", &PanicEntropy), None);
    /* Case-sensitive: a differently-cased suffix does not match. */
    assert_eq!(rule.evaluate("10.0.0.1:53", "db.Fabric.Dog", &PanicEntropy), None);
}

#[test]
fn rewrite_preserves_prefix() {
    let rule = RewriteRule::from_directive("suffix random 1.0 fabric.dog fabric.dog-canary")
        .expect("valid directive");
    assert_eq!(
        rule.evaluate("10.0.0.1:53", "db.shard7.fabric.dog", &FixedEntropy(0.0)),
        Some("db.shard7.fabric.dog-canary".to_string())
    );
    /* A name that is exactly the suffix rewrites to exactly the replacement. */
    assert_eq!(
        rule.evaluate("10.0.0.1:53", "fabric.dog", &FixedEntropy(0.0)),
        Some("fabric.dog-canary".to_string())
    );
}

#[test]
fn fraction_zero_selects_no_client() {
    for algorithm in ["consistent_hashing", "random"] {
        let directive = format!("suffix {} 0.0 fabric.dog fabric.dog-canary", algorithm);
        let rule = RewriteRule::from_directive(&directive).expect("valid directive");
        for key in ["", "a", "b", "10.240.0.1:40212"] {
            assert_eq!(rule.evaluate(key, "db.fabric.dog", &FixedEntropy(0.0)), None);
        }
    }
}

#[test]
fn fraction_one_selects_every_client() {
    for algorithm in ["consistent_hashing", "random"] {
        let directive = format!("suffix {} 1.0 fabric.dog fabric.dog-canary", algorithm);
        let rule = RewriteRule::from_directive(&directive).expect("valid directive");
        for key in ["", "a", "b", "10.240.0.1:40212"] {
            assert_eq!(
                rule.evaluate(key, "db.fabric.dog", &FixedEntropy(0.999)),
                Some("db.fabric.dog-canary".to_string())
            );
        }
    }
}

#[test]
fn stable_hash_splits_clients_by_bucket() {
    let rule = RewriteRule::from_directive("suffix consistent_hashing 0.5 fabric.dog fabric.dog-canary")
        .expect("valid directive");
    /* Client "a" hashes to bucket 20, client "b" to bucket 77. */
    assert_eq!(
        rule.evaluate("a", "db.fabric.dog", &PanicEntropy),
        Some("db.fabric.dog-canary".to_string())
    );
    assert_eq!(rule.evaluate("b", "db.fabric.dog", &PanicEntropy), None);
}

#[test]
fn stable_hash_is_sticky_per_client() {
    let rule = RewriteRule::from_directive("suffix consistent_hashing 0.5 fabric.dog fabric.dog-canary")
        .expect("valid directive");
    for key in ["a", "b", "10.240.0.1:40212", "2001:db8::1"] {
        let first = rule.evaluate(key, "db.fabric.dog", &PanicEntropy);
        for _ in 0..100 {
            assert_eq!(rule.evaluate(key, "db.fabric.dog", &PanicEntropy), first);
        }
    }
}

#[test]
fn random_sample_decides_per_query() {
    let rule = RewriteRule::from_directive("suffix random 0.5 fabric.dog fabric.dog-canary")
        .expect("valid directive");
    /* Same client, different draws, different outcomes. */
    assert_eq!(
        rule.evaluate("a", "db.fabric.dog", &FixedEntropy(0.3)),
        Some("db.fabric.dog-canary".to_string())
    );
    assert_eq!(rule.evaluate("a", "db.fabric.dog", &FixedEntropy(0.7)), None);
}
