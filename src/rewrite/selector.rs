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
 *  Fraction selector: maps a client key and a target fraction to a boolean
 *  membership decision.
 */

/* Consistent hashing partitions the client-key space into 100 buckets with a
 * 32-bit FNV-1a hash, so a client always lands on the same side of the split
 * for a fixed fraction.  Random sampling draws fresh entropy on every call
 * and is intentionally non-sticky.
 */

const FNV_OFFSET: u32 = 0x811c_9dc5;
const FNV_PRIME: u32 = 16_777_619;

/* Bucket granularity of the consistent hashing partition. */
const BUCKETS: u32 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Algorithm {
    /// Sticky partitioning: pure function of the client key.
    StableHash,
    /// Independent uniform sampling on every call.
    RandomSample,
}

impl Algorithm {
    pub fn from_config_name(name: &str) -> Option<Self> {
        match name {
            "consistent_hashing" => Some(Algorithm::StableHash),
            "random" => Some(Algorithm::RandomSample),
            _ => None,
        }
    }

    pub fn config_name(&self) -> &'static str {
        match self {
            Algorithm::StableHash => "consistent_hashing",
            Algorithm::RandomSample => "random",
        }
    }
}

impl std::fmt::Display for Algorithm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.config_name())
    }
}

/// A source of uniform draws in [0, 1).  Injected so that sampling decisions
/// can be made deterministic in tests.
pub trait EntropySource: Send + Sync {
    fn draw(&self) -> f64;
}

/// Production entropy, backed by the thread-local generator.
pub struct ThreadEntropy;

impl EntropySource for ThreadEntropy {
    fn draw(&self) -> f64 {
        use rand::Rng as _;
        rand::thread_rng().gen()
    }
}

fn fnv1a(bytes: &[u8]) -> u32 {
    let mut hash = FNV_OFFSET;
    for &b in bytes {
        hash ^= u32::from(b);
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    hash
}

pub(crate) fn hash_bucket(key: &str) -> u32 {
    fnv1a(key.as_bytes()) % BUCKETS
}

/// Decide whether `key` falls inside the selected fraction of the partition
/// space.  Total for every input, including the empty key; the only side
/// effect is consuming entropy on the sampling path.
pub fn should_select(
    key: &str,
    fraction: f64,
    algorithm: Algorithm,
    entropy: &dyn EntropySource,
) -> bool {
    match algorithm {
        Algorithm::StableHash => {
            /* Bucket 0 would pass the inclusive comparison below even at
             * fraction 0, and fraction 0 must select nobody.
             */
            if fraction <= 0.0 {
                return false;
            }
            hash_bucket(key) <= (fraction * BUCKETS as f64) as u32
        }
        Algorithm::RandomSample => entropy.draw() < fraction,
    }
}

#[cfg(test)]
pub(crate) struct FixedEntropy(pub f64);

#[cfg(test)]
impl EntropySource for FixedEntropy {
    fn draw(&self) -> f64 {
        self.0
    }
}

#[test]
fn fnv1a_empty_is_offset_basis() {
    assert_eq!(fnv1a(b""), FNV_OFFSET);
}

#[test]
fn known_buckets() {
    /* fnv1a("a") = 0xE40C292C, fnv1a("b") = 0xE70C2DE5, etc.  The empty key
     * hashes to the offset basis.
     */
    assert_eq!(hash_bucket(""), 61);
    assert_eq!(hash_bucket("a"), 20);
    assert_eq!(hash_bucket("b"), 77);
    assert_eq!(hash_bucket("c"), 58);
    assert_eq!(hash_bucket("e"), 44);
}

#[test]
fn stable_hash_is_deterministic() {
    for key in ["", "a", "10.240.0.1:40212", "2001:db8::1"] {
        let first = should_select(key, 0.5, Algorithm::StableHash, &FixedEntropy(0.0));
        for _ in 0..100 {
            assert_eq!(
                should_select(key, 0.5, Algorithm::StableHash, &FixedEntropy(0.0)),
                first
            );
        }
    }
}

#[test]
fn stable_hash_fraction_boundaries() {
    for key in ["", "a", "b", "c", "e", "somewhere.example.org"] {
        assert!(!should_select(key, 0.0, Algorithm::StableHash, &FixedEntropy(0.0)));
        assert!(should_select(key, 1.0, Algorithm::StableHash, &FixedEntropy(0.0)));
    }
}

#[test]
fn stable_hash_bucket_thresholds() {
    let e = FixedEntropy(0.0);
    /* Buckets: "a"=20, "e"=44, "c"=58, "b"=77. */
    assert!(should_select("a", 0.25, Algorithm::StableHash, &e));
    assert!(!should_select("e", 0.25, Algorithm::StableHash, &e));
    assert!(should_select("a", 0.5, Algorithm::StableHash, &e));
    assert!(should_select("e", 0.5, Algorithm::StableHash, &e));
    assert!(!should_select("c", 0.5, Algorithm::StableHash, &e));
    assert!(!should_select("b", 0.5, Algorithm::StableHash, &e));
    assert!(should_select("c", 0.75, Algorithm::StableHash, &e));
    assert!(!should_select("b", 0.75, Algorithm::StableHash, &e));
}

#[test]
fn stable_hash_monotonic_in_fraction() {
    let e = FixedEntropy(0.0);
    for key in ["", "a", "b", "c", "e", "client-9"] {
        let mut selected = false;
        for fraction in [0.0, 0.25, 0.5, 0.75, 1.0] {
            let now = should_select(key, fraction, Algorithm::StableHash, &e);
            /* The selected set only grows as the fraction increases. */
            assert!(now || !selected, "{} deselected at {}", key, fraction);
            selected = now;
        }
    }
}

#[test]
fn random_sample_uses_injected_entropy() {
    assert!(should_select("a", 0.5, Algorithm::RandomSample, &FixedEntropy(0.3)));
    assert!(!should_select("a", 0.25, Algorithm::RandomSample, &FixedEntropy(0.3)));
}

#[test]
fn random_sample_fraction_boundaries() {
    for draw in [0.0, 0.3, 0.999] {
        assert!(!should_select("a", 0.0, Algorithm::RandomSample, &FixedEntropy(draw)));
        assert!(should_select("a", 1.0, Algorithm::RandomSample, &FixedEntropy(draw)));
    }
}

#[test]
fn thread_entropy_in_unit_interval() {
    for _ in 0..1000 {
        let draw = ThreadEntropy.draw();
        assert!((0.0..1.0).contains(&draw));
    }
}

#[test]
fn algorithm_config_names_round_trip() {
    for algorithm in [Algorithm::StableHash, Algorithm::RandomSample] {
        assert_eq!(
            Algorithm::from_config_name(algorithm.config_name()),
            Some(algorithm)
        );
    }
    assert_eq!(Algorithm::from_config_name("weighted"), None);
}
