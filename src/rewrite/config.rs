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
 *  Parsing of canary rewrite directives out of the yaml configuration.
 */

use yaml_rust::Yaml;

use super::rule::RewriteRule;
use crate::config::{parse_array, parse_string, Error};

fn parse_canary_rewrite(name: &str, fragment: &Yaml) -> Result<Option<RewriteRule>, Error> {
    match parse_string(name, fragment)? {
        Some(directive) => RewriteRule::from_directive(&directive)
            .map(Some)
            .map_err(|e| Error::InvalidConfig(e.to_string())),
        None => Ok(None),
    }
}

pub(crate) fn parse_canary_rewrites(
    name: &str,
    fragment: &Yaml,
) -> Result<Option<Vec<RewriteRule>>, Error> {
    parse_array(name, fragment, parse_canary_rewrite)
}

#[cfg(test)]
fn parse_fail(config: &str) -> String {
    crate::config::load_config_from_string_for_test(config)
        .unwrap_err()
        .to_string()
}

#[test]
fn directive_parses_from_yaml() {
    let conf = crate::config::load_config_from_string_for_test(
        "---
canary-rewrites:
 - suffix consistent_hashing 0.5 fabric.dog fabric.dog-canary
",
    )
    .expect("config should parse");
    assert_eq!(conf.canary_rewrites.len(), 1);
    assert_eq!(
        conf.canary_rewrites[0].algorithm(),
        crate::rewrite::selector::Algorithm::StableHash
    );
    assert_eq!(conf.canary_rewrites[0].fraction(), 0.5);
}

#[test]
fn unknown_match_kind_fails_load() {
    assert_eq!(
        parse_fail(
            "---
canary-rewrites:
 - prefix random 0.5 fabric.dog fabric.dog-canary
"
        ),
        "Invalid Configuration: Unknown match kind prefix"
    );
}

#[test]
fn unknown_algorithm_fails_load() {
    assert_eq!(
        parse_fail(
            "---
canary-rewrites:
 - suffix weighted 0.5 fabric.dog fabric.dog-canary
"
        ),
        "Invalid Configuration: Unknown algorithm weighted"
    );
}

#[test]
fn bad_fraction_fails_load() {
    assert_eq!(
        parse_fail(
            "---
canary-rewrites:
 - suffix random half fabric.dog fabric.dog-canary
"
        ),
        "Invalid Configuration: Expected floating point fraction but got half"
    );
    assert_eq!(
        parse_fail(
            "---
canary-rewrites:
 - suffix random 1.5 fabric.dog fabric.dog-canary
"
        ),
        "Invalid Configuration: Fraction 1.5 is outside 0.0..=1.0"
    );
}

#[test]
fn wrong_field_count_fails_load() {
    assert_eq!(
        parse_fail(
            "---
canary-rewrites:
 - suffix random 0.5 fabric.dog
"
        ),
        "Invalid Configuration: Expected 5 fields in canary rewrite directive, got 4"
    );
}

#[test]
fn non_string_directive_fails_load() {
    assert_eq!(
        parse_fail(
            "---
canary-rewrites:
 - 42
"
        ),
        "Invalid Configuration: Expected string for canary-rewrites, got integer"
    );
}

#[test]
fn null_directive_fails_load() {
    assert_eq!(
        parse_fail(
            "---
canary-rewrites:
 - ~
"
        ),
        "Invalid Configuration: canary-rewrites entries cannot be null"
    );
}

#[test]
fn non_array_rewrites_fails_load() {
    assert_eq!(
        parse_fail(
            "---
canary-rewrites: suffix random 0.5 fabric.dog fabric.dog-canary
"
        ),
        "Invalid Configuration: Expected array for canary-rewrites, got string"
    );
}
