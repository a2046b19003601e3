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
 *  Configuration loading.  A single yaml document holds the canary rewrite
 *  directives; the whole load fails on the first invalid entry, so a running
 *  process never holds a partially parsed configuration.
 */

use yaml_rust::Yaml;

use crate::rewrite::rule::RewriteRule;

#[derive(Debug)]
pub enum Error {
    IoError(String),
    Utf8Error(String),
    YamlError(yaml_rust::ScanError),
    MissingConfig,
    MultipleConfigs,
    InvalidConfig(String),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::IoError(e) => write!(f, "I/O Error: {}", e),
            Error::Utf8Error(e) => write!(f, "UTF8 Decoding error: {}", e),
            Error::YamlError(e) => write!(f, "Yaml error: {}", e),
            Error::MissingConfig => write!(f, "Configuration is empty"),
            Error::MultipleConfigs => {
                write!(f, "Configuration file contains multiple documents")
            }
            Error::InvalidConfig(e) => write!(f, "Invalid Configuration: {}", e),
        }
    }
}

impl std::error::Error for Error {}

pub(crate) fn type_to_name(fragment: &Yaml) -> &'static str {
    match fragment {
        Yaml::Real(_) => "real",
        Yaml::Integer(_) => "integer",
        Yaml::String(_) => "string",
        Yaml::Boolean(_) => "boolean",
        Yaml::Array(_) => "array",
        Yaml::Hash(_) => "hash",
        Yaml::Alias(_) => "alias",
        Yaml::Null => "null",
        Yaml::BadValue => "bad value",
    }
}

pub(crate) fn parse_string(name: &str, fragment: &Yaml) -> Result<Option<String>, Error> {
    match fragment {
        Yaml::Null => Ok(None),
        Yaml::String(s) => Ok(Some(s.clone())),
        e => Err(Error::InvalidConfig(format!(
            "Expected string for {}, got {}",
            name,
            type_to_name(e)
        ))),
    }
}

pub(crate) fn parse_array<T, F>(
    name: &str,
    fragment: &Yaml,
    parser: F,
) -> Result<Option<Vec<T>>, Error>
where
    F: Fn(&str, &Yaml) -> Result<Option<T>, Error>,
{
    match fragment {
        Yaml::Null => Ok(None),
        Yaml::Array(array) => {
            let mut ret = Vec::new();
            for item in array {
                match parser(name, item)? {
                    Some(value) => ret.push(value),
                    None => {
                        return Err(Error::InvalidConfig(format!(
                            "{} entries cannot be null",
                            name
                        )))
                    }
                }
            }
            Ok(Some(ret))
        }
        e => Err(Error::InvalidConfig(format!(
            "Expected array for {}, got {}",
            name,
            type_to_name(e)
        ))),
    }
}

#[derive(Debug)]
pub struct Config {
    pub canary_rewrites: Vec<RewriteRule>,
}

/// Configuration is read-only once loaded; handlers share it without locking.
pub type SharedConfig = std::sync::Arc<Config>;

impl Config {
    fn from_yaml(yaml: &Yaml) -> Result<Self, Error> {
        let mut canary_rewrites = Vec::new();
        match yaml {
            Yaml::Hash(hash) => {
                for (key, value) in hash {
                    match key.as_str() {
                        Some("canary-rewrites") => {
                            canary_rewrites = crate::rewrite::config::parse_canary_rewrites(
                                "canary-rewrites",
                                value,
                            )?
                            .unwrap_or_default();
                        }
                        Some(name) => {
                            return Err(Error::InvalidConfig(format!(
                                "Unknown configuration item {}",
                                name
                            )))
                        }
                        None => {
                            return Err(Error::InvalidConfig(format!(
                                "Configuration keys should be strings, got {}",
                                type_to_name(key)
                            )))
                        }
                    }
                }
            }
            e => {
                return Err(Error::InvalidConfig(format!(
                    "Expected hash at configuration top level, got {}",
                    type_to_name(e)
                )))
            }
        }
        Ok(Config { canary_rewrites })
    }
}

fn load_config_from_string(contents: &str) -> Result<SharedConfig, Error> {
    let docs = yaml_rust::YamlLoader::load_from_str(contents).map_err(Error::YamlError)?;
    match docs.len() {
        0 => Err(Error::MissingConfig),
        1 => Ok(std::sync::Arc::new(Config::from_yaml(&docs[0])?)),
        _ => Err(Error::MultipleConfigs),
    }
}

/// Load configuration from a file.  If the file is executable it is run and
/// its standard output parsed instead, so deployments can generate their
/// configuration on the fly.
pub async fn load_config_from_path(path: &std::path::Path) -> Result<SharedConfig, Error> {
    use std::os::unix::fs::PermissionsExt as _;
    let metadata = tokio::fs::metadata(path)
        .await
        .map_err(|e| Error::IoError(format!("Failed to stat {}: {}", path.display(), e)))?;
    let contents = if metadata.permissions().mode() & 0o111 != 0 {
        let output = tokio::process::Command::new(path)
            .output()
            .await
            .map_err(|e| Error::IoError(format!("Failed to execute {}: {}", path.display(), e)))?;
        if !output.status.success() {
            return Err(Error::IoError(format!(
                "{} exited with {}",
                path.display(),
                output.status
            )));
        }
        output.stdout
    } else {
        tokio::fs::read(path)
            .await
            .map_err(|e| Error::IoError(format!("Failed to read {}: {}", path.display(), e)))?
    };
    let contents = String::from_utf8(contents).map_err(|e| Error::Utf8Error(e.to_string()))?;
    load_config_from_string(&contents)
}

#[cfg(test)]
pub fn load_config_from_string_for_test(contents: &str) -> Result<SharedConfig, Error> {
    load_config_from_string(contents)
}

#[test]
fn load_rewrites() {
    let conf = load_config_from_string_for_test(
        "---
canary-rewrites:
 - suffix consistent_hashing 0.5 fabric.dog fabric.dog-canary
 - suffix random 0.25 fabric.cat fabric.cat-canary
",
    )
    .expect("config should parse");
    assert_eq!(conf.canary_rewrites.len(), 2);
}

#[test]
fn load_empty_rewrites() {
    let conf = load_config_from_string_for_test(
        "---
canary-rewrites:
",
    )
    .expect("config should parse");
    assert!(conf.canary_rewrites.is_empty());
}

#[test]
fn missing_config() {
    assert!(matches!(
        load_config_from_string_for_test(""),
        Err(Error::MissingConfig)
    ));
}

#[test]
fn multiple_configs() {
    assert!(matches!(
        load_config_from_string_for_test(
            "---
canary-rewrites:
---
canary-rewrites:
"
        ),
        Err(Error::MultipleConfigs)
    ));
}

#[test]
fn unknown_config_item() {
    assert_eq!(
        load_config_from_string_for_test(
            "---
canary-rewrite:
 - suffix random 0.5 fabric.dog fabric.dog-canary
"
        )
        .unwrap_err()
        .to_string(),
        "Invalid Configuration: Unknown configuration item canary-rewrite"
    );
}

#[test]
fn wrong_toplevel_type() {
    assert_eq!(
        load_config_from_string_for_test("42").unwrap_err().to_string(),
        "Invalid Configuration: Expected hash at configuration top level, got integer"
    );
}
