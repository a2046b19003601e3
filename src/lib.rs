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
 *  Fractional DNS query rewriting for canary rollouts.
 *
 *  A configured fraction of lookups for a domain suffix is redirected to a
 *  replacement suffix, either stickily per client (consistent hashing) or
 *  independently per query (random sampling).  The engine is a pure library
 *  called inline from a host query-handling pipeline.
 */

pub mod config;
pub mod rewrite;
