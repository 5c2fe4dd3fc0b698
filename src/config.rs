// Copyright Istio Authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::str::FromStr;

const ADS_REQUEST_BUFFER: &str = "ADS_REQUEST_BUFFER";
const ADS_MAX_UNBOUND_REQUESTS: &str = "ADS_MAX_UNBOUND_REQUESTS";

const DEFAULT_REQUEST_BUFFER: usize = 100;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Config {
    /// Capacity of the channel between a stream's receive loop and the response builder.
    pub request_buffer_size: usize,
    /// How many requests a proxy may send before its pod metadata is bound. Unlimited if unset.
    pub max_unbound_requests: Option<usize>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            request_buffer_size: DEFAULT_REQUEST_BUFFER,
            max_unbound_requests: None,
        }
    }
}

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("invalid env var {0}={1}")]
    EnvVar(String, String),
}

fn parse<T: FromStr>(env: &str) -> Result<Option<T>, Error> {
    match std::env::var(env) {
        Ok(val) if val.is_empty() => Ok(None),
        Ok(val) => val
            .parse()
            .map(Some)
            .map_err(|_| Error::EnvVar(env.to_string(), val)),
        Err(_) => Ok(None),
    }
}

fn parse_default<T: FromStr>(env: &str, default: T) -> Result<T, Error> {
    parse(env).map(|v| v.unwrap_or(default))
}

pub fn parse_config() -> Result<Config, Error> {
    let request_buffer_size = parse_default(ADS_REQUEST_BUFFER, DEFAULT_REQUEST_BUFFER)?;
    if request_buffer_size == 0 {
        // tokio rejects zero capacity channels.
        return Err(Error::EnvVar(
            ADS_REQUEST_BUFFER.to_string(),
            request_buffer_size.to_string(),
        ));
    }
    let max_unbound_requests = parse::<usize>(ADS_MAX_UNBOUND_REQUESTS)?.filter(|max| *max > 0);

    Ok(Config {
        request_buffer_size,
        max_unbound_requests,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use matches::assert_matches;

    // The environment is process wide, so everything touching it lives in one test.
    #[test]
    fn config_from_env() {
        // SAFETY: no other test in this crate reads or writes these variables.
        unsafe {
            std::env::remove_var(ADS_REQUEST_BUFFER);
            std::env::remove_var(ADS_MAX_UNBOUND_REQUESTS);
        }
        assert_eq!(parse_config().unwrap(), Config::default());

        unsafe {
            std::env::set_var(ADS_REQUEST_BUFFER, "16");
            std::env::set_var(ADS_MAX_UNBOUND_REQUESTS, "3");
        }
        assert_eq!(
            parse_config().unwrap(),
            Config {
                request_buffer_size: 16,
                max_unbound_requests: Some(3),
            }
        );

        unsafe { std::env::set_var(ADS_MAX_UNBOUND_REQUESTS, "0") };
        assert_eq!(parse_config().unwrap().max_unbound_requests, None);

        unsafe { std::env::set_var(ADS_REQUEST_BUFFER, "0") };
        assert_matches!(parse_config(), Err(Error::EnvVar(k, v)) if k == ADS_REQUEST_BUFFER && v == "0");

        unsafe { std::env::set_var(ADS_REQUEST_BUFFER, "lots") };
        assert_matches!(parse_config(), Err(Error::EnvVar(_, v)) if v == "lots");

        unsafe {
            std::env::remove_var(ADS_REQUEST_BUFFER);
            std::env::remove_var(ADS_MAX_UNBOUND_REQUESTS);
        }
    }
}
