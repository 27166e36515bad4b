//! Fns to read variables from the environment more conveniently.

use std::env;

use lazy_static::lazy_static;
use tracing::debug;

// Node provider URLs tend to carry an API key in the path or query.
const SECRET_KEY_SUFFIX: &str = "_RPC_URL";

lazy_static! {
    pub static ref ENV_CONFIG: EnvConfig = get_env_config();
}

fn is_secret(key: &str) -> bool {
    key.ends_with(SECRET_KEY_SUFFIX)
}

fn obfuscate_if_secret(key: &str, value: &str) -> String {
    if is_secret(key) {
        let mut last_four = value.to_string();
        last_four.drain(0..value.len().saturating_sub(4));
        format!("****{last_four}")
    } else {
        value.to_string()
    }
}

/// Get an environment variable, encoding found or missing as Option, and panic otherwise.
pub fn get_env_var(key: &str) -> Option<String> {
    let var = match env::var(key) {
        Err(env::VarError::NotPresent) => None,
        Err(e) => panic!("{e}"),
        Ok(var) => Some(var),
    };

    if let Some(ref existing_var) = var {
        let output = obfuscate_if_secret(key, existing_var);
        debug!("env var {key}: {output}");
    } else {
        debug!("env var {key} requested but not found")
    };

    var
}

/// Like [`get_env_var`] but treats a blank value the same as a missing one.
pub fn get_env_var_non_empty(key: &str) -> Option<String> {
    get_env_var(key).filter(|value| !value.trim().is_empty())
}

pub fn get_env_bool(key: &str) -> Option<bool> {
    get_env_var(key).map(|var| match var.to_lowercase().as_str() {
        "true" => true,
        "false" => false,
        "t" => true,
        "f" => false,
        "1" => true,
        "0" => false,
        str => panic!("invalid bool value {str} for {key}"),
    })
}

pub struct EnvConfig {
    pub log_json: bool,
    pub log_perf: bool,
}

pub fn get_env_config() -> EnvConfig {
    EnvConfig {
        log_json: get_env_bool("LOG_JSON").unwrap_or(false),
        log_perf: get_env_bool("LOG_PERF").unwrap_or(false),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_env_var_safe_some() {
        let test_key = "TEST_KEY_SAFE_SOME";
        let test_value = "my-env-value";
        std::env::set_var(test_key, test_value);
        assert_eq!(get_env_var(test_key), Some(test_value.to_string()));
    }

    #[test]
    fn test_get_env_var_safe_none() {
        let key = get_env_var("DOESNT_EXIST");
        assert!(key.is_none());
    }

    #[test]
    fn test_get_env_var_non_empty_blank() {
        let test_key = "TEST_KEY_BLANK";
        std::env::set_var(test_key, "  ");
        assert_eq!(get_env_var_non_empty(test_key), None);
    }

    #[test]
    fn test_get_env_bool_not_there() {
        let flag = get_env_bool("DOESNT_EXIST");
        assert_eq!(flag, None);
    }

    #[test]
    fn test_get_env_bool_true_upper() {
        let test_key = "TEST_KEY_BOOL_TRUE2";
        std::env::set_var(test_key, "TRUE");
        assert_eq!(get_env_bool(test_key), Some(true));
    }

    #[test]
    fn test_get_env_bool_false() {
        let test_key = "TEST_KEY_BOOL_FALSE";
        std::env::set_var(test_key, "0");
        assert_eq!(get_env_bool(test_key), Some(false));
    }

    #[test]
    fn test_obfuscate_if_secret() {
        assert_eq!(
            obfuscate_if_secret("ETHEREUM_RPC_URL", "https://node.example/v2/abcdef1234"),
            "****1234"
        );
        assert_eq!(obfuscate_if_secret("LOG_JSON", "true"), "true");
    }
}
