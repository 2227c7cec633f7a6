// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Credentials and External Values
//!
//! Passwords may be configured in plain text or obfuscated with the `PW:` prefix
//! followed by base64. Broker urls and passwords may also reference the
//! environment with `%env{NAME}` so that secrets stay out of configuration files.

use crate::errors::AmqpError;
use base64::{engine::general_purpose::STANDARD, Engine};

const OBFUSCATED_PREFIX: &str = "PW:";
const ENV_START: &str = "%env{";

/// Decodes a configured password.
///
/// Values without the `PW:` prefix are returned unchanged.
pub fn decode(value: &str) -> Result<String, AmqpError> {
    let Some(encoded) = value.strip_prefix(OBFUSCATED_PREFIX) else {
        return Ok(value.to_owned());
    };

    let bytes = STANDARD
        .decode(encoded.trim())
        .map_err(|err| AmqpError::CredentialError(err.to_string()))?;

    String::from_utf8(bytes).map_err(|err| AmqpError::CredentialError(err.to_string()))
}

/// Obfuscates a password so it can be stored as configuration.
pub fn encode(plain: &str) -> String {
    format!("{}{}", OBFUSCATED_PREFIX, STANDARD.encode(plain.as_bytes()))
}

/// Replaces every `%env{NAME}` with the value of the environment variable `NAME`.
pub fn resolve_external(value: &str) -> Result<String, AmqpError> {
    let mut resolved = String::with_capacity(value.len());
    let mut rest = value;

    while let Some(start) = rest.find(ENV_START) {
        resolved.push_str(&rest[..start]);
        let after = &rest[start + ENV_START.len()..];
        let end = after.find('}').ok_or_else(|| {
            AmqpError::ConfigurationError(format!("unterminated %env in `{value}`"))
        })?;

        let name = &after[..end];
        let var = std::env::var(name).map_err(|_| {
            AmqpError::ConfigurationError(format!("environment variable `{name}` is not set"))
        })?;
        resolved.push_str(&var);
        rest = &after[end + 1..];
    }

    resolved.push_str(rest);
    Ok(resolved)
}
