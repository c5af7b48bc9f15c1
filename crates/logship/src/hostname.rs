// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Hostname detection for record enrichment.

use std::env;
use tracing::warn;

/// Fallback used when the hostname cannot be determined.
pub const UNKNOWN_HOST: &str = "unknown_host";

/// Get the local hostname.
///
/// Tries the `HOSTNAME` environment variable first (commonly set in
/// containers), then the system hostname, then falls back to
/// [`UNKNOWN_HOST`].
#[must_use]
pub fn get_hostname() -> String {
    if let Ok(hostname) = env::var("HOSTNAME") {
        if !hostname.is_empty() {
            return hostname;
        }
    }

    #[cfg(unix)]
    match nix::unistd::gethostname() {
        Ok(hostname_osstr) => {
            if let Some(hostname) = hostname_osstr.to_str() {
                if !hostname.is_empty() {
                    return hostname.to_string();
                }
            }
        }
        Err(e) => {
            warn!("failed to read system hostname: {e}");
        }
    }

    warn!("could not determine hostname, using {UNKNOWN_HOST:?}");
    UNKNOWN_HOST.to_string()
}
