// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//! Replica identity reported by `/api/info`.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::config::InstanceConfig;

const UNKNOWN: &str = "unknown";

/// Response body of `GET /api/info`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceInfo {
    pub pod: String,
    pub namespace: String,
    pub hostname: String,
    pub container_id: String,
}

impl InstanceInfo {
    /// Resolve the identity of the running process.
    pub fn detect(config: &InstanceConfig) -> Self {
        let hostname = hostname();
        let container_id = read_trimmed(Path::new("/proc/self/hostname"));
        Self::resolve(config, hostname, container_id)
    }

    /// `pod` falls back to the hostname, and so does `container_id`.
    pub fn resolve(config: &InstanceConfig, hostname: String, container_id: Option<String>) -> Self {
        Self {
            pod: config.pod_name.clone().unwrap_or_else(|| hostname.clone()),
            namespace: config.pod_namespace.clone(),
            container_id: container_id.unwrap_or_else(|| hostname.clone()),
            hostname,
        }
    }
}

fn hostname() -> String {
    std::env::var("HOSTNAME")
        .ok()
        .filter(|h| !h.trim().is_empty())
        .or_else(|| read_trimmed(Path::new("/etc/hostname")))
        .unwrap_or_else(|| UNKNOWN.to_string())
}

fn read_trimmed(path: &Path) -> Option<String> {
    std::fs::read_to_string(path)
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn instance(pod_name: Option<&str>) -> InstanceConfig {
        InstanceConfig {
            pod_name: pod_name.map(str::to_string),
            pod_namespace: "default".to_string(),
        }
    }

    #[test]
    fn test_pod_name_wins_over_hostname() {
        let info = InstanceInfo::resolve(&instance(Some("shisha-0")), "node-a".into(), Some("abc123".into()));
        assert_eq!(info.pod, "shisha-0");
        assert_eq!(info.hostname, "node-a");
        assert_eq!(info.container_id, "abc123");
    }

    #[test]
    fn test_fallbacks_use_hostname() {
        let info = InstanceInfo::resolve(&instance(None), "node-a".into(), None);
        assert_eq!(info.pod, "node-a");
        assert_eq!(info.container_id, "node-a");
        assert_eq!(info.namespace, "default");
    }

    #[test]
    fn test_detect_never_returns_empty_fields() {
        let info = InstanceInfo::detect(&instance(None));
        assert!(!info.pod.is_empty());
        assert!(!info.hostname.is_empty());
        assert!(!info.container_id.is_empty());
    }
}
