//! Service-step candidate base-URL ordering and loopback rewriting
//! (§4.6). The external registry and remote service fleet themselves are
//! non-goals; this module is the pure, testable logic around picking and
//! normalizing a base URL before an (external) HTTP call is made.

/// Ordered candidate sources, per §4.6: container -> instance ->
/// advertised -> host+port -> fallback.
#[derive(Debug, Clone, Default)]
pub struct CandidateSources {
    pub container: Option<String>,
    pub instance: Option<String>,
    pub advertised: Option<String>,
    pub host_port: Option<String>,
    pub fallback: Option<String>,
}

impl CandidateSources {
    /// The ordered candidate list; the caller tries each in turn and uses
    /// the first that responds.
    pub fn ordered(&self) -> Vec<String> {
        [
            &self.container,
            &self.instance,
            &self.advertised,
            &self.host_port,
            &self.fallback,
        ]
        .into_iter()
        .flatten()
        .cloned()
        .collect()
    }
}

/// When enabled, rewrite a candidate base URL's host to `localhost` if it
/// names the current container/instance, so a same-host caller reaches
/// the service over loopback instead of the (possibly unreachable from
/// inside a sandboxed network) advertised address.
pub fn apply_loopback_rewrite(base_url: &str, enabled: bool, local_hostnames: &[String]) -> String {
    if !enabled {
        return base_url.to_string();
    }
    let Some((scheme_and_sep, rest)) = base_url.split_once("://") else {
        return base_url.to_string();
    };
    let (host_port, path) = match rest.find('/') {
        Some(idx) => (&rest[..idx], &rest[idx..]),
        None => (rest, ""),
    };
    let (host, port) = match host_port.split_once(':') {
        Some((h, p)) => (h, Some(p)),
        None => (host_port, None),
    };
    if !local_hostnames.iter().any(|h| h == host) {
        return base_url.to_string();
    }
    match port {
        Some(p) => format!("{scheme_and_sep}://localhost:{p}{path}"),
        None => format!("{scheme_and_sep}://localhost{path}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ordered_skips_absent_candidates() {
        let sources = CandidateSources {
            container: None,
            instance: Some("http://instance:9000".into()),
            advertised: Some("http://advertised:9000".into()),
            host_port: None,
            fallback: Some("http://fallback:9000".into()),
        };
        assert_eq!(
            sources.ordered(),
            vec![
                "http://instance:9000".to_string(),
                "http://advertised:9000".to_string(),
                "http://fallback:9000".to_string(),
            ]
        );
    }

    #[test]
    fn loopback_rewrite_replaces_known_local_hostname() {
        let rewritten = apply_loopback_rewrite(
            "http://worker-7:9000/path",
            true,
            &["worker-7".to_string()],
        );
        assert_eq!(rewritten, "http://localhost:9000/path");
    }

    #[test]
    fn loopback_rewrite_noop_for_unknown_host() {
        let rewritten = apply_loopback_rewrite(
            "http://remote-service:9000/path",
            true,
            &["worker-7".to_string()],
        );
        assert_eq!(rewritten, "http://remote-service:9000/path");
    }

    #[test]
    fn loopback_rewrite_disabled_is_noop() {
        let rewritten = apply_loopback_rewrite("http://worker-7:9000/path", false, &["worker-7".to_string()]);
        assert_eq!(rewritten, "http://worker-7:9000/path");
    }
}
