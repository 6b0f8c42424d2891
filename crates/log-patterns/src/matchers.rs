//! Fixed Failure-Category Matchers

use regex::Regex;

/// A named matcher for a known failure category
pub struct FixedMatcher {
    /// Stable pattern id
    pub name: &'static str,
    pub description: &'static str,
    pub pattern: Regex,
    /// Categories whose impact warrants CRITICAL regardless of level mix
    pub forced_critical: bool,
    /// Operator hint attached to analysis results
    pub recommendation: &'static str,
}

impl FixedMatcher {
    fn new(
        name: &'static str,
        description: &'static str,
        pattern: &str,
        forced_critical: bool,
        recommendation: &'static str,
    ) -> Option<Self> {
        match Regex::new(pattern) {
            Ok(pattern) => Some(Self {
                name,
                description,
                pattern,
                forced_critical,
                recommendation,
            }),
            // Patterns are compile-time constants; a failure here is a
            // programming error surfaced in tests, not at runtime.
            Err(_) => None,
        }
    }

    /// Whether a message belongs to this category
    pub fn matches(&self, message: &str) -> bool {
        self.pattern.is_match(message)
    }
}

/// The built-in failure category registry
pub fn default_matchers() -> Vec<FixedMatcher> {
    [
        FixedMatcher::new(
            "timeout",
            "operation timeouts",
            r"(?i)\btimeout\b|timed out|deadline exceeded",
            false,
            "Review slow dependencies and tighten client-side deadlines",
        ),
        FixedMatcher::new(
            "out_of_memory",
            "memory exhaustion",
            r"(?i)out of memory|\boom\b|memory exhausted|cannot allocate",
            true,
            "Check process memory limits and recent allocation growth",
        ),
        FixedMatcher::new(
            "database_error",
            "database failures",
            r"(?i)database error|sql error|\bdeadlock\b|connection pool exhausted",
            true,
            "Inspect database health, pool sizing, and long-running transactions",
        ),
        FixedMatcher::new(
            "auth_failure",
            "authentication failures",
            r"(?i)authentication failed|invalid credentials|\bunauthorized\b|access denied",
            false,
            "Audit credential rotation and recent permission changes",
        ),
        FixedMatcher::new(
            "rate_limit",
            "rate limiting",
            r"(?i)rate limit|too many requests|\b429\b",
            false,
            "Add client backoff or raise the quota for the calling service",
        ),
        FixedMatcher::new(
            "disk_full",
            "disk exhaustion",
            r"(?i)no space left|disk full|\benospc\b|quota exceeded",
            true,
            "Free disk space or expand the volume before writes start failing",
        ),
        FixedMatcher::new(
            "network_unreachable",
            "network connectivity",
            r"(?i)network (?:is )?unreachable|connection refused|\beconnrefused\b|no route to host",
            false,
            "Verify routing, DNS, and firewall rules toward the failing peer",
        ),
        FixedMatcher::new(
            "tls_error",
            "TLS failures",
            r"(?i)tls error|ssl error|certificate (?:expired|invalid|verify failed)|handshake failed",
            false,
            "Check certificate expiry and trust chain configuration",
        ),
        FixedMatcher::new(
            "http_404",
            "HTTP not-found responses",
            r"(?i)http(?:/\d\.\d)? 404\b|status(?: code)? 404\b|404 not found",
            false,
            "Confirm route registration and client URL construction",
        ),
        FixedMatcher::new(
            "http_5xx",
            "HTTP server errors",
            r"(?i)http(?:/\d\.\d)? 5\d{2}\b|status(?: code)? 5\d{2}\b|internal server error|bad gateway|service unavailable|gateway timeout",
            false,
            "Check upstream service health and recent deploys",
        ),
    ]
    .into_iter()
    .flatten()
    .collect()
}
