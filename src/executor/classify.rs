use super::CommandOutput;

/// ssh reserves this exit status for its own failures.
const SSH_FAILURE_EXIT_CODE: i32 = 255;

/// (needle, reason) pairs matched against lowercased stderr.
const CONNECTION_PATTERNS: &[(&str, &str)] = &[
    ("could not resolve hostname", "host name could not be resolved"),
    ("name or service not known", "host name could not be resolved"),
    ("connection refused", "connection refused"),
    ("connection timed out", "connection timed out"),
    ("operation timed out", "connection timed out"),
    ("no route to host", "no route to host"),
    ("network is unreachable", "network is unreachable"),
    ("host key verification failed", "host key verification failed"),
    ("permission denied (publickey", "authentication rejected"),
    ("connection closed by", "connection closed by remote host"),
    ("connection reset by", "connection reset by remote host"),
    ("kex_exchange_identification", "connection closed by remote host"),
];

/// Recognises transport failures in a command's stderr.
///
/// Returns a short human readable reason when the text looks like the host
/// could not be reached, `None` when the command itself failed.
pub fn classify_connection_error(stderr: &str) -> Option<String> {
    let lowered = stderr.to_lowercase();
    CONNECTION_PATTERNS
        .iter()
        .find(|(needle, _)| lowered.contains(needle))
        .map(|(_, reason)| reason.to_string())
}

/// [`classify_connection_error`] plus ssh's own failure status.
pub fn connection_failure_reason(
    output: &CommandOutput,
    remote: bool,
) -> Option<String> {
    classify_connection_error(&output.stderr).or_else(|| {
        (remote && output.exit_code == Some(SSH_FAILURE_EXIT_CODE))
            .then(|| format!("ssh exited with status {SSH_FAILURE_EXIT_CODE}"))
    })
}

/// Quotes `s` as one POSIX shell word.
pub fn shell_quote(s: &str) -> String {
    if !s.is_empty()
        && s.chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '/' | ':' | '=' | '@' | ','))
    {
        return s.to_string();
    }
    format!("'{}'", s.replace('\'', r"'\''"))
}
