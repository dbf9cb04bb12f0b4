//! Forward unsolicited microcontroller output to the log.

use crate::serial::LineLink;
use crate::tracing::prelude::*;

/// Read and log one pending line, if there is one.
///
/// Returns the line that was relayed. Empty lines are dropped, and read
/// errors are logged and swallowed.
pub async fn drain<L: LineLink + ?Sized>(link: &mut L) -> Option<String> {
    match link.has_pending_line() {
        Ok(true) => {}
        Ok(false) => return None,
        Err(e) => {
            warn!(error = %e, "Error checking for microcontroller messages");
            return None;
        }
    }

    match link.read_line().await {
        Ok(line) if line.is_empty() => None,
        Ok(line) => {
            info!("Microcontroller: {}", line);
            Some(line)
        }
        Err(e) => {
            warn!(error = %e, "Error reading microcontroller message");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::ScriptedLink;

    #[tokio::test]
    async fn test_relays_one_line_per_call() {
        let mut link = ScriptedLink::with_lines(&["LED off", "sleep mode"]);
        assert_eq!(drain(&mut link).await.as_deref(), Some("LED off"));
        assert_eq!(drain(&mut link).await.as_deref(), Some("sleep mode"));
        assert_eq!(drain(&mut link).await, None);
    }

    #[tokio::test]
    async fn test_empty_lines_are_suppressed() {
        let mut link = ScriptedLink::with_lines(&["", "awake"]);
        assert_eq!(drain(&mut link).await, None);
        assert_eq!(drain(&mut link).await.as_deref(), Some("awake"));
    }

    #[tokio::test]
    async fn test_read_errors_are_swallowed() {
        let mut link = ScriptedLink::with_lines(&["never read"]);
        link.fail_pending = true;
        assert_eq!(drain(&mut link).await, None);
        assert_eq!(link.remaining(), 1);
    }

    #[tokio::test]
    async fn test_failed_read_of_pending_line_is_swallowed() {
        let mut link = ScriptedLink::with_lines(&["LED off"]);
        link.fail_reads = true;

        assert_eq!(drain(&mut link).await, None);
        assert!(link.written.is_empty());
        assert_eq!(link.closes, 0);

        // The line is still there once reads recover
        link.fail_reads = false;
        assert_eq!(drain(&mut link).await.as_deref(), Some("LED off"));
    }

    #[tokio::test]
    async fn test_relay_never_writes() {
        let mut link = ScriptedLink::with_lines(&["READY", "1"]);
        drain(&mut link).await;
        drain(&mut link).await;
        assert!(link.written.is_empty());
    }
}
