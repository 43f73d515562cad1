//! Blocklist ingestion: a line-oriented parser plus the async loader that
//! streams each configured source into the `Blocker`'s set at startup.

use derive_more::{Display, Error, From};
use tracing::{error, info, warn};

use crate::sources::blocker::Blocker;

#[derive(Debug, Display, From, Error)]
pub enum BlocklistError {
    #[display(fmt = "I/O error: {}", _0)]
    Io(std::io::Error),
    #[display(fmt = "HTTP fetch error: {}", _0)]
    Http(reqwest::Error),
}

/// Loads every configured source in turn. A source that cannot be opened
/// or fetched is logged and skipped — one bad list must not prevent the
/// rest from loading, mirroring the chain's "one failed source doesn't
/// mask the others" policy.
pub async fn load_all(blocker: &Blocker, sources: &[String]) {
    for source in sources {
        match load_one(blocker, source).await {
            Ok(count) => info!(source, count, "loaded blocklist source"),
            Err(err) => error!(source, error = %err, "failed to load blocklist source, skipping"),
        }
    }
}

async fn load_one(blocker: &Blocker, source: &str) -> Result<usize, BlocklistError> {
    let text = if source.starts_with("http://") || source.starts_with("https://") {
        reqwest::get(source).await?.text().await?
    } else {
        tokio::fs::read_to_string(source).await?
    };

    let mut count = 0;
    for line in text.lines() {
        match parse_line(line) {
            Some(name) => {
                blocker.insert(&name).await;
                count += 1;
            }
            None if line.trim().is_empty() || line.trim().starts_with('#') => {}
            None => warn!(source, line, "skipping malformed blocklist line"),
        }
    }

    Ok(count)
}

/// Parses one blocklist line into a domain name, if it names one. Returns
/// `None` for blank lines, comments, and lines that don't match either
/// recognized form.
fn parse_line(line: &str) -> Option<String> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return None;
    }

    let mut fields = line.split_whitespace();
    let first = fields.next()?;

    if first == "0.0.0.0" {
        fields.next().map(|domain| domain.to_string())
    } else if fields.next().is_none() {
        Some(first.to_string())
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_a_bare_domain() {
        assert_eq!(parse_line("ads.example"), Some("ads.example".to_string()));
    }

    #[test]
    fn parses_a_hosts_style_entry() {
        assert_eq!(
            parse_line("0.0.0.0 ads.example"),
            Some("ads.example".to_string())
        );
    }

    #[test]
    fn ignores_comments_and_blank_lines() {
        assert_eq!(parse_line("# a comment"), None);
        assert_eq!(parse_line("   "), None);
    }

    #[test]
    fn ignores_lines_with_unexpected_extra_fields() {
        assert_eq!(parse_line("ads.example extra junk"), None);
    }

    #[tokio::test]
    async fn loads_a_local_file_into_the_blocker() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        use std::io::Write;
        writeln!(file, "# comment").unwrap();
        writeln!(file, "ads.example").unwrap();
        writeln!(file, "0.0.0.0 tracker.example").unwrap();

        let blocker = Blocker::new();
        let count = load_one(&blocker, file.path().to_str().unwrap())
            .await
            .unwrap();

        assert_eq!(count, 2);
        assert!(blocker.contains("ads.example").await);
        assert!(blocker.contains("tracker.example").await);
    }

    #[tokio::test]
    async fn one_bad_source_does_not_abort_the_rest() {
        let blocker = Blocker::new();
        load_all(
            &blocker,
            &[
                "/nonexistent/path/blocklist.txt".to_string(),
            ],
        )
        .await;
        assert_eq!(blocker.len().await, 0);
    }
}
